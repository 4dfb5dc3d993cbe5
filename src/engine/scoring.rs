use std::time::Duration;

use crate::models::Answer;

pub const BASE_POINTS: u32 = 100;
pub const MAX_SPEED_BONUS: u32 = 50;
pub const MAX_POINTS: u32 = BASE_POINTS + MAX_SPEED_BONUS;

pub fn points(correct: bool, remaining: Duration, limit: Duration) -> u32 {
    if !correct {
        return 0;
    }

    let limit_ms = limit.as_millis() as f64;
    if limit_ms == 0.0 {
        return BASE_POINTS;
    }

    let remaining_ms = remaining.as_millis() as f64;
    let bonus = (MAX_SPEED_BONUS as f64 * remaining_ms / limit_ms).round();
    let bonus = bonus.max(0.0).min(MAX_SPEED_BONUS as f64) as u32;

    BASE_POINTS + bonus
}

pub fn total_score(answers: &[Answer]) -> u32 {
    answers.iter().map(|answer| answer.points).sum()
}

pub fn max_score(question_count: usize) -> u32 {
    question_count as u32 * MAX_POINTS
}

pub fn stars(score: u32, max_score: u32) -> u8 {
    if max_score == 0 {
        return 0;
    }

    // percentage thresholds compared without floats so the bounds stay inclusive
    let scaled = score as u64 * 100;
    let max = max_score as u64;

    if scaled >= max * 90 {
        3
    } else if scaled >= max * 75 {
        2
    } else if scaled >= max * 50 {
        1
    } else {
        0
    }
}
