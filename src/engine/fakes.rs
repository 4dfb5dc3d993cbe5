//! In-memory collaborators for engine tests.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::Utc;
use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use super::{
    scoring::{stars, total_score},
    AttemptStore, AudioPlayer, Catalog,
};
use crate::models::{
    Answer, Attempt, Choice, Difficulty, Identity, Question, Quiz, QuizStatus, UserId,
};

pub fn player() -> Identity {
    Identity {
        id: UserId([7; 16]),
        display_name: "river".into(),
        avatar: "otter".into(),
    }
}

pub fn answer(question_id: &str, chosen: Option<usize>, points: u32) -> Answer {
    Answer {
        question_id: question_id.into(),
        chosen,
        correct: points > 0,
        elapsed_ms: 0,
        points,
    }
}

/// A medium quiz whose questions all have the right answer at index 0.
pub fn medium_quiz(count: usize) -> (Quiz, Vec<Question>) {
    let quiz = Quiz {
        id: "rivers".into(),
        title: "Rivers".into(),
        difficulty: Difficulty::Medium,
        question_count: 0,
        status: QuizStatus::Published,
    };

    let questions = (0..count)
        .map(|index| Question {
            id: format!("q{}", index + 1),
            quiz: quiz.id.clone(),
            position: index as u32,
            prompt: format!("Question {}", index + 1),
            choices: vec![
                Choice {
                    label: "right".into(),
                    correct: true,
                },
                Choice {
                    label: "wrong".into(),
                    correct: false,
                },
            ],
            time_limit_ms: None,
            sound: None,
        })
        .collect();

    (quiz, questions)
}

#[derive(Default)]
pub struct FakeCatalog {
    pub quiz: Option<Quiz>,
    pub questions: Vec<Question>,
    pub fail: bool,
    pub audio_delay: Duration,
}

impl FakeCatalog {
    pub fn new(quiz: Quiz, questions: Vec<Question>) -> FakeCatalog {
        FakeCatalog {
            quiz: Some(quiz),
            questions,
            fail: false,
            audio_delay: Duration::ZERO,
        }
    }
}

#[async_trait]
impl Catalog for FakeCatalog {
    async fn quiz(&self, id: &str) -> Result<Option<Quiz>> {
        if self.fail {
            return Err(anyhow!("catalog offline"));
        }
        Ok(self.quiz.clone().filter(|quiz| quiz.id == id))
    }

    async fn quiz_questions(&self, quiz_id: &str) -> Result<Vec<Question>> {
        Ok(self
            .questions
            .iter()
            .filter(|question| question.quiz == quiz_id)
            .cloned()
            .collect())
    }

    async fn audio_url(&self, sound: &str) -> Result<String> {
        if !self.audio_delay.is_zero() {
            tokio::time::sleep(self.audio_delay).await;
        }
        if sound == "missing" {
            return Err(anyhow!("unknown sound {}", sound));
        }
        Ok(format!("/audio/{}", sound))
    }
}

#[derive(Default)]
pub struct FakeStore {
    pub fail_submit: bool,
    pub fail_play_count: bool,
    pub submitted: Mutex<Vec<Attempt>>,
    pub plays: Mutex<u64>,
}

impl FakeStore {
    pub fn submitted(&self) -> Vec<Attempt> {
        self.submitted.lock().unwrap().clone()
    }

    pub fn plays(&self) -> u64 {
        *self.plays.lock().unwrap()
    }
}

#[async_trait]
impl AttemptStore for FakeStore {
    async fn submit_attempt(
        &self,
        identity: &Identity,
        quiz_id: &str,
        answers: &[Answer],
        max_score: u32,
    ) -> Result<Attempt> {
        if self.fail_submit {
            return Err(anyhow!("store unavailable"));
        }

        let mut submitted = self.submitted.lock().unwrap();
        let score = total_score(answers);
        let attempt = Attempt {
            id: format!("attempt-{}", submitted.len() + 1),
            user_id: identity.id.to_hex(),
            display_name: identity.display_name.clone(),
            avatar: identity.avatar.clone(),
            quiz_id: quiz_id.into(),
            answers: answers.to_vec(),
            score,
            max_score,
            stars: stars(score, max_score),
            completed_at: Utc::now(),
        };
        submitted.push(attempt.clone());

        Ok(attempt)
    }

    async fn increment_play_count(&self, _quiz_id: &str) -> Result<u64> {
        if self.fail_play_count {
            return Err(anyhow!("counter unavailable"));
        }
        let mut plays = self.plays.lock().unwrap();
        *plays += 1;
        Ok(*plays)
    }

    async fn leaderboard(&self, quiz_id: &str, limit: usize) -> Result<Vec<Attempt>> {
        let mut attempts: Vec<Attempt> = self
            .submitted()
            .into_iter()
            .filter(|attempt| attempt.quiz_id == quiz_id)
            .collect();
        attempts.sort_by(|a, b| b.score.cmp(&a.score));
        attempts.truncate(limit);
        Ok(attempts)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AudioEvent {
    Start(String),
    Stop,
}

#[derive(Clone, Default)]
pub struct FakePlayer {
    pub fail: bool,
    pub events: Arc<Mutex<Vec<AudioEvent>>>,
}

impl FakePlayer {
    pub fn events(&self) -> Vec<AudioEvent> {
        self.events.lock().unwrap().clone()
    }
}

impl AudioPlayer for FakePlayer {
    fn start(&mut self, url: &str) -> Result<()> {
        if self.fail {
            return Err(anyhow!("no audio device"));
        }
        self.events
            .lock()
            .unwrap()
            .push(AudioEvent::Start(url.into()));
        Ok(())
    }

    fn stop(&mut self) {
        self.events.lock().unwrap().push(AudioEvent::Stop);
    }
}
