use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{path::PathBuf, time::Duration};

#[derive(Clone, Debug, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub engine: EngineConfig,

    #[serde(default)]
    pub audio: AudioConfig,

    #[serde(default)]
    pub quiz: Vec<Quiz>,

    #[serde(default)]
    pub question: Vec<Question>,

    #[serde(default)]
    pub sound: Vec<Sound>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub countdown_ticks: u32,
    pub feedback_dwell_ms: u64,
    pub tick_ms: u64,
}

impl EngineConfig {
    pub fn feedback_dwell(&self) -> Duration {
        Duration::from_millis(self.feedback_dwell_ms)
    }

    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_ms.max(1))
    }
}

impl Default for EngineConfig {
    fn default() -> EngineConfig {
        EngineConfig {
            countdown_ticks: 3,
            feedback_dwell_ms: 2000,
            tick_ms: 50,
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    pub url_ttl_secs: i64,
    pub base_url: String,
}

impl Default for AudioConfig {
    fn default() -> AudioConfig {
        AudioConfig {
            url_ttl_secs: 300,
            base_url: String::new(),
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct Sound {
    pub name: String,
    pub path: PathBuf,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Difficulty {
    Easy,
    Medium,
    Hard,
}

impl Difficulty {
    pub fn default_time_limit(self) -> Duration {
        match self {
            Difficulty::Easy => Duration::from_secs(30),
            Difficulty::Medium => Duration::from_secs(20),
            Difficulty::Hard => Duration::from_secs(12),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum QuizStatus {
    Draft,
    #[default]
    Published,
    Archived,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Quiz {
    pub id: String,
    #[serde(default)]
    pub title: String,
    pub difficulty: Difficulty,
    #[serde(default)]
    pub question_count: usize,
    #[serde(default)]
    pub status: QuizStatus,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Question {
    pub id: String,
    pub quiz: String,
    #[serde(default)]
    pub position: u32,
    pub prompt: String,
    #[serde(alias = "choice")]
    pub choices: Vec<Choice>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_limit_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sound: Option<String>,
}

impl Question {
    pub fn time_limit(&self, difficulty: Difficulty) -> Duration {
        self.time_limit_ms
            .map(Duration::from_millis)
            .unwrap_or_else(|| difficulty.default_time_limit())
    }

    pub fn is_correct(&self, choice: usize) -> bool {
        self.choices
            .get(choice)
            .map(|choice| choice.correct)
            .unwrap_or(false)
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Choice {
    pub label: String,
    #[serde(default)]
    pub correct: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct Answer {
    pub question_id: String,
    #[serde(with = "chosen_index")]
    pub chosen: Option<usize>,
    pub correct: bool,
    pub elapsed_ms: u64,
    pub points: u32,
}

impl Answer {
    pub fn timed_out(question_id: impl Into<String>, elapsed: Duration) -> Answer {
        Answer {
            question_id: question_id.into(),
            chosen: None,
            correct: false,
            elapsed_ms: elapsed.as_millis() as u64,
            points: 0,
        }
    }
}

mod chosen_index {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(chosen: &Option<usize>, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_i64(chosen.map(|index| index as i64).unwrap_or(-1))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<usize>, D::Error> {
        let index = i64::deserialize(deserializer)?;
        Ok(if index < 0 { None } else { Some(index as usize) })
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct UserId(pub [u8; 16]);

impl UserId {
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct Identity {
    pub id: UserId,
    pub display_name: String,
    pub avatar: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct Attempt {
    pub id: String,
    pub user_id: String,
    pub display_name: String,
    pub avatar: String,
    pub quiz_id: String,
    pub answers: Vec<Answer>,
    pub score: u32,
    pub max_score: u32,
    pub stars: u8,
    pub completed_at: DateTime<Utc>,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct AttemptRecord {
    pub id: String,
    pub user_id: String,
    pub display_name: String,
    pub avatar: String,
    pub quiz_id: String,
    pub score: u32,
    pub max_score: u32,
    pub stars: u8,
    pub answers: String,
    pub time: DateTime<Utc>,
}

impl AttemptRecord {
    pub fn from_attempt(attempt: &Attempt) -> serde_json::Result<AttemptRecord> {
        Ok(AttemptRecord {
            id: attempt.id.clone(),
            user_id: attempt.user_id.clone(),
            display_name: attempt.display_name.clone(),
            avatar: attempt.avatar.clone(),
            quiz_id: attempt.quiz_id.clone(),
            score: attempt.score,
            max_score: attempt.max_score,
            stars: attempt.stars,
            answers: serde_json::to_string(&attempt.answers)?,
            time: attempt.completed_at,
        })
    }

    pub fn into_attempt(self) -> serde_json::Result<Attempt> {
        Ok(Attempt {
            answers: serde_json::from_str(&self.answers)?,
            id: self.id,
            user_id: self.user_id,
            display_name: self.display_name,
            avatar: self.avatar,
            quiz_id: self.quiz_id,
            score: self.score,
            max_score: self.max_score,
            stars: self.stars,
            completed_at: self.time,
        })
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct QuizResult {
    pub attempt_id: Option<String>,
    pub quiz_id: String,
    pub score: u32,
    pub max_score: u32,
    pub stars: u8,
    pub answers: Vec<Answer>,
    pub questions: Vec<Question>,
}

impl QuizResult {
    pub fn is_persisted(&self) -> bool {
        self.attempt_id.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn difficulty_defaults() {
        assert_eq!(Difficulty::Easy.default_time_limit(), Duration::from_secs(30));
        assert_eq!(Difficulty::Medium.default_time_limit(), Duration::from_secs(20));
        assert_eq!(Difficulty::Hard.default_time_limit(), Duration::from_secs(12));
    }

    #[test]
    fn question_override_beats_difficulty() {
        let mut question = Question {
            id: "q1".into(),
            quiz: "z".into(),
            position: 0,
            prompt: "?".into(),
            choices: vec![],
            time_limit_ms: Some(7000),
            sound: None,
        };
        assert_eq!(question.time_limit(Difficulty::Easy), Duration::from_millis(7000));

        question.time_limit_ms = None;
        assert_eq!(question.time_limit(Difficulty::Hard), Duration::from_secs(12));
    }

    #[test]
    fn timed_out_answer_serializes_minus_one() {
        let answer = Answer::timed_out("q3", Duration::from_secs(20));

        let json = serde_json::to_value(&answer).unwrap();
        assert_eq!(json["chosen"], -1);
        assert_eq!(json["points"], 0);

        let back: Answer = serde_json::from_value(json).unwrap();
        assert_eq!(back.chosen, None);
    }

    #[test]
    fn config_parses_nested_choices() {
        let config: Config = toml::from_str(
            r#"
            [engine]
            feedback_dwell_ms = 1500

            [[quiz]]
            id = "rivers"
            difficulty = "medium"

            [[question]]
            id = "r1"
            quiz = "rivers"
            position = 1
            prompt = "Longest river?"
            sound = "splash"

            [[question.choice]]
            label = "Nile"
            correct = true

            [[question.choice]]
            label = "Thames"
            "#,
        )
        .unwrap();

        assert_eq!(config.engine.feedback_dwell_ms, 1500);
        assert_eq!(config.engine.countdown_ticks, 3);
        assert_eq!(config.quiz[0].status, QuizStatus::Published);
        assert_eq!(config.question[0].choices.len(), 2);
        assert!(config.question[0].is_correct(0));
        assert!(!config.question[0].is_correct(1));
        assert!(!config.question[0].is_correct(9));
    }
}
