use anyhow::Result;
use async_trait::async_trait;

use crate::models::{Answer, Attempt, Identity, Question, Quiz};

pub mod error;
#[cfg(test)]
pub mod fakes;
pub mod finalizer;
pub mod scoring;
pub mod session;
pub mod timer;

pub use error::EngineError;
pub use finalizer::AttemptFinalizer;
pub use session::{Phase, SessionController, SessionInput, SessionView};

#[async_trait]
pub trait Catalog: Send + Sync {
    async fn quiz(&self, id: &str) -> Result<Option<Quiz>>;

    async fn quiz_questions(&self, quiz_id: &str) -> Result<Vec<Question>>;

    async fn audio_url(&self, sound: &str) -> Result<String>;
}

#[async_trait]
pub trait AttemptStore: Send + Sync {
    async fn submit_attempt(
        &self,
        identity: &Identity,
        quiz_id: &str,
        answers: &[Answer],
        max_score: u32,
    ) -> Result<Attempt>;

    async fn increment_play_count(&self, quiz_id: &str) -> Result<u64>;

    /// Best scores first. Equal scores keep whatever order the store has.
    async fn leaderboard(&self, quiz_id: &str, limit: usize) -> Result<Vec<Attempt>>;
}

/// Plays a sound cue. At most one cue plays at a time and stopping an idle
/// player is a no-op.
pub trait AudioPlayer: Send {
    fn start(&mut self, url: &str) -> Result<()>;

    fn stop(&mut self);
}
