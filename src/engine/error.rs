use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("quiz not found: {0}")]
    QuizNotFound(String),

    #[error("quiz {0} has no questions")]
    NoQuestions(String),

    #[error("catalog lookup failed: {0}")]
    Catalog(#[source] anyhow::Error),

    #[error("session abandoned before the last question")]
    Abandoned,
}
