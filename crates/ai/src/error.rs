use thiserror::Error;

#[derive(Debug, Error)]
pub enum AiError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("assistant unavailable: {0}")]
    Unavailable(String),

    #[error("upstream model error: {0}")]
    Upstream(String),
}
