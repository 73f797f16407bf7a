use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Failure taxonomy for the control core. Auth rejections are not errors;
/// they are ordinary state-machine transitions.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid input: {0}")]
    Input(String),

    #[error("preprocessing failed: {0}")]
    Preprocessing(String),

    #[error("candidate scoring failed: {0}")]
    Scoring(String),

    #[error("invalid configuration for `{key}`: {message}")]
    Config { key: &'static str, message: String },

    #[error("worker pool failure: {0}")]
    Concurrency(String),
}
