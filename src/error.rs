use crate::config::ConfigError;
use crate::engine::EngineError;
use thiserror::Error;

/// Unified application error type.
///
/// Library layers keep their own error enums; this one gathers them for the
/// binary so `main` can use `?` throughout.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error("An I/O error occurred: {0}")]
    Io(#[from] std::io::Error),

    #[error("A serialization error occurred: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("could not install logger: {0}")]
    Logging(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A print finished in a state other than completed.
    #[error("print on {address} ended as {outcome}")]
    PrintFailed { address: String, outcome: String },
}

pub type AppResult<T> = Result<T, AppError>;
