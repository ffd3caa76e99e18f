use thiserror::Error;

/// Fatal pipeline errors.
///
/// Recoverable conditions (generation failures, diversity collisions, low
/// quality scores) are represented as routing decisions inside the engine
/// loop and never surface as error values. Only configuration and
/// persistence problems propagate and abort a run.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("No checkpoint found for run {0}")]
    CheckpointNotFound(String),

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl PipelineError {
    /// True for errors that abort a run rather than being reported back to
    /// the caller as a retriable condition.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, PipelineError::CheckpointNotFound(_))
    }
}
