use thiserror::Error;

/// Failures that can surface from an automation pass.
///
/// A missing element is not an error: locate operations return `Option`
/// and callers decide whether absence matters.
#[derive(Error, Debug)]
pub enum AutomationError {
    /// The expected UI never reached a known state, even after restarting
    /// the host application. Ends the current pass.
    #[error("Environment failure: {0}")]
    EnvironmentFailure(String),

    #[error("Recognition failed: {0}")]
    RecognitionFailure(String),

    /// An iteration ceiling was exceeded.
    #[error("Loop anomaly: {0}")]
    LoopAnomaly(String),

    #[error("Platform-specific error: {0}")]
    PlatformError(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}

impl From<serde_json::Error> for AutomationError {
    fn from(e: serde_json::Error) -> Self {
        AutomationError::Storage(format!("Failed to (de)serialize state: {e}"))
    }
}

impl From<std::io::Error> for AutomationError {
    fn from(e: std::io::Error) -> Self {
        AutomationError::Storage(format!("I/O error: {e}"))
    }
}
