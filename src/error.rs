//! Error types for the background runner.

/// Top-level error type for task lifecycle coordination.
#[derive(Debug, thiserror::Error)]
pub enum RunnerError {
    /// The user or OS declined a required capability. Never retried automatically.
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// The OS refused to elevate the process (quota, throttling). Callers may retry later.
    #[error("resource unavailable: {0}")]
    ResourceUnavailable(String),

    /// Invalid schedule or schedule computation failure.
    #[error("schedule error: {0}")]
    Schedule(String),

    /// Wake timer arm/cancel failure.
    #[error("timer error: {0}")]
    Timer(String),

    /// Persistent option store failure.
    #[error("storage error: {0}")]
    Storage(String),

    /// Configuration error.
    #[error("config error: {0}")]
    Config(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl RunnerError {
    /// Returns `true` for failures a caller may reasonably retry later.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::ResourceUnavailable(_) | Self::Timer(_))
    }
}

/// Convenience result type.
pub type Result<T> = std::result::Result<T, RunnerError>;
