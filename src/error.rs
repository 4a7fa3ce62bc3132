use thiserror::Error;

/// Result type for pattern invocations
pub type Result<T> = std::result::Result<T, PatternError>;

/// Errors that can occur while running a parallel pattern
#[derive(Error, Debug)]
pub enum PatternError {
    /// Concurrency degree below one
    #[error("Concurrency degree must be at least 1, got {0}")]
    InvalidConcurrency(usize),

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// A user callable panicked inside a stage
    #[error("Stage `{stage}` panicked: {message}")]
    CallablePanicked { stage: String, message: String },

    /// The OS refused to start a worker thread
    #[error("Failed to spawn thread for `{stage}`: {source}")]
    Spawn {
        stage: String,
        #[source]
        source: std::io::Error,
    },

    /// Thread join error
    #[error("Thread join error: {0}")]
    ThreadError(String),

    /// The queue was closed while tearing down a failed invocation
    #[error("Queue closed during teardown")]
    QueueClosed,

    /// Tag reuse or an undrained reorder buffer
    #[error("Ordering protocol violation: {0}")]
    ProtocolViolation(String),
}
