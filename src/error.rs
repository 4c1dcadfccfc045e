//! Error types for the visual timeout manager.

/// Top-level error type for timeout coordination.
#[derive(Debug, thiserror::Error)]
pub enum TimeoutError {
    /// The executor no longer accepts work.
    #[error("executor has been shut down")]
    ExecutorShutdown,

    /// A submitted task was dropped before producing a result.
    #[error("task dropped before completion")]
    TaskDropped,

    /// A worker or timer thread could not be spawned.
    #[error("failed to spawn thread: {0}")]
    Spawn(#[source] std::io::Error),

    /// Configuration error.
    #[error("config error: {0}")]
    Config(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Channel send/receive error.
    #[error("channel error: {0}")]
    Channel(String),

    /// Host bridge protocol error (bad envelope or payload).
    #[error("protocol error: {0}")]
    Protocol(String),

    /// JSON encode/decode error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Convenience result type.
pub type Result<T> = std::result::Result<T, TimeoutError>;
