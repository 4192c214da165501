use thiserror::Error;

/// Errors produced by the session-control layer.
#[derive(Debug, Error)]
pub enum OpshError {
    /// A launch arrived while the operator already has a live session.
    #[error("a session is already active")]
    AlreadyActive,

    /// The child process could not be started.
    #[error("failed to start process: {0}")]
    SpawnFailed(String),

    /// A control operation addressed an operator with no live session.
    #[error("no active session")]
    NoSession,

    /// No output has been recorded, or the output file is gone.
    #[error("no output available")]
    NoOutput,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

pub type OpshResult<T> = Result<T, OpshError>;
