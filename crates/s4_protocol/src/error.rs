//! Error taxonomy shared across the cluster.
//!
//! Every kind that reaches a client maps onto one HTTP status: Conflict
//! and InvalidKey onto 409, NotFound onto 404, Overloaded onto 429,
//! UserCommand onto 400 with the diagnostic triple, Integrity onto 500
//! with the same triple. The mapping itself lives in the server's HTTP
//! layer.

use thiserror::Error;

use crate::wire::CmdOutput;

/// Cluster operation result type.
pub type Result<T> = std::result::Result<T, S4Error>;

/// Cluster errors.
#[derive(Error, Debug)]
pub enum S4Error {
    /// Key already exists, slot already reserved, or wrong owner.
    #[error("conflict: {0}")]
    Conflict(String),

    /// No such key or transfer.
    #[error("not found: {0}")]
    NotFound(String),

    /// Pools saturated; the request was shed and is retryable.
    #[error("overloaded: {0}")]
    Overloaded(String),

    /// A user-supplied shell command exited nonzero or timed out.
    #[error("user command failed with exit code {}", .0.exitcode)]
    UserCommand(CmdOutput),

    /// Checksum disagreement or a transfer copier that exited nonzero.
    #[error("integrity failure with exit code {}", .0.exitcode)]
    Integrity(CmdOutput),

    /// Malformed key.
    #[error("invalid key: {0}")]
    InvalidKey(String),

    /// Malformed request (bad base64, bad port, empty body).
    #[error("bad request: {0}")]
    BadRequest(String),

    /// Server list missing, empty, or unparsable.
    #[error("config error: {0}")]
    Config(String),

    /// IO error (file system operations)
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Anything that should never reach a well-behaved client.
    #[error("internal error: {0}")]
    Internal(String),
}

impl S4Error {
    /// Create a conflict error.
    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    /// Create a not found error.
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    /// Create an internal error.
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// True for errors a client is expected to retry with backoff.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Overloaded(_))
    }
}
