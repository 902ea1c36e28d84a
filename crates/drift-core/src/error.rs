//! Error types for the DRIFT core.
//!
//! One taxonomy covers every core subsystem. Transfer-time I/O failures are
//! captured into the owning transfer's failure field rather than thrown out
//! of the engine's public API; management operations propagate.

use std::borrow::Cow;
use thiserror::Error;

/// Errors raised by core operations.
#[derive(Debug, Error, Clone)]
pub enum CoreError {
    /// The named entity does not exist.
    #[error("not found: {0}")]
    NotFound(Cow<'static, str>),

    /// The entity already exists; for transfers, the same transfer is
    /// already queued or active.
    #[error("already exists: {0}")]
    AlreadyExists(Cow<'static, str>),

    /// The caller supplied a bad argument.
    #[error("invalid argument: {0}")]
    InvalidArgument(Cow<'static, str>),

    /// The operation requires state the system is not in.
    #[error("precondition failed: {0}")]
    PreconditionFailed(Cow<'static, str>),

    /// The caller is not authorized; also covers replayed one-shot tokens.
    #[error("unauthorized: {0}")]
    Unauthorized(Cow<'static, str>),

    /// The operation did not complete within its deadline.
    #[error("timed out: {0}")]
    Timeout(Cow<'static, str>),

    /// The operation was cancelled.
    #[error("cancelled")]
    Cancelled,

    /// The remote peer refused the request.
    #[error("peer rejected: {0}")]
    PeerRejected(Cow<'static, str>),

    /// The remote side violated the protocol.
    #[error("remote protocol error: {0}")]
    RemoteProtocol(Cow<'static, str>),

    /// Local filesystem or database I/O failed.
    #[error("local I/O error: {0}")]
    LocalIo(String),

    /// The agent serving this operation disconnected.
    #[error("agent disconnected: {0}")]
    AgentDisconnected(Cow<'static, str>),

    /// The counterparty is blacklisted.
    #[error("user is blacklisted: {0}")]
    Blacklisted(Cow<'static, str>),

    /// Configuration is invalid.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// An internal invariant was violated.
    #[error("internal error: {0}")]
    Internal(Cow<'static, str>),
}

impl CoreError {
    /// Create a not-found error with static context.
    #[must_use]
    pub const fn not_found(context: &'static str) -> Self {
        CoreError::NotFound(Cow::Borrowed(context))
    }

    /// Create a timeout error with static context.
    #[must_use]
    pub const fn timeout(context: &'static str) -> Self {
        CoreError::Timeout(Cow::Borrowed(context))
    }

    /// Create a precondition error with static context.
    #[must_use]
    pub const fn precondition(context: &'static str) -> Self {
        CoreError::PreconditionFailed(Cow::Borrowed(context))
    }

    /// Create an unauthorized error with static context.
    #[must_use]
    pub const fn unauthorized(context: &'static str) -> Self {
        CoreError::Unauthorized(Cow::Borrowed(context))
    }

    /// Create an internal error with static context.
    #[must_use]
    pub const fn internal(context: &'static str) -> Self {
        CoreError::Internal(Cow::Borrowed(context))
    }

    /// True for failures that end a transfer rather than the operation that
    /// observed them.
    #[must_use]
    pub fn is_transfer_fault(&self) -> bool {
        matches!(
            self,
            CoreError::Timeout(_)
                | CoreError::PeerRejected(_)
                | CoreError::RemoteProtocol(_)
                | CoreError::LocalIo(_)
                | CoreError::AgentDisconnected(_)
        )
    }

    /// True when retrying without intervention cannot succeed.
    #[must_use]
    pub fn is_permanent(&self) -> bool {
        matches!(
            self,
            CoreError::NotFound(_)
                | CoreError::InvalidArgument(_)
                | CoreError::Unauthorized(_)
                | CoreError::Blacklisted(_)
                | CoreError::Configuration(_)
        )
    }
}

impl From<std::io::Error> for CoreError {
    fn from(err: std::io::Error) -> Self {
        CoreError::LocalIo(err.to_string())
    }
}

impl From<drift_proto::ProtoError> for CoreError {
    fn from(err: drift_proto::ProtoError) -> Self {
        use drift_proto::ProtoError;
        match err {
            ProtoError::Timeout(c) => CoreError::Timeout(c),
            ProtoError::PeerRejected(c) => CoreError::PeerRejected(c),
            ProtoError::Remote(c) => CoreError::RemoteProtocol(c),
            ProtoError::Network(s) => CoreError::RemoteProtocol(Cow::Owned(s)),
            ProtoError::Cancelled => CoreError::Cancelled,
            ProtoError::NotLoggedIn => CoreError::precondition("not logged in"),
            ProtoError::InvalidCredentials => CoreError::unauthorized("invalid credentials"),
            ProtoError::LocalIo(s) => CoreError::LocalIo(s),
        }
    }
}

impl From<drift_index::IndexError> for CoreError {
    fn from(err: drift_index::IndexError) -> Self {
        use drift_index::IndexError;
        match err {
            IndexError::DirectoryNotFound(d) => CoreError::NotFound(Cow::Owned(d)),
            IndexError::FileNotFound(f) => CoreError::NotFound(Cow::Owned(f)),
            IndexError::Io(e) => CoreError::LocalIo(e.to_string()),
            other => CoreError::Configuration(other.to_string()),
        }
    }
}

/// Result type for core operations.
pub type Result<T> = std::result::Result<T, CoreError>;
