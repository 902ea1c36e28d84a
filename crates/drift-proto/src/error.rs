//! Error types for overlay protocol operations.

use std::borrow::Cow;
use thiserror::Error;

/// Errors surfaced by an overlay protocol implementation.
///
/// Transfer-time failures are pre-classified by the protocol layer so that
/// callers never inspect message text to decide what happened.
#[derive(Debug, Error, Clone)]
pub enum ProtoError {
    /// The operation did not complete within its deadline.
    #[error("overlay operation timed out: {0}")]
    Timeout(Cow<'static, str>),

    /// The remote peer refused the request outright.
    #[error("peer rejected the request: {0}")]
    PeerRejected(Cow<'static, str>),

    /// The remote side misbehaved at the protocol level.
    #[error("remote protocol error: {0}")]
    Remote(Cow<'static, str>),

    /// Underlying socket or transport failure.
    #[error("network error: {0}")]
    Network(String),

    /// The operation was cancelled by the caller.
    #[error("operation cancelled")]
    Cancelled,

    /// The operation requires a logged-in session.
    #[error("not logged in")]
    NotLoggedIn,

    /// The server rejected the supplied credentials.
    #[error("invalid credentials")]
    InvalidCredentials,

    /// Local file I/O failed while serving or storing bytes.
    #[error("local I/O error: {0}")]
    LocalIo(String),
}

impl ProtoError {
    /// Create a timeout error with static context.
    #[must_use]
    pub const fn timeout(context: &'static str) -> Self {
        ProtoError::Timeout(Cow::Borrowed(context))
    }

    /// Create a peer-rejection error with static context.
    #[must_use]
    pub const fn rejected(context: &'static str) -> Self {
        ProtoError::PeerRejected(Cow::Borrowed(context))
    }

    /// Create a remote-protocol error with static context.
    #[must_use]
    pub const fn remote(context: &'static str) -> Self {
        ProtoError::Remote(Cow::Borrowed(context))
    }

    /// True when the connection itself is gone and a reconnect is warranted.
    #[must_use]
    pub fn is_connection_loss(&self) -> bool {
        matches!(self, ProtoError::Network(_) | ProtoError::NotLoggedIn)
    }
}

impl From<std::io::Error> for ProtoError {
    fn from(err: std::io::Error) -> Self {
        ProtoError::Network(err.to_string())
    }
}

/// Result type for overlay protocol operations.
pub type Result<T> = std::result::Result<T, ProtoError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_loss_classification() {
        assert!(ProtoError::Network("reset".into()).is_connection_loss());
        assert!(ProtoError::NotLoggedIn.is_connection_loss());
        assert!(!ProtoError::timeout("upload").is_connection_loss());
        assert!(!ProtoError::Cancelled.is_connection_loss());
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset by peer");
        let err: ProtoError = io_err.into();
        assert!(matches!(err, ProtoError::Network(_)));
    }
}
