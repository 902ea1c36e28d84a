//! Error types for the shared-file index.

use std::borrow::Cow;
use thiserror::Error;

/// Errors raised by the shared-file index.
#[derive(Debug, Error)]
pub enum IndexError {
    /// A root spec string could not be parsed.
    #[error("invalid share root '{spec}': {reason}")]
    InvalidRoot {
        /// The offending spec text.
        spec: String,
        /// What was wrong with it.
        reason: Cow<'static, str>,
    },

    /// Two roots collide on alias or absolute path.
    #[error("conflicting share roots: {0}")]
    RootConflict(String),

    /// An exclusion filter is not a valid regular expression.
    #[error("invalid share filter '{pattern}': {source}")]
    InvalidFilter {
        /// The offending pattern.
        pattern: String,
        /// The regex compile error.
        source: regex::Error,
    },

    /// The requested directory is not in the catalog.
    #[error("directory not found: {0}")]
    DirectoryNotFound(String),

    /// The requested remote name does not resolve to a shared file.
    #[error("file not found: {0}")]
    FileNotFound(String),

    /// The on-disk catalog backend failed.
    #[error("catalog store error: {0}")]
    Store(#[from] rusqlite::Error),

    /// Filesystem access failed during a scan.
    #[error("scan I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A refill was requested while another is still running.
    #[error("a share refill is already in progress")]
    RefillInProgress,
}

impl IndexError {
    /// Build an [`IndexError::InvalidRoot`] with static reason text.
    #[must_use]
    pub fn invalid_root(spec: impl Into<String>, reason: &'static str) -> Self {
        IndexError::InvalidRoot {
            spec: spec.into(),
            reason: Cow::Borrowed(reason),
        }
    }
}

/// Result type for index operations.
pub type Result<T> = std::result::Result<T, IndexError>;
