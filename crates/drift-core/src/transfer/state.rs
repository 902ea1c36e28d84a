//! Transfer lifecycle state machine.
//!
//! States advance monotonically; no state is ever re-entered. Terminal
//! states carry a completion kind. Cancellation is reachable from every
//! non-terminal state; rejection only from `Requested`; errors only once
//! work has begun.

use serde::{Deserialize, Serialize};

/// Which way bytes flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransferDirection {
    /// Serving bytes to a peer.
    Upload,
    /// Fetching bytes from a peer.
    Download,
}

impl TransferDirection {
    /// Stable token for persistence and logging.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            TransferDirection::Upload => "upload",
            TransferDirection::Download => "download",
        }
    }

    /// Parse a persistence token.
    #[must_use]
    pub fn from_str_token(token: &str) -> Option<Self> {
        match token {
            "upload" => Some(TransferDirection::Upload),
            "download" => Some(TransferDirection::Download),
            _ => None,
        }
    }

    /// Array index for per-direction tables.
    #[must_use]
    pub fn index(&self) -> usize {
        match self {
            TransferDirection::Upload => 0,
            TransferDirection::Download => 1,
        }
    }
}

impl std::fmt::Display for TransferDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a completed transfer ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompletionKind {
    /// All bytes moved and were acknowledged.
    Succeeded,
    /// Cancelled by the operator or shutdown.
    Cancelled,
    /// The peer or network went silent past the deadline.
    TimedOut,
    /// The peer refused the request.
    Rejected,
    /// An error ended the transfer mid-flight.
    Errored,
}

impl std::fmt::Display for CompletionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            CompletionKind::Succeeded => "succeeded",
            CompletionKind::Cancelled => "cancelled",
            CompletionKind::TimedOut => "timed out",
            CompletionKind::Rejected => "rejected",
            CompletionKind::Errored => "errored",
        };
        f.write_str(text)
    }
}

/// Lifecycle state of one transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferState {
    /// Accepted into the system, not yet queued.
    Requested,
    /// Held by the local scheduler.
    QueuedLocally,
    /// Waiting in the remote peer's queue.
    QueuedRemotely,
    /// Admitted; opening streams and connections.
    Initializing,
    /// Bytes are moving.
    InProgress,
    /// Terminal.
    Completed(CompletionKind),
}

impl TransferState {
    /// True for terminal states.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, TransferState::Completed(_))
    }

    /// The completion kind, for terminal states.
    #[must_use]
    pub fn completion(&self) -> Option<CompletionKind> {
        match self {
            TransferState::Completed(kind) => Some(*kind),
            _ => None,
        }
    }

    /// Monotonic position in the lifecycle.
    #[must_use]
    pub fn rank(&self) -> u8 {
        match self {
            TransferState::Requested => 0,
            TransferState::QueuedLocally => 1,
            TransferState::QueuedRemotely => 2,
            TransferState::Initializing => 3,
            TransferState::InProgress => 4,
            TransferState::Completed(_) => 5,
        }
    }

    /// Whether advancing to `next` is legal from this state.
    #[must_use]
    pub fn can_advance_to(&self, next: TransferState) -> bool {
        if self.is_terminal() {
            return false;
        }
        match next {
            TransferState::Completed(CompletionKind::Cancelled) => true,
            TransferState::Completed(CompletionKind::Rejected) => {
                *self == TransferState::Requested
            }
            TransferState::Completed(CompletionKind::TimedOut) => matches!(
                self,
                TransferState::QueuedRemotely
                    | TransferState::Initializing
                    | TransferState::InProgress
            ),
            TransferState::Completed(CompletionKind::Errored) => matches!(
                self,
                TransferState::Initializing | TransferState::InProgress
            ),
            TransferState::Completed(CompletionKind::Succeeded) => {
                *self == TransferState::InProgress
            }
            // Forward motion only; intermediate states may be skipped.
            _ => next.rank() > self.rank(),
        }
    }

    /// Stable token for persistence.
    #[must_use]
    pub fn as_token(&self) -> &'static str {
        match self {
            TransferState::Requested => "requested",
            TransferState::QueuedLocally => "queued_locally",
            TransferState::QueuedRemotely => "queued_remotely",
            TransferState::Initializing => "initializing",
            TransferState::InProgress => "in_progress",
            TransferState::Completed(CompletionKind::Succeeded) => "completed_succeeded",
            TransferState::Completed(CompletionKind::Cancelled) => "completed_cancelled",
            TransferState::Completed(CompletionKind::TimedOut) => "completed_timed_out",
            TransferState::Completed(CompletionKind::Rejected) => "completed_rejected",
            TransferState::Completed(CompletionKind::Errored) => "completed_errored",
        }
    }

    /// Parse a persistence token.
    #[must_use]
    pub fn from_token(token: &str) -> Option<Self> {
        let state = match token {
            "requested" => TransferState::Requested,
            "queued_locally" => TransferState::QueuedLocally,
            "queued_remotely" => TransferState::QueuedRemotely,
            "initializing" => TransferState::Initializing,
            "in_progress" => TransferState::InProgress,
            "completed_succeeded" => TransferState::Completed(CompletionKind::Succeeded),
            "completed_cancelled" => TransferState::Completed(CompletionKind::Cancelled),
            "completed_timed_out" => TransferState::Completed(CompletionKind::TimedOut),
            "completed_rejected" => TransferState::Completed(CompletionKind::Rejected),
            "completed_errored" => TransferState::Completed(CompletionKind::Errored),
            _ => return None,
        };
        Some(state)
    }
}

impl std::fmt::Display for TransferState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_token())
    }
}
