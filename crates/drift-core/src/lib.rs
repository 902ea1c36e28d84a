//! # DRIFT Core
//!
//! The engineering heart of the DRIFT daemon:
//!
//! - **Transfer engine**: bidirectional upload/download management with
//!   per-group scheduling, slot and bandwidth limits, a state-machine
//!   lifecycle, cancellation, and synchronous persistence.
//! - **Overlay session controller**: the long-running server connection
//!   with automatic reconnect (exponential backoff plus jitter).
//! - **Runtime fabric**: typed event bus, atomic state-snapshot store,
//!   named clock ticks, keyed timed waiters, group policies, configuration
//!   snapshots with typed change classification, and blacklist parsing.
//!
//! The overlay wire protocol lives behind [`drift_proto::OverlayClient`];
//! the share catalog behind [`drift_index::SharesIndex`]; durable storage
//! behind the [`persist::TransferStore`] seam; agent-hosted content behind
//! the [`content::RemoteContent`] seam.

pub mod blacklist;
pub mod clock;
pub mod config;
pub mod content;
pub mod error;
pub mod events;
pub mod groups;
pub mod persist;
pub mod session;
pub mod state;
pub mod transfer;
pub mod waiter;

#[cfg(test)]
pub(crate) mod testing;

pub use blacklist::{Blacklist, BlacklistFormat, IpRange};
pub use clock::{Clock, Tick};
pub use config::{
    ApplyOutcome, ConfigChange, ConfigSnapshot, GroupConfig, GroupLimits, GroupsConfig,
    ResumePolicy, Subsystem,
};
pub use content::{AgentLocation, RemoteContent, RemoteFileInfo, RemoteShare, UploadCompletion};
pub use error::{CoreError, Result};
pub use events::{Event, EventBus};
pub use groups::{
    BLACKLISTED_GROUP, DEFAULT_GROUP, GroupPolicy, GroupRegistry, LEECHERS_GROUP,
    LeecherThresholds, QueueStrategy,
};
pub use persist::{MemoryTransferStore, TransferStore};
pub use session::{SessionController, SessionPhase, SessionSnapshot, backoff_delay};
pub use state::{PendingActions, ServerState, ShareScanState, StateSnapshot, StateStore};
pub use transfer::{
    CompletionKind, EngineOptions, ListFilter, Transfer, TransferDirection, TransferEngine,
    TransferFailure, TransferKey, TransferState,
};
pub use waiter::{RegisteredWait, WaitKey, WaitOp, WaitRegistry};
