//! The transfer engine: admission, scheduling, governance, execution.

pub mod engine;
pub mod governor;
pub mod record;
pub(crate) mod scheduler;
pub mod state;
pub(crate) mod worker;

pub use engine::{EngineOptions, ListFilter, TransferEngine, TransferKey};
pub use governor::{GOVERNOR_TICK, GovernedReader, RateGovernor};
pub use record::{SpeedWindow, Transfer, TransferFailure};
pub use state::{CompletionKind, TransferDirection, TransferState};
