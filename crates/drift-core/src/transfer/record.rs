//! The transfer entity and its invariants.

use crate::error::{CoreError, Result};
use crate::transfer::state::{CompletionKind, TransferDirection, TransferState};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::path::PathBuf;
use std::time::{Duration, Instant, SystemTime};
use uuid::Uuid;

/// Why a transfer ended badly. Persisted alongside the transfer as JSON.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferFailure {
    /// The terminal kind this failure produced.
    pub kind: CompletionKind,
    /// Underlying cause, preserved verbatim.
    pub detail: String,
}

/// One transfer, owned by the engine. Only the engine's single writer per
/// transfer mutates it.
#[derive(Debug, Clone, PartialEq)]
pub struct Transfer {
    /// Stable identifier.
    pub id: Uuid,
    /// Direction.
    pub direction: TransferDirection,
    /// Counterparty username.
    pub username: String,
    /// Remote filename in overlay (backslash) form.
    pub remote_name: String,
    /// Local filename in host form. Agent-hosted content uses the
    /// `agent://` scheme.
    pub local_path: PathBuf,
    /// Size in bytes.
    pub size: u64,
    /// Byte offset at start (resume point).
    pub start_offset: u64,
    /// When the transfer entered the system.
    pub enqueued_at: SystemTime,
    /// When bytes first moved.
    pub started_at: Option<SystemTime>,
    /// When a terminal state was reached.
    pub ended_at: Option<SystemTime>,
    /// Cumulative bytes transferred; monotonically non-decreasing.
    pub bytes_transferred: u64,
    /// Average speed in bytes per second over a sliding window.
    pub average_speed: f64,
    /// Lifecycle state.
    pub state: TransferState,
    /// Failure details for badly-ended transfers.
    pub failure: Option<TransferFailure>,
    /// Queue position, when last computed.
    pub place_in_queue: Option<u32>,
}

impl Transfer {
    /// A fresh transfer in `Requested`.
    #[must_use]
    pub fn new(
        direction: TransferDirection,
        username: &str,
        remote_name: &str,
        local_path: PathBuf,
        size: u64,
    ) -> Self {
        Transfer {
            id: Uuid::new_v4(),
            direction,
            username: username.to_string(),
            remote_name: remote_name.to_string(),
            local_path,
            size,
            start_offset: 0,
            enqueued_at: SystemTime::now(),
            started_at: None,
            ended_at: None,
            bytes_transferred: 0,
            average_speed: 0.0,
            state: TransferState::Requested,
            failure: None,
            place_in_queue: None,
        }
    }

    /// Advance the lifecycle, stamping timestamps.
    ///
    /// Rejects illegal transitions; states never re-enter or reverse.
    pub fn advance(&mut self, next: TransferState) -> Result<()> {
        if !self.state.can_advance_to(next) {
            return Err(CoreError::Internal(
                format!("illegal transfer transition {} -> {}", self.state, next).into(),
            ));
        }
        if next == TransferState::InProgress && self.started_at.is_none() {
            self.started_at = Some(SystemTime::now());
        }
        if next.is_terminal() {
            self.ended_at = Some(SystemTime::now());
        }
        self.state = next;
        Ok(())
    }

    /// Record byte progress. Byte counts never move backwards.
    pub fn record_progress(&mut self, bytes_transferred: u64, average_speed: f64) {
        self.bytes_transferred = self.bytes_transferred.max(bytes_transferred.min(self.size));
        self.average_speed = average_speed;
    }

    /// Force-complete an interrupted transfer during startup recovery.
    ///
    /// Recovery is the one path allowed to bypass transition checks: the
    /// persisted state may be anywhere in the lifecycle, and the process
    /// that owned it is gone.
    pub fn interrupt(&mut self, detail: &str) {
        self.state = TransferState::Completed(CompletionKind::Errored);
        self.failure = Some(TransferFailure {
            kind: CompletionKind::Errored,
            detail: detail.to_string(),
        });
        if self.ended_at.is_none() {
            self.ended_at = Some(SystemTime::now());
        }
    }

    /// Build the re-enqueued successor of an interrupted download.
    ///
    /// Keeps the identifier and enqueue time; resumes from the persisted
    /// byte count.
    #[must_use]
    pub fn requeued(&self) -> Transfer {
        Transfer {
            start_offset: self.bytes_transferred,
            started_at: None,
            ended_at: None,
            average_speed: 0.0,
            state: TransferState::QueuedLocally,
            failure: None,
            place_in_queue: None,
            ..self.clone()
        }
    }

    /// True for terminal states.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// Check the record's internal invariants; used by tests and the store.
    pub fn check_invariants(&self) -> Result<()> {
        if let Some(started) = self.started_at {
            if started < self.enqueued_at {
                return Err(CoreError::internal("started_at before enqueued_at"));
            }
            if let Some(ended) = self.ended_at {
                if ended < started {
                    return Err(CoreError::internal("ended_at before started_at"));
                }
            }
        }
        if self.bytes_transferred > self.size {
            return Err(CoreError::internal("bytes_transferred exceeds size"));
        }
        if self.ended_at.is_some() != self.state.is_terminal() {
            return Err(CoreError::internal("ended_at disagrees with state"));
        }
        Ok(())
    }
}

/// Sliding-window speed estimator.
///
/// Samples are (instant, cumulative bytes); the average is the byte delta
/// across the retained window.
#[derive(Debug)]
pub struct SpeedWindow {
    samples: VecDeque<(Instant, u64)>,
    window: Duration,
}

impl SpeedWindow {
    /// A window of the given length.
    #[must_use]
    pub fn new(window: Duration) -> Self {
        SpeedWindow {
            samples: VecDeque::new(),
            window,
        }
    }

    /// Record the current cumulative byte count.
    pub fn record(&mut self, cumulative_bytes: u64) {
        let now = Instant::now();
        self.samples.push_back((now, cumulative_bytes));
        let Some(horizon) = now.checked_sub(self.window) else {
            return;
        };
        while let Some((t, _)) = self.samples.front() {
            if *t < horizon && self.samples.len() > 2 {
                self.samples.pop_front();
            } else {
                break;
            }
        }
    }

    /// Bytes per second across the window; zero until two samples exist.
    #[must_use]
    pub fn average(&self) -> f64 {
        let (Some((t0, b0)), Some((t1, b1))) = (self.samples.front(), self.samples.back()) else {
            return 0.0;
        };
        let elapsed = t1.duration_since(*t0).as_secs_f64();
        if elapsed <= 0.0 {
            return 0.0;
        }
        (b1 - b0) as f64 / elapsed
    }
}

impl Default for SpeedWindow {
    fn default() -> Self {
        SpeedWindow::new(Duration::from_secs(10))
    }
}
