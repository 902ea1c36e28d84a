//! Per-transfer byte pump tasks.
//!
//! One task owns each admitted transfer: it opens the byte source (local
//! disk or agent fabric), drives the overlay protocol call, samples
//! progress, persists periodic snapshots, and settles the terminal state.
//! Slots are released before the terminal state is published. A cancelled
//! task gets five seconds to unwind before it is declared stuck and logged.

use crate::content::AgentLocation;
use crate::error::{CoreError, Result};
use crate::transfer::engine::{EngineInner, TransferKey};
use crate::transfer::governor::GovernedReader;
use crate::transfer::record::{SpeedWindow, Transfer, TransferFailure};
use crate::transfer::state::{CompletionKind, TransferDirection, TransferState};
use drift_proto::{DownloadOptions, PacerFn, ProgressFn, UploadOptions};
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::io::{AsyncSeekExt, SeekFrom};
use tokio_util::sync::CancellationToken;

/// Progress sampling cadence.
const SAMPLE_INTERVAL: Duration = Duration::from_millis(500);
/// Persist cadence while bytes are moving.
const PERSIST_INTERVAL: Duration = Duration::from_secs(5);
/// How long a cancelled task may take to unwind.
const UNWIND_DEADLINE: Duration = Duration::from_secs(5);

/// Spawn the worker for an admitted transfer.
pub(crate) fn spawn(
    inner: Arc<EngineInner>,
    key: TransferKey,
    group: String,
    direction: TransferDirection,
) {
    tokio::spawn(async move {
        let Some(cancel) = inner.registry.get(&key).map(|h| h.cancel.clone()) else {
            inner.release_slots(direction, &group);
            return;
        };

        let outcome = match direction {
            TransferDirection::Upload => drive_upload(&inner, &key, &group, &cancel).await,
            TransferDirection::Download => drive_download(&inner, &key, &group, &cancel).await,
        };

        // Slots come back before the terminal state is visible.
        inner.release_slots(direction, &group);
        settle(&inner, &key, direction, outcome).await;
        inner.notify_direction(direction);
    });
}

/// Publish the terminal state matching the drive outcome.
async fn settle(
    inner: &Arc<EngineInner>,
    key: &TransferKey,
    direction: TransferDirection,
    outcome: Result<()>,
) {
    let (kind, failure) = match &outcome {
        Ok(()) => (CompletionKind::Succeeded, None),
        Err(CoreError::Cancelled) => (CompletionKind::Cancelled, None),
        Err(CoreError::Timeout(detail)) => (
            CompletionKind::TimedOut,
            Some(TransferFailure {
                kind: CompletionKind::TimedOut,
                detail: detail.to_string(),
            }),
        ),
        Err(err) => (
            CompletionKind::Errored,
            Some(TransferFailure {
                kind: CompletionKind::Errored,
                detail: err.to_string(),
            }),
        ),
    };

    // Success from a state that never saw a byte (empty files) passes
    // through InProgress; errors from the remote queue pass through
    // Initializing. Both keep the lifecycle monotonic.
    let current = match inner.snapshot(key) {
        Ok(snapshot) => snapshot.state,
        Err(_) => return, // removed concurrently
    };
    if current.is_terminal() {
        return;
    }
    let needs_bridge = match kind {
        CompletionKind::Succeeded => current != TransferState::InProgress,
        CompletionKind::Errored => current.rank() < TransferState::Initializing.rank(),
        _ => false,
    };
    if needs_bridge {
        let bridge = match kind {
            CompletionKind::Succeeded => TransferState::InProgress,
            _ => TransferState::Initializing,
        };
        if let Err(err) = inner.transition(key, bridge, None) {
            tracing::debug!(id = %key.id, error = %err, "bridge transition failed");
        }
    }

    match inner.transition(key, TransferState::Completed(kind), failure) {
        Ok(snapshot) => {
            log_settled(&snapshot, &outcome);
            if direction == TransferDirection::Upload && kind == CompletionKind::Succeeded {
                let speed = snapshot.average_speed.max(0.0) as u64;
                if let Err(err) = inner.overlay.send_upload_speed(speed).await {
                    tracing::debug!(error = %err, "upload speed report failed");
                }
            }
        }
        Err(err) => {
            tracing::debug!(id = %key.id, error = %err, "terminal transition failed");
        }
    }
}

fn log_settled(snapshot: &Transfer, outcome: &Result<()>) {
    match outcome {
        Ok(()) => tracing::info!(
            id = %snapshot.id,
            user = %snapshot.username,
            bytes = snapshot.bytes_transferred,
            "transfer completed"
        ),
        Err(CoreError::Cancelled) => tracing::info!(
            id = %snapshot.id,
            user = %snapshot.username,
            "transfer cancelled"
        ),
        Err(err) => tracing::warn!(
            id = %snapshot.id,
            user = %snapshot.username,
            error = %err,
            "transfer failed"
        ),
    }
}

async fn drive_upload(
    inner: &Arc<EngineInner>,
    key: &TransferKey,
    group: &str,
    cancel: &CancellationToken,
) -> Result<()> {
    let snapshot = inner.snapshot(key)?;
    let progress = Arc::new(AtomicU64::new(snapshot.start_offset));

    let (source, completion) = match AgentLocation::parse(&snapshot.local_path) {
        Some(location) => {
            let remote = inner
                .remote
                .as_ref()
                .ok_or_else(|| CoreError::precondition("no agent fabric configured"))?;
            let timeout = inner.options.read().agent_fetch_timeout;
            let (stream, completion) = remote
                .fetch(&location.agent, &location.filename, timeout)
                .await?;
            (stream, Some(completion))
        }
        None => {
            let mut file = tokio::fs::File::open(&snapshot.local_path)
                .await
                .map_err(|err| CoreError::LocalIo(err.to_string()))?;
            if snapshot.start_offset > 0 {
                file.seek(SeekFrom::Start(snapshot.start_offset))
                    .await
                    .map_err(|err| CoreError::LocalIo(err.to_string()))?;
            }
            (Box::new(file) as drift_proto::ByteSource, None)
        }
    };

    let reader = GovernedReader::new(
        source,
        Arc::clone(&inner.governor),
        TransferDirection::Upload,
        group,
        Arc::clone(&progress),
    );

    let upload = inner.overlay.upload(
        &snapshot.username,
        &snapshot.remote_name,
        snapshot.size,
        Box::new(reader),
        UploadOptions {
            start_offset: snapshot.start_offset,
        },
        cancel.child_token(),
    );

    let outcome = supervise(inner, key, upload, &progress, snapshot.start_offset, cancel).await;

    if let Some(completion) = completion {
        completion.finish(outcome.clone());
    }
    outcome
}

async fn drive_download(
    inner: &Arc<EngineInner>,
    key: &TransferKey,
    group: &str,
    cancel: &CancellationToken,
) -> Result<()> {
    let snapshot = inner.snapshot(key)?;

    if let Some(parent) = snapshot.local_path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|err| CoreError::LocalIo(err.to_string()))?;
    }

    let progress = Arc::new(AtomicU64::new(snapshot.start_offset));
    let on_progress: ProgressFn = {
        let progress = Arc::clone(&progress);
        Arc::new(move |bytes| {
            progress.store(bytes, Ordering::Relaxed);
        })
    };
    let pacer: PacerFn = {
        let governor = Arc::clone(&inner.governor);
        let group: Arc<str> = Arc::from(group);
        Arc::new(move |want| {
            let governor = Arc::clone(&governor);
            let group = Arc::clone(&group);
            Box::pin(async move {
                governor
                    .acquire(TransferDirection::Download, &group, want)
                    .await
            })
        })
    };

    let download = inner.overlay.download(
        &snapshot.username,
        &snapshot.remote_name,
        &snapshot.local_path,
        DownloadOptions {
            start_offset: snapshot.start_offset,
            on_progress: Some(on_progress),
            pacer: Some(pacer),
        },
        cancel.child_token(),
    );

    supervise(inner, key, download, &progress, snapshot.start_offset, cancel).await
}

/// Drive a protocol future while sampling progress.
///
/// First observed byte advances the transfer to `InProgress`; snapshots are
/// persisted every five seconds of motion; cancellation gives the protocol
/// call a bounded unwind window.
async fn supervise<T, F>(
    inner: &Arc<EngineInner>,
    key: &TransferKey,
    fut: F,
    progress: &Arc<AtomicU64>,
    start_offset: u64,
    cancel: &CancellationToken,
) -> Result<()>
where
    F: Future<Output = drift_proto::Result<T>>,
{
    tokio::pin!(fut);
    let mut ticker = tokio::time::interval(SAMPLE_INTERVAL);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    let mut speed = SpeedWindow::default();
    let mut last_persist = Instant::now();
    let mut in_progress = false;

    loop {
        tokio::select! {
            result = &mut fut => {
                let outcome = result.map(|_| ()).map_err(CoreError::from);
                if outcome.is_ok() {
                    // Final byte count, not the last sample.
                    let bytes = progress.load(Ordering::Relaxed);
                    speed.record(bytes);
                    inner.update_progress(key, bytes, speed.average());
                }
                return outcome;
            }
            _ = ticker.tick() => {
                let bytes = progress.load(Ordering::Relaxed);
                speed.record(bytes);
                let average = speed.average();

                if !in_progress && bytes > start_offset {
                    in_progress = true;
                    if let Err(err) = inner.transition(key, TransferState::InProgress, None) {
                        tracing::debug!(id = %key.id, error = %err, "in-progress transition failed");
                    }
                    last_persist = Instant::now();
                }
                inner.update_progress(key, bytes, average);

                if in_progress && last_persist.elapsed() >= PERSIST_INTERVAL {
                    if let Err(err) = inner.persist_snapshot(key) {
                        tracing::warn!(id = %key.id, error = %err, "periodic persist failed");
                    }
                    last_persist = Instant::now();
                }
            }
            _ = cancel.cancelled() => {
                // The protocol call observes the same token; give it a
                // bounded window to unwind and release its resources.
                if tokio::time::timeout(UNWIND_DEADLINE, &mut fut).await.is_err() {
                    tracing::warn!(
                        id = %key.id,
                        "transfer task stuck past the unwind deadline"
                    );
                }
                return Err(CoreError::Cancelled);
            }
        }
    }
}
