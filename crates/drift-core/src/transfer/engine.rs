//! The transfer engine: admission, lifecycle, and reporting.
//!
//! In-flight state lives in one flat concurrent table keyed by
//! `(direction, username, id)`; per-user and per-group views are derived on
//! demand. Each transfer has exactly one writer (the engine path currently
//! driving it), every state transition is persisted before observers are
//! notified, and slot accounting is mutex-guarded arithmetic only.

use crate::config::ResumePolicy;
use crate::content::{AgentLocation, RemoteContent};
use crate::error::{CoreError, Result};
use crate::events::{Event, EventBus};
use crate::groups::GroupRegistry;
use crate::persist::TransferStore;
use crate::transfer::governor::RateGovernor;
use crate::transfer::record::{Transfer, TransferFailure};
use crate::transfer::state::{CompletionKind, TransferDirection, TransferState};
use crate::transfer::scheduler;
use arc_swap::ArcSwap;
use dashmap::DashMap;
use drift_index::SharesIndex;
use drift_proto::OverlayClient;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Notify, broadcast};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Engine-level limits and policies.
#[derive(Debug, Clone)]
pub struct EngineOptions {
    /// Global upload slots.
    pub upload_slots: u32,
    /// Global download slots.
    pub download_slots: u32,
    /// Global upload rate cap in bytes per second.
    pub upload_speed_limit: Option<u64>,
    /// Global download rate cap in bytes per second.
    pub download_speed_limit: Option<u64>,
    /// Where downloaded files land.
    pub download_dir: PathBuf,
    /// Startup treatment of interrupted downloads.
    pub resume_policy: ResumePolicy,
    /// Deadline for agent stream establishment.
    pub agent_fetch_timeout: Duration,
}

impl Default for EngineOptions {
    fn default() -> Self {
        EngineOptions {
            upload_slots: 10,
            download_slots: 10,
            upload_speed_limit: None,
            download_speed_limit: None,
            download_dir: PathBuf::from("downloads"),
            resume_policy: ResumePolicy::default(),
            agent_fetch_timeout: Duration::from_secs(30),
        }
    }
}

impl EngineOptions {
    /// Derive engine options from a configuration snapshot. A configured
    /// speed limit of zero means unlimited.
    #[must_use]
    pub fn from_config(config: &crate::config::ConfigSnapshot) -> Self {
        let to_limit = |speed: u64| (speed > 0).then_some(speed);
        EngineOptions {
            upload_slots: config.transfers.upload_slots,
            download_slots: config.transfers.download_slots,
            upload_speed_limit: to_limit(config.transfers.upload_speed_limit),
            download_speed_limit: to_limit(config.transfers.download_speed_limit),
            download_dir: config.transfers.download_dir.clone(),
            resume_policy: config.transfers.resume_policy,
            agent_fetch_timeout: Duration::from_secs(30),
        }
    }
}

/// Registry key: one transfer per (direction, user, id).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TransferKey {
    /// Direction.
    pub direction: TransferDirection,
    /// Counterparty, lowercased.
    pub username: String,
    /// Transfer identifier.
    pub id: Uuid,
}

impl TransferKey {
    /// Build a key, normalising the username.
    #[must_use]
    pub fn new(direction: TransferDirection, username: &str, id: Uuid) -> Self {
        TransferKey {
            direction,
            username: username.to_lowercase(),
            id,
        }
    }
}

/// Listing filters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListFilter {
    /// Everything in the direction.
    All,
    /// Waiting for admission (requested or queued).
    Queued,
    /// Admitted and not yet terminal.
    Active,
    /// Terminal.
    Terminal,
    /// Everything for one counterparty.
    User(String),
}

impl ListFilter {
    fn matches(&self, transfer: &Transfer) -> bool {
        match self {
            ListFilter::All => true,
            ListFilter::Queued => {
                transfer.state.rank() <= TransferState::QueuedRemotely.rank()
                    && !transfer.is_terminal()
            }
            ListFilter::Active => {
                transfer.state.rank() >= TransferState::Initializing.rank()
                    && !transfer.is_terminal()
            }
            ListFilter::Terminal => transfer.is_terminal(),
            ListFilter::User(name) => transfer.username.eq_ignore_ascii_case(name),
        }
    }
}

pub(crate) struct TransferHandle {
    pub(crate) transfer: Arc<RwLock<Transfer>>,
    pub(crate) cancel: CancellationToken,
}

/// Per-direction slot and fairness accounting. Held only across counter
/// arithmetic, never across I/O.
#[derive(Default)]
pub(crate) struct SlotTable {
    pub(crate) global_used: u32,
    pub(crate) group_used: HashMap<String, u32>,
    /// Monotonic serve sequence per user, for round-robin ordering.
    pub(crate) last_served: HashMap<String, u64>,
    pub(crate) serve_seq: u64,
}

pub(crate) struct SchedulerShared {
    pub(crate) notify: Notify,
    pub(crate) slots: Mutex<SlotTable>,
}

impl Default for SchedulerShared {
    fn default() -> Self {
        SchedulerShared {
            notify: Notify::new(),
            slots: Mutex::new(SlotTable::default()),
        }
    }
}

pub(crate) struct EngineInner {
    pub(crate) registry: DashMap<TransferKey, TransferHandle>,
    pub(crate) groups: ArcSwap<GroupRegistry>,
    pub(crate) store: Arc<dyn TransferStore>,
    pub(crate) index: Arc<SharesIndex>,
    pub(crate) overlay: Arc<dyn OverlayClient>,
    pub(crate) remote: Option<Arc<dyn RemoteContent>>,
    pub(crate) events: EventBus,
    pub(crate) governor: Arc<RateGovernor>,
    pub(crate) options: RwLock<EngineOptions>,
    pub(crate) sched: [SchedulerShared; 2],
    pub(crate) shutdown: CancellationToken,
}

impl EngineInner {
    /// Persist a fresh transfer, publish it, and insert it into the
    /// registry in one motion.
    fn insert_new(&self, transfer: Transfer) -> Result<TransferKey> {
        let key = TransferKey::new(transfer.direction, &transfer.username, transfer.id);
        self.store.upsert(&transfer)?;
        self.events
            .publish(Event::TransferChanged(Box::new(transfer.clone())));
        self.registry.insert(
            key.clone(),
            TransferHandle {
                transfer: Arc::new(RwLock::new(transfer)),
                cancel: CancellationToken::new(),
            },
        );
        Ok(key)
    }

    /// Advance a transfer's state, persisting before publication.
    pub(crate) fn transition(
        &self,
        key: &TransferKey,
        next: TransferState,
        failure: Option<TransferFailure>,
    ) -> Result<Transfer> {
        let handle = self
            .registry
            .get(key)
            .ok_or_else(|| CoreError::not_found("transfer"))?;
        let snapshot = {
            let mut transfer = handle.transfer.write();
            transfer.advance(next)?;
            if failure.is_some() {
                transfer.failure = failure;
            }
            transfer.clone()
        };
        drop(handle);

        self.store.upsert(&snapshot)?;
        tracing::debug!(
            id = %snapshot.id,
            user = %snapshot.username,
            state = %snapshot.state,
            "transfer state change"
        );
        self.events
            .publish(Event::TransferChanged(Box::new(snapshot.clone())));
        Ok(snapshot)
    }

    /// Update byte progress and publish a progress event; no persistence.
    pub(crate) fn update_progress(&self, key: &TransferKey, bytes: u64, average_speed: f64) {
        let Some(handle) = self.registry.get(key) else {
            return;
        };
        let (id, username) = {
            let mut transfer = handle.transfer.write();
            transfer.record_progress(bytes, average_speed);
            (transfer.id, transfer.username.clone())
        };
        drop(handle);
        self.events.publish(Event::TransferProgress {
            id,
            username,
            bytes_transferred: bytes,
            average_speed,
        });
    }

    /// Persist the current snapshot of a transfer.
    pub(crate) fn persist_snapshot(&self, key: &TransferKey) -> Result<()> {
        let Some(handle) = self.registry.get(key) else {
            return Ok(());
        };
        let snapshot = handle.transfer.read().clone();
        drop(handle);
        self.store.upsert(&snapshot)
    }

    /// Current snapshot of a transfer.
    pub(crate) fn snapshot(&self, key: &TransferKey) -> Result<Transfer> {
        self.registry
            .get(key)
            .map(|h| h.transfer.read().clone())
            .ok_or_else(|| CoreError::not_found("transfer"))
    }

    /// Return the slots a terminal transfer held.
    pub(crate) fn release_slots(&self, direction: TransferDirection, group: &str) {
        let mut slots = self.sched[direction.index()].slots.lock();
        slots.global_used = slots.global_used.saturating_sub(1);
        if let Some(used) = slots.group_used.get_mut(group) {
            *used = used.saturating_sub(1);
        }
    }

    /// Wake the scheduler for a direction.
    pub(crate) fn notify_direction(&self, direction: TransferDirection) {
        self.sched[direction.index()].notify.notify_one();
    }

    fn has_live_duplicate(&self, direction: TransferDirection, username: &str, remote: &str) -> bool {
        let lowered = username.to_lowercase();
        self.registry.iter().any(|entry| {
            entry.key().direction == direction
                && entry.key().username == lowered
                && !entry.value().transfer.read().is_terminal()
                && entry
                    .value()
                    .transfer
                    .read()
                    .remote_name
                    .eq_ignore_ascii_case(remote)
        })
    }
}

/// The transfer engine.
pub struct TransferEngine {
    inner: Arc<EngineInner>,
}

impl TransferEngine {
    /// Assemble an engine. Call [`start`](TransferEngine::start) to run
    /// recovery and spawn the scheduler loops.
    #[allow(clippy::too_many_arguments)]
    #[must_use]
    pub fn new(
        store: Arc<dyn TransferStore>,
        index: Arc<SharesIndex>,
        overlay: Arc<dyn OverlayClient>,
        remote: Option<Arc<dyn RemoteContent>>,
        events: EventBus,
        groups: Arc<GroupRegistry>,
        options: EngineOptions,
        shutdown: CancellationToken,
    ) -> Self {
        let governor = Arc::new(RateGovernor::default());
        configure_governor(&governor, &groups, &options);

        let inner = Arc::new(EngineInner {
            registry: DashMap::new(),
            groups: ArcSwap::new(groups),
            store,
            index,
            overlay,
            remote,
            events,
            governor,
            options: RwLock::new(options),
            sched: [SchedulerShared::default(), SchedulerShared::default()],
            shutdown,
        });
        TransferEngine { inner }
    }

    /// Run startup recovery, then spawn the two scheduler loops.
    pub fn start(&self) -> Result<()> {
        self.recover()?;
        for direction in [TransferDirection::Upload, TransferDirection::Download] {
            let inner = Arc::clone(&self.inner);
            tokio::spawn(scheduler::run(inner, direction));
        }
        Ok(())
    }

    /// Load persisted non-terminal transfers and settle them: uploads are
    /// errored as interrupted; downloads follow the configured policy.
    pub fn recover(&self) -> Result<usize> {
        let unfinished = self.inner.store.load_unfinished()?;
        let policy = self.inner.options.read().resume_policy;
        let mut recovered = 0usize;

        for mut transfer in unfinished {
            recovered += 1;
            let requeue = transfer.direction == TransferDirection::Download
                && policy == ResumePolicy::Requeue;
            if requeue {
                let again = transfer.requeued();
                tracing::info!(id = %again.id, user = %again.username, "re-enqueueing interrupted download");
                self.inner.store.upsert(&again)?;
                let key = TransferKey::new(again.direction, &again.username, again.id);
                self.inner.registry.insert(
                    key,
                    TransferHandle {
                        transfer: Arc::new(RwLock::new(again)),
                        cancel: CancellationToken::new(),
                    },
                );
                self.inner.notify_direction(TransferDirection::Download);
            } else {
                transfer.interrupt("interrupted");
                tracing::info!(id = %transfer.id, user = %transfer.username, "settling interrupted transfer as errored");
                self.inner.store.upsert(&transfer)?;
            }
        }
        Ok(recovered)
    }

    /// Admit an upload requested by a peer.
    ///
    /// The remote name must resolve through the share index or an agent
    /// share; blacklisted users are refused before anything is recorded.
    pub async fn enqueue_upload(&self, username: &str, remote_name: &str) -> Result<Transfer> {
        let inner = &self.inner;

        if inner.groups.load().is_blacklisted(username) {
            return Err(CoreError::Blacklisted(username.to_lowercase().into()));
        }
        if inner.has_live_duplicate(TransferDirection::Upload, username, remote_name) {
            return Err(CoreError::AlreadyExists("upload already queued".into()));
        }

        let resolved = match inner.index.resolve(remote_name) {
            Ok(file) => Some((file.local_path, file.size)),
            Err(_) => inner
                .remote
                .as_ref()
                .and_then(|r| r.resolve_shared(remote_name))
                .map(|share| {
                    let location = AgentLocation {
                        agent: share.agent,
                        filename: share.filename,
                    };
                    (location.to_path(), share.size)
                }),
        };

        let Some((local_path, size)) = resolved else {
            // Record the refusal; peers see rejected requests in history.
            let transfer = Transfer::new(
                TransferDirection::Upload,
                username,
                remote_name,
                PathBuf::new(),
                0,
            );
            let key = inner.insert_new(transfer)?;
            inner.transition(
                &key,
                TransferState::Completed(CompletionKind::Rejected),
                Some(TransferFailure {
                    kind: CompletionKind::Rejected,
                    detail: "file is not shared".to_string(),
                }),
            )?;
            return Err(CoreError::not_found("file is not shared"));
        };

        let transfer = Transfer::new(
            TransferDirection::Upload,
            username,
            remote_name,
            local_path,
            size,
        );
        let key = inner.insert_new(transfer)?;
        let snapshot = inner.transition(&key, TransferState::QueuedLocally, None)?;
        inner.notify_direction(TransferDirection::Upload);
        Ok(snapshot)
    }

    /// Enqueue a download requested by the operator.
    pub async fn enqueue_download(
        &self,
        username: &str,
        remote_name: &str,
        size: u64,
    ) -> Result<Transfer> {
        let inner = &self.inner;

        if inner.groups.load().is_blacklisted(username) {
            return Err(CoreError::Blacklisted(username.to_lowercase().into()));
        }
        if inner.has_live_duplicate(TransferDirection::Download, username, remote_name) {
            return Err(CoreError::AlreadyExists("download already queued".into()));
        }

        let filename = remote_name
            .rsplit('\\')
            .next()
            .filter(|f| !f.is_empty())
            .ok_or_else(|| CoreError::InvalidArgument("empty remote name".into()))?;
        let local_path = inner
            .options
            .read()
            .download_dir
            .join(username.to_lowercase())
            .join(filename);

        let transfer = Transfer::new(
            TransferDirection::Download,
            username,
            remote_name,
            local_path,
            size,
        );
        let key = inner.insert_new(transfer)?;
        let snapshot = inner.transition(&key, TransferState::QueuedLocally, None)?;
        inner.notify_direction(TransferDirection::Download);
        Ok(snapshot)
    }

    /// Cancel a transfer; optionally remove its record entirely.
    pub async fn cancel(
        &self,
        direction: TransferDirection,
        username: &str,
        id: Uuid,
        remove: bool,
    ) -> Result<()> {
        let inner = &self.inner;
        let key = TransferKey::new(direction, username, id);

        let (state, cancel) = {
            let handle = inner
                .registry
                .get(&key)
                .ok_or_else(|| CoreError::not_found("transfer"))?;
            (handle.transfer.read().state, handle.cancel.clone())
        };

        if !state.is_terminal() {
            if state.rank() >= TransferState::Initializing.rank()
                || state == TransferState::QueuedRemotely
            {
                // A worker owns it; the worker unwinds, releases its slots,
                // and publishes the terminal state.
                cancel.cancel();
            } else {
                inner.transition(
                    &key,
                    TransferState::Completed(CompletionKind::Cancelled),
                    None,
                )?;
                inner.notify_direction(direction);
            }
        }

        if remove {
            inner.registry.remove(&key);
            inner.store.remove(id)?;
        }
        Ok(())
    }

    /// Fetch one transfer snapshot.
    pub fn get(&self, direction: TransferDirection, username: &str, id: Uuid) -> Result<Transfer> {
        self.inner
            .snapshot(&TransferKey::new(direction, username, id))
    }

    /// List transfers in a direction, stably ordered by enqueue time.
    #[must_use]
    pub fn list(&self, direction: TransferDirection, filter: ListFilter) -> Vec<Transfer> {
        let mut transfers: Vec<Transfer> = self
            .inner
            .registry
            .iter()
            .filter(|entry| entry.key().direction == direction)
            .map(|entry| entry.value().transfer.read().clone())
            .filter(|t| filter.matches(t))
            .collect();
        transfers.sort_by(|a, b| a.enqueued_at.cmp(&b.enqueued_at).then(a.id.cmp(&b.id)));
        transfers
    }

    /// 1-based position the transfer would occupy if scheduling ran
    /// immediately with no further admissions.
    pub fn place_in_queue(
        &self,
        direction: TransferDirection,
        username: &str,
        id: Uuid,
    ) -> Result<u32> {
        let key = TransferKey::new(direction, username, id);
        let state = self.inner.snapshot(&key)?.state;
        if state != TransferState::QueuedLocally {
            return Err(CoreError::precondition("transfer is not queued"));
        }
        let order = scheduler::queue_order(&self.inner, direction);
        order
            .iter()
            .position(|k| *k == key)
            .map(|p| p as u32 + 1)
            .ok_or_else(|| CoreError::not_found("transfer"))
    }

    /// Subscribe to transfer state-change and progress events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.inner.events.subscribe()
    }

    /// Swap in a rebuilt group registry; governor buckets follow.
    pub fn apply_groups(&self, groups: Arc<GroupRegistry>) {
        configure_governor(&self.inner.governor, &groups, &self.inner.options.read());
        self.inner.groups.store(groups);
        self.inner.notify_direction(TransferDirection::Upload);
        self.inner.notify_direction(TransferDirection::Download);
    }

    /// True when an upload slot is free right now.
    #[must_use]
    pub fn has_free_upload_slot(&self) -> bool {
        let limit = self.inner.options.read().upload_slots;
        let used = self.inner.sched[TransferDirection::Upload.index()]
            .slots
            .lock()
            .global_used;
        used < limit
    }

    /// Number of uploads waiting for admission.
    #[must_use]
    pub fn upload_queue_length(&self) -> u64 {
        self.list(TransferDirection::Upload, ListFilter::Queued).len() as u64
    }

    pub(crate) fn inner(&self) -> &Arc<EngineInner> {
        &self.inner
    }
}

fn configure_governor(governor: &RateGovernor, groups: &GroupRegistry, options: &EngineOptions) {
    for policy in groups.by_priority() {
        let rate = match policy.speed_limit {
            u64::MAX => None,
            rate => Some(rate),
        };
        governor.set_group_rate(&policy.name, rate);
    }
    governor.set_global_rate(TransferDirection::Upload, options.upload_speed_limit);
    governor.set_global_rate(TransferDirection::Download, options.download_speed_limit);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persist::MemoryTransferStore;
    use crate::testing::{NullOverlay, engine_fixture};
    use drift_index::{IndexOptions, SharesIndex};

    fn engine_with_share(share: &tempfile::TempDir) -> (TransferEngine, Arc<MemoryTransferStore>) {
        engine_fixture(share, EngineOptions::default(), GroupRegistry::stock())
    }

    fn populate(dir: &tempfile::TempDir) {
        std::fs::write(dir.path().join("track.mp3"), vec![0u8; 4096]).unwrap();
    }

    #[tokio::test]
    async fn test_enqueue_upload_happy_path() {
        let dir = tempfile::TempDir::new().unwrap();
        populate(&dir);
        let (engine, store) = engine_with_share(&dir);

        let transfer = engine
            .enqueue_upload("alice", r"share\track.mp3")
            .await
            .unwrap();
        assert_eq!(transfer.state, TransferState::QueuedLocally);
        assert_eq!(transfer.size, 4096);

        // Persisted synchronously.
        assert_eq!(
            store.get(transfer.id).unwrap().state,
            TransferState::QueuedLocally
        );
    }

    #[tokio::test]
    async fn test_enqueue_upload_not_shared_records_rejection() {
        let dir = tempfile::TempDir::new().unwrap();
        populate(&dir);
        let (engine, store) = engine_with_share(&dir);

        let err = engine
            .enqueue_upload("alice", r"share\missing.mp3")
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::NotFound(_)));

        let rejected = engine.list(TransferDirection::Upload, ListFilter::Terminal);
        assert_eq!(rejected.len(), 1);
        assert_eq!(
            rejected[0].state,
            TransferState::Completed(CompletionKind::Rejected)
        );
        assert_eq!(store.get(rejected[0].id).unwrap().state, rejected[0].state);
    }

    #[tokio::test]
    async fn test_enqueue_duplicate_refused() {
        let dir = tempfile::TempDir::new().unwrap();
        populate(&dir);
        let (engine, _) = engine_with_share(&dir);

        engine
            .enqueue_upload("alice", r"share\track.mp3")
            .await
            .unwrap();
        let err = engine
            .enqueue_upload("Alice", r"share\TRACK.mp3")
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::AlreadyExists(_)));
    }

    #[tokio::test]
    async fn test_blacklisted_user_short_circuits() {
        let dir = tempfile::TempDir::new().unwrap();
        populate(&dir);
        let groups = GroupRegistry::new(
            Vec::new(),
            crate::groups::GroupPolicy::new(crate::groups::DEFAULT_GROUP, 1, 10),
            crate::groups::GroupPolicy::new(crate::groups::LEECHERS_GROUP, 0, 1),
            vec!["mallory".to_string()],
            Default::default(),
        );
        let (engine, store) = engine_fixture(&dir, EngineOptions::default(), groups);

        let err = engine
            .enqueue_upload("Mallory", r"share\track.mp3")
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::Blacklisted(_)));
        // Nothing recorded at all.
        assert!(store.is_empty());

        let err = engine
            .enqueue_download("mallory", r"stuff\x.bin", 10)
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::Blacklisted(_)));
    }

    #[tokio::test]
    async fn test_cancel_queued_transfer_directly() {
        let dir = tempfile::TempDir::new().unwrap();
        populate(&dir);
        let (engine, store) = engine_with_share(&dir);

        let t = engine
            .enqueue_upload("alice", r"share\track.mp3")
            .await
            .unwrap();
        engine
            .cancel(TransferDirection::Upload, "alice", t.id, false)
            .await
            .unwrap();

        let after = engine
            .get(TransferDirection::Upload, "alice", t.id)
            .unwrap();
        assert_eq!(
            after.state,
            TransferState::Completed(CompletionKind::Cancelled)
        );
        assert_eq!(store.get(t.id).unwrap().state, after.state);
    }

    #[tokio::test]
    async fn test_cancel_with_remove_deletes_record() {
        let dir = tempfile::TempDir::new().unwrap();
        populate(&dir);
        let (engine, store) = engine_with_share(&dir);

        let t = engine
            .enqueue_upload("alice", r"share\track.mp3")
            .await
            .unwrap();
        engine
            .cancel(TransferDirection::Upload, "alice", t.id, true)
            .await
            .unwrap();

        assert!(engine.get(TransferDirection::Upload, "alice", t.id).is_err());
        assert!(store.get(t.id).is_none());
    }

    #[tokio::test]
    async fn test_list_is_stable_and_filtered() {
        let dir = tempfile::TempDir::new().unwrap();
        populate(&dir);
        std::fs::write(dir.path().join("b.mp3"), vec![0u8; 10]).unwrap();
        let (engine, _) = engine_with_share(&dir);

        let first = engine
            .enqueue_upload("alice", r"share\track.mp3")
            .await
            .unwrap();
        let second = engine.enqueue_upload("bob", r"share\b.mp3").await.unwrap();

        let all = engine.list(TransferDirection::Upload, ListFilter::All);
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].id, first.id);
        assert_eq!(all[1].id, second.id);

        let bobs = engine.list(
            TransferDirection::Upload,
            ListFilter::User("BOB".to_string()),
        );
        assert_eq!(bobs.len(), 1);
        assert_eq!(bobs[0].id, second.id);

        assert!(engine.list(TransferDirection::Download, ListFilter::All).is_empty());
    }

    #[tokio::test]
    async fn test_recovery_errors_uploads_and_requeues_downloads() {
        let dir = tempfile::TempDir::new().unwrap();
        populate(&dir);
        let store = Arc::new(MemoryTransferStore::default());

        // Seed the store with interrupted transfers from a prior life.
        let mut upload = Transfer::new(
            TransferDirection::Upload,
            "alice",
            r"share\track.mp3",
            dir.path().join("track.mp3"),
            4096,
        );
        upload.advance(TransferState::QueuedLocally).unwrap();
        store.upsert(&upload).unwrap();

        let mut download = Transfer::new(
            TransferDirection::Download,
            "bob",
            r"remote\big.bin",
            dir.path().join("big.bin"),
            100_000,
        );
        download.advance(TransferState::QueuedLocally).unwrap();
        download.advance(TransferState::QueuedRemotely).unwrap();
        download.advance(TransferState::InProgress).unwrap();
        download.record_progress(40_000, 0.0);
        store.upsert(&download).unwrap();

        let index = Arc::new(SharesIndex::new(IndexOptions::default()).unwrap());
        let engine = TransferEngine::new(
            Arc::clone(&store) as Arc<dyn TransferStore>,
            index,
            Arc::new(NullOverlay::default()),
            None,
            EventBus::default(),
            GroupRegistry::stock(),
            EngineOptions {
                resume_policy: ResumePolicy::Requeue,
                ..Default::default()
            },
            CancellationToken::new(),
        );
        let recovered = engine.recover().unwrap();
        assert_eq!(recovered, 2);

        // Upload settled as errored with the interruption reason.
        let settled = store.get(upload.id).unwrap();
        assert_eq!(
            settled.state,
            TransferState::Completed(CompletionKind::Errored)
        );
        assert_eq!(settled.failure.unwrap().detail, "interrupted");

        // Download re-enqueued from its persisted offset.
        let requeued = engine
            .get(TransferDirection::Download, "bob", download.id)
            .unwrap();
        assert_eq!(requeued.state, TransferState::QueuedLocally);
        assert_eq!(requeued.start_offset, 40_000);
    }

    #[tokio::test]
    async fn test_recovery_default_policy_errors_downloads() {
        let dir = tempfile::TempDir::new().unwrap();
        let store = Arc::new(MemoryTransferStore::default());

        let mut download = Transfer::new(
            TransferDirection::Download,
            "bob",
            r"remote\big.bin",
            dir.path().join("big.bin"),
            100_000,
        );
        download.advance(TransferState::QueuedLocally).unwrap();
        store.upsert(&download).unwrap();

        let index = Arc::new(SharesIndex::new(IndexOptions::default()).unwrap());
        let engine = TransferEngine::new(
            Arc::clone(&store) as Arc<dyn TransferStore>,
            index,
            Arc::new(NullOverlay::default()),
            None,
            EventBus::default(),
            GroupRegistry::stock(),
            EngineOptions::default(),
            CancellationToken::new(),
        );
        engine.recover().unwrap();

        assert_eq!(
            store.get(download.id).unwrap().state,
            TransferState::Completed(CompletionKind::Errored)
        );
    }

    #[tokio::test]
    async fn test_place_in_queue_requires_queued_state() {
        let dir = tempfile::TempDir::new().unwrap();
        populate(&dir);
        let (engine, _) = engine_with_share(&dir);

        let t = engine
            .enqueue_upload("alice", r"share\track.mp3")
            .await
            .unwrap();
        assert_eq!(
            engine
                .place_in_queue(TransferDirection::Upload, "alice", t.id)
                .unwrap(),
            1
        );

        assert!(matches!(
            engine.place_in_queue(TransferDirection::Upload, "alice", Uuid::new_v4()),
            Err(CoreError::NotFound(_))
        ));
    }
}
