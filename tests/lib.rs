//! Shared helpers for DRIFT integration tests: a scriptable overlay client
//! and engine fixtures.

use async_trait::async_trait;
use dashmap::DashMap;
use drift_core::{
    EngineOptions, EventBus, GroupRegistry, MemoryTransferStore, RemoteContent, Transfer,
    TransferDirection, TransferEngine, TransferStore,
};
use drift_index::{IndexOptions, RootSpec, SharesIndex};
use drift_proto::{
    ByteSource, Credentials, DisconnectReason, DownloadOptions, OverlayClient,
    OverlayOptionsPatch, PeerRequestHandler, ProtoError, RemoteDirectory, SearchScope,
    ServerEvent, SessionInfo, UploadOptions,
};
use parking_lot::Mutex;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::Duration;
use tempfile::TempDir;
use tokio::io::AsyncReadExt;
use tokio::sync::{broadcast, watch};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// A finished upload as the overlay saw it.
#[derive(Debug, Clone)]
pub struct UploadRecord {
    pub peer: String,
    pub remote_name: String,
    pub bytes: u64,
}

/// A scriptable in-process overlay client.
pub struct SimOverlay {
    events: broadcast::Sender<ServerEvent>,
    handler: Mutex<Option<Arc<dyn PeerRequestHandler>>>,
    /// Sticky disconnect cause; `None` while a connection is up.
    disconnected: watch::Sender<Option<DisconnectReason>>,
    fail_connects: AtomicU32,
    /// Virtual-time log of connect attempts.
    pub connect_log: Mutex<Vec<tokio::time::Instant>>,
    /// Usernames presented at login, in order.
    pub login_log: Mutex<Vec<String>>,
    gates: DashMap<String, watch::Sender<bool>>,
    started_uploads: Mutex<Vec<String>>,
    completed_uploads: Mutex<Vec<UploadRecord>>,
    download_sizes: DashMap<String, u64>,
    download_chunk_delay_ms: AtomicU64,
}

impl Default for SimOverlay {
    fn default() -> Self {
        let (events, _) = broadcast::channel(64);
        let (disconnected, _) = watch::channel(None);
        SimOverlay {
            events,
            handler: Mutex::new(None),
            disconnected,
            fail_connects: AtomicU32::new(0),
            connect_log: Mutex::new(Vec::new()),
            login_log: Mutex::new(Vec::new()),
            gates: DashMap::new(),
            started_uploads: Mutex::new(Vec::new()),
            completed_uploads: Mutex::new(Vec::new()),
            download_sizes: DashMap::new(),
            download_chunk_delay_ms: AtomicU64::new(0),
        }
    }
}

impl SimOverlay {
    pub fn new() -> Arc<Self> {
        Arc::new(SimOverlay::default())
    }

    /// Fail the next `n` connect attempts with a network error.
    pub fn fail_connects(&self, n: u32) {
        self.fail_connects.store(n, Ordering::SeqCst);
    }

    /// Hold uploads of `remote_name` at a gate until released.
    pub fn hold(&self, remote_name: &str) {
        let (tx, _) = watch::channel(false);
        self.gates.insert(remote_name.to_string(), tx);
    }

    /// Open the gate for `remote_name`.
    pub fn release(&self, remote_name: &str) {
        if let Some(gate) = self.gates.get(remote_name) {
            let _ = gate.send(true);
        }
    }

    /// Remote names whose upload has begun, in start order.
    pub fn started_uploads(&self) -> Vec<String> {
        self.started_uploads.lock().clone()
    }

    /// Finished uploads.
    pub fn completed_uploads(&self) -> Vec<UploadRecord> {
        self.completed_uploads.lock().clone()
    }

    /// Script the size of a downloadable file.
    pub fn script_download(&self, remote_name: &str, size: u64) {
        self.download_sizes.insert(remote_name.to_string(), size);
    }

    /// Slow unlimited downloads down to one chunk per delay.
    pub fn set_download_chunk_delay(&self, delay: Duration) {
        self.download_chunk_delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    /// Simulate the server dropping the connection.
    pub fn drop_connection(&self, reason: DisconnectReason) {
        let _ = self.disconnected.send(Some(reason));
    }

    /// The handler the daemon installed, when one exists.
    pub fn handler(&self) -> Option<Arc<dyn PeerRequestHandler>> {
        self.handler.lock().clone()
    }
}

#[async_trait]
impl OverlayClient for SimOverlay {
    async fn connect(&self) -> drift_proto::Result<()> {
        self.connect_log.lock().push(tokio::time::Instant::now());
        if self.fail_connects.load(Ordering::SeqCst) > 0 {
            self.fail_connects.fetch_sub(1, Ordering::SeqCst);
            return Err(ProtoError::Network("connection refused".to_string()));
        }
        // A fresh connection clears any prior disconnect cause.
        let _ = self.disconnected.send(None);
        Ok(())
    }

    async fn login(&self, credentials: &Credentials) -> drift_proto::Result<SessionInfo> {
        self.login_log.lock().push(credentials.username.clone());
        Ok(SessionInfo {
            username: credentials.username.clone(),
            external_address: Some("198.51.100.7".to_string()),
            greeting: None,
        })
    }

    async fn disconnect(&self, reason: DisconnectReason) -> drift_proto::Result<()> {
        self.drop_connection(reason);
        Ok(())
    }

    async fn wait_disconnected(&self) -> DisconnectReason {
        let mut rx = self.disconnected.subscribe();
        loop {
            if let Some(reason) = *rx.borrow_and_update() {
                return reason;
            }
            if rx.changed().await.is_err() {
                return DisconnectReason::Shutdown;
            }
        }
    }

    async fn search(
        &self,
        _query: &str,
        _scope: SearchScope,
        _token: u32,
        _cancel: CancellationToken,
    ) -> drift_proto::Result<()> {
        Ok(())
    }

    async fn upload(
        &self,
        peer: &str,
        remote_name: &str,
        _size: u64,
        mut source: ByteSource,
        _options: UploadOptions,
        cancel: CancellationToken,
    ) -> drift_proto::Result<()> {
        self.started_uploads.lock().push(remote_name.to_string());

        if let Some(gate) = self.gates.get(remote_name) {
            let mut open = gate.subscribe();
            drop(gate);
            loop {
                if *open.borrow() {
                    break;
                }
                tokio::select! {
                    _ = cancel.cancelled() => return Err(ProtoError::Cancelled),
                    changed = open.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                }
            }
        }

        let mut total = 0u64;
        let mut buf = vec![0u8; 16 * 1024];
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return Err(ProtoError::Cancelled),
                read = source.read(&mut buf) => {
                    let read = read?;
                    if read == 0 {
                        break;
                    }
                    total += read as u64;
                }
            }
        }

        self.completed_uploads.lock().push(UploadRecord {
            peer: peer.to_string(),
            remote_name: remote_name.to_string(),
            bytes: total,
        });
        Ok(())
    }

    async fn download(
        &self,
        _peer: &str,
        remote_name: &str,
        local_path: &Path,
        options: DownloadOptions,
        cancel: CancellationToken,
    ) -> drift_proto::Result<u64> {
        let size = self
            .download_sizes
            .get(remote_name)
            .map(|s| *s)
            .ok_or_else(|| ProtoError::rejected("no such file"))?;

        let mut file = tokio::fs::File::create(local_path)
            .await
            .map_err(|err| ProtoError::LocalIo(err.to_string()))?;

        let delay = Duration::from_millis(self.download_chunk_delay_ms.load(Ordering::SeqCst));
        let mut sent = options.start_offset;
        while sent < size {
            if cancel.is_cancelled() {
                return Err(ProtoError::Cancelled);
            }
            let want = ((size - sent) as usize).min(16 * 1024);
            let granted = match &options.pacer {
                Some(pacer) => pacer(want).await,
                None => want,
            };
            use tokio::io::AsyncWriteExt;
            file.write_all(&vec![0u8; granted])
                .await
                .map_err(|err| ProtoError::LocalIo(err.to_string()))?;
            sent += granted as u64;
            if let Some(progress) = &options.on_progress {
                progress(sent);
            }
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            } else {
                tokio::task::yield_now().await;
            }
        }
        Ok(sent)
    }

    async fn browse(&self, _peer: &str) -> drift_proto::Result<Vec<RemoteDirectory>> {
        Ok(Vec::new())
    }

    async fn send_upload_speed(&self, _bytes_per_second: u64) -> drift_proto::Result<()> {
        Ok(())
    }

    async fn set_shared_counts(&self, _directories: u64, _files: u64) -> drift_proto::Result<()> {
        Ok(())
    }

    async fn reconfigure(&self, _patch: OverlayOptionsPatch) -> drift_proto::Result<bool> {
        Ok(false)
    }

    fn server_events(&self) -> broadcast::Receiver<ServerEvent> {
        self.events.subscribe()
    }

    fn install_handler(&self, handler: Arc<dyn PeerRequestHandler>) {
        *self.handler.lock() = Some(handler);
    }
}

/// A running engine over a temp share, wired to a [`SimOverlay`].
pub struct Fixture {
    pub dir: TempDir,
    pub sim: Arc<SimOverlay>,
    pub engine: Arc<TransferEngine>,
    pub store: Arc<MemoryTransferStore>,
    pub events: EventBus,
    pub shutdown: CancellationToken,
}

impl Fixture {
    /// Build a fixture sharing `files` (name, size) under the alias
    /// `share`, with the scheduler loops running.
    pub fn start(
        files: &[(&str, usize)],
        groups: Arc<GroupRegistry>,
        options: EngineOptions,
    ) -> Fixture {
        Fixture::start_with_remote(files, groups, options, None)
    }

    pub fn start_with_remote(
        files: &[(&str, usize)],
        groups: Arc<GroupRegistry>,
        mut options: EngineOptions,
        remote: Option<Arc<dyn RemoteContent>>,
    ) -> Fixture {
        let dir = TempDir::new().expect("temp dir");
        for (name, size) in files {
            std::fs::write(dir.path().join(name), vec![0u8; *size]).expect("share file");
        }
        // Keep downloads inside the fixture's temp tree.
        options.download_dir = dir.path().join("downloads");

        let index = SharesIndex::new(IndexOptions {
            roots: vec![RootSpec {
                alias: "share".to_string(),
                path: dir.path().to_path_buf(),
                hidden: false,
            }],
            ..Default::default()
        })
        .expect("index");
        index.refill(|_| {}).expect("scan");

        let sim = SimOverlay::new();
        let store = Arc::new(MemoryTransferStore::default());
        let events = EventBus::default();
        let shutdown = CancellationToken::new();

        let engine = Arc::new(TransferEngine::new(
            Arc::clone(&store) as Arc<dyn TransferStore>,
            Arc::new(index),
            Arc::clone(&sim) as Arc<dyn OverlayClient>,
            remote,
            events.clone(),
            groups,
            options,
            shutdown.clone(),
        ));
        engine.start().expect("engine start");

        Fixture {
            dir,
            sim,
            engine,
            store,
            events,
            shutdown,
        }
    }

    /// Current state of one transfer.
    pub fn state_of(&self, direction: TransferDirection, user: &str, id: Uuid) -> Transfer {
        self.engine.get(direction, user, id).expect("transfer exists")
    }
}

impl Drop for Fixture {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// Poll until `condition` holds or the deadline passes.
pub async fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
}
