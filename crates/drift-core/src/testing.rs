//! Shared fixtures for in-crate tests.

use crate::events::EventBus;
use crate::groups::GroupRegistry;
use crate::persist::MemoryTransferStore;
use crate::transfer::{EngineOptions, TransferEngine};
use async_trait::async_trait;
use drift_index::{IndexOptions, RootSpec, SharesIndex};
use drift_proto::{
    ByteSource, Credentials, DisconnectReason, DownloadOptions, OverlayClient,
    OverlayOptionsPatch, PeerRequestHandler, RemoteDirectory, SearchScope, ServerEvent,
    SessionInfo, UploadOptions,
};
use std::path::Path;
use std::sync::Arc;
use tokio::io::AsyncReadExt;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

/// An overlay client that accepts everything and moves no real bytes.
pub(crate) struct NullOverlay {
    events: broadcast::Sender<ServerEvent>,
}

impl Default for NullOverlay {
    fn default() -> Self {
        let (events, _) = broadcast::channel(16);
        NullOverlay { events }
    }
}

#[async_trait]
impl OverlayClient for NullOverlay {
    async fn connect(&self) -> drift_proto::Result<()> {
        Ok(())
    }

    async fn login(&self, credentials: &Credentials) -> drift_proto::Result<SessionInfo> {
        Ok(SessionInfo {
            username: credentials.username.clone(),
            external_address: None,
            greeting: None,
        })
    }

    async fn disconnect(&self, _reason: DisconnectReason) -> drift_proto::Result<()> {
        Ok(())
    }

    async fn wait_disconnected(&self) -> DisconnectReason {
        futures::future::pending().await
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
        _peer: &str,
        _remote_name: &str,
        _size: u64,
        mut source: ByteSource,
        _options: UploadOptions,
        _cancel: CancellationToken,
    ) -> drift_proto::Result<()> {
        let mut sink = Vec::new();
        source.read_to_end(&mut sink).await?;
        Ok(())
    }

    async fn download(
        &self,
        _peer: &str,
        _remote_name: &str,
        _local_path: &Path,
        _options: DownloadOptions,
        _cancel: CancellationToken,
    ) -> drift_proto::Result<u64> {
        Ok(0)
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

    fn install_handler(&self, _handler: Arc<dyn PeerRequestHandler>) {}
}

/// Build an engine over a temp directory shared under the alias `share`.
/// Scheduler loops are not started; tests drive admission explicitly.
pub(crate) fn engine_fixture(
    dir: &tempfile::TempDir,
    options: EngineOptions,
    groups: Arc<GroupRegistry>,
) -> (TransferEngine, Arc<MemoryTransferStore>) {
    let index = SharesIndex::new(IndexOptions {
        roots: vec![RootSpec {
            alias: "share".to_string(),
            path: dir.path().to_path_buf(),
            hidden: false,
        }],
        ..Default::default()
    })
    .expect("index options are valid");
    index.refill(|_| {}).expect("scan succeeds");

    let store = Arc::new(MemoryTransferStore::default());
    let engine = TransferEngine::new(
        Arc::clone(&store) as Arc<dyn crate::persist::TransferStore>,
        Arc::new(index),
        Arc::new(NullOverlay::default()),
        None,
        EventBus::default(),
        groups,
        options,
        CancellationToken::new(),
    );
    (engine, store)
}
