//! Loopback overlay client.
//!
//! The wire-level overlay protocol is supplied by an external library that
//! implements [`OverlayClient`]; this loopback stands in for it so the
//! daemon can be configured, dry-run, and integration-tested without a
//! server. It accepts connect/login, drains uploads at full speed, and
//! produces empty downloads.

use async_trait::async_trait;
use drift_proto::{
    ByteSource, Credentials, DisconnectReason, DownloadOptions, OverlayClient,
    OverlayOptionsPatch, PeerRequestHandler, ProtoError, RemoteDirectory, SearchScope,
    ServerEvent, SessionInfo, UploadOptions,
};
use parking_lot::Mutex;
use std::path::Path;
use std::sync::Arc;
use tokio::io::AsyncReadExt;
use tokio::sync::{broadcast, watch};
use tokio_util::sync::CancellationToken;

/// A self-contained overlay client that talks to nobody.
pub struct LoopbackOverlay {
    events: broadcast::Sender<ServerEvent>,
    handler: Mutex<Option<Arc<dyn PeerRequestHandler>>>,
    /// Sticky disconnect cause; `None` while a connection is up.
    disconnected: watch::Sender<Option<DisconnectReason>>,
}

impl Default for LoopbackOverlay {
    fn default() -> Self {
        let (events, _) = broadcast::channel(64);
        let (disconnected, _) = watch::channel(None);
        LoopbackOverlay {
            events,
            handler: Mutex::new(None),
            disconnected,
        }
    }
}

#[async_trait]
impl OverlayClient for LoopbackOverlay {
    async fn connect(&self) -> drift_proto::Result<()> {
        let _ = self.disconnected.send(None);
        Ok(())
    }

    async fn login(&self, credentials: &Credentials) -> drift_proto::Result<SessionInfo> {
        if credentials.username.is_empty() {
            return Err(ProtoError::InvalidCredentials);
        }
        Ok(SessionInfo {
            username: credentials.username.clone(),
            external_address: None,
            greeting: Some("loopback overlay".to_string()),
        })
    }

    async fn disconnect(&self, reason: DisconnectReason) -> drift_proto::Result<()> {
        let _ = self.disconnected.send(Some(reason));
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
        _peer: &str,
        _remote_name: &str,
        _size: u64,
        mut source: ByteSource,
        _options: UploadOptions,
        cancel: CancellationToken,
    ) -> drift_proto::Result<()> {
        let mut buf = vec![0u8; 64 * 1024];
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return Err(ProtoError::Cancelled),
                read = source.read(&mut buf) => {
                    if read? == 0 {
                        return Ok(());
                    }
                }
            }
        }
    }

    async fn download(
        &self,
        _peer: &str,
        _remote_name: &str,
        local_path: &Path,
        _options: DownloadOptions,
        _cancel: CancellationToken,
    ) -> drift_proto::Result<u64> {
        tokio::fs::File::create(local_path)
            .await
            .map_err(|err| ProtoError::LocalIo(err.to_string()))?;
        Ok(0)
    }

    async fn browse(&self, _peer: &str) -> drift_proto::Result<Vec<RemoteDirectory>> {
        Ok(Vec::new())
    }

    async fn send_upload_speed(&self, _bytes_per_second: u64) -> drift_proto::Result<()> {
        Ok(())
    }

    async fn set_shared_counts(&self, directories: u64, files: u64) -> drift_proto::Result<()> {
        tracing::debug!(directories, files, "share counts (loopback)");
        Ok(())
    }

    async fn reconfigure(&self, patch: OverlayOptionsPatch) -> drift_proto::Result<bool> {
        Ok(patch.server_address.is_some())
    }

    fn server_events(&self) -> broadcast::Receiver<ServerEvent> {
        self.events.subscribe()
    }

    fn install_handler(&self, handler: Arc<dyn PeerRequestHandler>) {
        *self.handler.lock() = Some(handler);
    }
}
