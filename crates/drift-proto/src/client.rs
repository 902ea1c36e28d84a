//! The overlay client trait and the inbound peer-request handler.

use crate::error::Result;
use crate::types::{
    Credentials, DisconnectReason, DownloadOptions, EnqueueRefusal, OverlayOptionsPatch,
    RemoteDirectory, SearchReply, SearchRequest, SearchScope, ServerEvent, SessionInfo,
    UploadOptions, UserInfo,
};
use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;
use tokio::io::AsyncRead;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

/// A byte stream handed to [`OverlayClient::upload`].
///
/// The caller owns pacing: the stream blocks reads until bandwidth tokens
/// are available, so implementations simply pump it as fast as it yields.
pub type ByteSource = Box<dyn AsyncRead + Send + Unpin>;

/// The connection to the overlay network.
///
/// One instance represents one account on one coordination server. All
/// methods other than [`connect`](OverlayClient::connect) require an
/// established connection and fail with
/// [`ProtoError::NotLoggedIn`](crate::ProtoError::NotLoggedIn) otherwise.
#[async_trait]
pub trait OverlayClient: Send + Sync {
    /// Establish the transport connection to the coordination server.
    async fn connect(&self) -> Result<()>;

    /// Log in over an established connection.
    async fn login(&self, credentials: &Credentials) -> Result<SessionInfo>;

    /// Tear the session down, reporting the cause to interested parties.
    async fn disconnect(&self, reason: DisconnectReason) -> Result<()>;

    /// Resolve once the current connection ends, with its cause.
    ///
    /// Used by the session controller to drive the reconnect loop; a new
    /// connection arms this again.
    async fn wait_disconnected(&self) -> DisconnectReason;

    /// Issue a search. Responses arrive through the installed
    /// [`PeerRequestHandler::search_response_received`] callback, correlated
    /// by `token`.
    async fn search(
        &self,
        query: &str,
        scope: SearchScope,
        token: u32,
        cancel: CancellationToken,
    ) -> Result<()>;

    /// Upload `size` bytes from `source` to `peer` as `remote_name`.
    ///
    /// Returns once the peer has acknowledged the final byte. Failures are
    /// classified: timeout, peer rejection, or remote protocol error.
    async fn upload(
        &self,
        peer: &str,
        remote_name: &str,
        size: u64,
        source: ByteSource,
        options: UploadOptions,
        cancel: CancellationToken,
    ) -> Result<()>;

    /// Download `remote_name` from `peer` into `local_path`.
    async fn download(
        &self,
        peer: &str,
        remote_name: &str,
        local_path: &Path,
        options: DownloadOptions,
        cancel: CancellationToken,
    ) -> Result<u64>;

    /// Fetch a peer's full share listing.
    async fn browse(&self, peer: &str) -> Result<Vec<RemoteDirectory>>;

    /// Report this node's average upload speed to the server.
    async fn send_upload_speed(&self, bytes_per_second: u64) -> Result<()>;

    /// Advertise the current shared directory and file counts.
    async fn set_shared_counts(&self, directories: u64, files: u64) -> Result<()>;

    /// Apply a partial options update. Returns `true` when the change
    /// requires the server connection to be re-established.
    async fn reconfigure(&self, patch: OverlayOptionsPatch) -> Result<bool>;

    /// Subscribe to events pushed by the server after login.
    fn server_events(&self) -> broadcast::Receiver<ServerEvent>;

    /// Install the handler that answers inbound peer requests.
    fn install_handler(&self, handler: Arc<dyn PeerRequestHandler>);
}

/// Answers requests that peers make of this node.
///
/// Installed once at startup. Implementations must be cheap and non-blocking
/// where possible; the protocol layer calls these on its own tasks.
#[async_trait]
pub trait PeerRequestHandler: Send + Sync {
    /// A peer asked for the full share listing.
    async fn resolve_browse(&self) -> Vec<RemoteDirectory>;

    /// A peer asked for one directory. `None` results in a not-found reply.
    async fn resolve_directory(&self, remote_path: &str) -> Option<RemoteDirectory>;

    /// A peer asked for this node's profile.
    async fn resolve_user_info(&self) -> UserInfo;

    /// A peer requested a file; accepting admits an upload into the queue.
    async fn enqueue_upload(
        &self,
        peer: &str,
        remote_name: &str,
    ) -> std::result::Result<(), EnqueueRefusal>;

    /// A peer is searching; `None` suppresses the reply entirely.
    async fn resolve_search(&self, request: SearchRequest) -> Option<SearchReply>;

    /// A response to one of our own searches arrived.
    async fn search_response_received(&self, response: crate::types::PeerSearchResponse);
}
