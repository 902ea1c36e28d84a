//! Wire-facing types shared between the daemon and the overlay library.
//!
//! Remote names use the overlay's backslash separator; local paths use the
//! host separator. Conversion happens at the share-index boundary, never
//! here.

use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Credentials used to log in to the overlay coordination server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    /// Account name on the overlay.
    pub username: String,
    /// Account password.
    pub password: String,
}

/// Session details returned by a successful login.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionInfo {
    /// The username the session is logged in as.
    pub username: String,
    /// Server-assigned IP address, when the server reports one.
    pub external_address: Option<String>,
    /// Server greeting or MOTD text.
    pub greeting: Option<String>,
}

/// Why a session ended.
///
/// [`DisconnectReason::is_final`] distinguishes causes that must stop the
/// reconnect loop from those that should re-enter it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    /// The daemon is shutting down.
    Shutdown,
    /// The operator explicitly asked to disconnect.
    OperatorRequest,
    /// The server rejected the credentials.
    InvalidCredentials,
    /// Another login for the same user displaced this session.
    Displaced,
    /// The remote end closed the connection.
    RemoteClosed,
    /// A transport-level failure dropped the connection.
    NetworkError,
}

impl DisconnectReason {
    /// True when no reconnection attempt should follow this disconnect.
    #[must_use]
    pub fn is_final(&self) -> bool {
        matches!(
            self,
            DisconnectReason::Shutdown
                | DisconnectReason::OperatorRequest
                | DisconnectReason::InvalidCredentials
                | DisconnectReason::Displaced
        )
    }
}

/// Events pushed by the coordination server after login.
#[derive(Debug, Clone)]
pub enum ServerEvent {
    /// A peer is searching the overlay.
    SearchRequest(SearchRequest),
    /// A private message arrived.
    PrivateMessage {
        /// Sending username.
        from: String,
        /// Message body.
        message: String,
    },
    /// A chat-room message arrived.
    RoomMessage {
        /// Room name.
        room: String,
        /// Sending username.
        from: String,
        /// Message body.
        message: String,
    },
    /// A watched peer changed status.
    PeerStatus {
        /// Peer username.
        username: String,
        /// True when the peer is now online.
        online: bool,
    },
}

/// An inbound search from a peer, to be answered from the local catalog.
#[derive(Debug, Clone)]
pub struct SearchRequest {
    /// Username of the searching peer.
    pub username: String,
    /// Correlation token chosen by the searcher.
    pub token: u32,
    /// Raw query text.
    pub query: String,
}

/// A reply to an inbound search, listing matching local files.
#[derive(Debug, Clone, Default)]
pub struct SearchReply {
    /// Matching files in overlay (backslash) form.
    pub files: Vec<RemoteFile>,
    /// Whether an upload slot is currently free.
    pub has_free_slot: bool,
    /// Current average upload speed in bytes per second.
    pub upload_speed: u64,
    /// Number of uploads queued ahead of a new request.
    pub queue_length: u64,
}

/// A response from a remote peer to a search this daemon initiated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerSearchResponse {
    /// Responding username.
    pub username: String,
    /// Token of the originating search.
    pub token: u32,
    /// Files the peer offered.
    pub files: Vec<RemoteFile>,
    /// Whether the peer advertised a free upload slot.
    pub has_free_slot: bool,
    /// The peer's advertised upload speed in bytes per second.
    pub upload_speed: u64,
    /// The peer's advertised queue length.
    pub queue_length: u64,
}

/// A file entry in overlay wire form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteFile {
    /// Full remote name, backslash-separated.
    pub name: String,
    /// Size in bytes.
    pub size: u64,
    /// Lowercased extension without the dot, empty when none.
    pub extension: String,
    /// Audio bitrate in kbit/s, when known.
    pub bitrate: Option<u32>,
    /// Duration in whole seconds, when known.
    pub duration: Option<u32>,
    /// True when the audio stream is variable-bitrate.
    pub is_vbr: bool,
}

/// A directory entry in overlay wire form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteDirectory {
    /// Full remote directory name, backslash-separated.
    pub name: String,
    /// Files directly inside the directory.
    pub files: Vec<RemoteFile>,
}

/// Scope of an outbound search.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SearchScope {
    /// The whole overlay.
    Network,
    /// A single peer's share.
    Peer(String),
    /// Everyone in a chat room.
    Room(String),
}

/// Free-form user profile data served to peers on request.
#[derive(Debug, Clone, Default)]
pub struct UserInfo {
    /// Profile description text.
    pub description: String,
    /// Optional picture bytes.
    pub picture: Option<Vec<u8>>,
    /// Total upload slots.
    pub upload_slots: u32,
    /// Current upload queue length.
    pub queue_length: u64,
    /// Whether a slot is free right now.
    pub has_free_slot: bool,
}

/// Why an inbound upload request was refused.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnqueueRefusal {
    /// The requested file is not shared.
    NotShared,
    /// The same transfer is already queued or active.
    AlreadyQueued,
    /// The requesting user is blacklisted.
    Banned,
    /// Some other local failure; the text is sent to the peer.
    Other(String),
}

/// Byte-progress callback invoked as a transfer advances.
pub type ProgressFn = Arc<dyn Fn(u64) + Send + Sync>;

/// Bandwidth pacing hook.
///
/// Called with the number of bytes the implementation wants to move next;
/// resolves with the number it may move now (possibly fewer). The
/// implementation must not transfer bytes it has not been granted.
pub type PacerFn =
    Arc<dyn Fn(usize) -> futures::future::BoxFuture<'static, usize> + Send + Sync>;

/// Options for an outbound upload to a peer.
#[derive(Clone, Default)]
pub struct UploadOptions {
    /// Byte offset the peer asked to resume from.
    pub start_offset: u64,
}

/// Options for a download from a peer.
#[derive(Clone, Default)]
pub struct DownloadOptions {
    /// Byte offset to resume from.
    pub start_offset: u64,
    /// Invoked with the cumulative byte count as data lands on disk.
    pub on_progress: Option<ProgressFn>,
    /// Bandwidth pacing hook; when set, the implementation acquires a grant
    /// before moving each chunk.
    pub pacer: Option<PacerFn>,
}

impl std::fmt::Debug for DownloadOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DownloadOptions")
            .field("start_offset", &self.start_offset)
            .field("on_progress", &self.on_progress.is_some())
            .field("pacer", &self.pacer.is_some())
            .finish()
    }
}

/// A partial update to the overlay connection options.
///
/// `None` fields are left unchanged. The implementation reports whether the
/// patch requires dropping and re-establishing the server connection.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OverlayOptionsPatch {
    /// New server address, `host:port`.
    pub server_address: Option<String>,
    /// New listen port for inbound peer connections.
    pub listen_port: Option<u16>,
    /// Whether to participate in the overlay's distributed network.
    pub enable_distributed_network: Option<bool>,
}

impl OverlayOptionsPatch {
    /// True when the patch changes nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        *self == OverlayOptionsPatch::default()
    }
}
