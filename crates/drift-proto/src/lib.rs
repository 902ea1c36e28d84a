//! # DRIFT Proto
//!
//! Abstraction over the overlay peer-to-peer protocol library.
//!
//! The daemon never speaks the overlay wire format itself. Everything that
//! crosses the network to the coordination server or to peers goes through
//! the [`OverlayClient`] trait defined here: connecting, logging in,
//! searching, uploading, downloading, and browsing. Inbound peer requests
//! (browse, directory listing, search, upload enqueue) come back through the
//! [`PeerRequestHandler`] trait the daemon installs.
//!
//! Implementations of [`OverlayClient`] are expected to classify transfer
//! failures into [`ProtoError::Timeout`], [`ProtoError::PeerRejected`], or
//! [`ProtoError::Remote`]; the transfer engine maps those onto terminal
//! transfer states without re-deriving the classification.

pub mod client;
pub mod error;
pub mod types;

pub use client::{OverlayClient, PeerRequestHandler};
pub use error::{ProtoError, Result};
pub use client::ByteSource;
pub use types::{
    Credentials, DisconnectReason, DownloadOptions, EnqueueRefusal, OverlayOptionsPatch,
    PacerFn, PeerSearchResponse, ProgressFn, RemoteDirectory, RemoteFile, SearchReply,
    SearchRequest, SearchScope, ServerEvent, SessionInfo, UploadOptions, UserInfo,
};
