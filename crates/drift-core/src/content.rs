//! Remote content sourcing.
//!
//! Files advertised on behalf of agents resolve to `agent://name/filename`
//! pseudo-paths. When the transfer engine meets one, it obtains the byte
//! stream through [`RemoteContent`] instead of the local filesystem; its
//! scheduling and governance behavior is identical either way.

use crate::error::{CoreError, Result};
use async_trait::async_trait;
use drift_proto::ByteSource;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::oneshot;

/// Scheme prefix marking agent-hosted content.
pub const AGENT_SCHEME: &str = "agent://";

/// Where an agent-hosted file lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentLocation {
    /// Agent name.
    pub agent: String,
    /// Filename as the agent knows it.
    pub filename: String,
}

impl AgentLocation {
    /// The pseudo-path form stored in transfer records.
    #[must_use]
    pub fn to_path(&self) -> PathBuf {
        PathBuf::from(format!("{AGENT_SCHEME}{}/{}", self.agent, self.filename))
    }

    /// Parse a pseudo-path; `None` for ordinary local paths.
    #[must_use]
    pub fn parse(path: &Path) -> Option<AgentLocation> {
        let text = path.to_str()?;
        let rest = text.strip_prefix(AGENT_SCHEME)?;
        let (agent, filename) = rest.split_once('/')?;
        if agent.is_empty() || filename.is_empty() {
            return None;
        }
        Some(AgentLocation {
            agent: agent.to_string(),
            filename: filename.to_string(),
        })
    }
}

/// Result of a file-info inquiry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RemoteFileInfo {
    /// Whether the agent has the file.
    pub exists: bool,
    /// File length in bytes when it exists.
    pub length: u64,
}

/// An agent-advertised file matched during share resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteShare {
    /// Hosting agent.
    pub agent: String,
    /// Filename as the agent knows it.
    pub filename: String,
    /// Size in bytes.
    pub size: u64,
}

/// Handle the engine uses to signal that an agent-sourced upload finished.
///
/// The agent's data channel stays open until this resolves; dropping the
/// handle without finishing counts as an abnormal end.
#[derive(Debug)]
pub struct UploadCompletion {
    sender: Option<oneshot::Sender<Result<()>>>,
}

impl UploadCompletion {
    /// Pair a completion handle with its receiving end.
    #[must_use]
    pub fn channel() -> (UploadCompletion, oneshot::Receiver<Result<()>>) {
        let (tx, rx) = oneshot::channel();
        (UploadCompletion { sender: Some(tx) }, rx)
    }

    /// Resolve the completion.
    pub fn finish(mut self, result: Result<()>) {
        if let Some(sender) = self.sender.take() {
            let _ = sender.send(result);
        }
    }
}

impl Drop for UploadCompletion {
    fn drop(&mut self) {
        if let Some(sender) = self.sender.take() {
            let _ = sender.send(Err(CoreError::internal(
                "upload completion dropped without result",
            )));
        }
    }
}

/// The engine's window onto agent-hosted content.
#[async_trait]
pub trait RemoteContent: Send + Sync {
    /// Find an agent advertising this remote name, if any.
    fn resolve_shared(&self, remote_name: &str) -> Option<RemoteShare>;

    /// Ask an agent whether it has a file, and how large it is.
    async fn file_info(
        &self,
        agent: &str,
        filename: &str,
        timeout: Duration,
    ) -> Result<RemoteFileInfo>;

    /// Obtain a byte stream for an agent's file.
    ///
    /// The returned [`UploadCompletion`] must be finished once the bytes
    /// have been fully consumed; it keeps the agent's data channel alive
    /// for the duration of the transfer.
    async fn fetch(
        &self,
        agent: &str,
        filename: &str,
        timeout: Duration,
    ) -> Result<(ByteSource, UploadCompletion)>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_agent_path_round_trip() {
        let location = AgentLocation {
            agent: "basement".to_string(),
            filename: r"music\song.mp3".to_string(),
        };
        let path = location.to_path();
        assert_eq!(AgentLocation::parse(&path), Some(location));
    }

    #[test]
    fn test_ordinary_paths_are_not_agent_paths() {
        assert!(AgentLocation::parse(Path::new("/srv/music/song.mp3")).is_none());
        assert!(AgentLocation::parse(Path::new("agent://")).is_none());
        assert!(AgentLocation::parse(Path::new("agent://name-only")).is_none());
    }

    #[tokio::test]
    async fn test_completion_finish_delivers() {
        let (completion, rx) = UploadCompletion::channel();
        completion.finish(Ok(()));
        assert!(rx.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_completion_drop_is_an_error() {
        let (completion, rx) = UploadCompletion::channel();
        drop(completion);
        assert!(matches!(rx.await.unwrap(), Err(CoreError::Internal(_))));
    }
}
