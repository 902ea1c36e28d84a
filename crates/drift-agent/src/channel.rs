//! The control channel to a connected agent.
//!
//! The transport (WebSocket, long-poll, in-process test double) is behind
//! the [`AgentChannel`] trait; the fabric only pushes typed messages and
//! reads connection metadata.

use async_trait::async_trait;
use drift_core::Result;
use std::net::IpAddr;
use uuid::Uuid;

/// Messages the controller pushes to an agent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AgentPush {
    /// Authentication challenge; the agent replies through `login`.
    Challenge {
        /// 32 random bytes to sign.
        token: Vec<u8>,
    },
    /// Ask whether the agent has a file and how large it is.
    RequestFileInfo {
        /// Filename as the agent knows it.
        filename: String,
        /// Correlation id echoed in the reply.
        id: Uuid,
    },
    /// Ask the agent to open a data channel and push a file.
    RequestFileUpload {
        /// Filename as the agent knows it.
        filename: String,
        /// One-shot credential for the data channel.
        token: Uuid,
    },
}

/// One agent's control connection.
#[async_trait]
pub trait AgentChannel: Send + Sync {
    /// Push a message to the agent.
    async fn push(&self, message: AgentPush) -> Result<()>;

    /// Transport-assigned connection identifier.
    fn connection_id(&self) -> String;

    /// The agent's remote address.
    fn remote_ip(&self) -> IpAddr;
}
