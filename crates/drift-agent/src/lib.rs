//! # DRIFT Agent Fabric
//!
//! Lets one controller node use remote "agent" nodes as extensions of its
//! own filesystem. Agents connect over a bidirectional control channel,
//! authenticate with a challenge-response under a pre-shared secret, upload
//! their share catalogs, and serve file bytes on demand through one-shot
//! authenticated HTTP channels.
//!
//! The fabric implements [`drift_core::RemoteContent`], which is how the
//! transfer engine obtains byte streams for agent-hosted uploads without
//! knowing anything about agents.

pub mod auth;
pub mod channel;
pub mod fabric;
pub mod http;
pub mod registry;
pub mod tickets;

pub use auth::{CHALLENGE_TTL, ChallengeCache, TokenCache, sign, verify};
pub use channel::{AgentChannel, AgentPush};
pub use fabric::{AgentFabric, AgentShareEntry};
pub use http::router;
pub use registry::{AgentInfo, AgentRegistry};
pub use tickets::TicketTable;
