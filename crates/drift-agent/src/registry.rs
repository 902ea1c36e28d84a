//! Connected-agent registry.

use crate::channel::AgentChannel;
use dashmap::DashMap;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::SystemTime;

/// A registered agent.
#[derive(Debug, Clone)]
pub struct AgentInfo {
    /// Declared agent name.
    pub name: String,
    /// Remote address of the control connection.
    pub remote_ip: IpAddr,
    /// Transport connection identifier.
    pub connection_id: String,
    /// When authentication completed.
    pub connected_at: SystemTime,
}

pub(crate) struct RegisteredAgent {
    pub(crate) info: AgentInfo,
    pub(crate) channel: Arc<dyn AgentChannel>,
}

/// At most one registration per name; a re-registration replaces the prior
/// one.
#[derive(Default)]
pub struct AgentRegistry {
    agents: DashMap<String, RegisteredAgent>,
}

impl AgentRegistry {
    /// Register an agent, returning the info of any replaced registration.
    pub fn register(&self, info: AgentInfo, channel: Arc<dyn AgentChannel>) -> Option<AgentInfo> {
        let key = info.name.to_lowercase();
        self.agents
            .insert(key, RegisteredAgent { info, channel })
            .map(|prior| prior.info)
    }

    /// Remove whatever agent owns this connection, returning its name.
    pub fn deregister_connection(&self, connection_id: &str) -> Option<String> {
        let name = self
            .agents
            .iter()
            .find(|entry| entry.value().info.connection_id == connection_id)
            .map(|entry| entry.key().clone())?;
        // Only remove if the connection still matches; a replacement
        // registration for the same name must survive its predecessor's
        // disconnect.
        let removed = self
            .agents
            .remove_if(&name, |_, agent| {
                agent.info.connection_id == connection_id
            })
            .is_some();
        removed.then_some(name)
    }

    /// The control channel for an agent.
    pub(crate) fn channel(&self, name: &str) -> Option<Arc<dyn AgentChannel>> {
        self.agents
            .get(&name.to_lowercase())
            .map(|entry| Arc::clone(&entry.value().channel))
    }

    /// Info for an agent.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<AgentInfo> {
        self.agents
            .get(&name.to_lowercase())
            .map(|entry| entry.value().info.clone())
    }

    /// Info for every connected agent.
    #[must_use]
    pub fn list(&self) -> Vec<AgentInfo> {
        let mut agents: Vec<AgentInfo> = self
            .agents
            .iter()
            .map(|entry| entry.value().info.clone())
            .collect();
        agents.sort_by(|a, b| a.name.cmp(&b.name));
        agents
    }

    /// Number of connected agents.
    #[must_use]
    pub fn len(&self) -> usize {
        self.agents.len()
    }

    /// True when no agent is connected.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }
}
