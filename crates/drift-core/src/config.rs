//! Runtime configuration: immutable snapshots and typed change messages.
//!
//! Components never hold a pointer back to a configuration owner. They
//! receive a read-only [`ConfigSnapshot`] and subscribe to [`ConfigChange`]
//! messages; each change enumerates the affected subsystems so a component
//! can rebuild only its own derived state.

use crate::error::{CoreError, Result};
use crate::groups::{LeecherThresholds, QueueStrategy};
use drift_index::StorageMode;
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

/// Overlay server connection settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// Coordination server address, `host:port`.
    pub address: String,
    /// Account username.
    pub username: String,
    /// Account password.
    pub password: String,
    /// Base delay of the reconnect backoff.
    pub reconnect_base: Duration,
    /// Cap of the reconnect backoff.
    pub reconnect_cap: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            address: "server.overlay.net:2271".to_string(),
            username: String::new(),
            password: String::new(),
            reconnect_base: Duration::from_secs(2),
            reconnect_cap: Duration::from_secs(300),
        }
    }
}

/// Local network settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkConfig {
    /// Listen port for inbound peer connections.
    pub listen_port: u16,
    /// Bind address for the agent HTTP listener.
    pub agent_listen_addr: String,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        NetworkConfig {
            listen_port: 2234,
            agent_listen_addr: "0.0.0.0:5031".to_string(),
        }
    }
}

/// Share index settings.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SharesConfig {
    /// Root specs, `[alias]absolute-path` with optional `!`/`-` prefix.
    pub roots: Vec<String>,
    /// Exclusion filter patterns.
    pub filters: Vec<String>,
    /// Token index storage mode.
    pub storage_mode: StorageModeConfig,
    /// Scan worker count; zero means one per CPU.
    pub workers: usize,
    /// Per-search response cap.
    pub response_limit: ResponseLimit,
    /// Drop one-character search terms.
    pub remove_single_character_terms: bool,
}

/// Serializable mirror of [`StorageMode`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StorageModeConfig {
    /// Keep token postings in memory.
    #[default]
    Memory,
    /// Keep the token index in an embedded store on disk.
    Disk,
}

impl From<StorageModeConfig> for StorageMode {
    fn from(mode: StorageModeConfig) -> Self {
        match mode {
            StorageModeConfig::Memory => StorageMode::Memory,
            StorageModeConfig::Disk => StorageMode::Disk,
        }
    }
}

/// Response cap newtype so the default is not zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResponseLimit(pub usize);

impl Default for ResponseLimit {
    fn default() -> Self {
        ResponseLimit(100)
    }
}

/// One operator-defined group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupConfig {
    /// Group name.
    pub name: String,
    /// Priority; higher is served first.
    pub priority: u32,
    /// Queue strategy.
    pub strategy: QueueStrategy,
    /// Per-direction slot limit.
    pub slots: u32,
    /// Speed limit in bytes per second; zero means unlimited.
    pub speed_limit: u64,
    /// Member usernames.
    pub members: Vec<String>,
}

/// Limits applied to a built-in group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GroupLimits {
    /// Per-direction slot limit.
    pub slots: u32,
    /// Speed limit in bytes per second; zero means unlimited.
    pub speed_limit: u64,
    /// Queue strategy.
    pub strategy: QueueStrategy,
}

impl Default for GroupLimits {
    fn default() -> Self {
        GroupLimits {
            slots: 10,
            speed_limit: 0,
            strategy: QueueStrategy::RoundRobin,
        }
    }
}

/// All group configuration.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct GroupsConfig {
    /// Operator-defined groups, resolution order preserved.
    pub user_defined: Vec<GroupConfig>,
    /// Built-in default group limits.
    pub default: GroupLimits,
    /// Built-in leechers group limits.
    pub leechers: GroupLimits,
    /// Blacklisted usernames.
    pub blacklisted: Vec<String>,
    /// Leecher thresholds.
    pub leecher_thresholds: LeecherThresholds,
}

/// What to do with non-terminal downloads found at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResumePolicy {
    /// Mark them errored with reason "interrupted".
    #[default]
    Error,
    /// Re-enqueue them from the persisted offset.
    Requeue,
}

/// Transfer engine settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransfersConfig {
    /// Global upload slots.
    pub upload_slots: u32,
    /// Global download slots.
    pub download_slots: u32,
    /// Global upload speed limit in bytes per second; zero means unlimited.
    pub upload_speed_limit: u64,
    /// Global download speed limit in bytes per second; zero means unlimited.
    pub download_speed_limit: u64,
    /// Where downloads land.
    pub download_dir: PathBuf,
    /// Startup policy for interrupted downloads.
    pub resume_policy: ResumePolicy,
}

impl Default for TransfersConfig {
    fn default() -> Self {
        TransfersConfig {
            upload_slots: 10,
            download_slots: 10,
            upload_speed_limit: 0,
            download_speed_limit: 0,
            download_dir: PathBuf::from("downloads"),
            resume_policy: ResumePolicy::default(),
        }
    }
}

/// Agent fabric settings.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AgentsConfig {
    /// Pre-shared secret per agent name.
    pub secrets: HashMap<String, String>,
}

/// Room settings (joined on login).
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RoomsConfig {
    /// Rooms to join automatically.
    pub autojoin: Vec<String>,
}

/// Distributed-network participation.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DistributedConfig {
    /// Whether to participate at all.
    pub disabled: bool,
}

/// Placeholder sections for surfaces owned by outer layers. They still
/// participate in diffing so their owners get change notifications.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct IntegrationConfig {
    /// Opaque settings blob owned by the integration layer.
    pub settings: Vec<(String, String)>,
}

/// Metrics surface settings.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MetricsConfig {
    /// Whether the metrics surface is enabled.
    pub enabled: bool,
}

/// Web surface settings.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct WebConfig {
    /// Web listener port.
    pub port: u16,
}

/// The complete, immutable configuration.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ConfigSnapshot {
    /// Local network settings.
    pub network: NetworkConfig,
    /// Overlay server settings.
    pub server: ServerConfig,
    /// Distributed network settings.
    pub distributed: DistributedConfig,
    /// Share index settings.
    pub shares: SharesConfig,
    /// Group settings.
    pub groups: GroupsConfig,
    /// Transfer engine settings.
    pub transfers: TransfersConfig,
    /// Agent fabric settings.
    pub agents: AgentsConfig,
    /// Room settings.
    pub rooms: RoomsConfig,
    /// Integration surface settings.
    pub integration: IntegrationConfig,
    /// Metrics surface settings.
    pub metrics: MetricsConfig,
    /// Web surface settings.
    pub web: WebConfig,
}

impl ConfigSnapshot {
    /// Validate a snapshot. Startup treats failures as fatal; hot patches
    /// reject the patch and retain the prior configuration.
    pub fn validate(&self) -> Result<()> {
        if self.server.address.is_empty() {
            return Err(CoreError::Configuration(
                "server.address must not be empty".to_string(),
            ));
        }
        if self.server.reconnect_base.is_zero() {
            return Err(CoreError::Configuration(
                "server.reconnect_base must be positive".to_string(),
            ));
        }
        if self.transfers.upload_slots == 0 || self.transfers.download_slots == 0 {
            return Err(CoreError::Configuration(
                "transfer slot limits must be positive".to_string(),
            ));
        }
        if self.shares.response_limit.0 == 0 {
            return Err(CoreError::Configuration(
                "shares.response_limit must be positive".to_string(),
            ));
        }
        for group in &self.groups.user_defined {
            if group.name == crate::groups::DEFAULT_GROUP
                || group.name == crate::groups::LEECHERS_GROUP
                || group.name == crate::groups::BLACKLISTED_GROUP
            {
                return Err(CoreError::Configuration(format!(
                    "group name '{}' is reserved",
                    group.name
                )));
            }
            if group.slots == 0 {
                return Err(CoreError::Configuration(format!(
                    "group '{}' must have at least one slot",
                    group.name
                )));
            }
        }
        Ok(())
    }
}

impl GroupsConfig {
    /// Build the runtime group registry this configuration describes.
    ///
    /// A configured speed limit of zero means unlimited.
    #[must_use]
    pub fn build_registry(&self) -> std::sync::Arc<crate::groups::GroupRegistry> {
        use crate::groups::{DEFAULT_GROUP, GroupPolicy, GroupRegistry, LEECHERS_GROUP};

        let to_limit = |speed: u64| if speed == 0 { u64::MAX } else { speed };

        let user_defined = self
            .user_defined
            .iter()
            .map(|g| GroupPolicy {
                name: g.name.clone(),
                priority: g.priority,
                strategy: g.strategy,
                slots: g.slots,
                speed_limit: to_limit(g.speed_limit),
                members: g.members.iter().map(|m| m.to_lowercase()).collect(),
            })
            .collect();

        let default_policy = GroupPolicy {
            strategy: self.default.strategy,
            speed_limit: to_limit(self.default.speed_limit),
            ..GroupPolicy::new(DEFAULT_GROUP, 1, self.default.slots)
        };
        let leecher_policy = GroupPolicy {
            strategy: self.leechers.strategy,
            speed_limit: to_limit(self.leechers.speed_limit),
            ..GroupPolicy::new(LEECHERS_GROUP, 0, self.leechers.slots)
        };

        GroupRegistry::new(
            user_defined,
            default_policy,
            leecher_policy,
            self.blacklisted.clone(),
            self.leecher_thresholds,
        )
    }
}

/// Subsystems a configuration change can touch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Subsystem {
    /// Local ports and bind addresses.
    Network,
    /// The overlay server connection (address, credentials, backoff).
    ServerConnection,
    /// The inbound peer listener.
    Listener,
    /// Distributed-network participation.
    DistributedNetwork,
    /// Share root paths.
    SharePaths,
    /// Share exclusion filters.
    ShareFilters,
    /// Group policies and membership.
    Groups,
    /// Room membership.
    Rooms,
    /// Integration surfaces.
    Integration,
    /// Metrics surface.
    Metrics,
    /// Web surface.
    Web,
}

/// What applying a change to one subsystem requires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// The daemon must restart.
    RequiresRestart,
    /// The overlay connection must be re-established.
    RequiresReconnect,
    /// The share catalog must be rescanned.
    RequiresRescan,
    /// Takes effect immediately.
    ApplyNow,
}

impl Subsystem {
    /// Pure classifier: the cost of applying a change to this subsystem.
    #[must_use]
    pub fn apply_change(&self) -> ApplyOutcome {
        match self {
            Subsystem::Network | Subsystem::Listener | Subsystem::Web => {
                ApplyOutcome::RequiresRestart
            }
            Subsystem::ServerConnection | Subsystem::DistributedNetwork => {
                ApplyOutcome::RequiresReconnect
            }
            Subsystem::SharePaths | Subsystem::ShareFilters => ApplyOutcome::RequiresRescan,
            Subsystem::Groups
            | Subsystem::Rooms
            | Subsystem::Integration
            | Subsystem::Metrics => ApplyOutcome::ApplyNow,
        }
    }
}

/// A typed configuration change: the new snapshot plus the subsystems whose
/// settings differ from the previous one.
#[derive(Debug, Clone)]
pub struct ConfigChange {
    /// Subsystems with differing settings, in a fixed order.
    pub affected: Vec<Subsystem>,
    /// The snapshot being applied.
    pub next: std::sync::Arc<ConfigSnapshot>,
}

impl ConfigChange {
    /// Diff two snapshots into a change message.
    #[must_use]
    pub fn diff(old: &ConfigSnapshot, next: std::sync::Arc<ConfigSnapshot>) -> Self {
        let mut affected = Vec::new();

        if old.network.agent_listen_addr != next.network.agent_listen_addr {
            affected.push(Subsystem::Network);
        }
        if old.network.listen_port != next.network.listen_port {
            affected.push(Subsystem::Listener);
        }
        if old.server != next.server {
            affected.push(Subsystem::ServerConnection);
        }
        if old.distributed != next.distributed {
            affected.push(Subsystem::DistributedNetwork);
        }
        if old.shares.roots != next.shares.roots
            || old.shares.storage_mode != next.shares.storage_mode
        {
            affected.push(Subsystem::SharePaths);
        }
        if old.shares.filters != next.shares.filters {
            affected.push(Subsystem::ShareFilters);
        }
        if old.groups != next.groups {
            affected.push(Subsystem::Groups);
        }
        if old.rooms != next.rooms {
            affected.push(Subsystem::Rooms);
        }
        if old.integration != next.integration {
            affected.push(Subsystem::Integration);
        }
        if old.metrics != next.metrics {
            affected.push(Subsystem::Metrics);
        }
        if old.web != next.web {
            affected.push(Subsystem::Web);
        }

        ConfigChange { affected, next }
    }

    /// The strongest requirement across all affected subsystems, if any
    /// subsystem is affected at all.
    #[must_use]
    pub fn strongest_outcome(&self) -> Option<ApplyOutcome> {
        self.affected
            .iter()
            .map(|s| s.apply_change())
            .max_by_key(|outcome| match outcome {
                ApplyOutcome::ApplyNow => 0,
                ApplyOutcome::RequiresRescan => 1,
                ApplyOutcome::RequiresReconnect => 2,
                ApplyOutcome::RequiresRestart => 3,
            })
    }
}
