//! Configuration file loading.
//!
//! The daemon reads one TOML file and converts it into the immutable
//! [`ConfigSnapshot`] the core consumes. Validation failures at startup are
//! fatal; the daemon refuses to run half-configured.

use anyhow::Context;
use drift_core::config::{
    AgentsConfig, ConfigSnapshot, GroupConfig, GroupLimits, GroupsConfig, NetworkConfig,
    ResponseLimit, ResumePolicy, RoomsConfig, ServerConfig, SharesConfig, StorageModeConfig,
    TransfersConfig,
};
use drift_core::groups::{LeecherThresholds, QueueStrategy};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level TOML document.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigFile {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub network: NetworkSection,
    #[serde(default)]
    pub shares: SharesSection,
    #[serde(default)]
    pub transfers: TransfersSection,
    #[serde(default)]
    pub groups: Vec<GroupSection>,
    #[serde(default)]
    pub leechers: LeechersSection,
    #[serde(default)]
    pub blacklist: BlacklistSection,
    #[serde(default)]
    pub agents: HashMap<String, AgentSection>,
    #[serde(default)]
    pub rooms: RoomsSection,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerSection {
    #[serde(default = "default_server_address")]
    pub address: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    #[serde(default = "default_reconnect_base_secs")]
    pub reconnect_base_secs: u64,
    #[serde(default = "default_reconnect_cap_secs")]
    pub reconnect_cap_secs: u64,
}

impl Default for ServerSection {
    fn default() -> Self {
        ServerSection {
            address: default_server_address(),
            username: String::new(),
            password: String::new(),
            reconnect_base_secs: default_reconnect_base_secs(),
            reconnect_cap_secs: default_reconnect_cap_secs(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NetworkSection {
    #[serde(default = "default_listen_port")]
    pub listen_port: u16,
    #[serde(default = "default_agent_listen_addr")]
    pub agent_listen_addr: String,
}

impl Default for NetworkSection {
    fn default() -> Self {
        NetworkSection {
            listen_port: default_listen_port(),
            agent_listen_addr: default_agent_listen_addr(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SharesSection {
    #[serde(default)]
    pub roots: Vec<String>,
    #[serde(default)]
    pub filters: Vec<String>,
    #[serde(default)]
    pub on_disk_index: bool,
    #[serde(default)]
    pub workers: usize,
    #[serde(default = "default_response_limit")]
    pub response_limit: usize,
    #[serde(default = "default_true")]
    pub remove_single_character_terms: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TransfersSection {
    #[serde(default = "default_slots")]
    pub upload_slots: u32,
    #[serde(default = "default_slots")]
    pub download_slots: u32,
    /// Bytes per second; zero means unlimited.
    #[serde(default)]
    pub upload_speed_limit: u64,
    #[serde(default)]
    pub download_speed_limit: u64,
    #[serde(default = "default_download_dir")]
    pub download_dir: PathBuf,
    #[serde(default)]
    pub requeue_interrupted_downloads: bool,
}

impl Default for TransfersSection {
    fn default() -> Self {
        TransfersSection {
            upload_slots: default_slots(),
            download_slots: default_slots(),
            upload_speed_limit: 0,
            download_speed_limit: 0,
            download_dir: default_download_dir(),
            requeue_interrupted_downloads: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GroupSection {
    pub name: String,
    #[serde(default = "default_priority")]
    pub priority: u32,
    #[serde(default)]
    pub strategy: StrategySection,
    #[serde(default = "default_group_slots")]
    pub slots: u32,
    /// Bytes per second; zero means unlimited.
    #[serde(default)]
    pub speed_limit: u64,
    #[serde(default)]
    pub members: Vec<String>,
}

#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum StrategySection {
    #[default]
    RoundRobin,
    FirstInFirstOut,
}

impl From<StrategySection> for QueueStrategy {
    fn from(section: StrategySection) -> Self {
        match section {
            StrategySection::RoundRobin => QueueStrategy::RoundRobin,
            StrategySection::FirstInFirstOut => QueueStrategy::FirstInFirstOut,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LeechersSection {
    #[serde(default = "default_one")]
    pub min_files: u64,
    #[serde(default = "default_one")]
    pub min_directories: u64,
    #[serde(default = "default_leecher_slots")]
    pub slots: u32,
    #[serde(default)]
    pub speed_limit: u64,
}

impl Default for LeechersSection {
    fn default() -> Self {
        LeechersSection {
            min_files: 1,
            min_directories: 1,
            slots: default_leecher_slots(),
            speed_limit: 0,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BlacklistSection {
    #[serde(default)]
    pub users: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AgentSection {
    pub secret: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RoomsSection {
    #[serde(default)]
    pub autojoin: Vec<String>,
}

fn default_server_address() -> String {
    "server.overlay.net:2271".to_string()
}
fn default_reconnect_base_secs() -> u64 {
    2
}
fn default_reconnect_cap_secs() -> u64 {
    300
}
fn default_listen_port() -> u16 {
    2234
}
fn default_agent_listen_addr() -> String {
    "0.0.0.0:5031".to_string()
}
fn default_response_limit() -> usize {
    100
}
fn default_true() -> bool {
    true
}
fn default_slots() -> u32 {
    10
}
fn default_group_slots() -> u32 {
    5
}
fn default_leecher_slots() -> u32 {
    1
}
fn default_priority() -> u32 {
    5
}
fn default_one() -> u64 {
    1
}
fn default_download_dir() -> PathBuf {
    PathBuf::from("downloads")
}

impl ConfigFile {
    /// Read and parse a TOML config file.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        toml::from_str(&text).with_context(|| format!("parsing config file {}", path.display()))
    }

    /// Convert to the core snapshot and validate it.
    pub fn into_snapshot(self) -> anyhow::Result<ConfigSnapshot> {
        let snapshot = ConfigSnapshot {
            network: NetworkConfig {
                listen_port: self.network.listen_port,
                agent_listen_addr: self.network.agent_listen_addr,
            },
            server: ServerConfig {
                address: self.server.address,
                username: self.server.username,
                password: self.server.password,
                reconnect_base: Duration::from_secs(self.server.reconnect_base_secs),
                reconnect_cap: Duration::from_secs(self.server.reconnect_cap_secs),
            },
            shares: SharesConfig {
                roots: self.shares.roots,
                filters: self.shares.filters,
                storage_mode: if self.shares.on_disk_index {
                    StorageModeConfig::Disk
                } else {
                    StorageModeConfig::Memory
                },
                workers: self.shares.workers,
                response_limit: ResponseLimit(self.shares.response_limit),
                remove_single_character_terms: self.shares.remove_single_character_terms,
            },
            groups: GroupsConfig {
                user_defined: self
                    .groups
                    .into_iter()
                    .map(|g| GroupConfig {
                        name: g.name,
                        priority: g.priority,
                        strategy: g.strategy.into(),
                        slots: g.slots,
                        speed_limit: g.speed_limit,
                        members: g.members,
                    })
                    .collect(),
                default: GroupLimits::default(),
                leechers: GroupLimits {
                    slots: self.leechers.slots,
                    speed_limit: self.leechers.speed_limit,
                    strategy: QueueStrategy::RoundRobin,
                },
                blacklisted: self.blacklist.users,
                leecher_thresholds: LeecherThresholds {
                    min_files: self.leechers.min_files,
                    min_directories: self.leechers.min_directories,
                },
            },
            transfers: TransfersConfig {
                upload_slots: self.transfers.upload_slots,
                download_slots: self.transfers.download_slots,
                upload_speed_limit: self.transfers.upload_speed_limit,
                download_speed_limit: self.transfers.download_speed_limit,
                download_dir: self.transfers.download_dir,
                resume_policy: if self.transfers.requeue_interrupted_downloads {
                    ResumePolicy::Requeue
                } else {
                    ResumePolicy::Error
                },
            },
            agents: AgentsConfig {
                secrets: self
                    .agents
                    .into_iter()
                    .map(|(name, agent)| (name, agent.secret))
                    .collect(),
            },
            rooms: RoomsConfig {
                autojoin: self.rooms.autojoin,
            },
            ..Default::default()
        };

        snapshot
            .validate()
            .map_err(|err| anyhow::anyhow!("invalid configuration: {err}"))?;
        Ok(snapshot)
    }
}
