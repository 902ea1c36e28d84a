//! User groups: the policy bundles that drive scheduling and rate limiting.
//!
//! Every counterparty belongs to exactly one group. Resolution order: the
//! first user-defined group listing the name; else `leechers` when the
//! peer's recorded share counts fall below the configured thresholds; else
//! `default`. Membership in `blacklisted` short-circuits admission before
//! any of that.

use dashmap::DashMap;
use std::collections::HashSet;
use std::sync::Arc;

/// Name of the built-in default group.
pub const DEFAULT_GROUP: &str = "default";
/// Name of the built-in leechers group.
pub const LEECHERS_GROUP: &str = "leechers";
/// Name of the built-in blacklist group.
pub const BLACKLISTED_GROUP: &str = "blacklisted";

/// How queued transfers inside a group are ordered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum QueueStrategy {
    /// Serve the least-recently-served user first, FIFO within a user.
    #[default]
    RoundRobin,
    /// Oldest enqueued transfer first, regardless of user.
    FirstInFirstOut,
}

/// One group's scheduling policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupPolicy {
    /// Group name.
    pub name: String,
    /// Priority; higher is served first.
    pub priority: u32,
    /// Intra-group ordering.
    pub strategy: QueueStrategy,
    /// Concurrent transfer slots for the whole group, per direction.
    pub slots: u32,
    /// Speed limit in bytes per second. `u64::MAX` means unlimited.
    pub speed_limit: u64,
    /// Member usernames, lowercased. Built-in groups leave this empty.
    pub members: HashSet<String>,
}

impl GroupPolicy {
    /// A policy with the given name and unlimited speed.
    #[must_use]
    pub fn new(name: &str, priority: u32, slots: u32) -> Self {
        GroupPolicy {
            name: name.to_string(),
            priority,
            strategy: QueueStrategy::default(),
            slots,
            speed_limit: u64::MAX,
            members: HashSet::new(),
        }
    }
}

/// Share-count floor below which an unlisted user is a leecher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LeecherThresholds {
    /// Minimum shared file count.
    pub min_files: u64,
    /// Minimum shared directory count.
    pub min_directories: u64,
}

impl Default for LeecherThresholds {
    fn default() -> Self {
        LeecherThresholds {
            min_files: 1,
            min_directories: 1,
        }
    }
}

/// The full group configuration plus peer share statistics.
pub struct GroupRegistry {
    /// User-defined groups in declaration order; resolution is first-match.
    user_defined: Vec<GroupPolicy>,
    default_policy: GroupPolicy,
    leecher_policy: GroupPolicy,
    blacklisted: HashSet<String>,
    thresholds: LeecherThresholds,
    /// Last observed (files, directories) per peer, lowercased username.
    peer_stats: DashMap<String, (u64, u64)>,
}

impl GroupRegistry {
    /// Build a registry. `default_policy` and `leecher_policy` must carry
    /// the built-in names; member sets on them are ignored.
    #[must_use]
    pub fn new(
        user_defined: Vec<GroupPolicy>,
        default_policy: GroupPolicy,
        leecher_policy: GroupPolicy,
        blacklisted: impl IntoIterator<Item = String>,
        thresholds: LeecherThresholds,
    ) -> Arc<Self> {
        Arc::new(GroupRegistry {
            user_defined,
            default_policy,
            leecher_policy,
            blacklisted: blacklisted.into_iter().map(|u| u.to_lowercase()).collect(),
            thresholds,
            peer_stats: DashMap::new(),
        })
    }

    /// A registry with stock built-ins only; used by tests and as the
    /// pre-configuration default.
    #[must_use]
    pub fn stock() -> Arc<Self> {
        GroupRegistry::new(
            Vec::new(),
            GroupPolicy::new(DEFAULT_GROUP, 1, u32::MAX),
            GroupPolicy::new(LEECHERS_GROUP, 0, 1),
            Vec::new(),
            LeecherThresholds::default(),
        )
    }

    /// Record a peer's advertised share counts for leecher classification.
    pub fn record_peer_stats(&self, username: &str, files: u64, directories: u64) {
        self.peer_stats
            .insert(username.to_lowercase(), (files, directories));
    }

    /// True when the user may not transfer at all.
    #[must_use]
    pub fn is_blacklisted(&self, username: &str) -> bool {
        self.blacklisted.contains(&username.to_lowercase())
    }

    /// Resolve the effective group for a user.
    #[must_use]
    pub fn group_for(&self, username: &str) -> &GroupPolicy {
        let lowered = username.to_lowercase();

        for group in &self.user_defined {
            if group.members.contains(&lowered) {
                return group;
            }
        }

        if let Some(stats) = self.peer_stats.get(&lowered) {
            let (files, directories) = *stats;
            if files < self.thresholds.min_files
                || directories < self.thresholds.min_directories
            {
                return &self.leecher_policy;
            }
        }

        &self.default_policy
    }

    /// All policies, highest priority first; ties break on name for
    /// deterministic scheduling.
    #[must_use]
    pub fn by_priority(&self) -> Vec<&GroupPolicy> {
        let mut groups: Vec<&GroupPolicy> = self
            .user_defined
            .iter()
            .chain([&self.default_policy, &self.leecher_policy])
            .collect();
        groups.sort_by(|a, b| b.priority.cmp(&a.priority).then(a.name.cmp(&b.name)));
        groups
    }

    /// Look a policy up by name.
    #[must_use]
    pub fn policy(&self, name: &str) -> Option<&GroupPolicy> {
        if name == self.default_policy.name {
            return Some(&self.default_policy);
        }
        if name == self.leecher_policy.name {
            return Some(&self.leecher_policy);
        }
        self.user_defined.iter().find(|g| g.name == name)
    }
}
