// src/config/model.rs

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::model::RoleCommand;
use crate::planner::TaskDefaults;
use crate::scheduler::SchedulerConfig;
use crate::topology::ComponentRef;
use crate::types::StorageMode;

/// Server configuration as read from TOML, before validation.
///
/// ```toml
/// [scheduler]
/// tick_interval = "1s"
/// max_tasks_per_host = 1
/// default_task_timeout = "600s"
/// max_task_attempts = 2
///
/// [storage]
/// mode = "file"
/// path = ".shepherd/state"
///
/// [stacks]
/// dir = "stacks"
///
/// [cluster.c1]
/// stack = "BIGTOP-3.2.0"
///
/// [cluster.c1.hosts]
/// "nn1.example.com" = ["HDFS/NAMENODE", "ZOOKEEPER/ZOOKEEPER_SERVER"]
/// "dn1.example.com" = ["HDFS/DATANODE"]
/// ```
///
/// All sections are optional and have reasonable defaults.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawServerConfig {
    #[serde(default)]
    pub scheduler: RawSchedulerSection,

    #[serde(default)]
    pub storage: StorageSection,

    #[serde(default)]
    pub stacks: StacksSection,

    /// Keys are cluster names.
    #[serde(default)]
    pub cluster: BTreeMap<String, RawClusterSection>,
}

/// `[scheduler]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct RawSchedulerSection {
    #[serde(default = "default_tick_interval")]
    pub tick_interval: String,

    #[serde(default = "default_max_tasks_per_host")]
    pub max_tasks_per_host: usize,

    #[serde(default = "default_task_timeout")]
    pub default_task_timeout: String,

    /// Dispatch attempts per task, including the first one.
    #[serde(default = "default_max_task_attempts")]
    pub max_task_attempts: u32,

    /// Role commands retried automatically after a timeout.
    #[serde(default = "default_retry_role_commands")]
    pub retry_role_commands: Vec<RoleCommand>,

    /// Commands buffered per host before dispatch fails with "channel full".
    #[serde(default = "default_agent_queue_capacity")]
    pub agent_queue_capacity: usize,
}

fn default_tick_interval() -> String {
    "1s".to_string()
}

fn default_max_tasks_per_host() -> usize {
    1
}

fn default_task_timeout() -> String {
    "600s".to_string()
}

fn default_max_task_attempts() -> u32 {
    2
}

fn default_retry_role_commands() -> Vec<RoleCommand> {
    TaskDefaults::default().retry_commands.into_iter().collect()
}

fn default_agent_queue_capacity() -> usize {
    64
}

impl Default for RawSchedulerSection {
    fn default() -> Self {
        Self {
            tick_interval: default_tick_interval(),
            max_tasks_per_host: default_max_tasks_per_host(),
            default_task_timeout: default_task_timeout(),
            max_task_attempts: default_max_task_attempts(),
            retry_role_commands: default_retry_role_commands(),
            agent_queue_capacity: default_agent_queue_capacity(),
        }
    }
}

/// `[storage]` section.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct StorageSection {
    #[serde(default)]
    pub mode: StorageMode,

    /// Root of the file store (`mode = "file"`).
    #[serde(default = "default_storage_path")]
    pub path: PathBuf,
}

fn default_storage_path() -> PathBuf {
    PathBuf::from(".shepherd/state")
}

impl Default for StorageSection {
    fn default() -> Self {
        Self {
            mode: StorageMode::default(),
            path: default_storage_path(),
        }
    }
}

/// `[stacks]` section.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct StacksSection {
    /// Directory of stack definition files (`*.toml`).
    #[serde(default = "default_stacks_dir")]
    pub dir: PathBuf,
}

fn default_stacks_dir() -> PathBuf {
    PathBuf::from("stacks")
}

impl Default for StacksSection {
    fn default() -> Self {
        Self {
            dir: default_stacks_dir(),
        }
    }
}

/// `[cluster.<name>]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct RawClusterSection {
    /// Stack id (`NAME-VERSION`) the cluster runs.
    pub stack: String,

    /// Host → `SERVICE/COMPONENT` list.
    #[serde(default)]
    pub hosts: BTreeMap<String, Vec<String>>,
}

/// Validated cluster topology.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterConfig {
    pub stack: String,
    pub hosts: BTreeMap<String, Vec<ComponentRef>>,
}

/// Validated server configuration. Only obtainable through
/// `TryFrom<RawServerConfig>`.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub scheduler: SchedulerConfig,
    pub task_defaults: TaskDefaults,
    pub agent_queue_capacity: usize,
    pub storage: StorageSection,
    pub stacks: StacksSection,
    pub clusters: BTreeMap<String, ClusterConfig>,
}

impl ServerConfig {
    pub(crate) fn new_unchecked(
        scheduler: SchedulerConfig,
        task_defaults: TaskDefaults,
        agent_queue_capacity: usize,
        storage: StorageSection,
        stacks: StacksSection,
        clusters: BTreeMap<String, ClusterConfig>,
    ) -> Self {
        Self {
            scheduler,
            task_defaults,
            agent_queue_capacity,
            storage,
            stacks,
            clusters,
        }
    }

    /// Make relative storage and stack paths relative to `base` (the
    /// directory of the config file).
    pub fn resolve_paths(&mut self, base: &Path) {
        if self.storage.path.is_relative() {
            self.storage.path = base.join(&self.storage.path);
        }
        if self.stacks.dir.is_relative() {
            self.stacks.dir = base.join(&self.stacks.dir);
        }
    }

    /// Every configured host, across clusters, sorted and deduplicated.
    pub fn all_hosts(&self) -> Vec<String> {
        let mut hosts: Vec<String> = self
            .clusters
            .values()
            .flat_map(|c| c.hosts.keys().cloned())
            .collect();
        hosts.sort();
        hosts.dedup();
        hosts
    }
}
