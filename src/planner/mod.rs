// src/planner/mod.rs

//! Decomposition of operator intents into a staged [`RequestPlan`].
//!
//! Every operation expands into one task per target host. Tasks are grouped
//! by role command and the groups are layered by the stack's role command
//! order: a group sits in a later Stage than every group that blocks it.
//! Unrelated groups share a Stage.

use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::debug;

use crate::errors::{Result, ShepherdError};
use crate::model::{
    CommandParams, RequestKind, RequestPlan, RoleCommand, RoleCommandKey, StageFlags, StagePlan,
    TaskPlan,
};
use crate::ordering::CompiledStack;
use crate::topology::{ComponentRef, TopologyProvider};
use crate::types::{FailurePolicy, parse_duration};

/// One operator intent: run `command` for `service/component`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Operation {
    pub service: String,
    pub component: String,
    pub command: RoleCommand,
    /// Target hosts; every host of the component when empty.
    #[serde(default)]
    pub hosts: Vec<String>,
    #[serde(default)]
    pub params: BTreeMap<String, String>,
    #[serde(default)]
    pub configurations: BTreeMap<String, BTreeMap<String, String>>,
    /// Overrides the configured default task timeout (e.g. `"90s"`).
    #[serde(default)]
    pub timeout: Option<String>,
}

impl Operation {
    pub fn new(service: impl Into<String>, component: impl Into<String>, command: RoleCommand) -> Self {
        Self {
            service: service.into(),
            component: component.into(),
            command,
            hosts: Vec::new(),
            params: BTreeMap::new(),
            configurations: BTreeMap::new(),
            timeout: None,
        }
    }

    pub fn key(&self) -> RoleCommandKey {
        RoleCommandKey::new(self.service.clone(), self.component.clone(), self.command)
    }
}

/// Operations file accepted by `plan` and `run --submit`.
///
/// ```toml
/// cluster = "c1"
/// context = "Start HDFS"
/// failure_policy = "ABORT"
///
/// [[operation]]
/// service = "HDFS"
/// component = "NAMENODE"
/// command = "START"
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct OperationsFile {
    #[serde(default)]
    pub cluster: Option<String>,
    #[serde(default)]
    pub context: Option<String>,
    #[serde(default)]
    pub failure_policy: Option<FailurePolicy>,
    #[serde(rename = "operation", default)]
    pub operations: Vec<Operation>,
}

impl OperationsFile {
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        Ok(toml::from_str(contents)?)
    }
}

/// Per-task defaults applied by every planner.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskDefaults {
    pub timeout: Duration,
    pub max_attempts: u32,
    /// Role commands whose timed-out attempts are re-queued automatically.
    pub retry_commands: BTreeSet<RoleCommand>,
}

impl Default for TaskDefaults {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(600),
            max_attempts: 2,
            retry_commands: [
                RoleCommand::Install,
                RoleCommand::Start,
                RoleCommand::Stop,
                RoleCommand::Restart,
                RoleCommand::ServiceCheck,
            ]
            .into_iter()
            .collect(),
        }
    }
}

impl TaskDefaults {
    pub fn task(
        &self,
        host: &str,
        key: &RoleCommandKey,
        params: CommandParams,
        timeout: Option<Duration>,
    ) -> TaskPlan {
        TaskPlan {
            host: host.to_string(),
            service: key.service.clone(),
            role: key.role.clone(),
            command: key.command,
            params,
            timeout_secs: timeout.unwrap_or(self.timeout).as_secs().max(1),
            max_attempts: self.max_attempts,
            retry_enabled: self.retry_commands.contains(&key.command),
        }
    }
}

/// Builds plans for plain operation Requests.
#[derive(Debug)]
pub struct RequestPlanner<'a> {
    stack: &'a CompiledStack,
    topology: &'a dyn TopologyProvider,
    defaults: &'a TaskDefaults,
}

impl<'a> RequestPlanner<'a> {
    pub fn new(
        stack: &'a CompiledStack,
        topology: &'a dyn TopologyProvider,
        defaults: &'a TaskDefaults,
    ) -> Self {
        Self {
            stack,
            topology,
            defaults,
        }
    }

    /// Plan a Request; nothing is persisted.
    pub fn plan(
        &self,
        cluster: &str,
        operations: &[Operation],
        failure_policy: FailurePolicy,
        context: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<RequestPlan> {
        if operations.is_empty() {
            return Err(ShepherdError::Planning(
                "a request needs at least one operation".to_string(),
            ));
        }

        let mut groups: BTreeMap<RoleCommandKey, BTreeMap<String, TaskPlan>> = BTreeMap::new();
        for op in operations {
            let key = op.key();
            let hosts = self.target_hosts(cluster, op)?;
            let timeout = op
                .timeout
                .as_deref()
                .map(parse_duration)
                .transpose()
                .map_err(|e| ShepherdError::Planning(format!("operation {key}: {e}")))?;
            let params = CommandParams {
                params: op.params.clone(),
                configurations: op.configurations.clone(),
            };

            let group = groups.entry(key.clone()).or_default();
            for host in hosts {
                // Same role command on the same host twice collapses into
                // one task; the last operation's parameters win.
                group.insert(
                    host.clone(),
                    self.defaults.task(&host, &key, params.clone(), timeout),
                );
            }
        }

        let keys: BTreeSet<RoleCommandKey> = groups.keys().cloned().collect();
        let layers = self.stack.order.stage_layers(&keys);

        let mut stages = Vec::with_capacity(layers.len());
        for layer in layers {
            let name = layer
                .iter()
                .map(|k| format!("{} {}", k.role, k.command))
                .collect::<Vec<_>>()
                .join(", ");
            let tasks = layer
                .iter()
                .filter_map(|k| groups.remove(k))
                .flat_map(|by_host| by_host.into_values())
                .collect();
            stages.push(StagePlan {
                name,
                flags: StageFlags::default(),
                tasks,
            });
        }

        let context = context.map(str::to_string).unwrap_or_else(|| {
            operations
                .iter()
                .map(|op| format!("{} {}", op.command, op.component))
                .collect::<Vec<_>>()
                .join(", ")
        });

        debug!(
            cluster,
            stack = %self.stack.id(),
            stages = stages.len(),
            "planned request"
        );

        Ok(RequestPlan {
            cluster: cluster.to_string(),
            context,
            created_at: now,
            failure_policy,
            kind: RequestKind::Operations,
            stages,
        })
    }

    fn target_hosts(&self, cluster: &str, op: &Operation) -> Result<Vec<String>> {
        if !self
            .stack
            .definition
            .supports(&op.service, &op.component)
        {
            return Err(ShepherdError::Planning(format!(
                "stack {} has no component {}/{}",
                self.stack.id(),
                op.service,
                op.component
            )));
        }

        let component = ComponentRef::new(op.service.clone(), op.component.clone());
        let installed = self.topology.hosts_for_component(cluster, &component)?;

        if op.hosts.is_empty() {
            if installed.is_empty() {
                return Err(ShepherdError::Planning(format!(
                    "no host in cluster '{cluster}' runs {component}"
                )));
            }
            return Ok(installed);
        }

        // INSTALL may target hosts that do not run the component yet.
        if op.command != RoleCommand::Install {
            if let Some(host) = op.hosts.iter().find(|h| !installed.contains(h)) {
                return Err(ShepherdError::Planning(format!(
                    "host '{host}' does not run {component}"
                )));
            }
        }
        Ok(op.hosts.clone())
    }
}
