// src/config/validate.rs

use std::collections::BTreeMap;

use crate::config::model::{ClusterConfig, RawServerConfig, ServerConfig};
use crate::errors::{Result, ShepherdError};
use crate::ordering::StackRegistry;
use crate::planner::TaskDefaults;
use crate::scheduler::SchedulerConfig;
use crate::topology::ComponentRef;
use crate::types::parse_duration;

impl TryFrom<RawServerConfig> for ServerConfig {
    type Error = ShepherdError;

    fn try_from(raw: RawServerConfig) -> std::result::Result<Self, Self::Error> {
        let (scheduler, task_defaults) = validate_scheduler(&raw)?;
        let clusters = validate_clusters(&raw)?;
        Ok(ServerConfig::new_unchecked(
            scheduler,
            task_defaults,
            raw.scheduler.agent_queue_capacity,
            raw.storage,
            raw.stacks,
            clusters,
        ))
    }
}

fn config_error(msg: String) -> ShepherdError {
    ShepherdError::ConfigError(msg)
}

fn validate_scheduler(raw: &RawServerConfig) -> Result<(SchedulerConfig, TaskDefaults)> {
    let section = &raw.scheduler;

    let tick_interval = parse_duration(&section.tick_interval)
        .map_err(|e| config_error(format!("[scheduler].tick_interval: {e}")))?;
    if tick_interval.is_zero() {
        return Err(config_error(
            "[scheduler].tick_interval must be greater than zero".to_string(),
        ));
    }

    let timeout = parse_duration(&section.default_task_timeout)
        .map_err(|e| config_error(format!("[scheduler].default_task_timeout: {e}")))?;
    if timeout.as_secs() == 0 {
        return Err(config_error(
            "[scheduler].default_task_timeout must be at least 1s".to_string(),
        ));
    }

    if section.max_tasks_per_host == 0 {
        return Err(config_error(
            "[scheduler].max_tasks_per_host must be >= 1 (got 0)".to_string(),
        ));
    }
    if section.max_task_attempts == 0 {
        return Err(config_error(
            "[scheduler].max_task_attempts must be >= 1 (got 0)".to_string(),
        ));
    }
    if section.agent_queue_capacity == 0 {
        return Err(config_error(
            "[scheduler].agent_queue_capacity must be >= 1 (got 0)".to_string(),
        ));
    }

    Ok((
        SchedulerConfig {
            tick_interval,
            max_tasks_per_host: section.max_tasks_per_host,
        },
        TaskDefaults {
            timeout,
            max_attempts: section.max_task_attempts,
            retry_commands: section.retry_role_commands.iter().copied().collect(),
        },
    ))
}

fn validate_clusters(raw: &RawServerConfig) -> Result<BTreeMap<String, ClusterConfig>> {
    let mut clusters = BTreeMap::new();

    for (name, cluster) in &raw.cluster {
        if !cluster.stack.contains('-') {
            return Err(config_error(format!(
                "cluster '{name}': stack '{}' must be NAME-VERSION",
                cluster.stack
            )));
        }
        if cluster.hosts.is_empty() {
            return Err(config_error(format!("cluster '{name}' has no hosts")));
        }

        let mut hosts = BTreeMap::new();
        for (host, components) in &cluster.hosts {
            let parsed = components
                .iter()
                .map(|c| c.parse::<ComponentRef>())
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(|e| config_error(format!("cluster '{name}', host '{host}': {e}")))?;
            hosts.insert(host.clone(), parsed);
        }

        clusters.insert(
            name.clone(),
            ClusterConfig {
                stack: cluster.stack.clone(),
                hosts,
            },
        );
    }

    Ok(clusters)
}

/// Check the clusters against the loaded stacks: every cluster runs a known
/// stack and only hosts components that stack ships.
pub fn validate_cluster_stacks(cfg: &ServerConfig, registry: &StackRegistry) -> Result<()> {
    for (name, cluster) in &cfg.clusters {
        let stack = registry.get(&cluster.stack).map_err(|_| {
            config_error(format!(
                "cluster '{name}' runs unknown stack '{}' (loaded: {})",
                cluster.stack,
                registry.stack_ids().join(", ")
            ))
        })?;
        for (host, components) in &cluster.hosts {
            for component in components {
                if !stack
                    .definition
                    .supports(&component.service, &component.component)
                {
                    return Err(config_error(format!(
                        "cluster '{name}', host '{host}': stack {} has no component {component}",
                        cluster.stack
                    )));
                }
            }
        }
    }
    Ok(())
}
