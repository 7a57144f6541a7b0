// src/upgrade/orchestrator.rs

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info};

use crate::errors::{Result, ShepherdError};
use crate::model::{
    CommandParams, Request, RequestKind, RequestPlan, RoleCommandKey, StagePlan, UpgradeSummary,
};
use crate::ordering::{CompiledStack, StackRegistry};
use crate::planner::TaskDefaults;
use crate::topology::{ComponentRef, TopologyProvider};
use crate::types::{Direction, FailurePolicy};
use crate::upgrade::checks::{self, CheckContext, CheckResult, UpgradeCheckRegistry};
use crate::upgrade::definition::{UpgradeItem, UpgradePack};

/// A planned upgrade plus what was left out of it.
#[derive(Debug, Clone, Serialize)]
pub struct UpgradePlan {
    pub request: RequestPlan,
    /// Components the pack mentions that the stack being moved to does not
    /// ship. They get no Stage and no task.
    pub pruned: Vec<ComponentRef>,
    /// Pre-upgrade check results; empty for a downgrade or when planned
    /// without checks.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub checks: Vec<CheckResult>,
}

/// Turns an upgrade pack into a Request plan: one Stage per Item, Groups in
/// definition order (reversed for a downgrade).
#[derive(Debug)]
pub struct UpgradeOrchestrator<'a> {
    registry: &'a StackRegistry,
    topology: &'a dyn TopologyProvider,
    defaults: &'a TaskDefaults,
    checks: Option<(&'a UpgradeCheckRegistry, &'a [Request])>,
}

impl<'a> UpgradeOrchestrator<'a> {
    pub fn new(
        registry: &'a StackRegistry,
        topology: &'a dyn TopologyProvider,
        defaults: &'a TaskDefaults,
    ) -> Self {
        Self {
            registry,
            topology,
            defaults,
            checks: None,
        }
    }

    /// Run `registry` before planning an upgrade, against the Requests
    /// still active in the store.
    pub fn with_checks(
        mut self,
        registry: &'a UpgradeCheckRegistry,
        active_requests: &'a [Request],
    ) -> Self {
        self.checks = Some((registry, active_requests));
        self
    }

    /// Plan an upgrade or downgrade of `cluster`. Fails synchronously, before
    /// anything is persisted, when the stack moved to is unknown, its role
    /// command order could not be compiled, or an upgrade fails a
    /// pre-upgrade check.
    pub fn plan(
        &self,
        cluster: &str,
        pack: &UpgradePack,
        direction: Direction,
        now: DateTime<Utc>,
    ) -> Result<UpgradePlan> {
        let mut plan = self.build(cluster, pack, direction, now)?;
        if direction == Direction::Upgrade {
            if let Some((registry, active)) = self.checks {
                let results = run_checks(registry, active, self.topology, cluster, pack, &plan)?;
                if let Some(err) = checks::refusal(cluster, &results) {
                    return Err(err);
                }
                plan.checks = results;
            }
        }
        Ok(plan)
    }

    /// Pre-upgrade check results for upgrading `cluster` with `pack`, pass
    /// or fail, without refusing anything.
    pub fn check(
        &self,
        cluster: &str,
        pack: &UpgradePack,
        now: DateTime<Utc>,
    ) -> Result<Vec<CheckResult>> {
        let plan = self.build(cluster, pack, Direction::Upgrade, now)?;
        match self.checks {
            Some((registry, active)) => {
                run_checks(registry, active, self.topology, cluster, pack, &plan)
            }
            None => Ok(Vec::new()),
        }
    }

    fn build(
        &self,
        cluster: &str,
        pack: &UpgradePack,
        direction: Direction,
        now: DateTime<Utc>,
    ) -> Result<UpgradePlan> {
        pack.validate()?;

        let current = self.topology.cluster_stack(cluster)?;
        let (from_stack, to_stack) = match direction {
            Direction::Upgrade => {
                if current != pack.source_stack {
                    return Err(ShepherdError::Planning(format!(
                        "cluster '{cluster}' runs {current}, but pack '{}' upgrades from {}",
                        pack.name, pack.source_stack
                    )));
                }
                (pack.source_stack.clone(), pack.target_stack.clone())
            }
            Direction::Downgrade => {
                if current != pack.target_stack && current != pack.source_stack {
                    return Err(ShepherdError::Planning(format!(
                        "cluster '{cluster}' runs {current}, which pack '{}' cannot downgrade",
                        pack.name
                    )));
                }
                (pack.target_stack.clone(), pack.source_stack.clone())
            }
        };

        // The stack moved to decides both the component set and the order.
        let stack = self.registry.get(&to_stack)?;
        let installed = self.topology.installed_components(cluster)?;

        let mut groups: Vec<_> = pack.groups.iter().collect();
        if direction.is_downgrade() {
            groups.reverse();
        }

        let mut pruned: Vec<ComponentRef> = Vec::new();
        let mut stages = Vec::new();

        for group in groups {
            let mut items: Vec<&UpgradeItem> = Vec::with_capacity(group.items.len());
            for item in &group.items {
                let component = ComponentRef::new(item.service.clone(), item.component.clone());
                if !stack.definition.supports(&item.service, &item.component) {
                    debug!(component = %component, stack = %to_stack, "pruned unsupported component");
                    if !pruned.contains(&component) {
                        pruned.push(component);
                    }
                    continue;
                }
                if !installed.contains(&component) {
                    debug!(component = %component, cluster, "component not installed; skipping item");
                    continue;
                }
                items.push(item);
            }
            if direction.is_downgrade() {
                items.reverse();
            }

            let title = group.title.as_deref().unwrap_or(&group.name);
            for item in ordered_items(&stack, &items) {
                let stage =
                    self.stage_for_item(cluster, pack, title, item, direction, &to_stack)?;
                stages.push(stage);
            }
        }

        if stages.is_empty() {
            return Err(ShepherdError::Planning(format!(
                "upgrade pack '{}' schedules nothing on cluster '{cluster}'",
                pack.name
            )));
        }

        let verb = if direction.is_downgrade() {
            "Downgrading"
        } else {
            "Upgrading"
        };
        info!(
            cluster,
            pack = %pack.name,
            direction = %direction,
            from = %from_stack,
            to = %to_stack,
            stages = stages.len(),
            pruned = pruned.len(),
            "planned upgrade"
        );

        Ok(UpgradePlan {
            request: RequestPlan {
                cluster: cluster.to_string(),
                context: format!("{verb} cluster {cluster} to {to_stack}"),
                created_at: now,
                failure_policy: pack.failure_policy.unwrap_or(FailurePolicy::Abort),
                kind: RequestKind::Upgrade(UpgradeSummary {
                    pack: pack.name.clone(),
                    direction,
                    from_stack,
                    to_stack,
                }),
                stages,
            },
            pruned,
            checks: Vec::new(),
        })
    }

    fn stage_for_item(
        &self,
        cluster: &str,
        pack: &UpgradePack,
        group: &str,
        item: &UpgradeItem,
        direction: Direction,
        to_stack: &str,
    ) -> Result<StagePlan> {
        let component = ComponentRef::new(item.service.clone(), item.component.clone());
        let hosts = self.topology.hosts_for_component(cluster, &component)?;
        let key = item.key();

        let mut params = item.params.clone();
        params.insert("upgrade_pack".to_string(), pack.name.clone());
        params.insert("upgrade_direction".to_string(), direction.to_string());
        params.insert("target_stack".to_string(), to_stack.to_string());
        let params = CommandParams {
            params,
            configurations: Default::default(),
        };

        let tasks = hosts
            .iter()
            .map(|host| self.defaults.task(host, &key, params.clone(), None))
            .collect();

        let name = match &item.message {
            Some(message) => format!("{group}: {message}"),
            None => format!("{group}: {} {}", item.command, item.component),
        };

        Ok(StagePlan {
            name,
            flags: item.flags(),
            tasks,
        })
    }
}

fn run_checks(
    registry: &UpgradeCheckRegistry,
    active_requests: &[Request],
    topology: &dyn TopologyProvider,
    cluster: &str,
    pack: &UpgradePack,
    plan: &UpgradePlan,
) -> Result<Vec<CheckResult>> {
    registry.run(&CheckContext {
        cluster,
        pack,
        plan: &plan.request,
        topology,
        active_requests,
    })
}

/// Items of one group ordered by the stack's role command order; items
/// without a relationship keep their definition order.
fn ordered_items<'i>(stack: &CompiledStack, items: &[&'i UpgradeItem]) -> Vec<&'i UpgradeItem> {
    let keys: Vec<RoleCommandKey> = items.iter().map(|i| i.key()).collect();
    stack
        .order
        .stable_order(&keys)
        .into_iter()
        .map(|idx| items[idx])
        .collect()
}
