// src/upgrade/checks.rs

//! Pre-upgrade checks.
//!
//! Checks run against a planned UPGRADE before it is persisted; one failure
//! refuses the upgrade. Downgrades are never checked, since they are how an
//! operator backs out of a half-finished upgrade.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Debug;

use serde::Serialize;
use tracing::debug;

use crate::errors::{Result, ShepherdError};
use crate::model::{Request, RequestPlan};
use crate::topology::{ComponentRef, ComponentState, TopologyProvider};
use crate::upgrade::definition::UpgradePack;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CheckStatus {
    Pass,
    Fail,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CheckResult {
    pub id: String,
    pub description: String,
    pub status: CheckStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Request ids, hosts, components: whatever the check failed on.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub failed_on: Vec<String>,
}

impl CheckResult {
    pub fn passed(&self) -> bool {
        self.status == CheckStatus::Pass
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckFailure {
    pub reason: String,
    pub failed_on: Vec<String>,
}

/// What a check sees of the upgrade and the cluster.
pub struct CheckContext<'a> {
    pub cluster: &'a str,
    pub pack: &'a UpgradePack,
    pub plan: &'a RequestPlan,
    pub topology: &'a dyn TopologyProvider,
    /// Non-terminal Requests, any cluster.
    pub active_requests: &'a [Request],
}

pub trait UpgradeCheck: Send + Sync + Debug {
    fn id(&self) -> &'static str;

    fn description(&self) -> &'static str;

    /// `Ok(None)` when the check passes.
    fn check(&self, ctx: &CheckContext<'_>) -> Result<Option<CheckFailure>>;
}

/// No other Request may still be running on the cluster.
#[derive(Debug)]
pub struct NoActiveRequestsCheck;

impl UpgradeCheck for NoActiveRequestsCheck {
    fn id(&self) -> &'static str {
        "no_active_requests"
    }

    fn description(&self) -> &'static str {
        "No other Request is running on the cluster"
    }

    fn check(&self, ctx: &CheckContext<'_>) -> Result<Option<CheckFailure>> {
        let busy: Vec<String> = ctx
            .active_requests
            .iter()
            .filter(|r| r.cluster == ctx.cluster)
            .map(|r| r.id.to_string())
            .collect();
        if busy.is_empty() {
            return Ok(None);
        }
        Ok(Some(CheckFailure {
            reason: format!(
                "{} request(s) still running on cluster '{}'",
                busy.len(),
                ctx.cluster
            ),
            failed_on: busy,
        }))
    }
}

/// Every host a component is upgraded on must have it running. A component
/// with no recorded state passes.
#[derive(Debug)]
pub struct ComponentsUpCheck;

impl UpgradeCheck for ComponentsUpCheck {
    fn id(&self) -> &'static str {
        "components_up"
    }

    fn description(&self) -> &'static str {
        "Every component being upgraded is started"
    }

    fn check(&self, ctx: &CheckContext<'_>) -> Result<Option<CheckFailure>> {
        let mut scheduled: BTreeMap<&str, BTreeSet<(ComponentRef, &str)>> = BTreeMap::new();
        for task in ctx.plan.stages.iter().flat_map(|s| s.tasks.iter()) {
            scheduled.entry(task.service.as_str()).or_default().insert((
                ComponentRef::new(task.service.clone(), task.role.clone()),
                task.host.as_str(),
            ));
        }

        let mut stopped = Vec::new();
        for (service, targets) in scheduled {
            let states = ctx.topology.component_states(ctx.cluster, service)?;
            for (component, host) in targets {
                let state = states
                    .get(&component)
                    .and_then(|hosts| hosts.get(host))
                    .copied()
                    .unwrap_or(ComponentState::Unknown);
                if state == ComponentState::Installed {
                    stopped.push(format!("{host}:{component}"));
                }
            }
        }

        if stopped.is_empty() {
            return Ok(None);
        }
        Ok(Some(CheckFailure {
            reason: format!("{} component(s) are installed but not started", stopped.len()),
            failed_on: stopped,
        }))
    }
}

/// Checks by id, run in registration order.
#[derive(Debug)]
pub struct UpgradeCheckRegistry {
    checks: Vec<Box<dyn UpgradeCheck>>,
}

impl Default for UpgradeCheckRegistry {
    fn default() -> Self {
        Self {
            checks: vec![Box::new(NoActiveRequestsCheck), Box::new(ComponentsUpCheck)],
        }
    }
}

impl UpgradeCheckRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn empty() -> Self {
        Self { checks: Vec::new() }
    }

    /// Add a check, replacing any registered under the same id.
    pub fn register(&mut self, check: Box<dyn UpgradeCheck>) {
        match self.checks.iter().position(|c| c.id() == check.id()) {
            Some(idx) => self.checks[idx] = check,
            None => self.checks.push(check),
        }
    }

    pub fn ids(&self) -> Vec<&'static str> {
        self.checks.iter().map(|c| c.id()).collect()
    }

    /// Run every check the pack does not list in `skip_checks`.
    pub fn run(&self, ctx: &CheckContext<'_>) -> Result<Vec<CheckResult>> {
        let mut results = Vec::with_capacity(self.checks.len());
        for check in &self.checks {
            if ctx.pack.skip_checks.iter().any(|id| id == check.id()) {
                debug!(check = check.id(), pack = %ctx.pack.name, "check skipped by upgrade pack");
                continue;
            }
            let result = match check.check(ctx)? {
                None => CheckResult {
                    id: check.id().to_string(),
                    description: check.description().to_string(),
                    status: CheckStatus::Pass,
                    reason: None,
                    failed_on: Vec::new(),
                },
                Some(failure) => CheckResult {
                    id: check.id().to_string(),
                    description: check.description().to_string(),
                    status: CheckStatus::Fail,
                    reason: Some(failure.reason),
                    failed_on: failure.failed_on,
                },
            };
            debug!(check = %result.id, status = ?result.status, "pre-upgrade check");
            results.push(result);
        }
        Ok(results)
    }
}

/// Planning error naming every failed check, or `None` if all passed.
pub fn refusal(cluster: &str, results: &[CheckResult]) -> Option<ShepherdError> {
    let failed: Vec<String> = results
        .iter()
        .filter(|r| !r.passed())
        .map(|r| {
            format!(
                "{}: {} [{}]",
                r.id,
                r.reason.as_deref().unwrap_or("failed"),
                r.failed_on.join(", ")
            )
        })
        .collect();
    if failed.is_empty() {
        return None;
    }
    Some(ShepherdError::Planning(format!(
        "pre-upgrade checks failed on cluster '{cluster}': {}",
        failed.join("; ")
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct AlwaysFails;

    impl UpgradeCheck for AlwaysFails {
        fn id(&self) -> &'static str {
            "no_active_requests"
        }

        fn description(&self) -> &'static str {
            "replacement"
        }

        fn check(&self, _ctx: &CheckContext<'_>) -> Result<Option<CheckFailure>> {
            Ok(Some(CheckFailure {
                reason: "always".to_string(),
                failed_on: vec!["x".to_string()],
            }))
        }
    }

    #[test]
    fn register_replaces_a_check_with_the_same_id() {
        let mut registry = UpgradeCheckRegistry::new();
        assert_eq!(registry.ids(), vec!["no_active_requests", "components_up"]);

        registry.register(Box::new(AlwaysFails));
        assert_eq!(registry.ids(), vec!["no_active_requests", "components_up"]);
        assert_eq!(registry.checks[0].description(), "replacement");
    }

    #[test]
    fn refusal_lists_only_failed_checks() {
        let results = vec![
            CheckResult {
                id: "components_up".to_string(),
                description: String::new(),
                status: CheckStatus::Pass,
                reason: None,
                failed_on: Vec::new(),
            },
            CheckResult {
                id: "no_active_requests".to_string(),
                description: String::new(),
                status: CheckStatus::Fail,
                reason: Some("1 request(s) still running".to_string()),
                failed_on: vec!["7".to_string()],
            },
        ];
        let err = refusal("c1", &results).unwrap();
        let message = err.to_string();
        assert!(message.contains("no_active_requests: 1 request(s) still running [7]"));
        assert!(!message.contains("components_up"));

        assert!(refusal("c1", &results[..1]).is_none());
    }
}
