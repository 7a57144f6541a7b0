// src/engine/control.rs

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};

use crate::agent::{AgentCommand, AgentTransport, CancelCommand};
use crate::errors::{Result, ShepherdError};
use crate::model::{
    HostRoleCommand, HostRoleStatus, Request, RequestId, RequestPlan, Stage, StageId,
    StatusSummary, TaskId,
};
use crate::ordering::StackRegistry;
use crate::planner::{Operation, RequestPlanner, TaskDefaults};
use crate::publisher::StatusEvent;
use crate::store::{Store, TaskWriter};
use crate::topology::{
    ComponentCategory, ComponentRef, ComponentState, ComponentTopology, ServiceTopology,
    StateCalculators, TopologyProvider,
};
use crate::types::{Direction, FailurePolicy, HoldingAction};
use crate::upgrade::{
    CheckResult, UpgradeCheck, UpgradeCheckRegistry, UpgradeOrchestrator, UpgradePack, UpgradePlan,
};

/// What an operator resumes: one held task, or every held task of a Stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HoldTarget {
    Task(TaskId),
    Stage(StageId),
}

#[derive(Debug, Clone, Serialize)]
pub struct StageView {
    pub stage: Stage,
    pub summary: StatusSummary,
    pub tasks: Vec<HostRoleCommand>,
}

impl StageView {
    pub fn load(store: &dyn Store, stage: Stage) -> Result<Self> {
        let tasks = store.tasks_for_stage(stage.id)?;
        let summary = StatusSummary::from_statuses(tasks.iter().map(|t| t.status));
        Ok(Self {
            stage,
            summary,
            tasks,
        })
    }
}

/// A Request with per-Stage task breakdown.
#[derive(Debug, Clone, Serialize)]
pub struct RequestView {
    pub request: Request,
    pub summary: StatusSummary,
    pub percent_complete: f64,
    pub stages: Vec<StageView>,
}

impl RequestView {
    pub fn load(store: &dyn Store, id: RequestId) -> Result<Self> {
        let request = store.request(id)?;
        let stages = store
            .stages(id)?
            .into_iter()
            .map(|stage| StageView::load(store, stage))
            .collect::<Result<Vec<_>>>()?;
        let summary = StatusSummary::from_statuses(
            stages
                .iter()
                .flat_map(|s| s.tasks.iter().map(|t| t.status)),
        );
        Ok(Self {
            percent_complete: summary.percent_complete(),
            request,
            summary,
            stages,
        })
    }
}

/// Created upgrade Request plus the components left out of it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UpgradeCreated {
    pub request_id: RequestId,
    pub pruned: Vec<ComponentRef>,
}

/// Operator-facing API: planning, control and status queries.
///
/// Every write goes through the same [`TaskWriter`] the scheduler and the
/// heartbeat processor use, so operator actions race with them on equal
/// compare-and-set terms.
#[derive(Debug)]
pub struct ControlPlane {
    writer: TaskWriter,
    registry: Arc<StackRegistry>,
    topology: Arc<dyn TopologyProvider>,
    transport: Arc<dyn AgentTransport>,
    defaults: TaskDefaults,
    calculators: StateCalculators,
    checks: UpgradeCheckRegistry,
}

impl ControlPlane {
    pub fn new(
        writer: TaskWriter,
        registry: Arc<StackRegistry>,
        topology: Arc<dyn TopologyProvider>,
        transport: Arc<dyn AgentTransport>,
        defaults: TaskDefaults,
    ) -> Self {
        Self {
            writer,
            registry,
            topology,
            transport,
            defaults,
            calculators: StateCalculators::new(),
            checks: UpgradeCheckRegistry::new(),
        }
    }

    /// Add a pre-upgrade check, replacing a built-in one with the same id.
    pub fn register_upgrade_check(&mut self, check: Box<dyn UpgradeCheck>) {
        self.checks.register(check);
    }

    fn store(&self) -> &Arc<dyn Store> {
        self.writer.store()
    }

    // ---- planning ------------------------------------------------------

    /// Plan without persisting anything.
    pub fn plan_request(
        &self,
        cluster: &str,
        operations: &[Operation],
        failure_policy: FailurePolicy,
        context: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<RequestPlan> {
        let stack = self.registry.get(&self.topology.cluster_stack(cluster)?)?;
        RequestPlanner::new(&stack, self.topology.as_ref(), &self.defaults).plan(
            cluster,
            operations,
            failure_policy,
            context,
            now,
        )
    }

    /// Plan and persist a Request. Planning errors surface before anything
    /// is stored.
    pub fn create_request(
        &self,
        cluster: &str,
        operations: &[Operation],
        failure_policy: FailurePolicy,
        context: Option<&str>,
    ) -> Result<RequestId> {
        let plan = self.plan_request(cluster, operations, failure_policy, context, Utc::now())?;
        let id = self.store().insert_request(&plan)?;
        info!(
            request_id = %id,
            cluster,
            stages = plan.stages.len(),
            tasks = plan.task_count(),
            "request created"
        );
        Ok(id)
    }

    pub fn plan_upgrade(
        &self,
        cluster: &str,
        pack: &UpgradePack,
        direction: Direction,
        now: DateTime<Utc>,
    ) -> Result<UpgradePlan> {
        let active = self.store().active_requests()?;
        UpgradeOrchestrator::new(&self.registry, self.topology.as_ref(), &self.defaults)
            .with_checks(&self.checks, &active)
            .plan(cluster, pack, direction, now)
    }

    /// Run the pre-upgrade checks for `pack` and report every result,
    /// whether or not the upgrade would be refused.
    pub fn upgrade_checks(&self, cluster: &str, pack: &UpgradePack) -> Result<Vec<CheckResult>> {
        let active = self.store().active_requests()?;
        UpgradeOrchestrator::new(&self.registry, self.topology.as_ref(), &self.defaults)
            .with_checks(&self.checks, &active)
            .check(cluster, pack, Utc::now())
    }

    pub fn create_upgrade(
        &self,
        cluster: &str,
        pack: &UpgradePack,
        direction: Direction,
    ) -> Result<UpgradeCreated> {
        let plan = self.plan_upgrade(cluster, pack, direction, Utc::now())?;
        let request_id = self.store().insert_request(&plan.request)?;
        info!(
            request_id = %request_id,
            cluster,
            pack = %pack.name,
            direction = %direction,
            stages = plan.request.stages.len(),
            "upgrade request created"
        );
        Ok(UpgradeCreated {
            request_id,
            pruned: plan.pruned,
        })
    }

    // ---- control -------------------------------------------------------

    /// Abort every non-terminal task of a Request and mark it ABORTED.
    ///
    /// In-flight attempts get a best-effort cancel. Returns the number of
    /// tasks aborted; aborting a finished Request is a no-op.
    pub fn abort_request(&self, id: RequestId, reason: &str) -> Result<usize> {
        let now = Utc::now();
        let mut request = self.store().request(id)?;
        if request.is_terminal() {
            info!(request_id = %id, status = %request.status, "request already finished");
            return Ok(0);
        }

        let mut aborted = 0;
        for mut task in self.store().tasks_for_request(id)? {
            loop {
                if task.status.is_terminal() {
                    break;
                }
                let was_running = task.status == HostRoleStatus::InProgress;
                let mut updated = task.clone();
                updated.status = HostRoleStatus::Aborted;
                updated.end_time = Some(now);
                if self.writer.commit(&mut task, updated, now)? {
                    if was_running {
                        self.send_cancel(&task, reason);
                    }
                    aborted += 1;
                    break;
                }
            }
        }

        for mut stage in self.store().stages(id)? {
            let tasks = self.store().tasks_for_stage(stage.id)?;
            let status = StatusSummary::from_statuses(tasks.iter().map(|t| t.status))
                .calculate(request.tolerates_failures(&stage));
            self.writer.set_stage_status(&mut stage, status)?;
        }

        let from = request.status;
        request.status = HostRoleStatus::Aborted;
        request.abort_reason = Some(reason.to_string());
        request.end_time = Some(now);
        self.store().update_request(&request)?;
        self.writer.events().emit(StatusEvent::RequestStatusChanged {
            request_id: id,
            cluster: request.cluster.clone(),
            upgrade: request.is_upgrade(),
            from,
            to: HostRoleStatus::Aborted,
            at: now,
        });

        info!(request_id = %id, aborted, reason, "request aborted");
        Ok(aborted)
    }

    /// Apply an operator decision to held tasks. Returns how many tasks
    /// were resumed.
    ///
    /// - `retry`: a `HOLDING` task is accepted as `COMPLETED`; a
    ///   `HOLDING_FAILED`/`HOLDING_TIMEDOUT` task is re-queued with a fresh
    ///   attempt budget, provided its Stage allows retries.
    /// - `skip`: `HOLDING` → `COMPLETED`, failed holds → `SKIPPED_FAILED`.
    /// - `abort`: → `ABORTED`.
    ///
    /// Every task is checked before any is written, so a rejected action
    /// changes nothing. For a Stage, a task that another writer moves on
    /// in the meantime is left as it is and not counted.
    pub fn resume_holding(&self, target: HoldTarget, action: HoldingAction) -> Result<usize> {
        let now = Utc::now();
        let tasks = match target {
            HoldTarget::Task(id) => vec![self.store().task(id)?],
            HoldTarget::Stage(id) => self
                .store()
                .tasks_for_stage(id)?
                .into_iter()
                .filter(|t| t.status.is_holding())
                .collect(),
        };
        if tasks.is_empty() {
            return Err(ShepherdError::ActionRejected(format!(
                "{target:?} has no held tasks"
            )));
        }

        let mut resumptions = Vec::with_capacity(tasks.len());
        for task in tasks {
            let stage = self.store().stage(task.stage_id)?;
            let updated = self.resumed_task(&task, &stage, action, now)?;
            resumptions.push((task, updated));
        }

        let mut resumed = 0;
        for (mut task, updated) in resumptions {
            let next = updated.status;
            if !self.writer.commit(&mut task, updated, now)? {
                if let HoldTarget::Task(_) = target {
                    return Err(ShepherdError::ActionRejected(format!(
                        "task {} changed to {} while resuming",
                        task.id, task.status
                    )));
                }
                warn!(
                    task_id = %task.id,
                    status = %task.status,
                    "held task changed while resuming; left as is"
                );
                continue;
            }
            info!(
                task_id = %task.id,
                host = %task.host,
                action = ?action,
                status = %next,
                "held task resumed"
            );
            resumed += 1;
        }
        Ok(resumed)
    }

    fn resumed_task(
        &self,
        task: &HostRoleCommand,
        stage: &Stage,
        action: HoldingAction,
        now: DateTime<Utc>,
    ) -> Result<HostRoleCommand> {
        if !task.status.is_holding() {
            return Err(ShepherdError::ActionRejected(format!(
                "task {} is {}, not held",
                task.id, task.status
            )));
        }

        let mut updated = task.clone();
        updated.last_update = Some(now);
        match (action, task.status) {
            (HoldingAction::Retry | HoldingAction::Skip, HostRoleStatus::Holding) => {
                updated.status = HostRoleStatus::Completed;
                updated.end_time = Some(now);
            }
            (HoldingAction::Retry, _) => {
                if !stage.flags.allow_retry {
                    return Err(ShepherdError::ActionRejected(format!(
                        "stage '{}' does not allow retries",
                        stage.name
                    )));
                }
                updated.status = HostRoleStatus::Queued;
                updated.max_attempts = task.attempt_count + self.defaults.max_attempts;
                updated.start_time = None;
                updated.end_time = None;
            }
            (HoldingAction::Skip, _) => {
                updated.status = HostRoleStatus::SkippedFailed;
                updated.end_time = Some(now);
            }
            (HoldingAction::Abort, _) => {
                updated.status = HostRoleStatus::Aborted;
                updated.end_time = Some(now);
            }
        }
        Ok(updated)
    }

    fn send_cancel(&self, task: &HostRoleCommand, reason: &str) {
        let cancel = AgentCommand::Cancel(CancelCommand {
            task_id: task.id,
            attempt: task.attempt_count,
            reason: reason.to_string(),
        });
        if let Err(e) = self.transport.send(&task.host, cancel) {
            warn!(task_id = %task.id, host = %task.host, error = %e, "cancel not delivered");
        }
    }

    // ---- status --------------------------------------------------------

    pub fn request_status(&self, id: RequestId) -> Result<RequestView> {
        RequestView::load(self.store().as_ref(), id)
    }

    pub fn stage_status(&self, id: StageId) -> Result<StageView> {
        StageView::load(self.store().as_ref(), self.store().stage(id)?)
    }

    pub fn task_status(&self, id: TaskId) -> Result<HostRoleCommand> {
        self.store().task(id)
    }

    /// Every Request, oldest first.
    pub fn list_requests(&self) -> Result<Vec<Request>> {
        self.store().list_requests()
    }

    /// Calculated state of a service from its components' recorded states.
    pub fn service_state(&self, cluster: &str, service: &str) -> Result<ComponentState> {
        let stack = self.registry.get(&self.topology.cluster_stack(cluster)?)?;
        let definition = stack.definition.services.get(service).ok_or_else(|| {
            ShepherdError::Planning(format!("stack {} has no service {service}", stack.id()))
        })?;
        let states = self.topology.component_states(cluster, service)?;

        let categories = [
            (ComponentCategory::Master, &definition.masters),
            (ComponentCategory::Slave, &definition.slaves),
            (ComponentCategory::Client, &definition.clients),
        ];
        let components = categories
            .into_iter()
            .flat_map(|(category, names)| {
                names.iter().map(move |name| (category, name.as_str()))
            })
            .map(|(category, name)| ComponentTopology {
                name: name.to_string(),
                category,
                hosts: states
                    .get(&ComponentRef::new(service, name))
                    .cloned()
                    .unwrap_or_default(),
            })
            .collect();

        Ok(self.calculators.compute(
            definition,
            &ServiceTopology {
                service: service.to_string(),
                components,
            },
        ))
    }
}
