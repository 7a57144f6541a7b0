// src/scheduler/step.rs

//! One Request's share of a scheduler tick.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::agent::{AgentCommand, ExecutionCommand};
use crate::errors::Result;
use crate::model::{HostRoleCommand, HostRoleStatus, Request, Stage, StageId, StatusSummary};
use crate::scheduler::{ActionScheduler, TickReport};
use crate::types::FailurePolicy;

pub(super) struct RequestStep<'a> {
    scheduler: &'a ActionScheduler,
    request: &'a Request,
    tasks: HashMap<StageId, Vec<HostRoleCommand>>,
    now: DateTime<Utc>,
    host_load: &'a mut HashMap<String, usize>,
}

impl<'a> RequestStep<'a> {
    pub(super) fn new(
        scheduler: &'a ActionScheduler,
        request: &'a Request,
        tasks: Vec<HostRoleCommand>,
        now: DateTime<Utc>,
        host_load: &'a mut HashMap<String, usize>,
    ) -> Self {
        let mut by_stage: HashMap<StageId, Vec<HostRoleCommand>> = HashMap::new();
        for task in tasks {
            by_stage.entry(task.stage_id).or_default().push(task);
        }
        Self {
            scheduler,
            request,
            tasks: by_stage,
            now,
            host_load,
        }
    }

    /// Advance the Request and return its derived status.
    ///
    /// Stages are walked in sequence order. Finished Stages only get their
    /// status refreshed; the first unfinished Stage is the current one and
    /// is the only one whose tasks are queued and dispatched. A finished
    /// Stage that fails the Request under its failure policy aborts every
    /// later Stage without dispatching anything.
    pub(super) fn run(&mut self, report: &mut TickReport) -> Result<HostRoleStatus> {
        let mut stages = self.scheduler.store.stages(self.request.id)?;
        let mut cascade = false;
        let mut reached_current = false;

        for stage in stages.iter_mut() {
            let mut tasks = self.tasks.remove(&stage.id).unwrap_or_default();

            if cascade {
                self.abort_all(&mut tasks, report)?;
            } else {
                self.apply_timeouts(stage, &mut tasks, report)?;
                if !reached_current && !tasks.iter().all(|t| t.status.is_terminal()) {
                    reached_current = true;
                    self.queue_pending(&mut tasks, report)?;
                    self.dispatch_queued(stage, &mut tasks, report)?;
                }
            }

            let status = self.stage_status(stage, &tasks);
            self.scheduler.writer.set_stage_status(stage, status)?;

            if !cascade && !reached_current && self.fails_request(stage, status) {
                warn!(
                    request_id = %self.request.id,
                    stage = stage.sequence,
                    status = %status,
                    policy = ?self.request.failure_policy,
                    "stage failed; aborting remaining stages"
                );
                cascade = true;
            }
        }

        Ok(StatusSummary::from_statuses(stages.iter().map(|s| s.status)).calculate(false))
    }

    fn stage_status(&self, stage: &Stage, tasks: &[HostRoleCommand]) -> HostRoleStatus {
        StatusSummary::from_statuses(tasks.iter().map(|t| t.status))
            .calculate(self.request.tolerates_failures(stage))
    }

    fn fails_request(&self, stage: &Stage, status: HostRoleStatus) -> bool {
        if !status.is_failure() {
            return false;
        }
        match self.request.failure_policy {
            FailurePolicy::Abort => true,
            FailurePolicy::Continue => false,
            FailurePolicy::ContinueOnSkippable => !stage.flags.skippable,
        }
    }

    fn release_host(&mut self, host: &str) {
        if let Some(load) = self.host_load.get_mut(host) {
            *load = load.saturating_sub(1);
        }
    }

    /// Failure status for `stage`: parked for the operator when the Stage
    /// holds on failure.
    fn failure_status(stage: &Stage, status: HostRoleStatus) -> HostRoleStatus {
        match (stage.flags.auto_hold_on_failure, status) {
            (true, HostRoleStatus::Failed) => HostRoleStatus::HoldingFailed,
            (true, HostRoleStatus::Timedout) => HostRoleStatus::HoldingTimedout,
            _ => status,
        }
    }

    /// Time out IN_PROGRESS tasks whose last update is older than their
    /// timeout. Attempts left and retry enabled: back to QUEUED. Otherwise
    /// TIMEDOUT (or HOLDING_TIMEDOUT).
    fn apply_timeouts(
        &mut self,
        stage: &Stage,
        tasks: &mut [HostRoleCommand],
        report: &mut TickReport,
    ) -> Result<()> {
        let now = self.now;
        for task in tasks
            .iter_mut()
            .filter(|t| t.status == HostRoleStatus::InProgress && t.is_timed_out(now))
        {
            let retry = task.retry_enabled && task.attempts_remaining();
            let timed_out_attempt = task.clone();

            let mut updated = task.clone();
            updated.last_update = Some(now);
            if retry {
                updated.status = HostRoleStatus::Queued;
            } else {
                updated.status = Self::failure_status(stage, HostRoleStatus::Timedout);
                if updated.status.is_terminal() {
                    updated.end_time = Some(now);
                }
            }

            if !self.scheduler.writer.commit(task, updated, now)? {
                continue;
            }

            warn!(
                request_id = %self.request.id,
                task_id = %task.id,
                host = %task.host,
                attempt = timed_out_attempt.attempt_count,
                timeout_secs = task.timeout_secs,
                status = %task.status,
                "task timed out"
            );
            self.release_host(&task.host);
            self.scheduler.send_cancel(&timed_out_attempt, "timed out");
            if retry {
                report.retried += 1;
            } else {
                report.timed_out += 1;
            }
        }
        Ok(())
    }

    fn queue_pending(&mut self, tasks: &mut [HostRoleCommand], report: &mut TickReport) -> Result<()> {
        let now = self.now;
        for task in tasks
            .iter_mut()
            .filter(|t| t.status == HostRoleStatus::Pending)
        {
            let mut updated = task.clone();
            updated.status = HostRoleStatus::Queued;
            if self.scheduler.writer.commit(task, updated, now)? {
                report.queued += 1;
            }
        }
        Ok(())
    }

    /// Dispatch QUEUED tasks whose host has capacity.
    ///
    /// The task is claimed (QUEUED -> IN_PROGRESS, attempt + 1) before the
    /// command is handed to the transport, so a concurrent abort either wins
    /// the claim or sees the task in flight. A failed handoff puts the task
    /// back to QUEUED while attempts remain and fails it otherwise.
    fn dispatch_queued(
        &mut self,
        stage: &Stage,
        tasks: &mut [HostRoleCommand],
        report: &mut TickReport,
    ) -> Result<()> {
        let now = self.now;
        let limit = self.scheduler.config.max_tasks_per_host;

        for task in tasks
            .iter_mut()
            .filter(|t| t.status == HostRoleStatus::Queued)
        {
            let load = self.host_load.get(&task.host).copied().unwrap_or(0);
            if load >= limit {
                debug!(task_id = %task.id, host = %task.host, load, "host at capacity; task stays queued");
                continue;
            }

            let mut claimed = task.clone();
            claimed.status = HostRoleStatus::InProgress;
            claimed.attempt_count += 1;
            claimed.start_time = Some(now);
            claimed.last_update = Some(now);
            let command = AgentCommand::Execution(ExecutionCommand::for_task(&claimed)?);

            if !self.scheduler.writer.commit(task, claimed, now)? {
                continue;
            }

            match self.scheduler.transport.send(&task.host, command) {
                Ok(()) => {
                    *self.host_load.entry(task.host.clone()).or_insert(0) += 1;
                    report.dispatched += 1;
                    info!(
                        request_id = %self.request.id,
                        stage = stage.sequence,
                        task_id = %task.id,
                        host = %task.host,
                        role = %task.role,
                        command = %task.command,
                        attempt = task.attempt_count,
                        "dispatched task"
                    );
                }
                Err(e) => {
                    report.dispatch_failures += 1;
                    let mut reverted = task.clone();
                    if task.attempts_remaining() {
                        reverted.status = HostRoleStatus::Queued;
                    } else {
                        reverted.status = Self::failure_status(stage, HostRoleStatus::Failed);
                        reverted.output.stderr = format!("dispatch failed: {e}");
                        if reverted.status.is_terminal() {
                            reverted.end_time = Some(now);
                        }
                    }
                    warn!(
                        task_id = %task.id,
                        host = %task.host,
                        attempt = task.attempt_count,
                        next = %reverted.status,
                        error = %e,
                        "dispatch failed"
                    );
                    self.scheduler.writer.commit(task, reverted, now)?;
                }
            }
        }
        Ok(())
    }

    /// Abort every unfinished task of a Stage that will never run.
    fn abort_all(&mut self, tasks: &mut [HostRoleCommand], report: &mut TickReport) -> Result<()> {
        let now = self.now;
        for task in tasks.iter_mut().filter(|t| !t.status.is_terminal()) {
            let was_running = task.status == HostRoleStatus::InProgress;
            let mut updated = task.clone();
            updated.status = HostRoleStatus::Aborted;
            updated.end_time = Some(now);

            if self.scheduler.writer.commit(task, updated, now)? {
                report.aborted += 1;
                if was_running {
                    self.release_host(&task.host);
                    self.scheduler.send_cancel(task, "earlier stage failed");
                }
            }
        }
        Ok(())
    }
}
