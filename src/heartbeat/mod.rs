// src/heartbeat/mod.rs

//! Heartbeat Processor: applies agent reports to task state.
//!
//! Runs independently of, and concurrently with, the scheduler tick. Both
//! write through compare-and-set, so whichever commits first wins and the
//! other re-evaluates against the fresh row.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::agent::{CommandReport, ReportStatus};
use crate::errors::{Result, ShepherdError};
use crate::model::{HostRoleCommand, HostRoleStatus, RoleCommand, Stage};
use crate::store::TaskWriter;
use crate::topology::{ComponentRef, ComponentState, TopologyProvider};

/// What happened to a report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportOutcome {
    /// The task moved to this status.
    Applied(HostRoleStatus),
    /// Progress report: output and timeout clock refreshed.
    Progress,
    /// The task is not IN_PROGRESS (finished, held, queued for a retry...).
    Ignored(HostRoleStatus),
    /// The report belongs to an earlier attempt.
    Stale { current: u32, reported: u32 },
    UnknownTask,
}

#[derive(Debug, Clone)]
pub struct HeartbeatProcessor {
    writer: TaskWriter,
    topology: Arc<dyn TopologyProvider>,
}

impl HeartbeatProcessor {
    pub fn new(writer: TaskWriter, topology: Arc<dyn TopologyProvider>) -> Self {
        Self { writer, topology }
    }

    /// Apply one report. Applying the same report twice has the same effect
    /// as applying it once.
    pub fn apply_report(&self, report: &CommandReport, now: DateTime<Utc>) -> Result<ReportOutcome> {
        let store = self.writer.store();
        let mut task = match store.task(report.task_id) {
            Ok(task) => task,
            Err(ShepherdError::UnknownTask(id)) => {
                warn!(task_id = %id, "report for unknown task discarded");
                return Ok(ReportOutcome::UnknownTask);
            }
            Err(e) => return Err(e),
        };
        let stage = store.stage(task.stage_id)?;

        loop {
            if task.status != HostRoleStatus::InProgress {
                debug!(
                    task_id = %task.id,
                    status = %task.status,
                    report = ?report.status,
                    "report for task not in progress; ignoring"
                );
                return Ok(ReportOutcome::Ignored(task.status));
            }
            if let Some(reported) = report.attempt {
                if reported != task.attempt_count {
                    debug!(
                        task_id = %task.id,
                        current = task.attempt_count,
                        reported,
                        "stale report from a superseded attempt"
                    );
                    return Ok(ReportOutcome::Stale {
                        current: task.attempt_count,
                        reported,
                    });
                }
            }

            let updated = Self::updated_task(&task, &stage, report, now);
            let next = updated.status;
            if self.writer.commit(&mut task, updated, now)? {
                if !report.status.is_final() {
                    return Ok(ReportOutcome::Progress);
                }
                info!(
                    task_id = %task.id,
                    host = %task.host,
                    role = %task.role,
                    command = %task.command,
                    exit_code = ?report.exit_code,
                    status = %next,
                    "task finished"
                );
                if report.status == ReportStatus::Completed {
                    self.record_component_state(&task);
                }
                return Ok(ReportOutcome::Applied(next));
            }
            // Lost the race; `task` now holds the fresh row.
        }
    }

    fn updated_task(
        task: &HostRoleCommand,
        stage: &Stage,
        report: &CommandReport,
        now: DateTime<Utc>,
    ) -> HostRoleCommand {
        let mut updated = task.clone();
        updated.last_update = Some(now);
        updated.output = report.output();

        updated.status = match report.status {
            ReportStatus::InProgress => HostRoleStatus::InProgress,
            ReportStatus::Completed if stage.flags.manual => HostRoleStatus::Holding,
            ReportStatus::Completed => HostRoleStatus::Completed,
            ReportStatus::Failed if stage.flags.auto_hold_on_failure => {
                HostRoleStatus::HoldingFailed
            }
            ReportStatus::Failed => HostRoleStatus::Failed,
        };
        if updated.status.is_terminal() {
            updated.end_time = Some(now);
        }
        updated
    }

    fn record_component_state(&self, task: &HostRoleCommand) {
        let state = match task.command {
            RoleCommand::Install | RoleCommand::Stop => ComponentState::Installed,
            RoleCommand::Start | RoleCommand::Restart => ComponentState::Started,
            _ => return,
        };
        let component = ComponentRef::new(task.service.clone(), task.role.clone());
        if let Err(e) =
            self.topology
                .record_component_state(&task.cluster, &task.host, &component, state)
        {
            warn!(task_id = %task.id, error = %e, "could not record component state");
        }
    }
}
