// src/scheduler/mod.rs

//! Action Scheduler.
//!
//! [`ActionScheduler::tick`] is a pure step over persisted state: it loads
//! the non-terminal Requests, advances each one's current Stage, dispatches
//! ready tasks within the per-host limit, applies timeouts and derives Stage
//! and Request statuses. Nothing survives between ticks except what the
//! store holds, so a restarted process picks up exactly where the rows say
//! it is.
//!
//! The async shell that calls `tick` on an interval lives in
//! [`crate::engine::runtime`].

mod step;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::agent::{AgentCommand, AgentTransport, CancelCommand};
use crate::errors::Result;
use crate::model::{HostRoleCommand, HostRoleStatus, Request, RequestId, RequestKind};
use crate::publisher::{EventSink, StatusEvent};
use crate::store::{Store, TaskWriter};
use crate::topology::TopologyProvider;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerConfig {
    pub tick_interval: Duration,
    /// Tasks allowed IN_PROGRESS per host at once, across all Requests.
    pub max_tasks_per_host: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(1),
            max_tasks_per_host: 1,
        }
    }
}

/// What one tick did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    pub active_requests: usize,
    pub queued: usize,
    pub dispatched: usize,
    pub dispatch_failures: usize,
    /// Timed-out attempts that were re-queued.
    pub retried: usize,
    /// Timed-out tasks that reached TIMEDOUT or HOLDING_TIMEDOUT.
    pub timed_out: usize,
    /// Tasks aborted because an earlier Stage failed.
    pub aborted: usize,
    /// Requests that reached a terminal status during this tick.
    pub finished: Vec<RequestId>,
}

impl TickReport {
    pub fn is_idle(&self) -> bool {
        self.active_requests == 0
    }
}

#[derive(Debug)]
pub struct ActionScheduler {
    store: Arc<dyn Store>,
    writer: TaskWriter,
    transport: Arc<dyn AgentTransport>,
    topology: Arc<dyn TopologyProvider>,
    events: EventSink,
    config: SchedulerConfig,
}

impl ActionScheduler {
    pub fn new(
        store: Arc<dyn Store>,
        transport: Arc<dyn AgentTransport>,
        topology: Arc<dyn TopologyProvider>,
        events: EventSink,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            writer: TaskWriter::new(Arc::clone(&store), events.clone()),
            store,
            transport,
            topology,
            events,
            config,
        }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Run one scheduling cycle at wall-clock time `now`.
    ///
    /// Fails closed: the first store error ends the cycle and is returned;
    /// the caller retries on the next tick. Every write already made is a
    /// complete single-row transition, so a partial cycle never leaves a
    /// half-applied state behind.
    pub fn tick(&self, now: DateTime<Utc>) -> Result<TickReport> {
        let requests = self.store.active_requests()?;
        let mut report = TickReport {
            active_requests: requests.len(),
            ..Default::default()
        };
        if requests.is_empty() {
            return Ok(report);
        }

        // Load every Request's tasks up front: the per-host limit spans
        // Requests.
        let mut loaded = Vec::with_capacity(requests.len());
        let mut host_load: HashMap<String, usize> = HashMap::new();
        for request in requests {
            let tasks = self.store.tasks_for_request(request.id)?;
            for task in tasks.iter().filter(|t| t.status == HostRoleStatus::InProgress) {
                *host_load.entry(task.host.clone()).or_insert(0) += 1;
            }
            loaded.push((request, tasks));
        }

        for (request, tasks) in loaded {
            let mut step = step::RequestStep::new(self, &request, tasks, now, &mut host_load);
            let status = step.run(&mut report)?;
            self.finish_request(request, status, now, &mut report)?;
        }

        if report.dispatched > 0 || report.timed_out > 0 || !report.finished.is_empty() {
            info!(
                active = report.active_requests,
                dispatched = report.dispatched,
                retried = report.retried,
                timed_out = report.timed_out,
                finished = report.finished.len(),
                "scheduler tick"
            );
        }
        Ok(report)
    }

    /// Persist the Request's derived status.
    fn finish_request(
        &self,
        request: Request,
        status: HostRoleStatus,
        now: DateTime<Utc>,
        report: &mut TickReport,
    ) -> Result<()> {
        if request.status == status {
            return Ok(());
        }
        // An operator abort may have landed since the Request was loaded.
        let mut request = self.store.request(request.id)?;
        if request.is_terminal() || request.status == status {
            return Ok(());
        }

        let from = request.status;
        request.status = status;
        if status.is_terminal() {
            request.end_time = Some(now);
        }
        self.store.update_request(&request)?;

        debug!(request_id = %request.id, from = %from, to = %status, "request status changed");
        self.events.emit(StatusEvent::RequestStatusChanged {
            request_id: request.id,
            cluster: request.cluster.clone(),
            upgrade: request.is_upgrade(),
            from,
            to: status,
            at: now,
        });

        if status.is_terminal() {
            info!(request_id = %request.id, status = %status, "request finished");
            report.finished.push(request.id);

            if let (HostRoleStatus::Completed, RequestKind::Upgrade(upgrade)) =
                (status, &request.kind)
            {
                self.topology
                    .set_cluster_stack(&request.cluster, &upgrade.to_stack)?;
            }
        }
        Ok(())
    }

    /// Best-effort cancel of the task's current attempt.
    pub(crate) fn send_cancel(&self, task: &HostRoleCommand, reason: &str) {
        let cancel = AgentCommand::Cancel(CancelCommand {
            task_id: task.id,
            attempt: task.attempt_count,
            reason: reason.to_string(),
        });
        if let Err(e) = self.transport.send(&task.host, cancel) {
            warn!(task_id = %task.id, host = %task.host, error = %e, "cancel not delivered");
        }
    }
}
