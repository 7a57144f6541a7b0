// src/engine/runtime.rs

use std::future::Future;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::agent::CommandReport;
use crate::errors::Result;
use crate::heartbeat::{HeartbeatProcessor, ReportOutcome};
use crate::scheduler::ActionScheduler;

use super::RuntimeOptions;

/// Async shell around the scheduler and the heartbeat processor.
///
/// The scheduler is ticked on a fixed interval; agent reports are applied
/// as they arrive on a separate task. Neither holds state of its own, so
/// the runtime can be dropped and rebuilt over the same store at any time.
#[derive(Debug)]
pub struct Runtime {
    scheduler: Arc<ActionScheduler>,
    heartbeat: HeartbeatProcessor,
    reports: mpsc::Receiver<CommandReport>,
    options: RuntimeOptions,
}

impl Runtime {
    pub fn new(
        scheduler: Arc<ActionScheduler>,
        heartbeat: HeartbeatProcessor,
        reports: mpsc::Receiver<CommandReport>,
        options: RuntimeOptions,
    ) -> Self {
        Self {
            scheduler,
            heartbeat,
            reports,
            options,
        }
    }

    /// Run until `shutdown` resolves, or until no Request is active when
    /// `exit_when_idle` is set.
    ///
    /// A failed tick (store unavailable) is logged and the next tick
    /// retries; it never stops the loop.
    pub async fn run_until<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        let Runtime {
            scheduler,
            heartbeat,
            reports,
            options,
        } = self;

        info!(
            tick_interval = ?scheduler.config().tick_interval,
            max_tasks_per_host = scheduler.config().max_tasks_per_host,
            "shepherd runtime started"
        );

        let heartbeat_handle = spawn_heartbeat_loop(heartbeat, reports);

        let mut interval = time::interval(scheduler.config().tick_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("shutdown requested; stopping runtime");
                    break;
                }
                _ = interval.tick() => {
                    match scheduler.tick(Utc::now()) {
                        Ok(report) => {
                            if options.exit_when_idle && report.is_idle() {
                                info!("no active requests; exiting");
                                break;
                            }
                        }
                        Err(e) => {
                            warn!(error = %e, "scheduler tick failed; retrying next tick");
                        }
                    }
                }
            }
        }

        heartbeat_handle.abort();
        info!("runtime exiting");
        Ok(())
    }
}

/// Apply agent reports until every sender is gone.
pub fn spawn_heartbeat_loop(
    heartbeat: HeartbeatProcessor,
    mut reports: mpsc::Receiver<CommandReport>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(report) = reports.recv().await {
            match heartbeat.apply_report(&report, Utc::now()) {
                Ok(ReportOutcome::Applied(status)) => {
                    debug!(task_id = %report.task_id, status = %status, "report applied");
                }
                Ok(outcome) => {
                    debug!(task_id = %report.task_id, ?outcome, "report processed");
                }
                Err(e) => {
                    warn!(task_id = %report.task_id, error = %e, "report not applied");
                }
            }
        }
        debug!("report channel closed; heartbeat loop exiting");
    })
}
