// src/store/writer.rs

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::errors::Result;
use crate::model::{HostRoleCommand, HostRoleStatus, Stage};
use crate::publisher::{EventSink, StatusEvent};
use crate::store::Store;

/// Commits task and stage transitions and publishes them.
///
/// Shared by the scheduler, the heartbeat processor and the control API so
/// that every committed transition produces exactly one event.
#[derive(Debug, Clone)]
pub struct TaskWriter {
    store: Arc<dyn Store>,
    events: EventSink,
}

impl TaskWriter {
    pub fn new(store: Arc<dyn Store>, events: EventSink) -> Self {
        Self { store, events }
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    pub fn events(&self) -> &EventSink {
        &self.events
    }

    /// Compare-and-set `updated` over `current` and publish the transition.
    ///
    /// `updated` is stamped with the next version of `current`. On success
    /// `current` becomes `updated`. When another write landed after
    /// `current` was read, `current` is refreshed from the store and `false`
    /// is returned.
    pub fn commit(
        &self,
        current: &mut HostRoleCommand,
        mut updated: HostRoleCommand,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let from = current.status;
        updated.version = current.version + 1;
        if !self.store.update_task(&updated, from)? {
            debug!(task_id = %current.id, "task changed concurrently; re-reading");
            *current = self.store.task(current.id)?;
            return Ok(false);
        }

        if updated.status != from {
            debug!(
                task_id = %updated.id,
                host = %updated.host,
                from = %from,
                to = %updated.status,
                "task status changed"
            );
            self.events.emit(StatusEvent::TaskStatusChanged {
                request_id: updated.request_id,
                stage_id: updated.stage_id,
                task_id: updated.id,
                host: updated.host.clone(),
                role: updated.role.clone(),
                command: updated.command,
                attempt: updated.attempt_count,
                from,
                to: updated.status,
                at: now,
            });
        }
        *current = updated;
        Ok(true)
    }

    /// Persist a derived stage status if it changed.
    pub fn set_stage_status(&self, stage: &mut Stage, status: HostRoleStatus) -> Result<()> {
        if stage.status == status {
            return Ok(());
        }
        self.store.update_stage_status(stage.id, status)?;
        debug!(
            request_id = %stage.request_id,
            stage = stage.sequence,
            from = %stage.status,
            to = %status,
            "stage status changed"
        );
        self.events.emit(StatusEvent::StageStatusChanged {
            request_id: stage.request_id,
            stage_id: stage.id,
            sequence: stage.sequence,
            from: stage.status,
            to: status,
        });
        stage.status = status;
        Ok(())
    }
}
