// src/store/memory.rs

use std::sync::{Mutex, MutexGuard};

use tracing::debug;

use crate::errors::{Result, ShepherdError};
use crate::model::{
    HostRoleCommand, HostRoleStatus, Request, RequestId, RequestPlan, Stage, StageId, TaskId,
};
use crate::store::Store;
use crate::store::tables::Tables;

/// Process-local store. State is lost on restart.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Tables>> {
        self.tables
            .lock()
            .map_err(|_| ShepherdError::Persistence("memory store lock poisoned".to_string()))
    }
}

impl Store for MemoryStore {
    fn insert_request(&self, plan: &RequestPlan) -> Result<RequestId> {
        let mut tables = self.lock()?;
        let rows = tables.materialize(plan);
        let id = rows.request.id;
        debug!(
            request_id = %id,
            stages = rows.stages.len(),
            tasks = rows.tasks.len(),
            "inserted request"
        );
        tables.insert_rows(rows);
        Ok(id)
    }

    fn request(&self, id: RequestId) -> Result<Request> {
        self.lock()?.request(id)
    }

    fn active_requests(&self) -> Result<Vec<Request>> {
        Ok(self.lock()?.requests(true))
    }

    fn list_requests(&self) -> Result<Vec<Request>> {
        Ok(self.lock()?.requests(false))
    }

    fn stages(&self, request: RequestId) -> Result<Vec<Stage>> {
        self.lock()?.stages(request)
    }

    fn stage(&self, id: StageId) -> Result<Stage> {
        self.lock()?.stage(id)
    }

    fn tasks_for_request(&self, request: RequestId) -> Result<Vec<HostRoleCommand>> {
        self.lock()?.tasks_for_request(request)
    }

    fn tasks_for_stage(&self, stage: StageId) -> Result<Vec<HostRoleCommand>> {
        self.lock()?.tasks_for_stage(stage)
    }

    fn task(&self, id: TaskId) -> Result<HostRoleCommand> {
        self.lock()?.task(id)
    }

    fn update_task(&self, task: &HostRoleCommand, expected: HostRoleStatus) -> Result<bool> {
        Ok(self.lock()?.compare_and_set_task(task, expected)?.is_some())
    }

    fn update_stage_status(&self, id: StageId, status: HostRoleStatus) -> Result<()> {
        self.lock()?.set_stage_status(id, status)?;
        Ok(())
    }

    fn update_request(&self, request: &Request) -> Result<()> {
        self.lock()?.replace_request(request)?;
        Ok(())
    }
}
