// src/store/tables.rs

//! Row tables shared by the memory and file stores.

use std::collections::BTreeMap;

use crate::errors::{Result, ShepherdError};
use crate::model::{
    HostRoleCommand, HostRoleStatus, Request, RequestId, RequestPlan, Stage, StageId, TaskId,
};

/// Rows produced from one [`RequestPlan`], ids already assigned.
#[derive(Debug, Clone)]
pub(crate) struct RequestRows {
    pub request: Request,
    pub stages: Vec<Stage>,
    pub tasks: Vec<HostRoleCommand>,
}

#[derive(Debug, Default)]
pub(crate) struct Tables {
    next_request: u64,
    next_stage: u64,
    next_task: u64,
    requests: BTreeMap<RequestId, Request>,
    stages: BTreeMap<StageId, Stage>,
    tasks: BTreeMap<TaskId, HostRoleCommand>,
    stages_by_request: BTreeMap<RequestId, Vec<StageId>>,
    tasks_by_stage: BTreeMap<StageId, Vec<TaskId>>,
    tasks_by_request: BTreeMap<RequestId, Vec<TaskId>>,
}

impl Tables {
    /// Turn a plan into rows with fresh ids. Nothing is inserted yet.
    pub fn materialize(&mut self, plan: &RequestPlan) -> RequestRows {
        self.next_request += 1;
        let request_id = RequestId(self.next_request);

        let request = Request {
            id: request_id,
            cluster: plan.cluster.clone(),
            context: plan.context.clone(),
            created_at: plan.created_at,
            failure_policy: plan.failure_policy,
            status: HostRoleStatus::Pending,
            kind: plan.kind.clone(),
            abort_reason: None,
            end_time: None,
        };

        let mut stages = Vec::with_capacity(plan.stages.len());
        let mut tasks = Vec::with_capacity(plan.task_count());

        for (sequence, stage_plan) in plan.stages.iter().enumerate() {
            self.next_stage += 1;
            let stage_id = StageId(self.next_stage);
            stages.push(Stage {
                id: stage_id,
                request_id,
                sequence: sequence as u32,
                name: stage_plan.name.clone(),
                flags: stage_plan.flags,
                status: HostRoleStatus::Pending,
            });

            for task_plan in &stage_plan.tasks {
                self.next_task += 1;
                tasks.push(HostRoleCommand {
                    id: TaskId(self.next_task),
                    request_id,
                    stage_id,
                    cluster: plan.cluster.clone(),
                    host: task_plan.host.clone(),
                    service: task_plan.service.clone(),
                    role: task_plan.role.clone(),
                    command: task_plan.command,
                    params: task_plan.params.clone(),
                    status: HostRoleStatus::Pending,
                    attempt_count: 0,
                    max_attempts: task_plan.max_attempts,
                    retry_enabled: task_plan.retry_enabled,
                    timeout_secs: task_plan.timeout_secs,
                    created_at: plan.created_at,
                    start_time: None,
                    last_update: None,
                    end_time: None,
                    output: Default::default(),
                    version: 0,
                });
            }
        }

        RequestRows {
            request,
            stages,
            tasks,
        }
    }

    pub fn insert_rows(&mut self, rows: RequestRows) {
        let request_id = rows.request.id;
        self.next_request = self.next_request.max(request_id.0);

        for stage in rows.stages {
            self.insert_stage(stage);
        }
        for task in rows.tasks {
            self.insert_task(task);
        }
        self.requests.insert(request_id, rows.request);
    }

    /// Insert a single stage row (used when rebuilding from disk).
    pub fn insert_stage(&mut self, stage: Stage) {
        self.next_stage = self.next_stage.max(stage.id.0);
        let ids = self.stages_by_request.entry(stage.request_id).or_default();
        if !ids.contains(&stage.id) {
            ids.push(stage.id);
        }
        self.stages.insert(stage.id, stage);
    }

    /// Insert a single task row (used when rebuilding from disk).
    pub fn insert_task(&mut self, task: HostRoleCommand) {
        self.next_task = self.next_task.max(task.id.0);
        let by_stage = self.tasks_by_stage.entry(task.stage_id).or_default();
        if !by_stage.contains(&task.id) {
            by_stage.push(task.id);
        }
        let by_request = self.tasks_by_request.entry(task.request_id).or_default();
        if !by_request.contains(&task.id) {
            by_request.push(task.id);
        }
        self.tasks.insert(task.id, task);
    }

    pub fn insert_request(&mut self, request: Request) {
        self.next_request = self.next_request.max(request.id.0);
        self.requests.insert(request.id, request);
    }

    /// Drop stage and task rows whose Request row never made it to disk.
    pub fn discard_orphans(&mut self) -> usize {
        let orphan_requests: Vec<RequestId> = self
            .stages_by_request
            .keys()
            .chain(self.tasks_by_request.keys())
            .filter(|id| !self.requests.contains_key(*id))
            .copied()
            .collect();

        let mut dropped = 0;
        for request_id in orphan_requests {
            for stage_id in self.stages_by_request.remove(&request_id).unwrap_or_default() {
                self.stages.remove(&stage_id);
                self.tasks_by_stage.remove(&stage_id);
                dropped += 1;
            }
            for task_id in self.tasks_by_request.remove(&request_id).unwrap_or_default() {
                self.tasks.remove(&task_id);
                dropped += 1;
            }
        }
        dropped
    }

    pub fn request(&self, id: RequestId) -> Result<Request> {
        self.requests
            .get(&id)
            .cloned()
            .ok_or(ShepherdError::UnknownRequest(id))
    }

    pub fn requests(&self, active_only: bool) -> Vec<Request> {
        let mut requests: Vec<Request> = self
            .requests
            .values()
            .filter(|r| !active_only || !r.is_terminal())
            .cloned()
            .collect();
        requests.sort_by_key(|r| (r.created_at, r.id));
        requests
    }

    pub fn stages(&self, request: RequestId) -> Result<Vec<Stage>> {
        if !self.requests.contains_key(&request) {
            return Err(ShepherdError::UnknownRequest(request));
        }
        let mut stages: Vec<Stage> = self
            .stages_by_request
            .get(&request)
            .into_iter()
            .flatten()
            .filter_map(|id| self.stages.get(id))
            .cloned()
            .collect();
        stages.sort_by_key(|s| s.sequence);
        Ok(stages)
    }

    pub fn stage(&self, id: StageId) -> Result<Stage> {
        self.stages
            .get(&id)
            .cloned()
            .ok_or(ShepherdError::UnknownStage(id))
    }

    pub fn tasks_for_request(&self, request: RequestId) -> Result<Vec<HostRoleCommand>> {
        if !self.requests.contains_key(&request) {
            return Err(ShepherdError::UnknownRequest(request));
        }
        Ok(self.collect_tasks(self.tasks_by_request.get(&request)))
    }

    pub fn tasks_for_stage(&self, stage: StageId) -> Result<Vec<HostRoleCommand>> {
        if !self.stages.contains_key(&stage) {
            return Err(ShepherdError::UnknownStage(stage));
        }
        Ok(self.collect_tasks(self.tasks_by_stage.get(&stage)))
    }

    fn collect_tasks(&self, ids: Option<&Vec<TaskId>>) -> Vec<HostRoleCommand> {
        let mut tasks: Vec<HostRoleCommand> = ids
            .into_iter()
            .flatten()
            .filter_map(|id| self.tasks.get(id))
            .cloned()
            .collect();
        tasks.sort_by_key(|t| t.id);
        tasks
    }

    pub fn task(&self, id: TaskId) -> Result<HostRoleCommand> {
        self.tasks
            .get(&id)
            .cloned()
            .ok_or(ShepherdError::UnknownTask(id))
    }

    /// Compare-and-set on the task row. `task` must carry the version of the
    /// row it was derived from plus one; the write only lands if the stored
    /// row is still that version at status `expected`. Returns the replaced
    /// row on success, `None` if another write landed first.
    pub fn compare_and_set_task(
        &mut self,
        task: &HostRoleCommand,
        expected: HostRoleStatus,
    ) -> Result<Option<HostRoleCommand>> {
        if expected != task.status && !expected.can_transition_to(task.status) {
            return Err(ShepherdError::InvalidTransition {
                task: task.id,
                from: expected,
                to: task.status,
            });
        }

        let slot = self
            .tasks
            .get_mut(&task.id)
            .ok_or(ShepherdError::UnknownTask(task.id))?;
        if slot.status != expected || slot.version.checked_add(1) != Some(task.version) {
            return Ok(None);
        }
        Ok(Some(std::mem::replace(slot, task.clone())))
    }

    /// Undo a committed task write, unless someone committed on top of it.
    pub fn restore_task(&mut self, written: &HostRoleCommand, previous: HostRoleCommand) {
        if let Some(slot) = self.tasks.get_mut(&written.id) {
            if slot == written {
                *slot = previous;
            }
        }
    }

    /// Returns the previous status.
    pub fn set_stage_status(
        &mut self,
        id: StageId,
        status: HostRoleStatus,
    ) -> Result<HostRoleStatus> {
        let stage = self
            .stages
            .get_mut(&id)
            .ok_or(ShepherdError::UnknownStage(id))?;
        Ok(std::mem::replace(&mut stage.status, status))
    }

    /// Returns the previous row.
    pub fn replace_request(&mut self, request: &Request) -> Result<Request> {
        let slot = self
            .requests
            .get_mut(&request.id)
            .ok_or(ShepherdError::UnknownRequest(request.id))?;
        Ok(std::mem::replace(slot, request.clone()))
    }
}
