// src/model/plan.rs

//! Shape of a Request before it is persisted.
//!
//! Planners ([`crate::planner`], [`crate::upgrade`]) produce a
//! [`RequestPlan`]; the store assigns ids and turns it into rows in one
//! atomic insert.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::model::{CommandParams, RequestKind, RoleCommand, RoleCommandKey, StageFlags};
use crate::types::FailurePolicy;

#[derive(Debug, Clone, Serialize)]
pub struct RequestPlan {
    pub cluster: String,
    pub context: String,
    pub created_at: DateTime<Utc>,
    pub failure_policy: FailurePolicy,
    pub kind: RequestKind,
    /// In execution order; the index becomes the Stage sequence number.
    pub stages: Vec<StagePlan>,
}

impl RequestPlan {
    pub fn task_count(&self) -> usize {
        self.stages.iter().map(|s| s.tasks.len()).sum()
    }

    /// Sequence number of the Stage that contains `key`, if any.
    pub fn stage_of(&self, key: &RoleCommandKey) -> Option<usize> {
        self.stages
            .iter()
            .position(|s| s.tasks.iter().any(|t| &t.key() == key))
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StagePlan {
    pub name: String,
    pub flags: StageFlags,
    pub tasks: Vec<TaskPlan>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TaskPlan {
    pub host: String,
    pub service: String,
    pub role: String,
    pub command: RoleCommand,
    pub params: CommandParams,
    pub timeout_secs: u64,
    pub max_attempts: u32,
    pub retry_enabled: bool,
}

impl TaskPlan {
    pub fn key(&self) -> RoleCommandKey {
        RoleCommandKey::new(self.service.clone(), self.role.clone(), self.command)
    }
}
