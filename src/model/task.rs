// src/model/task.rs

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::{HostRoleStatus, RequestId, RoleCommand, RoleCommandKey, StageId, TaskId};

/// Command-specific parameters and the configuration bundle sent with a task.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandParams {
    /// Free-form command parameters (e.g. `script`, `custom_command`).
    #[serde(default)]
    pub params: BTreeMap<String, String>,
    /// Configuration type → key → value.
    #[serde(default)]
    pub configurations: BTreeMap<String, BTreeMap<String, String>>,
}

/// Structured output reported by the agent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CommandOutput {
    #[serde(default)]
    pub stdout: String,
    #[serde(default)]
    pub stderr: String,
    #[serde(default)]
    pub exit_code: Option<i32>,
    #[serde(default)]
    pub structured_out: Option<serde_json::Value>,
}

/// The atomic `(host, role, command)` unit of work.
///
/// A task is never re-created: retries re-use the row and bump
/// `attempt_count`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostRoleCommand {
    pub id: TaskId,
    pub request_id: RequestId,
    pub stage_id: StageId,
    pub cluster: String,
    pub host: String,
    pub service: String,
    pub role: String,
    pub command: RoleCommand,
    #[serde(default)]
    pub params: CommandParams,
    pub status: HostRoleStatus,
    /// Dispatch attempts made so far (0 until first dispatched).
    pub attempt_count: u32,
    pub max_attempts: u32,
    /// Whether a timed-out attempt may be re-queued automatically. Dispatch
    /// failures are re-queued while attempts remain regardless.
    pub retry_enabled: bool,
    pub timeout_secs: u64,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub start_time: Option<DateTime<Utc>>,
    /// Last state-changing update (dispatch or progress report). The
    /// timeout clock runs from here.
    #[serde(default)]
    pub last_update: Option<DateTime<Utc>>,
    #[serde(default)]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub output: CommandOutput,
    /// Row version, bumped by every committed write. 0 for a fresh row.
    #[serde(default)]
    pub version: u64,
}

impl HostRoleCommand {
    pub fn key(&self) -> RoleCommandKey {
        RoleCommandKey::new(self.service.clone(), self.role.clone(), self.command)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn attempts_remaining(&self) -> bool {
        self.attempt_count < self.max_attempts
    }

    /// Whether the task has been silent for longer than its timeout at `now`.
    pub fn is_timed_out(&self, now: DateTime<Utc>) -> bool {
        let Some(since) = self.last_update.or(self.start_time) else {
            return false;
        };
        let elapsed = now.signed_duration_since(since);
        elapsed.num_milliseconds() > (self.timeout_secs as i64).saturating_mul(1000)
    }
}
