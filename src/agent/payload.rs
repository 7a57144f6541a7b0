// src/agent/payload.rs

//! Wire contract toward agents.
//!
//! Commands and reports are JSON documents. An execution command carries the
//! attempt number it was dispatched for; reports echo it back so a late
//! report from a superseded attempt can be told apart.

use std::collections::BTreeMap;

use blake3::Hasher;
use serde::{Deserialize, Serialize};

use crate::errors::Result;
use crate::model::{
    CommandOutput, HostRoleCommand, HostRoleStatus, RequestId, RoleCommand, StageId, TaskId,
};

/// Command asking an agent to run one task attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionCommand {
    pub task_id: TaskId,
    pub request_id: RequestId,
    pub stage_id: StageId,
    pub attempt: u32,
    pub cluster: String,
    pub host: String,
    pub service: String,
    pub role: String,
    pub role_command: RoleCommand,
    #[serde(default)]
    pub command_params: BTreeMap<String, String>,
    #[serde(default)]
    pub configurations: BTreeMap<String, BTreeMap<String, String>>,
    /// blake3 of the configuration bundle; agents may skip rewriting
    /// configuration whose hash they have already applied.
    pub config_hash: String,
    pub timeout_secs: u64,
}

impl ExecutionCommand {
    /// Build the payload for the task's current attempt.
    pub fn for_task(task: &HostRoleCommand) -> Result<Self> {
        Ok(Self {
            task_id: task.id,
            request_id: task.request_id,
            stage_id: task.stage_id,
            attempt: task.attempt_count,
            cluster: task.cluster.clone(),
            host: task.host.clone(),
            service: task.service.clone(),
            role: task.role.clone(),
            role_command: task.command,
            command_params: task.params.params.clone(),
            configurations: task.params.configurations.clone(),
            config_hash: config_hash(&task.params.configurations)?,
            timeout_secs: task.timeout_secs,
        })
    }
}

/// Hash of a configuration bundle. `BTreeMap` serializes with sorted keys,
/// so equal bundles always hash equal.
pub fn config_hash(configurations: &BTreeMap<String, BTreeMap<String, String>>) -> Result<String> {
    let canonical = serde_json::to_vec(configurations)?;
    let mut hasher = Hasher::new();
    hasher.update(&canonical);
    Ok(hasher.finalize().to_hex().to_string())
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CancelCommand {
    pub task_id: TaskId,
    /// Attempt to cancel; agents ignore a cancel for an attempt they no
    /// longer run.
    pub attempt: u32,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AgentCommand {
    Execution(ExecutionCommand),
    Cancel(CancelCommand),
}

impl AgentCommand {
    pub fn task_id(&self) -> TaskId {
        match self {
            AgentCommand::Execution(cmd) => cmd.task_id,
            AgentCommand::Cancel(cmd) => cmd.task_id,
        }
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Outcome code of a report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReportStatus {
    InProgress,
    Completed,
    Failed,
}

impl ReportStatus {
    pub fn is_final(self) -> bool {
        !matches!(self, ReportStatus::InProgress)
    }

    /// Task status a final report maps to, before hold rules apply.
    pub fn final_status(self) -> Option<HostRoleStatus> {
        match self {
            ReportStatus::InProgress => None,
            ReportStatus::Completed => Some(HostRoleStatus::Completed),
            ReportStatus::Failed => Some(HostRoleStatus::Failed),
        }
    }
}

/// Heartbeat/command report sent by an agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandReport {
    pub task_id: TaskId,
    /// Attempt the report belongs to. Reports without one are matched
    /// against the current attempt.
    #[serde(default)]
    pub attempt: Option<u32>,
    pub status: ReportStatus,
    #[serde(default)]
    pub stdout: String,
    #[serde(default)]
    pub stderr: String,
    #[serde(default)]
    pub exit_code: Option<i32>,
    #[serde(default)]
    pub structured_out: Option<serde_json::Value>,
}

impl CommandReport {
    pub fn new(task_id: TaskId, attempt: u32, status: ReportStatus) -> Self {
        Self {
            task_id,
            attempt: Some(attempt),
            status,
            stdout: String::new(),
            stderr: String::new(),
            exit_code: None,
            structured_out: None,
        }
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn output(&self) -> CommandOutput {
        CommandOutput {
            stdout: self.stdout.clone(),
            stderr: self.stderr.clone(),
            exit_code: self.exit_code,
            structured_out: self.structured_out.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_hash_ignores_insertion_order() {
        let mut a = BTreeMap::new();
        a.insert(
            "core-site".to_string(),
            BTreeMap::from([
                ("fs.defaultFS".to_string(), "hdfs://nn:8020".to_string()),
                ("io.file.buffer.size".to_string(), "131072".to_string()),
            ]),
        );
        let mut b = BTreeMap::new();
        b.insert(
            "core-site".to_string(),
            BTreeMap::from([
                ("io.file.buffer.size".to_string(), "131072".to_string()),
                ("fs.defaultFS".to_string(), "hdfs://nn:8020".to_string()),
            ]),
        );
        assert_eq!(config_hash(&a).unwrap(), config_hash(&b).unwrap());

        b.clear();
        assert_ne!(config_hash(&a).unwrap(), config_hash(&b).unwrap());
    }

    #[test]
    fn report_accepts_minimal_json() {
        let report =
            CommandReport::from_json(r#"{"task_id": 7, "status": "COMPLETED", "exit_code": 0}"#)
                .unwrap();
        assert_eq!(report.task_id, TaskId(7));
        assert_eq!(report.attempt, None);
        assert_eq!(report.status.final_status(), Some(HostRoleStatus::Completed));
    }

    #[test]
    fn commands_are_tagged() {
        let cancel = AgentCommand::Cancel(CancelCommand {
            task_id: TaskId(3),
            attempt: 1,
            reason: "timeout".to_string(),
        });
        let json = cancel.to_json().unwrap();
        assert!(json.contains(r#""type":"CANCEL""#));
    }
}
