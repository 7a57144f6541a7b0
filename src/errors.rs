// src/errors.rs

//! Crate-wide error type and result alias.

use thiserror::Error;

use crate::model::{HostRoleStatus, RequestId, StageId, TaskId};

#[derive(Error, Debug)]
pub enum ShepherdError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    /// The role command order of a stack contains a cycle. The stack
    /// definition is invalid and nothing referencing it can be planned.
    #[error("Cycle detected in role command order of stack {stack}: {detail}")]
    OrderingCycle { stack: String, detail: String },

    #[error("Unknown stack: {0}")]
    UnknownStack(String),

    #[error("Planning error: {0}")]
    Planning(String),

    #[error("Request not found: {0}")]
    UnknownRequest(RequestId),

    #[error("Stage not found: {0}")]
    UnknownStage(StageId),

    #[error("Task not found: {0}")]
    UnknownTask(TaskId),

    #[error("Invalid transition for task {task}: {from} -> {to}")]
    InvalidTransition {
        task: TaskId,
        from: HostRoleStatus,
        to: HostRoleStatus,
    },

    #[error("Operator action rejected: {0}")]
    ActionRejected(String),

    #[error("Persistence unavailable: {0}")]
    Persistence(String),

    #[error("Dispatch to host {host} failed: {reason}")]
    Dispatch { host: String, reason: String },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ShepherdError {
    /// Planning failures are fatal and never retried; the operator must fix
    /// the stack or upgrade definition.
    pub fn is_planning_error(&self) -> bool {
        matches!(
            self,
            ShepherdError::OrderingCycle { .. }
                | ShepherdError::UnknownStack(_)
                | ShepherdError::Planning(_)
        )
    }
}

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, ShepherdError>;
