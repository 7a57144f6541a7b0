// src/model/mod.rs

//! Request → Stage → Task data model.
//!
//! Rows are stored in indexed tables keyed by id (see [`crate::store`]);
//! back-references are plain ids, never owning pointers.
//!
//! - [`status`] holds the task status state machine and status summaries.
//! - [`request`], [`stage`] and [`task`] are the persisted rows.
//! - [`plan`] holds the not-yet-persisted shape produced by the planners.

pub mod plan;
pub mod request;
pub mod stage;
pub mod status;
pub mod task;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

pub use plan::{RequestPlan, StagePlan, TaskPlan};
pub use request::{Request, RequestKind, UpgradeSummary};
pub use stage::{Stage, StageFlags};
pub use status::{HostRoleStatus, StatusSummary};
pub use task::{CommandOutput, CommandParams, HostRoleCommand};

macro_rules! row_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub u64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

row_id!(
    /// Identifier of a [`Request`].
    RequestId
);
row_id!(
    /// Identifier of a [`Stage`], unique across Requests.
    StageId
);
row_id!(
    /// Identifier of a [`HostRoleCommand`].
    TaskId
);

/// The command a task asks an agent to run for its role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RoleCommand {
    Install,
    Start,
    Stop,
    Restart,
    Execute,
    CustomCommand,
    ServiceCheck,
    Upgrade,
}

impl RoleCommand {
    pub fn as_str(self) -> &'static str {
        match self {
            RoleCommand::Install => "INSTALL",
            RoleCommand::Start => "START",
            RoleCommand::Stop => "STOP",
            RoleCommand::Restart => "RESTART",
            RoleCommand::Execute => "EXECUTE",
            RoleCommand::CustomCommand => "CUSTOM_COMMAND",
            RoleCommand::ServiceCheck => "SERVICE_CHECK",
            RoleCommand::Upgrade => "UPGRADE",
        }
    }
}

impl fmt::Display for RoleCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RoleCommand {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "INSTALL" => Ok(RoleCommand::Install),
            "START" => Ok(RoleCommand::Start),
            "STOP" => Ok(RoleCommand::Stop),
            "RESTART" => Ok(RoleCommand::Restart),
            "EXECUTE" => Ok(RoleCommand::Execute),
            "CUSTOM_COMMAND" => Ok(RoleCommand::CustomCommand),
            "SERVICE_CHECK" => Ok(RoleCommand::ServiceCheck),
            "UPGRADE" => Ok(RoleCommand::Upgrade),
            other => Err(format!("unknown role command: {other}")),
        }
    }
}

/// A `(service, role, role-command)` triple: the node type of the role
/// ordering graph.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RoleCommandKey {
    pub service: String,
    pub role: String,
    pub command: RoleCommand,
}

impl RoleCommandKey {
    pub fn new(service: impl Into<String>, role: impl Into<String>, command: RoleCommand) -> Self {
        Self {
            service: service.into(),
            role: role.into(),
            command,
        }
    }
}

impl fmt::Display for RoleCommandKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}-{}", self.service, self.role, self.command)
    }
}
