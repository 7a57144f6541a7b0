// src/model/request.rs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::{HostRoleStatus, RequestId, Stage};
use crate::types::{Direction, FailurePolicy};

/// One user-initiated cluster operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    pub id: RequestId,
    pub cluster: String,
    /// Human-readable description shown to operators.
    pub context: String,
    pub created_at: DateTime<Utc>,
    pub failure_policy: FailurePolicy,
    /// Derived from the Stages; refreshed by the scheduler every tick.
    pub status: HostRoleStatus,
    pub kind: RequestKind,
    /// Set when an operator aborted the Request.
    #[serde(default)]
    pub abort_reason: Option<String>,
    #[serde(default)]
    pub end_time: Option<DateTime<Utc>>,
}

impl Request {
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn is_upgrade(&self) -> bool {
        matches!(self.kind, RequestKind::Upgrade(_))
    }

    /// Whether failed tasks of `stage` count as done when deriving the
    /// Stage's status.
    pub fn tolerates_failures(&self, stage: &Stage) -> bool {
        self.failure_policy == FailurePolicy::ContinueOnSkippable && stage.flags.skippable
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RequestKind {
    /// Plain operations (install/start/stop/...).
    Operations,
    /// A rolling upgrade or downgrade built from an upgrade pack.
    Upgrade(UpgradeSummary),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpgradeSummary {
    pub pack: String,
    pub direction: Direction,
    /// Stack id the cluster runs before the Request.
    pub from_stack: String,
    /// Stack id the cluster runs once the Request completes.
    pub to_stack: String,
}
