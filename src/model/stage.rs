// src/model/stage.rs

use serde::{Deserialize, Serialize};

use crate::model::{HostRoleStatus, RequestId, StageId};

/// Per-Stage behaviour switches.
///
/// Plain operation Requests use the defaults; upgrade items set them from the
/// upgrade pack.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageFlags {
    /// Failures in this Stage do not stop a `CONTINUE_ON_SKIPPABLE` Request.
    #[serde(default)]
    pub skippable: bool,
    /// Pause point: successful tasks park in `HOLDING` until an operator
    /// resumes them.
    #[serde(default)]
    pub manual: bool,
    /// Failed or timed-out tasks park in `HOLDING_FAILED`/`HOLDING_TIMEDOUT`
    /// instead of failing the Request.
    #[serde(default)]
    pub auto_hold_on_failure: bool,
    /// Operators may retry a held task of this Stage.
    #[serde(default)]
    pub allow_retry: bool,
}

/// An ordered phase of a Request. All its tasks may run in parallel; the
/// Stage as a whole gates the next one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stage {
    pub id: StageId,
    pub request_id: RequestId,
    /// Strict total order within the Request, starting at 0.
    pub sequence: u32,
    pub name: String,
    #[serde(default)]
    pub flags: StageFlags,
    /// Derived from the tasks; refreshed by the scheduler every tick.
    pub status: HostRoleStatus,
}
