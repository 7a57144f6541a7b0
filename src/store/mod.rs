// src/store/mod.rs

//! Persistence boundary.
//!
//! Requests, Stages and Tasks live in indexed tables keyed by id. The
//! scheduler and the heartbeat processor only ever talk to a [`Store`]; the
//! in-memory state they keep between calls is a cache that can be rebuilt
//! from the rows alone.
//!
//! Task updates are compare-and-set on the row version, which is what
//! serializes the scheduler tick against concurrent heartbeats: whoever
//! commits first wins and the loser re-reads. Comparing the status alone is
//! not enough, since a retry (IN_PROGRESS -> QUEUED -> IN_PROGRESS) or a
//! progress report leaves it unchanged.

pub mod file;
pub mod memory;
mod tables;
pub mod writer;

use std::fmt::Debug;

use crate::errors::Result;
use crate::model::{
    HostRoleCommand, HostRoleStatus, Request, RequestId, RequestPlan, Stage, StageId, TaskId,
};

pub use file::FileStore;
pub use memory::MemoryStore;
pub use writer::TaskWriter;

pub trait Store: Send + Sync + Debug {
    /// Persist a planned Request with all its Stages and Tasks, assigning
    /// ids. Either everything is stored or nothing is.
    fn insert_request(&self, plan: &RequestPlan) -> Result<RequestId>;

    fn request(&self, id: RequestId) -> Result<Request>;

    /// Non-terminal Requests, oldest first.
    fn active_requests(&self) -> Result<Vec<Request>>;

    /// Every Request, oldest first.
    fn list_requests(&self) -> Result<Vec<Request>>;

    /// Stages of a Request ordered by sequence number.
    fn stages(&self, request: RequestId) -> Result<Vec<Stage>>;

    fn stage(&self, id: StageId) -> Result<Stage>;

    fn tasks_for_request(&self, request: RequestId) -> Result<Vec<HostRoleCommand>>;

    fn tasks_for_stage(&self, stage: StageId) -> Result<Vec<HostRoleCommand>>;

    fn task(&self, id: TaskId) -> Result<HostRoleCommand>;

    /// Atomically replace a task row if the stored row is still the one
    /// `task` was derived from: status `expected` and version
    /// `task.version - 1`.
    ///
    /// Returns `Ok(false)` when another write landed first.
    /// Fails with `InvalidTransition` when `expected -> task.status` is not
    /// an edge of the state machine (a status may always be rewritten to
    /// itself, e.g. for progress reports).
    fn update_task(&self, task: &HostRoleCommand, expected: HostRoleStatus) -> Result<bool>;

    fn update_stage_status(&self, id: StageId, status: HostRoleStatus) -> Result<()>;

    fn update_request(&self, request: &Request) -> Result<()>;
}
