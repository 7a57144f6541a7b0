use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use shepherd::errors::{Result, ShepherdError};
use shepherd::model::{
    HostRoleCommand, HostRoleStatus, Request, RequestId, RequestPlan, Stage, StageId, TaskId,
};
use shepherd::store::Store;

/// Wraps a store; while `offline` is set every call fails with
/// `Persistence`, as a lost database connection would.
#[derive(Debug)]
pub struct FlakyStore {
    inner: Arc<dyn Store>,
    offline: AtomicBool,
}

impl FlakyStore {
    pub fn new(inner: Arc<dyn Store>) -> Self {
        Self {
            inner,
            offline: AtomicBool::new(false),
        }
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    fn check(&self) -> Result<()> {
        if self.offline.load(Ordering::SeqCst) {
            Err(ShepherdError::Persistence("store offline".to_string()))
        } else {
            Ok(())
        }
    }
}

impl Store for FlakyStore {
    fn insert_request(&self, plan: &RequestPlan) -> Result<RequestId> {
        self.check()?;
        self.inner.insert_request(plan)
    }

    fn request(&self, id: RequestId) -> Result<Request> {
        self.check()?;
        self.inner.request(id)
    }

    fn active_requests(&self) -> Result<Vec<Request>> {
        self.check()?;
        self.inner.active_requests()
    }

    fn list_requests(&self) -> Result<Vec<Request>> {
        self.check()?;
        self.inner.list_requests()
    }

    fn stages(&self, request: RequestId) -> Result<Vec<Stage>> {
        self.check()?;
        self.inner.stages(request)
    }

    fn stage(&self, id: StageId) -> Result<Stage> {
        self.check()?;
        self.inner.stage(id)
    }

    fn tasks_for_request(&self, request: RequestId) -> Result<Vec<HostRoleCommand>> {
        self.check()?;
        self.inner.tasks_for_request(request)
    }

    fn tasks_for_stage(&self, stage: StageId) -> Result<Vec<HostRoleCommand>> {
        self.check()?;
        self.inner.tasks_for_stage(stage)
    }

    fn task(&self, id: TaskId) -> Result<HostRoleCommand> {
        self.check()?;
        self.inner.task(id)
    }

    fn update_task(&self, task: &HostRoleCommand, expected: HostRoleStatus) -> Result<bool> {
        self.check()?;
        self.inner.update_task(task, expected)
    }

    fn update_stage_status(&self, id: StageId, status: HostRoleStatus) -> Result<()> {
        self.check()?;
        self.inner.update_stage_status(id, status)
    }

    fn update_request(&self, request: &Request) -> Result<()> {
        self.check()?;
        self.inner.update_request(request)
    }
}

type Hook = Box<dyn FnOnce() + Send>;

/// Wraps a store and runs a one-shot hook right before the next `stage()`
/// or `stages()` read, so a test can slip a competing writer in between a
/// reader's snapshot and its commit.
///
/// The heartbeat processor reads the task and then its Stage; the scheduler
/// reads a Request's tasks and then its Stages. Hooks should write through
/// the inner store so they do not re-enter themselves.
pub struct InterleavingStore {
    inner: Arc<dyn Store>,
    before_stage: Mutex<Option<Hook>>,
    before_stages: Mutex<Option<Hook>>,
}

impl InterleavingStore {
    pub fn new(inner: Arc<dyn Store>) -> Self {
        Self {
            inner,
            before_stage: Mutex::new(None),
            before_stages: Mutex::new(None),
        }
    }

    pub fn inner(&self) -> Arc<dyn Store> {
        Arc::clone(&self.inner)
    }

    pub fn before_next_stage(&self, hook: impl FnOnce() + Send + 'static) {
        *self.before_stage.lock().unwrap() = Some(Box::new(hook));
    }

    pub fn before_next_stages(&self, hook: impl FnOnce() + Send + 'static) {
        *self.before_stages.lock().unwrap() = Some(Box::new(hook));
    }

    fn run(slot: &Mutex<Option<Hook>>) {
        let hook = slot.lock().unwrap().take();
        if let Some(hook) = hook {
            hook();
        }
    }
}

impl fmt::Debug for InterleavingStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InterleavingStore")
            .field("inner", &self.inner)
            .finish_non_exhaustive()
    }
}

impl Store for InterleavingStore {
    fn insert_request(&self, plan: &RequestPlan) -> Result<RequestId> {
        self.inner.insert_request(plan)
    }

    fn request(&self, id: RequestId) -> Result<Request> {
        self.inner.request(id)
    }

    fn active_requests(&self) -> Result<Vec<Request>> {
        self.inner.active_requests()
    }

    fn list_requests(&self) -> Result<Vec<Request>> {
        self.inner.list_requests()
    }

    fn stages(&self, request: RequestId) -> Result<Vec<Stage>> {
        Self::run(&self.before_stages);
        self.inner.stages(request)
    }

    fn stage(&self, id: StageId) -> Result<Stage> {
        Self::run(&self.before_stage);
        self.inner.stage(id)
    }

    fn tasks_for_request(&self, request: RequestId) -> Result<Vec<HostRoleCommand>> {
        self.inner.tasks_for_request(request)
    }

    fn tasks_for_stage(&self, stage: StageId) -> Result<Vec<HostRoleCommand>> {
        self.inner.tasks_for_stage(stage)
    }

    fn task(&self, id: TaskId) -> Result<HostRoleCommand> {
        self.inner.task(id)
    }

    fn update_task(&self, task: &HostRoleCommand, expected: HostRoleStatus) -> Result<bool> {
        self.inner.update_task(task, expected)
    }

    fn update_stage_status(&self, id: StageId, status: HostRoleStatus) -> Result<()> {
        self.inner.update_stage_status(id, status)
    }

    fn update_request(&self, request: &Request) -> Result<()> {
        self.inner.update_request(request)
    }
}
