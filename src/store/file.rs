// src/store/file.rs

//! Write-through store that keeps one JSON document per row:
//!
//! ```text
//! <root>/requests/<id>.json
//! <root>/stages/<id>.json
//! <root>/tasks/<id>.json
//! ```
//!
//! Reads are served from memory. [`FileStore::open`] rebuilds the tables from
//! disk, so a restarted control plane resumes from the persisted statuses.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, info, warn};

use crate::errors::{Result, ShepherdError};
use crate::fs::FileSystem;
use crate::model::{
    HostRoleCommand, HostRoleStatus, Request, RequestId, RequestPlan, Stage, StageId, TaskId,
};
use crate::store::Store;
use crate::store::tables::Tables;

const REQUESTS_DIR: &str = "requests";
const STAGES_DIR: &str = "stages";
const TASKS_DIR: &str = "tasks";

#[derive(Debug)]
pub struct FileStore {
    fs: Arc<dyn FileSystem>,
    root: PathBuf,
    tables: Mutex<Tables>,
    /// Serializes disk writes. Never taken while `tables` is held.
    disk: Mutex<()>,
}

impl FileStore {
    /// Open (or create) a store rooted at `root`.
    ///
    /// Stage and task rows whose Request row is missing belong to an insert
    /// that did not complete and are dropped.
    pub fn open(fs: Arc<dyn FileSystem>, root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        let mut tables = Tables::default();

        for dir in [REQUESTS_DIR, STAGES_DIR, TASKS_DIR] {
            fs.create_dir_all(&root.join(dir))?;
        }

        for row in read_rows::<Request>(fs.as_ref(), &root.join(REQUESTS_DIR))? {
            tables.insert_request(row);
        }
        for row in read_rows::<Stage>(fs.as_ref(), &root.join(STAGES_DIR))? {
            tables.insert_stage(row);
        }
        for row in read_rows::<HostRoleCommand>(fs.as_ref(), &root.join(TASKS_DIR))? {
            tables.insert_task(row);
        }

        let dropped = tables.discard_orphans();
        if dropped > 0 {
            warn!(dropped, root = ?root, "discarded rows of incomplete request inserts");
        }

        info!(
            root = ?root,
            active_requests = tables.requests(true).len(),
            "opened file store"
        );

        Ok(Self {
            fs,
            root,
            tables: Mutex::new(tables),
            disk: Mutex::new(()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn lock(&self) -> Result<MutexGuard<'_, Tables>> {
        self.tables
            .lock()
            .map_err(|_| ShepherdError::Persistence("file store lock poisoned".to_string()))
    }

    fn row_path(&self, dir: &str, id: u64) -> PathBuf {
        self.root.join(dir).join(format!("{id}.json"))
    }

    fn write_row<T: Serialize>(&self, dir: &str, id: u64, row: &T) -> Result<()> {
        let json = serde_json::to_vec_pretty(row)?;
        let path = self.row_path(dir, id);
        self.fs
            .write_atomic(&path, &json)
            .map_err(|e| ShepherdError::Persistence(format!("{e:#}")))
    }

    fn disk_guard(&self) -> Result<MutexGuard<'_, ()>> {
        self.disk
            .lock()
            .map_err(|_| ShepherdError::Persistence("file store disk lock poisoned".to_string()))
    }

    /// Write the latest in-memory version of a task row. Writing the latest
    /// row (not the caller's copy) keeps disk monotonic when two committed
    /// updates race to the disk.
    fn persist_task(&self, id: TaskId) -> Result<()> {
        let _disk = self.disk_guard()?;
        let row = self.lock()?.task(id)?;
        self.write_row(TASKS_DIR, id.0, &row)
    }
}

fn read_rows<T: DeserializeOwned>(fs: &dyn FileSystem, dir: &Path) -> Result<Vec<T>> {
    let mut paths = fs.read_dir(dir)?;
    paths.sort();

    let mut rows = Vec::with_capacity(paths.len());
    for path in paths {
        if path.extension().and_then(|e| e.to_str()) != Some("json") {
            continue;
        }
        let contents = fs.read_to_string(&path)?;
        let row = serde_json::from_str(&contents).map_err(|e| {
            ShepherdError::Persistence(format!("corrupt row {:?}: {}", path, e))
        })?;
        rows.push(row);
    }
    Ok(rows)
}

impl Store for FileStore {
    fn insert_request(&self, plan: &RequestPlan) -> Result<RequestId> {
        let rows = self.lock()?.materialize(plan);
        let id = rows.request.id;

        {
            let _disk = self.disk_guard()?;
            for task in &rows.tasks {
                self.write_row(TASKS_DIR, task.id.0, task)?;
            }
            for stage in &rows.stages {
                self.write_row(STAGES_DIR, stage.id.0, stage)?;
            }
            // The request row is written last: it marks the insert complete.
            self.write_row(REQUESTS_DIR, id.0, &rows.request)?;
        }

        debug!(
            request_id = %id,
            stages = rows.stages.len(),
            tasks = rows.tasks.len(),
            "persisted request"
        );
        self.lock()?.insert_rows(rows);
        Ok(id)
    }

    fn request(&self, id: RequestId) -> Result<Request> {
        self.lock()?.request(id)
    }

    fn active_requests(&self) -> Result<Vec<Request>> {
        Ok(self.lock()?.requests(true))
    }

    fn list_requests(&self) -> Result<Vec<Request>> {
        Ok(self.lock()?.requests(false))
    }

    fn stages(&self, request: RequestId) -> Result<Vec<Stage>> {
        self.lock()?.stages(request)
    }

    fn stage(&self, id: StageId) -> Result<Stage> {
        self.lock()?.stage(id)
    }

    fn tasks_for_request(&self, request: RequestId) -> Result<Vec<HostRoleCommand>> {
        self.lock()?.tasks_for_request(request)
    }

    fn tasks_for_stage(&self, stage: StageId) -> Result<Vec<HostRoleCommand>> {
        self.lock()?.tasks_for_stage(stage)
    }

    fn task(&self, id: TaskId) -> Result<HostRoleCommand> {
        self.lock()?.task(id)
    }

    fn update_task(&self, task: &HostRoleCommand, expected: HostRoleStatus) -> Result<bool> {
        let Some(previous) = self.lock()?.compare_and_set_task(task, expected)? else {
            return Ok(false);
        };

        if let Err(e) = self.persist_task(task.id) {
            warn!(task_id = %task.id, error = %e, "task write failed; rolling back");
            self.lock()?.restore_task(task, previous);
            return Err(e);
        }
        Ok(true)
    }

    fn update_stage_status(&self, id: StageId, status: HostRoleStatus) -> Result<()> {
        let previous = self.lock()?.set_stage_status(id, status)?;
        if previous == status {
            return Ok(());
        }

        let _disk = self.disk_guard()?;
        let row = self.lock()?.stage(id)?;
        if let Err(e) = self.write_row(STAGES_DIR, id.0, &row) {
            self.lock()?.set_stage_status(id, previous)?;
            return Err(e);
        }
        Ok(())
    }

    fn update_request(&self, request: &Request) -> Result<()> {
        let previous = self.lock()?.replace_request(request)?;
        if &previous == request {
            return Ok(());
        }

        let _disk = self.disk_guard()?;
        if let Err(e) = self.write_row(REQUESTS_DIR, request.id.0, request) {
            self.lock()?.replace_request(&previous)?;
            return Err(e);
        }
        Ok(())
    }
}
