pub mod builders;
pub mod store;
pub mod transport;

use std::sync::{Arc, Once};

use chrono::{DateTime, Duration, Utc};
use tokio::sync::mpsc;
use tracing_subscriber::{EnvFilter, fmt};

use shepherd::agent::{CommandReport, ReportStatus};
use shepherd::engine::ControlPlane;
use shepherd::heartbeat::{HeartbeatProcessor, ReportOutcome};
use shepherd::model::{HostRoleCommand, HostRoleStatus, Request, RequestId};
use shepherd::ordering::StackRegistry;
use shepherd::planner::TaskDefaults;
use shepherd::publisher::{EventSink, StatusEvent};
use shepherd::scheduler::{ActionScheduler, SchedulerConfig, TickReport};
use shepherd::store::{MemoryStore, Store, TaskWriter};
use shepherd::topology::StaticTopology;

pub use builders::*;
pub use store::{FlakyStore, InterleavingStore};
pub use transport::RecordingTransport;

static INIT: Once = Once::new();

/// Initialise tracing for tests.
///
/// - Uses `with_test_writer()`, so logs are captured per-test.
/// - The Rust test harness only prints captured output for **failing** tests
///   (unless you run with `-- --nocapture`).
///
/// Enable levels with e.g.:
/// `RUST_LOG=debug cargo test`
pub fn init_tracing() {
    INIT.call_once(|| {
        let filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

        fmt()
            .with_env_filter(filter)
            .with_test_writer() // print only for failing tests unless --nocapture
            .with_target(true)
            .init();
    });
}

/// Run a future with a 5-second timeout.
#[allow(dead_code)]
pub async fn with_timeout<F, T>(f: F) -> T
where
    F: std::future::Future<Output = T>,
{
    tokio::time::timeout(std::time::Duration::from_secs(5), f)
        .await
        .expect("Test timed out after 5 seconds")
}

pub fn secs(n: i64) -> Duration {
    Duration::seconds(n)
}

/// Registry with BIGTOP 3.2.0 and 3.3.0 installed.
pub fn default_registry() -> Arc<StackRegistry> {
    let registry = StackRegistry::new();
    registry.install(bigtop_v1()).expect("bigtop 3.2.0");
    registry.install(bigtop_v2()).expect("bigtop 3.3.0");
    Arc::new(registry)
}

/// Scheduler, heartbeat processor and control plane over one store, with a
/// recording transport instead of agents. Time is driven by the test.
pub struct Harness {
    pub store: Arc<dyn Store>,
    pub registry: Arc<StackRegistry>,
    pub topology: Arc<StaticTopology>,
    pub transport: Arc<RecordingTransport>,
    pub scheduler: ActionScheduler,
    pub heartbeat: HeartbeatProcessor,
    pub control: ControlPlane,
    events: mpsc::UnboundedReceiver<StatusEvent>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_store(Arc::new(MemoryStore::new()))
    }

    pub fn with_store(store: Arc<dyn Store>) -> Self {
        Self::build(store, SchedulerConfig::default(), TaskDefaults::default())
    }

    pub fn build(store: Arc<dyn Store>, config: SchedulerConfig, defaults: TaskDefaults) -> Self {
        init_tracing();

        let registry = default_registry();
        let topology = Arc::new(default_topology());
        let transport = Arc::new(RecordingTransport::new());
        let (events, rx) = EventSink::channel();
        let writer = TaskWriter::new(Arc::clone(&store), events.clone());

        let scheduler = ActionScheduler::new(
            Arc::clone(&store),
            transport.clone(),
            topology.clone(),
            events,
            config,
        );
        let heartbeat = HeartbeatProcessor::new(writer.clone(), topology.clone());
        let control = ControlPlane::new(
            writer,
            Arc::clone(&registry),
            topology.clone(),
            transport.clone(),
            defaults,
        );

        Self {
            store,
            registry,
            topology,
            transport,
            scheduler,
            heartbeat,
            control,
            events: rx,
        }
    }

    pub fn tick(&self, now: DateTime<Utc>) -> TickReport {
        self.scheduler.tick(now).expect("tick failed")
    }

    pub fn request(&self, id: RequestId) -> Request {
        self.store.request(id).expect("request")
    }

    pub fn tasks(&self, id: RequestId) -> Vec<HostRoleCommand> {
        self.store.tasks_for_request(id).expect("tasks")
    }

    pub fn tasks_with_role(&self, id: RequestId, role: &str) -> Vec<HostRoleCommand> {
        self.tasks(id).into_iter().filter(|t| t.role == role).collect()
    }

    pub fn in_progress(&self, id: RequestId) -> Vec<HostRoleCommand> {
        self.tasks(id)
            .into_iter()
            .filter(|t| t.status == HostRoleStatus::InProgress)
            .collect()
    }

    pub fn report(
        &self,
        task: &HostRoleCommand,
        status: ReportStatus,
        now: DateTime<Utc>,
    ) -> ReportOutcome {
        let report = CommandReport::new(task.id, task.attempt_count, status);
        self.heartbeat
            .apply_report(&report, now)
            .expect("apply report")
    }

    /// Report COMPLETED for every task currently IN_PROGRESS in `id`.
    pub fn complete_running(&self, id: RequestId, now: DateTime<Utc>) -> usize {
        let running = self.in_progress(id);
        for task in &running {
            self.report(task, ReportStatus::Completed, now);
        }
        running.len()
    }

    /// Tick and complete everything dispatched until the Request finishes.
    pub fn drive(&self, id: RequestId, start: DateTime<Utc>) -> Request {
        let mut now = start;
        for _ in 0..100 {
            self.tick(now);
            let request = self.request(id);
            if request.is_terminal() {
                return request;
            }
            now += secs(1);
            self.complete_running(id, now);
        }
        panic!("request {id} did not finish in 100 ticks");
    }

    /// Every status event emitted since the last call.
    pub fn drain_events(&mut self) -> Vec<StatusEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            events.push(event);
        }
        events
    }
}

impl Default for Harness {
    fn default() -> Self {
        Self::new()
    }
}
