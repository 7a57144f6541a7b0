// src/lib.rs

pub mod agent;
pub mod cli;
pub mod config;
pub mod engine;
pub mod errors;
pub mod fs;
pub mod heartbeat;
pub mod logging;
pub mod model;
pub mod ordering;
pub mod planner;
pub mod publisher;
pub mod scheduler;
pub mod store;
pub mod topology;
pub mod types;
pub mod upgrade;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use chrono::Utc;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::agent::{ChannelTransport, CommandReport, spawn_local_agent};
use crate::cli::{CliArgs, Command, PlanArgs, RunArgs, StatusArgs, UpgradeArgs};
use crate::config::{ServerConfig, load_and_validate, validate_cluster_stacks};
use crate::engine::{ControlPlane, RequestView, Runtime, RuntimeOptions};
use crate::fs::RealFileSystem;
use crate::heartbeat::HeartbeatProcessor;
use crate::model::RequestId;
use crate::ordering::StackRegistry;
use crate::planner::{OperationsFile, RequestPlanner};
use crate::publisher::{EventSink, Topic, UpdatePublisher};
use crate::scheduler::ActionScheduler;
use crate::store::{FileStore, MemoryStore, Store, TaskWriter};
use crate::topology::{StaticTopology, TopologyProvider};
use crate::types::{Direction, StorageMode};
use crate::upgrade::{UpgradeCheckRegistry, UpgradeOrchestrator, UpgradePack};

/// Capacity of the channel local agents report on.
const REPORT_CHANNEL_CAPACITY: usize = 256;

/// High-level entry point used by `main.rs`.
///
/// This wires together:
/// - config and stack loading
/// - storage, topology and agent transport
/// - scheduler / heartbeat / publisher runtime
/// - Ctrl-C handling
pub async fn run(args: CliArgs) -> Result<()> {
    let config_path = PathBuf::from(&args.config);
    let cfg = load_and_validate(&config_path)
        .with_context(|| format!("loading {}", config_path.display()))?;

    match args.command {
        Command::Check => check(&cfg),
        Command::Plan(plan) => print_plan(&cfg, &plan),
        Command::PlanUpgrade(upgrade) => print_upgrade_plan(&cfg, &upgrade),
        Command::Status(status) => print_status(&cfg, &status),
        Command::Run(run) => serve(cfg, run).await,
    }
}

/// Load every stack definition and check the clusters against them.
pub fn load_registry(cfg: &ServerConfig) -> Result<Arc<StackRegistry>> {
    let registry = StackRegistry::new();
    let loaded = registry.load_dir(&RealFileSystem, &cfg.stacks.dir)?;
    info!(stacks = ?loaded, dir = %cfg.stacks.dir.display(), "loaded stack definitions");
    validate_cluster_stacks(cfg, &registry)?;
    Ok(Arc::new(registry))
}

pub fn build_topology(cfg: &ServerConfig) -> Result<Arc<StaticTopology>> {
    let topology = StaticTopology::new();
    for (name, cluster) in &cfg.clusters {
        topology.add_cluster(name.clone(), cluster.stack.clone(), cluster.hosts.clone())?;
    }
    Ok(Arc::new(topology))
}

pub fn open_store(cfg: &ServerConfig) -> Result<Arc<dyn Store>> {
    let store: Arc<dyn Store> = match cfg.storage.mode {
        StorageMode::Memory => Arc::new(MemoryStore::new()),
        StorageMode::File => Arc::new(FileStore::open(
            Arc::new(RealFileSystem),
            cfg.storage.path.clone(),
        )?),
    };
    Ok(store)
}

fn check(cfg: &ServerConfig) -> Result<()> {
    let registry = load_registry(cfg)?;

    println!("shepherd check");
    for id in registry.stack_ids() {
        let stack = registry.get(&id)?;
        println!(
            "stack {id}: {} services, {} ordering edges",
            stack.definition.services.len(),
            stack.order.edges().len()
        );
        for (before, after) in stack.order.edges() {
            println!("  {before} -> {after}");
        }
    }
    for (name, cluster) in &cfg.clusters {
        println!(
            "cluster {name}: stack {}, {} hosts",
            cluster.stack,
            cluster.hosts.len()
        );
    }
    Ok(())
}

fn read_operations(path: &Path) -> Result<OperationsFile> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;
    Ok(OperationsFile::from_toml_str(&contents)?)
}

fn read_pack(path: &Path) -> Result<UpgradePack> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;
    Ok(UpgradePack::from_toml_str(&contents)?)
}

fn operations_cluster(file: &OperationsFile, cli: Option<&String>, path: &Path) -> Result<String> {
    match cli.or(file.cluster.as_ref()) {
        Some(cluster) => Ok(cluster.clone()),
        None => bail!("{} names no cluster; pass --cluster", path.display()),
    }
}

fn direction(downgrade: bool) -> Direction {
    if downgrade {
        Direction::Downgrade
    } else {
        Direction::Upgrade
    }
}

fn print_plan(cfg: &ServerConfig, args: &PlanArgs) -> Result<()> {
    let registry = load_registry(cfg)?;
    let topology = build_topology(cfg)?;
    let file = read_operations(&args.operations)?;
    let cluster = operations_cluster(&file, args.cluster.as_ref(), &args.operations)?;
    let policy = args
        .failure_policy
        .or(file.failure_policy)
        .unwrap_or_default();

    let stack = registry.get(&topology.cluster_stack(&cluster)?)?;
    let plan = RequestPlanner::new(&stack, topology.as_ref(), &cfg.task_defaults).plan(
        &cluster,
        &file.operations,
        policy,
        file.context.as_deref(),
        Utc::now(),
    )?;
    println!("{}", serde_json::to_string_pretty(&plan)?);
    Ok(())
}

fn print_upgrade_plan(cfg: &ServerConfig, args: &UpgradeArgs) -> Result<()> {
    let registry = load_registry(cfg)?;
    let topology = build_topology(cfg)?;
    let pack = read_pack(&args.pack)?;
    let active = open_store(cfg)?.active_requests()?;
    let checks = UpgradeCheckRegistry::new();

    let plan = UpgradeOrchestrator::new(&registry, topology.as_ref(), &cfg.task_defaults)
        .with_checks(&checks, &active)
        .plan(&args.cluster, &pack, direction(args.downgrade), Utc::now())?;
    println!("{}", serde_json::to_string_pretty(&plan)?);
    Ok(())
}

fn print_status(cfg: &ServerConfig, args: &StatusArgs) -> Result<()> {
    if cfg.storage.mode != StorageMode::File {
        bail!("status reads stored Requests; set [storage] mode = \"file\"");
    }
    let store = open_store(cfg)?;

    match args.request {
        Some(id) => {
            let view = RequestView::load(store.as_ref(), RequestId(id))?;
            println!("{}", serde_json::to_string_pretty(&view)?);
        }
        None => {
            for request in store.list_requests()? {
                println!(
                    "{:>6}  {:<16}  {:<10}  {}",
                    request.id.0,
                    request.status.as_str(),
                    request.cluster,
                    request.context
                );
            }
        }
    }
    Ok(())
}

/// Submit the startup Requests, then drive everything until Ctrl-C (or
/// until idle with `--once`).
async fn serve(cfg: ServerConfig, args: RunArgs) -> Result<()> {
    let registry = load_registry(&cfg)?;
    let topology = build_topology(&cfg)?;
    let store = open_store(&cfg)?;

    // Status events → publisher → JSON lines on stdout.
    let (events, event_rx) = EventSink::channel();
    let publisher = Arc::new(UpdatePublisher::new());
    let mut stream = publisher.subscribe(Topic::All);
    tokio::spawn(Arc::clone(&publisher).run(event_rx));
    tokio::spawn(async move {
        while let Some(event) = stream.recv().await {
            match serde_json::to_string(&event) {
                Ok(line) => println!("{line}"),
                Err(e) => warn!(error = %e, "could not encode status event"),
            }
        }
    });

    // One local agent per configured host.
    let transport = Arc::new(ChannelTransport::new(cfg.agent_queue_capacity));
    let (report_tx, report_rx) = mpsc::channel::<CommandReport>(REPORT_CHANNEL_CAPACITY);
    for host in cfg.all_hosts() {
        let commands = transport.connect(&host)?;
        spawn_local_agent(host, commands, report_tx.clone());
    }
    drop(report_tx);

    let writer = TaskWriter::new(Arc::clone(&store), events.clone());
    let control = ControlPlane::new(
        writer.clone(),
        registry,
        topology.clone(),
        transport.clone(),
        cfg.task_defaults.clone(),
    );
    submit_startup_requests(&control, &args)?;

    let scheduler = Arc::new(ActionScheduler::new(
        store,
        transport,
        topology.clone(),
        events,
        cfg.scheduler.clone(),
    ));
    let heartbeat = HeartbeatProcessor::new(writer, topology);
    let runtime = Runtime::new(
        scheduler,
        heartbeat,
        report_rx,
        RuntimeOptions {
            exit_when_idle: args.once,
        },
    );

    runtime
        .run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "failed to listen for Ctrl+C");
                std::future::pending::<()>().await;
            }
        })
        .await?;
    Ok(())
}

/// The upgrade goes in first so its pre-upgrade checks see only Requests
/// left over from an earlier run.
fn submit_startup_requests(control: &ControlPlane, args: &RunArgs) -> Result<()> {
    if let (Some(path), Some(cluster)) = (&args.upgrade, &args.cluster) {
        let pack = read_pack(path)?;
        let created = control.create_upgrade(cluster, &pack, direction(args.downgrade))?;
        if !created.pruned.is_empty() {
            let pruned: Vec<String> = created.pruned.iter().map(|c| c.to_string()).collect();
            warn!(
                request_id = %created.request_id,
                pruned = ?pruned,
                "upgrade skips components the target stack does not ship"
            );
        }
    }

    for path in &args.submit {
        let file = read_operations(path)?;
        let cluster = operations_cluster(&file, args.cluster.as_ref(), path)?;
        let id = control.create_request(
            &cluster,
            &file.operations,
            file.failure_policy.unwrap_or_default(),
            file.context.as_deref(),
        )?;
        info!(request_id = %id, file = %path.display(), "submitted operations");
    }
    Ok(())
}
