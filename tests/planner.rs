// tests/planner.rs

use chrono::Utc;

use shepherd::errors::ShepherdError;
use shepherd::model::{RoleCommand, RoleCommandKey};
use shepherd::planner::{OperationsFile, RequestPlanner, TaskDefaults};
use shepherd::types::FailurePolicy;
use shepherd_test_utils::{CLUSTER, Harness, default_registry, default_topology, op};

type TestResult = Result<(), Box<dyn std::error::Error>>;

#[test]
fn start_hdfs_plans_namenode_before_datanodes() -> TestResult {
    let registry = default_registry();
    let topology = default_topology();
    let stack = registry.get("BIGTOP-3.2.0")?;
    let defaults = TaskDefaults::default();

    let plan = RequestPlanner::new(&stack, &topology, &defaults).plan(
        CLUSTER,
        &[
            op("HDFS", "DATANODE", RoleCommand::Start),
            op("HDFS", "NAMENODE", RoleCommand::Start),
        ],
        FailurePolicy::Abort,
        None,
        Utc::now(),
    )?;

    assert_eq!(plan.stages.len(), 2);
    assert_eq!(plan.stages[0].name, "NAMENODE START");
    let first_hosts: Vec<_> = plan.stages[0].tasks.iter().map(|t| t.host.as_str()).collect();
    assert_eq!(first_hosts, vec!["h1"]);

    let second_hosts: Vec<_> = plan.stages[1].tasks.iter().map(|t| t.host.as_str()).collect();
    assert_eq!(second_hosts, vec!["h2", "h3"]);
    assert!(plan.stages[1].tasks.iter().all(|t| t.role == "DATANODE"));

    let dn = RoleCommandKey::new("HDFS", "DATANODE", RoleCommand::Start);
    assert_eq!(plan.stage_of(&dn), Some(1));
    assert_eq!(plan.task_count(), 3);
    assert_eq!(plan.context, "START DATANODE, START NAMENODE");
    Ok(())
}

#[test]
fn task_defaults_apply() -> TestResult {
    let registry = default_registry();
    let topology = default_topology();
    let stack = registry.get("BIGTOP-3.2.0")?;
    let defaults = TaskDefaults::default();

    let mut check = op("HDFS", "NAMENODE", RoleCommand::CustomCommand);
    check.timeout = Some("90s".to_string());
    let plan = RequestPlanner::new(&stack, &topology, &defaults).plan(
        CLUSTER,
        &[check, op("HDFS", "NAMENODE", RoleCommand::Start)],
        FailurePolicy::Abort,
        Some("Restart NameNode"),
        Utc::now(),
    )?;
    assert_eq!(plan.context, "Restart NameNode");

    let tasks: Vec<_> = plan.stages.iter().flat_map(|s| s.tasks.iter()).collect();
    let custom = tasks
        .iter()
        .find(|t| t.command == RoleCommand::CustomCommand)
        .unwrap();
    assert_eq!(custom.timeout_secs, 90);
    assert!(!custom.retry_enabled);

    let start = tasks.iter().find(|t| t.command == RoleCommand::Start).unwrap();
    assert_eq!(start.timeout_secs, 600);
    assert_eq!(start.max_attempts, 2);
    assert!(start.retry_enabled);
    Ok(())
}

#[test]
fn duplicate_operations_collapse_into_one_task() -> TestResult {
    let registry = default_registry();
    let topology = default_topology();
    let stack = registry.get("BIGTOP-3.2.0")?;
    let defaults = TaskDefaults::default();

    let mut first = op("HDFS", "DATANODE", RoleCommand::Stop);
    first.hosts = vec!["h2".to_string()];
    let second = op("HDFS", "DATANODE", RoleCommand::Stop);

    let plan = RequestPlanner::new(&stack, &topology, &defaults).plan(
        CLUSTER,
        &[first, second],
        FailurePolicy::Abort,
        None,
        Utc::now(),
    )?;
    assert_eq!(plan.stages.len(), 1);
    assert_eq!(plan.task_count(), 2);
    Ok(())
}

#[test]
fn explicit_hosts_must_run_the_component_unless_installing() -> TestResult {
    let registry = default_registry();
    let topology = default_topology();
    let stack = registry.get("BIGTOP-3.2.0")?;
    let defaults = TaskDefaults::default();
    let planner = RequestPlanner::new(&stack, &topology, &defaults);

    let mut start = op("HDFS", "DATANODE", RoleCommand::Start);
    start.hosts = vec!["h1".to_string()];
    let err = planner
        .plan(CLUSTER, &[start], FailurePolicy::Abort, None, Utc::now())
        .unwrap_err();
    assert!(matches!(err, ShepherdError::Planning(_)), "{err}");

    let mut install = op("HDFS", "DATANODE", RoleCommand::Install);
    install.hosts = vec!["h1".to_string()];
    let plan = planner.plan(CLUSTER, &[install], FailurePolicy::Abort, None, Utc::now())?;
    assert_eq!(plan.stages[0].tasks[0].host, "h1");
    Ok(())
}

#[test]
fn unsupported_component_fails_before_anything_is_stored() {
    let harness = Harness::new();

    let err = harness
        .control
        .create_request(
            CLUSTER,
            &[op("HBASE", "HBASE_MASTER", RoleCommand::Start)],
            FailurePolicy::Abort,
            None,
        )
        .unwrap_err();
    assert!(err.is_planning_error(), "{err}");

    let err = harness
        .control
        .create_request(
            "nope",
            &[op("HDFS", "NAMENODE", RoleCommand::Start)],
            FailurePolicy::Abort,
            None,
        )
        .unwrap_err();
    assert!(err.is_planning_error(), "{err}");

    assert!(harness.control.list_requests().unwrap().is_empty());
}

#[test]
fn empty_request_is_rejected() {
    let harness = Harness::new();
    let err = harness
        .control
        .create_request(CLUSTER, &[], FailurePolicy::Abort, None)
        .unwrap_err();
    assert!(matches!(err, ShepherdError::Planning(_)));
}

#[test]
fn operations_file_parses() -> TestResult {
    let file = OperationsFile::from_toml_str(
        r#"
cluster = "c1"
context = "Start HDFS"
failure_policy = "CONTINUE"

[[operation]]
service = "HDFS"
component = "NAMENODE"
command = "START"

[[operation]]
service = "HDFS"
component = "DATANODE"
command = "START"
hosts = ["h2"]
timeout = "2m"

[operation.params]
script = "true"
"#,
    )?;

    assert_eq!(file.cluster.as_deref(), Some("c1"));
    assert_eq!(file.failure_policy, Some(FailurePolicy::Continue));
    assert_eq!(file.operations.len(), 2);
    assert_eq!(file.operations[1].hosts, vec!["h2".to_string()]);
    assert_eq!(file.operations[1].params["script"], "true");

    let harness = Harness::new();
    let id = harness.control.create_request(
        CLUSTER,
        &file.operations,
        FailurePolicy::Continue,
        file.context.as_deref(),
    )?;
    let request = harness.request(id);
    assert_eq!(request.context, "Start HDFS");
    assert_eq!(harness.tasks(id).len(), 2);
    Ok(())
}
