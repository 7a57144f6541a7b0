// tests/config.rs

use std::fs;
use std::io::Write;
use std::path::Path;
use std::time::Duration;

use tempfile::{NamedTempFile, TempDir};

use shepherd::config::{load_and_validate, validate_cluster_stacks};
use shepherd::errors::ShepherdError;
use shepherd::model::RoleCommand;
use shepherd::topology::ComponentRef;
use shepherd::types::StorageMode;
use shepherd_test_utils::default_registry;

fn config_file(contents: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    write!(file, "{contents}").unwrap();
    file
}

fn expect_config_error(contents: &str, needle: &str) {
    let file = config_file(contents);
    match load_and_validate(file.path()) {
        Err(ShepherdError::ConfigError(msg)) => {
            assert!(msg.contains(needle), "'{msg}' does not mention '{needle}'");
        }
        Err(e) => panic!("Expected ConfigError, got: {:?}", e),
        Ok(_) => panic!("Expected error, got Ok"),
    }
}

#[test]
fn empty_file_uses_defaults() {
    let file = config_file("");
    let cfg = load_and_validate(file.path()).unwrap();

    assert_eq!(cfg.scheduler.tick_interval, Duration::from_secs(1));
    assert_eq!(cfg.scheduler.max_tasks_per_host, 1);
    assert_eq!(cfg.task_defaults.timeout, Duration::from_secs(600));
    assert_eq!(cfg.task_defaults.max_attempts, 2);
    assert!(cfg.task_defaults.retry_commands.contains(&RoleCommand::Start));
    assert!(!cfg.task_defaults.retry_commands.contains(&RoleCommand::CustomCommand));
    assert_eq!(cfg.agent_queue_capacity, 64);
    assert_eq!(cfg.storage.mode, StorageMode::Memory);
    assert!(cfg.clusters.is_empty());
}

#[test]
fn full_config_is_parsed() {
    let file = config_file(
        r#"
[scheduler]
tick_interval = "250ms"
max_tasks_per_host = 3
default_task_timeout = "5m"
max_task_attempts = 4
retry_role_commands = ["START", "STOP"]

[storage]
mode = "file"
path = "/var/lib/shepherd"

[cluster.c1]
stack = "BIGTOP-3.2.0"

[cluster.c1.hosts]
"nn1" = ["HDFS/NAMENODE", "ZOOKEEPER/ZOOKEEPER_SERVER"]
"dn1" = ["HDFS/DATANODE"]

[cluster.c2]
stack = "BIGTOP-3.3.0"

[cluster.c2.hosts]
"dn1" = ["HDFS/DATANODE"]
"#,
    );
    let cfg = load_and_validate(file.path()).unwrap();

    assert_eq!(cfg.scheduler.tick_interval, Duration::from_millis(250));
    assert_eq!(cfg.scheduler.max_tasks_per_host, 3);
    assert_eq!(cfg.task_defaults.timeout, Duration::from_secs(300));
    assert_eq!(cfg.task_defaults.max_attempts, 4);
    assert_eq!(cfg.task_defaults.retry_commands.len(), 2);
    assert_eq!(cfg.storage.mode, StorageMode::File);
    assert_eq!(cfg.storage.path, Path::new("/var/lib/shepherd"));

    let c1 = &cfg.clusters["c1"];
    assert_eq!(c1.stack, "BIGTOP-3.2.0");
    assert_eq!(
        c1.hosts["nn1"],
        vec![
            ComponentRef::new("HDFS", "NAMENODE"),
            ComponentRef::new("ZOOKEEPER", "ZOOKEEPER_SERVER"),
        ]
    );
    assert_eq!(cfg.all_hosts(), vec!["dn1".to_string(), "nn1".to_string()]);

    validate_cluster_stacks(&cfg, &default_registry()).unwrap();
}

#[test]
fn relative_paths_follow_the_config_file() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("Shepherd.toml");
    fs::write(
        &path,
        r#"
[storage]
mode = "file"
path = "state"

[stacks]
dir = "../stacks"
"#,
    )
    .unwrap();

    let cfg = load_and_validate(&path).unwrap();
    assert_eq!(cfg.storage.path, dir.path().join("state"));
    assert_eq!(cfg.stacks.dir, dir.path().join("../stacks"));
}

#[test]
fn invalid_scheduler_values_are_config_errors() {
    expect_config_error(
        "[scheduler]\nmax_tasks_per_host = 0\n",
        "max_tasks_per_host",
    );
    expect_config_error(
        "[scheduler]\nmax_task_attempts = 0\n",
        "max_task_attempts",
    );
    expect_config_error(
        "[scheduler]\ntick_interval = \"0s\"\n",
        "tick_interval",
    );
    expect_config_error(
        "[scheduler]\ndefault_task_timeout = \"500ms\"\n",
        "default_task_timeout",
    );
    expect_config_error(
        "[scheduler]\ndefault_task_timeout = \"ten minutes\"\n",
        "default_task_timeout",
    );
    expect_config_error(
        "[scheduler]\nagent_queue_capacity = 0\n",
        "agent_queue_capacity",
    );
}

#[test]
fn invalid_clusters_are_config_errors() {
    expect_config_error(
        "[cluster.c1]\nstack = \"BIGTOP\"\n[cluster.c1.hosts]\nh1 = [\"HDFS/NAMENODE\"]\n",
        "NAME-VERSION",
    );
    expect_config_error("[cluster.c1]\nstack = \"BIGTOP-3.2.0\"\n", "no hosts");
    expect_config_error(
        "[cluster.c1]\nstack = \"BIGTOP-3.2.0\"\n[cluster.c1.hosts]\nh1 = [\"NAMENODE\"]\n",
        "h1",
    );
}

#[test]
fn malformed_toml_is_a_toml_error() {
    let file = config_file("[scheduler\nmax_tasks_per_host = 1\n");
    match load_and_validate(file.path()) {
        Err(ShepherdError::TomlError(_)) => {}
        other => panic!("Expected TomlError, got: {:?}", other.map(|_| ())),
    }
}

#[test]
fn clusters_must_match_loaded_stacks() {
    let registry = default_registry();

    let file = config_file(
        "[cluster.c1]\nstack = \"BIGTOP-9.0.0\"\n[cluster.c1.hosts]\nh1 = [\"HDFS/NAMENODE\"]\n",
    );
    let cfg = load_and_validate(file.path()).unwrap();
    match validate_cluster_stacks(&cfg, &registry) {
        Err(ShepherdError::ConfigError(msg)) => assert!(msg.contains("unknown stack")),
        other => panic!("Expected ConfigError, got: {:?}", other),
    }

    // SECONDARY_NAMENODE is gone in 3.3.0.
    let file = config_file(
        "[cluster.c1]\nstack = \"BIGTOP-3.3.0\"\n[cluster.c1.hosts]\nh1 = [\"HDFS/SECONDARY_NAMENODE\"]\n",
    );
    let cfg = load_and_validate(file.path()).unwrap();
    match validate_cluster_stacks(&cfg, &registry) {
        Err(ShepherdError::ConfigError(msg)) => assert!(msg.contains("SECONDARY_NAMENODE")),
        other => panic!("Expected ConfigError, got: {:?}", other),
    }
}
