// tests/ordering.rs

use std::collections::BTreeSet;
use std::path::Path;

use shepherd::errors::ShepherdError;
use shepherd::fs::mock::MockFileSystem;
use shepherd::model::{RoleCommand, RoleCommandKey};
use shepherd::ordering::{RoleCommandOrder, StackRegistry};
use shepherd_test_utils::{StackBuilder, bigtop_v1, init_tracing};

fn key(service: &str, role: &str, command: RoleCommand) -> RoleCommandKey {
    RoleCommandKey::new(service, role, command)
}

#[test]
fn datanode_start_waits_for_namenode_start() {
    init_tracing();
    let order = RoleCommandOrder::build(&bigtop_v1()).unwrap();

    let nn = key("HDFS", "NAMENODE", RoleCommand::Start);
    let dn = key("HDFS", "DATANODE", RoleCommand::Start);
    let keys: BTreeSet<_> = [dn.clone(), nn.clone()].into_iter().collect();

    let layers = order.stage_layers(&keys);
    assert_eq!(layers, vec![vec![nn.clone()], vec![dn.clone()]]);
    assert!(order.blocks(&nn, &dn));
    assert!(!order.blocks(&dn, &nn));
}

#[test]
fn unrelated_keys_share_a_layer() {
    let order = RoleCommandOrder::build(&bigtop_v1()).unwrap();

    let zk = key("ZOOKEEPER", "ZOOKEEPER_SERVER", RoleCommand::Start);
    let nn = key("HDFS", "NAMENODE", RoleCommand::Start);
    let dn = key("HDFS", "DATANODE", RoleCommand::Start);
    let rm = key("YARN", "RESOURCEMANAGER", RoleCommand::Start);
    let client = key("HDFS", "HDFS_CLIENT", RoleCommand::Install);
    let keys: BTreeSet<_> = [zk.clone(), nn.clone(), dn.clone(), rm.clone(), client.clone()]
        .into_iter()
        .collect();

    let layers = order.stage_layers(&keys);
    assert_eq!(layers.len(), 3);
    assert!(layers[0].contains(&zk) && layers[0].contains(&client));
    assert_eq!(layers[1], vec![nn]);
    assert!(layers[2].contains(&dn) && layers[2].contains(&rm));
}

#[test]
fn only_direct_edges_between_present_keys_count() {
    // ZOOKEEPER_SERVER-START -> NAMENODE-START -> DATANODE-START, but
    // NAMENODE-START is not part of the request.
    let order = RoleCommandOrder::build(&bigtop_v1()).unwrap();
    let zk = key("ZOOKEEPER", "ZOOKEEPER_SERVER", RoleCommand::Start);
    let dn = key("HDFS", "DATANODE", RoleCommand::Start);
    let keys: BTreeSet<_> = [zk, dn].into_iter().collect();

    assert_eq!(order.stage_layers(&keys).len(), 1);
}

#[test]
fn cycle_is_rejected_and_previous_stack_kept() {
    init_tracing();
    let registry = StackRegistry::new();
    registry.install(bigtop_v1()).unwrap();

    let cyclic = StackBuilder::new("BIGTOP", "3.2.0")
        .service("HDFS", &["NAMENODE"], &["DATANODE"], &[])
        .order("DATANODE-START", &["NAMENODE-START"])
        .order("NAMENODE-START", &["DATANODE-START"])
        .build();

    let err = registry.install(cyclic).unwrap_err();
    assert!(matches!(err, ShepherdError::OrderingCycle { .. }), "{err}");
    assert!(err.is_planning_error());

    // The earlier compiled order is still served.
    let stack = registry.get("BIGTOP-3.2.0").unwrap();
    assert!(stack.definition.supports("YARN", "NODEMANAGER"));
}

#[test]
fn self_dependency_is_a_cycle() {
    let def = StackBuilder::new("S", "1")
        .service("HDFS", &["NAMENODE"], &[], &[])
        .order("NAMENODE-START", &["NAMENODE-START"])
        .build();
    assert!(matches!(
        RoleCommandOrder::build(&def),
        Err(ShepherdError::OrderingCycle { .. })
    ));
}

#[test]
fn unknown_role_in_order_is_a_config_error() {
    let def = StackBuilder::new("S", "1")
        .service("HDFS", &["NAMENODE"], &[], &[])
        .order("NAMENODE-START", &["JOURNALNODE-START"])
        .build();
    assert!(matches!(
        RoleCommandOrder::build(&def),
        Err(ShepherdError::ConfigError(_))
    ));
}

#[test]
fn stable_order_keeps_unrelated_items_in_place() {
    let order = RoleCommandOrder::build(&bigtop_v1()).unwrap();
    let keys = vec![
        key("HDFS", "DATANODE", RoleCommand::Restart),
        key("YARN", "NODEMANAGER", RoleCommand::Restart),
        key("HDFS", "NAMENODE", RoleCommand::Restart),
    ];
    // DATANODE-RESTART waits for NAMENODE-RESTART; NODEMANAGER is free.
    assert_eq!(order.stable_order(&keys), vec![1, 2, 0]);
}

#[test]
fn registry_loads_stack_directory() {
    let fs = MockFileSystem::new();
    fs.add_file(
        "stacks/bigtop-3.2.0.toml",
        r#"
name = "BIGTOP"
version = "3.2.0"

[services.HDFS]
masters = ["NAMENODE"]
slaves = ["DATANODE"]

[role_command_order]
"DATANODE-START" = ["HDFS/NAMENODE-START"]
"#,
    );
    fs.add_file("stacks/README.md", "not a stack");

    let registry = StackRegistry::new();
    let loaded = registry.load_dir(&fs, Path::new("stacks")).unwrap();
    assert_eq!(loaded, vec!["BIGTOP-3.2.0".to_string()]);

    let stack = registry.get("BIGTOP-3.2.0").unwrap();
    assert_eq!(stack.order.edges().len(), 1);
    assert!(matches!(
        registry.get("BIGTOP-9.9.9"),
        Err(ShepherdError::UnknownStack(_))
    ));
}
