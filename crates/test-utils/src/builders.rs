#![allow(dead_code)]

use std::collections::BTreeMap;

use shepherd::ordering::{ServiceDefinition, StackDefinition};
use shepherd::planner::Operation;
use shepherd::model::RoleCommand;
use shepherd::topology::{ComponentRef, StaticTopology};
use shepherd::upgrade::UpgradePack;

pub const CLUSTER: &str = "c1";
pub const STACK_V1: &str = "BIGTOP-3.2.0";
pub const STACK_V2: &str = "BIGTOP-3.3.0";

/// Builder for `StackDefinition` to simplify test setup.
pub struct StackBuilder {
    def: StackDefinition,
}

impl StackBuilder {
    pub fn new(name: &str, version: &str) -> Self {
        Self {
            def: StackDefinition {
                name: name.to_string(),
                version: version.to_string(),
                services: BTreeMap::new(),
                role_command_order: BTreeMap::new(),
            },
        }
    }

    pub fn service(mut self, name: &str, masters: &[&str], slaves: &[&str], clients: &[&str]) -> Self {
        let strings = |xs: &[&str]| xs.iter().map(|s| s.to_string()).collect::<Vec<_>>();
        self.def.services.insert(
            name.to_string(),
            ServiceDefinition {
                masters: strings(masters),
                slaves: strings(slaves),
                clients: strings(clients),
                family: None,
            },
        );
        self
    }

    pub fn family(mut self, service: &str, family: &str) -> Self {
        if let Some(svc) = self.def.services.get_mut(service) {
            svc.family = Some(family.to_string());
        }
        self
    }

    /// `blocked` waits for every entry of `blockers`.
    pub fn order(mut self, blocked: &str, blockers: &[&str]) -> Self {
        self.def
            .role_command_order
            .entry(blocked.to_string())
            .or_default()
            .extend(blockers.iter().map(|s| s.to_string()));
        self
    }

    pub fn build(self) -> StackDefinition {
        self.def
    }
}

fn bigtop(version: &str, with_secondary: bool) -> StackBuilder {
    let hdfs_masters: &[&str] = if with_secondary {
        &["NAMENODE", "SECONDARY_NAMENODE"]
    } else {
        &["NAMENODE"]
    };
    StackBuilder::new("BIGTOP", version)
        .service("ZOOKEEPER", &["ZOOKEEPER_SERVER"], &[], &["ZOOKEEPER_CLIENT"])
        .service("HDFS", hdfs_masters, &["DATANODE"], &["HDFS_CLIENT"])
        .service("YARN", &["RESOURCEMANAGER"], &["NODEMANAGER"], &[])
        .order("NAMENODE-START", &["ZOOKEEPER_SERVER-START"])
        .order("DATANODE-START", &["NAMENODE-START"])
        .order("RESOURCEMANAGER-START", &["NAMENODE-START"])
        .order("NODEMANAGER-START", &["RESOURCEMANAGER-START"])
        .order("NAMENODE-STOP", &["DATANODE-STOP"])
        .order("ZOOKEEPER_SERVER-STOP", &["NAMENODE-STOP"])
        .order("NAMENODE-RESTART", &["ZOOKEEPER_SERVER-RESTART"])
        .order("DATANODE-RESTART", &["NAMENODE-RESTART"])
}

/// BIGTOP 3.2.0: ZooKeeper, HDFS (with a secondary NameNode) and YARN.
pub fn bigtop_v1() -> StackDefinition {
    bigtop("3.2.0", true)
        .order("SECONDARY_NAMENODE-START", &["NAMENODE-START"])
        .build()
}

/// BIGTOP 3.3.0: same services, no secondary NameNode.
pub fn bigtop_v2() -> StackDefinition {
    bigtop("3.3.0", false).build()
}

/// Builder for `StaticTopology`.
pub struct TopologyBuilder {
    clusters: Vec<(String, String, BTreeMap<String, Vec<ComponentRef>>)>,
}

impl TopologyBuilder {
    pub fn new() -> Self {
        Self {
            clusters: Vec::new(),
        }
    }

    pub fn cluster(mut self, name: &str, stack: &str) -> Self {
        self.clusters
            .push((name.to_string(), stack.to_string(), BTreeMap::new()));
        self
    }

    /// Add a host to the last cluster; components are `SERVICE/COMPONENT`.
    pub fn host(mut self, host: &str, components: &[&str]) -> Self {
        let (_, _, hosts) = self
            .clusters
            .last_mut()
            .expect("call cluster() before host()");
        hosts.insert(
            host.to_string(),
            components
                .iter()
                .map(|c| c.parse().expect("invalid component ref"))
                .collect(),
        );
        self
    }

    pub fn build(self) -> StaticTopology {
        let topology = StaticTopology::new();
        for (name, stack, hosts) in self.clusters {
            topology
                .add_cluster(name, stack, hosts)
                .expect("failed to register cluster");
        }
        topology
    }
}

impl Default for TopologyBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Cluster `c1` on BIGTOP 3.2.0:
///
/// - `h1`: ZOOKEEPER_SERVER, NAMENODE, SECONDARY_NAMENODE
/// - `h2`: DATANODE, NODEMANAGER
/// - `h3`: DATANODE, RESOURCEMANAGER
pub fn default_topology() -> StaticTopology {
    TopologyBuilder::new()
        .cluster(CLUSTER, STACK_V1)
        .host(
            "h1",
            &[
                "ZOOKEEPER/ZOOKEEPER_SERVER",
                "HDFS/NAMENODE",
                "HDFS/SECONDARY_NAMENODE",
            ],
        )
        .host("h2", &["HDFS/DATANODE", "YARN/NODEMANAGER"])
        .host("h3", &["HDFS/DATANODE", "YARN/RESOURCEMANAGER"])
        .build()
}

pub fn op(service: &str, component: &str, command: RoleCommand) -> Operation {
    Operation::new(service, component, command)
}

/// Operation with a shell script for the local agent.
pub fn scripted_op(service: &str, component: &str, command: RoleCommand, script: &str) -> Operation {
    let mut operation = Operation::new(service, component, command);
    operation
        .params
        .insert("script".to_string(), script.to_string());
    operation
}

/// Rolling upgrade 3.2.0 → 3.3.0.
///
/// Group `ZOOKEEPER` restarts the ZooKeeper server. Group `HDFS` restarts
/// NAMENODE (holds on failure), SECONDARY_NAMENODE (not in 3.3.0, pruned)
/// and DATANODE (manual pause point).
pub const ROLLING_UPGRADE_PACK: &str = r#"
name = "bigtop-3.2-to-3.3"
source_stack = "BIGTOP-3.2.0"
target_stack = "BIGTOP-3.3.0"

[[group]]
name = "ZOOKEEPER"
title = "Restart ZooKeeper"

[[group.item]]
service = "ZOOKEEPER"
component = "ZOOKEEPER_SERVER"

[[group]]
name = "HDFS"
title = "Restart HDFS"

[[group.item]]
service = "HDFS"
component = "DATANODE"
manual = true
message = "Verify DataNodes have rejoined"

[[group.item]]
service = "HDFS"
component = "SECONDARY_NAMENODE"

[[group.item]]
service = "HDFS"
component = "NAMENODE"
skip_on_failure = true
"#;

pub fn rolling_upgrade_pack() -> UpgradePack {
    UpgradePack::from_toml_str(ROLLING_UPGRADE_PACK).expect("invalid upgrade pack fixture")
}
