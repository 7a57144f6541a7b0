// src/topology/mod.rs

//! Topology/state provider: which hosts run which components, which stack a
//! cluster runs, and the last known state of every host component.

pub mod service_state;

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt::{self, Debug};
use std::str::FromStr;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::errors::{Result, ShepherdError};

pub use service_state::{
    ComponentCategory, ComponentTopology, ServiceStateCalculator, ServiceTopology,
    StateCalculators,
};

/// `SERVICE/COMPONENT` reference, as used in the cluster host map.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ComponentRef {
    pub service: String,
    pub component: String,
}

impl ComponentRef {
    pub fn new(service: impl Into<String>, component: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            component: component.into(),
        }
    }
}

impl fmt::Display for ComponentRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.service, self.component)
    }
}

impl FromStr for ComponentRef {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().split_once('/') {
            Some((service, component)) if !service.is_empty() && !component.is_empty() => {
                Ok(ComponentRef::new(service, component))
            }
            _ => Err(format!(
                "invalid component reference '{s}' (expected SERVICE/COMPONENT)"
            )),
        }
    }
}

/// Last known state of a component on one host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ComponentState {
    /// Nothing reported yet.
    Unknown,
    /// Installed and not running.
    Installed,
    Started,
}

impl fmt::Display for ComponentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ComponentState::Unknown => f.write_str("UNKNOWN"),
            ComponentState::Installed => f.write_str("INSTALLED"),
            ComponentState::Started => f.write_str("STARTED"),
        }
    }
}

/// Supplier of cluster topology and recorded component state.
pub trait TopologyProvider: Send + Sync + Debug {
    /// Stack id (`NAME-VERSION`) the cluster currently runs.
    fn cluster_stack(&self, cluster: &str) -> Result<String>;

    /// Hosts on which `service/component` is installed, sorted.
    fn hosts_for_component(&self, cluster: &str, component: &ComponentRef) -> Result<Vec<String>>;

    /// Every component installed somewhere in the cluster.
    fn installed_components(&self, cluster: &str) -> Result<BTreeSet<ComponentRef>>;

    fn record_component_state(
        &self,
        cluster: &str,
        host: &str,
        component: &ComponentRef,
        state: ComponentState,
    ) -> Result<()>;

    /// Per-host states of every component of `service`.
    fn component_states(
        &self,
        cluster: &str,
        service: &str,
    ) -> Result<BTreeMap<ComponentRef, BTreeMap<String, ComponentState>>>;

    /// Record the stack a cluster runs after an upgrade or downgrade
    /// finished.
    fn set_cluster_stack(&self, cluster: &str, stack: &str) -> Result<()>;
}

#[derive(Debug, Clone, Default)]
struct ClusterTopology {
    stack: String,
    hosts: BTreeMap<String, BTreeSet<ComponentRef>>,
    states: BTreeMap<(String, ComponentRef), ComponentState>,
}

/// Topology declared in the server configuration. Only component states and
/// the current stack change at runtime.
#[derive(Debug, Default)]
pub struct StaticTopology {
    clusters: RwLock<HashMap<String, ClusterTopology>>,
}

impl StaticTopology {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_cluster(
        &self,
        name: impl Into<String>,
        stack: impl Into<String>,
        hosts: BTreeMap<String, Vec<ComponentRef>>,
    ) -> Result<()> {
        let name = name.into();
        let cluster = ClusterTopology {
            stack: stack.into(),
            hosts: hosts
                .into_iter()
                .map(|(host, comps)| (host, comps.into_iter().collect()))
                .collect(),
            states: BTreeMap::new(),
        };
        info!(
            cluster = %name,
            stack = %cluster.stack,
            hosts = cluster.hosts.len(),
            "registered cluster topology"
        );
        self.write()?.insert(name, cluster);
        Ok(())
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, HashMap<String, ClusterTopology>>> {
        self.clusters
            .read()
            .map_err(|_| ShepherdError::Persistence("topology lock poisoned".to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, HashMap<String, ClusterTopology>>> {
        self.clusters
            .write()
            .map_err(|_| ShepherdError::Persistence("topology lock poisoned".to_string()))
    }
}

fn unknown_cluster(cluster: &str) -> ShepherdError {
    ShepherdError::Planning(format!("unknown cluster '{cluster}'"))
}

impl TopologyProvider for StaticTopology {
    fn cluster_stack(&self, cluster: &str) -> Result<String> {
        self.read()?
            .get(cluster)
            .map(|c| c.stack.clone())
            .ok_or_else(|| unknown_cluster(cluster))
    }

    fn hosts_for_component(&self, cluster: &str, component: &ComponentRef) -> Result<Vec<String>> {
        let guard = self.read()?;
        let topology = guard.get(cluster).ok_or_else(|| unknown_cluster(cluster))?;
        Ok(topology
            .hosts
            .iter()
            .filter(|(_, comps)| comps.contains(component))
            .map(|(host, _)| host.clone())
            .collect())
    }

    fn installed_components(&self, cluster: &str) -> Result<BTreeSet<ComponentRef>> {
        let guard = self.read()?;
        let topology = guard.get(cluster).ok_or_else(|| unknown_cluster(cluster))?;
        Ok(topology.hosts.values().flatten().cloned().collect())
    }

    fn record_component_state(
        &self,
        cluster: &str,
        host: &str,
        component: &ComponentRef,
        state: ComponentState,
    ) -> Result<()> {
        let mut guard = self.write()?;
        let topology = guard
            .get_mut(cluster)
            .ok_or_else(|| unknown_cluster(cluster))?;
        debug!(cluster, host, component = %component, state = %state, "recorded component state");
        topology
            .states
            .insert((host.to_string(), component.clone()), state);
        Ok(())
    }

    fn component_states(
        &self,
        cluster: &str,
        service: &str,
    ) -> Result<BTreeMap<ComponentRef, BTreeMap<String, ComponentState>>> {
        let guard = self.read()?;
        let topology = guard.get(cluster).ok_or_else(|| unknown_cluster(cluster))?;

        let mut out: BTreeMap<ComponentRef, BTreeMap<String, ComponentState>> = BTreeMap::new();
        for (host, comps) in &topology.hosts {
            for comp in comps.iter().filter(|c| c.service == service) {
                let state = topology
                    .states
                    .get(&(host.clone(), comp.clone()))
                    .copied()
                    .unwrap_or(ComponentState::Unknown);
                out.entry(comp.clone())
                    .or_default()
                    .insert(host.clone(), state);
            }
        }
        Ok(out)
    }

    fn set_cluster_stack(&self, cluster: &str, stack: &str) -> Result<()> {
        let mut guard = self.write()?;
        let topology = guard
            .get_mut(cluster)
            .ok_or_else(|| unknown_cluster(cluster))?;
        if topology.stack != stack {
            info!(cluster, from = %topology.stack, to = stack, "cluster stack changed");
            topology.stack = stack.to_string();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn topology() -> StaticTopology {
        let topo = StaticTopology::new();
        let mut hosts = BTreeMap::new();
        hosts.insert(
            "h1".to_string(),
            vec![ComponentRef::new("HDFS", "NAMENODE"), ComponentRef::new("HDFS", "DATANODE")],
        );
        hosts.insert("h2".to_string(), vec![ComponentRef::new("HDFS", "DATANODE")]);
        topo.add_cluster("c1", "BIGTOP-3.2.0", hosts).unwrap();
        topo
    }

    #[test]
    fn hosts_for_component_are_sorted() {
        let topo = topology();
        let hosts = topo
            .hosts_for_component("c1", &ComponentRef::new("HDFS", "DATANODE"))
            .unwrap();
        assert_eq!(hosts, vec!["h1".to_string(), "h2".to_string()]);
        assert!(topo.cluster_stack("nope").is_err());
    }

    #[test]
    fn unreported_components_are_unknown() {
        let topo = topology();
        let nn = ComponentRef::new("HDFS", "NAMENODE");
        topo.record_component_state("c1", "h1", &nn, ComponentState::Started)
            .unwrap();

        let states = topo.component_states("c1", "HDFS").unwrap();
        assert_eq!(states[&nn]["h1"], ComponentState::Started);
        assert_eq!(
            states[&ComponentRef::new("HDFS", "DATANODE")]["h2"],
            ComponentState::Unknown
        );
    }

    #[test]
    fn parses_component_refs() {
        assert_eq!(
            "HDFS/NAMENODE".parse::<ComponentRef>(),
            Ok(ComponentRef::new("HDFS", "NAMENODE"))
        );
        assert!("NAMENODE".parse::<ComponentRef>().is_err());
    }
}
