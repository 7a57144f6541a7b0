// src/topology/service_state.rs

//! Per-service "calculated state".
//!
//! One small [`ServiceStateCalculator`] per service family, picked from
//! [`StateCalculators`] by the family name declared in the stack (or
//! derived from the component categories).

use std::collections::{BTreeMap, HashMap};
use std::fmt::Debug;

use crate::ordering::ServiceDefinition;
use crate::topology::ComponentState;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComponentCategory {
    Master,
    Slave,
    Client,
}

#[derive(Debug, Clone)]
pub struct ComponentTopology {
    pub name: String,
    pub category: ComponentCategory,
    /// host → state
    pub hosts: BTreeMap<String, ComponentState>,
}

/// Everything a calculator needs to know about one service.
#[derive(Debug, Clone)]
pub struct ServiceTopology {
    pub service: String,
    pub components: Vec<ComponentTopology>,
}

impl ServiceTopology {
    fn of(&self, category: ComponentCategory) -> impl Iterator<Item = &ComponentTopology> {
        self.components.iter().filter(move |c| c.category == category)
    }
}

pub trait ServiceStateCalculator: Send + Sync + Debug {
    fn compute_service_state(&self, topology: &ServiceTopology) -> ComponentState;
}

fn all_hosts(component: &ComponentTopology, state: ComponentState) -> bool {
    !component.hosts.is_empty() && component.hosts.values().all(|s| *s == state)
}

fn any_host(component: &ComponentTopology, state: ComponentState) -> bool {
    component.hosts.values().any(|s| *s == state)
}

fn at_least_installed(topology: &ServiceTopology) -> bool {
    let hosted: Vec<_> = topology
        .components
        .iter()
        .flat_map(|c| c.hosts.values())
        .collect();
    !hosted.is_empty() && hosted.iter().all(|s| **s != ComponentState::Unknown)
}

/// Started when every master host and at least one host of each slave is
/// started.
#[derive(Debug, Default)]
pub struct DefaultCalculator;

impl ServiceStateCalculator for DefaultCalculator {
    fn compute_service_state(&self, topology: &ServiceTopology) -> ComponentState {
        let masters_up = topology
            .of(ComponentCategory::Master)
            .all(|c| all_hosts(c, ComponentState::Started));
        let slaves_up = topology
            .of(ComponentCategory::Slave)
            .all(|c| any_host(c, ComponentState::Started));
        let has_servers = topology
            .of(ComponentCategory::Master)
            .chain(topology.of(ComponentCategory::Slave))
            .any(|c| !c.hosts.is_empty());

        if has_servers && masters_up && slaves_up {
            ComponentState::Started
        } else if at_least_installed(topology) {
            ComponentState::Installed
        } else {
            ComponentState::Unknown
        }
    }
}

/// Services with redundant masters: one started host per master component
/// is enough.
#[derive(Debug, Default)]
pub struct HaCalculator;

impl ServiceStateCalculator for HaCalculator {
    fn compute_service_state(&self, topology: &ServiceTopology) -> ComponentState {
        let servers: Vec<_> = topology
            .of(ComponentCategory::Master)
            .chain(topology.of(ComponentCategory::Slave))
            .filter(|c| !c.hosts.is_empty())
            .collect();

        if !servers.is_empty() && servers.iter().all(|c| any_host(c, ComponentState::Started)) {
            ComponentState::Started
        } else if at_least_installed(topology) {
            ComponentState::Installed
        } else {
            ComponentState::Unknown
        }
    }
}

/// Client-only services never run; they are at best installed.
#[derive(Debug, Default)]
pub struct ClientOnlyCalculator;

impl ServiceStateCalculator for ClientOnlyCalculator {
    fn compute_service_state(&self, topology: &ServiceTopology) -> ComponentState {
        let clients: Vec<_> = topology.of(ComponentCategory::Client).collect();
        if !clients.is_empty()
            && clients
                .iter()
                .all(|c| all_hosts(c, ComponentState::Installed))
        {
            ComponentState::Installed
        } else {
            ComponentState::Unknown
        }
    }
}

/// Lookup table family name → calculator.
#[derive(Debug)]
pub struct StateCalculators {
    by_family: HashMap<&'static str, Box<dyn ServiceStateCalculator>>,
}

impl Default for StateCalculators {
    fn default() -> Self {
        let mut by_family: HashMap<&'static str, Box<dyn ServiceStateCalculator>> =
            HashMap::new();
        by_family.insert("default", Box::new(DefaultCalculator));
        by_family.insert("ha", Box::new(HaCalculator));
        by_family.insert("client_only", Box::new(ClientOnlyCalculator));
        Self { by_family }
    }
}

impl StateCalculators {
    pub fn new() -> Self {
        Self::default()
    }

    /// Family of a service: the declared one, `client_only` for services
    /// without servers, `default` otherwise.
    pub fn family_of(definition: &ServiceDefinition) -> &str {
        match definition.family.as_deref() {
            Some(family) => family,
            None if definition.masters.is_empty() && definition.slaves.is_empty() => "client_only",
            None => "default",
        }
    }

    /// Unknown families fall back to the default rule.
    pub fn lookup(&self, family: &str) -> &dyn ServiceStateCalculator {
        self.by_family
            .get(family)
            .or_else(|| self.by_family.get("default"))
            .map(|b| b.as_ref())
            .unwrap_or(&DefaultCalculator)
    }

    pub fn compute(
        &self,
        definition: &ServiceDefinition,
        topology: &ServiceTopology,
    ) -> ComponentState {
        self.lookup(Self::family_of(definition))
            .compute_service_state(topology)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn component(
        name: &str,
        category: ComponentCategory,
        hosts: &[(&str, ComponentState)],
    ) -> ComponentTopology {
        ComponentTopology {
            name: name.to_string(),
            category,
            hosts: hosts.iter().map(|(h, s)| (h.to_string(), *s)).collect(),
        }
    }

    fn hdfs(nn2: ComponentState) -> ServiceTopology {
        use ComponentState::*;
        ServiceTopology {
            service: "HDFS".to_string(),
            components: vec![
                component(
                    "NAMENODE",
                    ComponentCategory::Master,
                    &[("h1", Started), ("h2", nn2)],
                ),
                component(
                    "DATANODE",
                    ComponentCategory::Slave,
                    &[("h1", Started), ("h2", Installed)],
                ),
            ],
        }
    }

    #[test]
    fn default_requires_every_master_host() {
        assert_eq!(
            DefaultCalculator.compute_service_state(&hdfs(ComponentState::Installed)),
            ComponentState::Installed
        );
        assert_eq!(
            DefaultCalculator.compute_service_state(&hdfs(ComponentState::Started)),
            ComponentState::Started
        );
    }

    #[test]
    fn ha_accepts_one_active_master() {
        assert_eq!(
            HaCalculator.compute_service_state(&hdfs(ComponentState::Installed)),
            ComponentState::Started
        );
    }

    #[test]
    fn lookup_by_family() {
        let calculators = StateCalculators::new();
        let clients = ServiceDefinition {
            clients: vec!["PIG".to_string()],
            ..Default::default()
        };
        assert_eq!(StateCalculators::family_of(&clients), "client_only");

        let topo = ServiceTopology {
            service: "PIG".to_string(),
            components: vec![component(
                "PIG",
                ComponentCategory::Client,
                &[("h1", ComponentState::Installed)],
            )],
        };
        assert_eq!(
            calculators.compute(&clients, &topo),
            ComponentState::Installed
        );
    }
}
