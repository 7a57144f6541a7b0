// src/ordering/table.rs

//! Declarative stack definition: the components each service ships and the
//! role command order between them.
//!
//! ```toml
//! name = "BIGTOP"
//! version = "3.2.0"
//!
//! [services.HDFS]
//! masters = ["NAMENODE"]
//! slaves = ["DATANODE"]
//! clients = ["HDFS_CLIENT"]
//!
//! [role_command_order]
//! "DATANODE-START" = ["NAMENODE-START"]
//! "HDFS/NAMENODE-START" = ["ZOOKEEPER_SERVER-START"]
//! ```
//!
//! Order keys are `ROLE-COMMAND`, optionally qualified as
//! `SERVICE/ROLE-COMMAND` when a role name is not unique across services.

use std::collections::BTreeMap;
use std::sync::OnceLock;

use regex::Regex;
use serde::Deserialize;

use crate::errors::{Result, ShepherdError};
use crate::model::{RoleCommand, RoleCommandKey};

/// Components of one service, grouped by category.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ServiceDefinition {
    #[serde(default)]
    pub masters: Vec<String>,
    #[serde(default)]
    pub slaves: Vec<String>,
    #[serde(default)]
    pub clients: Vec<String>,
    /// Selects the service state calculator (`default`, `ha`,
    /// `client_only`). Derived from the categories when absent.
    #[serde(default)]
    pub family: Option<String>,
}

impl ServiceDefinition {
    pub fn components(&self) -> impl Iterator<Item = &str> {
        self.masters
            .iter()
            .chain(self.slaves.iter())
            .chain(self.clients.iter())
            .map(|s| s.as_str())
    }

    pub fn has_component(&self, component: &str) -> bool {
        self.components().any(|c| c == component)
    }

    pub fn is_client(&self, component: &str) -> bool {
        self.clients.iter().any(|c| c == component)
    }
}

/// Stack definition as read from TOML.
#[derive(Debug, Clone, Deserialize)]
pub struct StackDefinition {
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub services: BTreeMap<String, ServiceDefinition>,
    /// `"ROLE-COMMAND"` → list of `"ROLE-COMMAND"` that must complete first.
    #[serde(default)]
    pub role_command_order: BTreeMap<String, Vec<String>>,
}

impl StackDefinition {
    /// `NAME-VERSION`, e.g. `BIGTOP-3.2.0`.
    pub fn id(&self) -> String {
        stack_id(&self.name, &self.version)
    }

    pub fn from_toml_str(contents: &str) -> Result<Self> {
        Ok(toml::from_str(contents)?)
    }

    /// Service that ships `component`, if any.
    pub fn service_of(&self, component: &str) -> Option<&str> {
        self.services
            .iter()
            .find(|(_, svc)| svc.has_component(component))
            .map(|(name, _)| name.as_str())
    }

    pub fn supports(&self, service: &str, component: &str) -> bool {
        self.services
            .get(service)
            .is_some_and(|svc| svc.has_component(component))
    }

    /// Resolve the `role_command_order` table into typed edges
    /// `(blocked, blockers)`.
    pub fn order_entries(&self) -> Result<Vec<(RoleCommandKey, Vec<RoleCommandKey>)>> {
        let mut entries = Vec::with_capacity(self.role_command_order.len());
        for (blocked, blockers) in &self.role_command_order {
            let blocked_key = self.resolve_key(blocked)?;
            let blocker_keys = blockers
                .iter()
                .map(|b| self.resolve_key(b))
                .collect::<Result<Vec<_>>>()?;
            entries.push((blocked_key, blocker_keys));
        }
        Ok(entries)
    }

    fn resolve_key(&self, raw: &str) -> Result<RoleCommandKey> {
        let (service, role, command) = parse_order_key(raw).ok_or_else(|| {
            ShepherdError::ConfigError(format!(
                "stack {}: malformed role command order key '{}' (expected ROLE-COMMAND or SERVICE/ROLE-COMMAND)",
                self.id(),
                raw
            ))
        })?;

        let command: RoleCommand = command.parse().map_err(|e: String| {
            ShepherdError::ConfigError(format!("stack {}: {} in '{}'", self.id(), e, raw))
        })?;

        let service = match service {
            Some(svc) => {
                if !self.supports(svc, role) {
                    return Err(ShepherdError::ConfigError(format!(
                        "stack {}: service {} has no component {} (in '{}')",
                        self.id(),
                        svc,
                        role,
                        raw
                    )));
                }
                svc.to_string()
            }
            None => self
                .service_of(role)
                .ok_or_else(|| {
                    ShepherdError::ConfigError(format!(
                        "stack {}: unknown role {} in role command order",
                        self.id(),
                        role
                    ))
                })?
                .to_string(),
        };

        Ok(RoleCommandKey::new(service, role, command))
    }
}

pub fn stack_id(name: &str, version: &str) -> String {
    format!("{name}-{version}")
}

fn order_key_regex() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| {
        match Regex::new(
            r"^(?:(?P<service>[A-Za-z0-9_]+)/)?(?P<role>[A-Za-z0-9_]+)-(?P<command>[A-Za-z_]+)$",
        ) {
            Ok(re) => Some(re),
            Err(err) => {
                tracing::error!(error = %err, "order key pattern failed to compile");
                None
            }
        }
    })
    .as_ref()
}

/// Split `SERVICE/ROLE-COMMAND` or `ROLE-COMMAND` into its parts.
fn parse_order_key(raw: &str) -> Option<(Option<&str>, &str, &str)> {
    let caps = order_key_regex()?.captures(raw.trim())?;
    let service = caps.name("service").map(|m| m.as_str());
    let role = caps.name("role")?.as_str();
    let command = caps.name("command")?.as_str();
    Some((service, role, command))
}
