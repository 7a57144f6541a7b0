// src/upgrade/definition.rs

//! Upgrade pack: the versioned definition of an upgrade.
//!
//! ```toml
//! name = "bigtop-3.2-to-3.3"
//! source_stack = "BIGTOP-3.2.0"
//! target_stack = "BIGTOP-3.3.0"
//!
//! [[group]]
//! name = "CORE_MASTERS"
//!
//! [[group.item]]
//! service = "HDFS"
//! component = "NAMENODE"
//! command = "RESTART"
//! skip_on_failure = true
//!
//! [[group.item]]
//! service = "HDFS"
//! component = "DATANODE"
//! command = "RESTART"
//! manual = true
//! message = "Verify DataNodes have rejoined before continuing"
//! ```

use std::collections::BTreeMap;

use serde::Deserialize;

use crate::errors::{Result, ShepherdError};
use crate::model::{RoleCommand, RoleCommandKey, StageFlags};
use crate::types::FailurePolicy;

#[derive(Debug, Clone, Deserialize)]
pub struct UpgradePack {
    pub name: String,
    /// Stack id the pack upgrades from (and downgrades back to).
    pub source_stack: String,
    pub target_stack: String,
    #[serde(default)]
    pub failure_policy: Option<FailurePolicy>,
    /// Pre-upgrade check ids this pack does not run.
    #[serde(default)]
    pub skip_checks: Vec<String>,
    #[serde(rename = "group", default)]
    pub groups: Vec<UpgradeGroup>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UpgradeGroup {
    pub name: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(rename = "item", default)]
    pub items: Vec<UpgradeItem>,
}

fn default_command() -> RoleCommand {
    RoleCommand::Restart
}

/// One Item becomes one Stage with one task per host of the component.
#[derive(Debug, Clone, Deserialize)]
pub struct UpgradeItem {
    pub service: String,
    pub component: String,
    #[serde(default = "default_command")]
    pub command: RoleCommand,
    /// Pause point: completed tasks park in HOLDING until resumed.
    #[serde(default)]
    pub manual: bool,
    /// Failures are tolerated under `CONTINUE_ON_SKIPPABLE`.
    #[serde(default)]
    pub skippable: bool,
    /// Failed or timed-out tasks park in HOLDING_FAILED/HOLDING_TIMEDOUT.
    #[serde(default)]
    pub skip_on_failure: bool,
    /// Operator retry from a HOLDING status is allowed.
    #[serde(default = "default_allow_retry")]
    pub allow_retry: bool,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub params: BTreeMap<String, String>,
}

fn default_allow_retry() -> bool {
    true
}

impl UpgradeItem {
    pub fn key(&self) -> RoleCommandKey {
        RoleCommandKey::new(self.service.clone(), self.component.clone(), self.command)
    }

    pub fn flags(&self) -> StageFlags {
        StageFlags {
            skippable: self.skippable,
            manual: self.manual,
            auto_hold_on_failure: self.skip_on_failure,
            allow_retry: self.allow_retry,
        }
    }
}

impl UpgradePack {
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let pack: UpgradePack = toml::from_str(contents)?;
        pack.validate()?;
        Ok(pack)
    }

    /// Structural checks that do not need the stacks.
    pub fn validate(&self) -> Result<()> {
        if self.source_stack == self.target_stack {
            return Err(ShepherdError::Planning(format!(
                "upgrade pack '{}' has identical source and target stack {}",
                self.name, self.source_stack
            )));
        }
        if self.groups.iter().all(|g| g.items.is_empty()) {
            return Err(ShepherdError::Planning(format!(
                "upgrade pack '{}' has no items",
                self.name
            )));
        }
        Ok(())
    }
}
