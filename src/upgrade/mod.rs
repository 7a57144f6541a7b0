// src/upgrade/mod.rs

//! Rolling upgrades and downgrades.
//!
//! An upgrade is an ordinary Request whose Stages come from an
//! [`UpgradePack`]; it runs on the same scheduler and heartbeat paths as any
//! other Request. Item flags become Stage flags, which is how pause points
//! and hold-on-failure reach the task state machine. An upgrade (never a
//! downgrade) must pass the [`checks`] before it is created.

pub mod checks;
pub mod definition;
pub mod orchestrator;

pub use checks::{
    CheckContext, CheckFailure, CheckResult, CheckStatus, UpgradeCheck, UpgradeCheckRegistry,
};
pub use definition::{UpgradeGroup, UpgradeItem, UpgradePack};
pub use orchestrator::{UpgradeOrchestrator, UpgradePlan};
