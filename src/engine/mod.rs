// src/engine/mod.rs

//! Orchestration engine for shepherd.
//!
//! This module ties together:
//! - the operator-facing control plane (planning, abort/resume, status)
//! - the runtime loop that ticks the scheduler and applies agent reports
//!
//! The semantics live in [`crate::scheduler`] and [`crate::heartbeat`]; the
//! async/IO shell is implemented in [`runtime`].

pub mod control;
pub mod runtime;

pub use control::{ControlPlane, HoldTarget, RequestView, StageView, UpgradeCreated};
pub use runtime::{Runtime, spawn_heartbeat_loop};

/// Runtime options for the async shell.
#[derive(Debug, Clone, Copy, Default)]
pub struct RuntimeOptions {
    /// If true, exit the runtime once no Request is active (used for
    /// `run --once`).
    pub exit_when_idle: bool,
}
