// src/ordering/mod.rs

//! Role Ordering Graph.
//!
//! - [`table`] holds the declarative stack definition (components and the
//!   `role_command_order` table).
//! - [`graph`] compiles that table into a [`RoleCommandOrder`], rejecting
//!   cycles, and answers "what blocks this role command".
//! - [`registry`] keeps one compiled order per stack version and swaps
//!   entries atomically when a stack is reloaded.

pub mod graph;
pub mod registry;
pub mod table;

pub use graph::RoleCommandOrder;
pub use registry::{CompiledStack, StackRegistry};
pub use table::{ServiceDefinition, StackDefinition, stack_id};
