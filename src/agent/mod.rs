// src/agent/mod.rs

//! Agent side of the control plane: wire payloads, the outbound transport
//! and a local process-running agent.

pub mod local;
pub mod payload;
pub mod transport;

pub use local::spawn_local_agent;
pub use payload::{
    AgentCommand, CancelCommand, CommandReport, ExecutionCommand, ReportStatus, config_hash,
};
pub use transport::{AgentTransport, ChannelTransport};
