// src/agent/transport.rs

//! Outbound command channels, one per host.

use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::RwLock;

use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, info};

use crate::agent::payload::AgentCommand;
use crate::errors::{Result, ShepherdError};

/// Hands commands to host agents.
///
/// `send` must not block: it enqueues and returns. Acknowledgement arrives
/// later as a [`crate::agent::CommandReport`].
pub trait AgentTransport: Send + Sync + Debug {
    fn send(&self, host: &str, command: AgentCommand) -> Result<()>;
}

/// Transport backed by bounded tokio channels.
///
/// A host without a registered channel, a closed channel (agent gone) and a
/// full channel are all reported as dispatch errors.
#[derive(Debug)]
pub struct ChannelTransport {
    capacity: usize,
    hosts: RwLock<HashMap<String, mpsc::Sender<AgentCommand>>>,
}

impl ChannelTransport {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            hosts: RwLock::new(HashMap::new()),
        }
    }

    /// Register (or replace) the channel of a host and return its receiving
    /// end, to be driven by that host's agent connection.
    pub fn connect(&self, host: &str) -> Result<mpsc::Receiver<AgentCommand>> {
        let (tx, rx) = mpsc::channel(self.capacity);
        let mut hosts = self
            .hosts
            .write()
            .map_err(|_| ShepherdError::Persistence("transport lock poisoned".to_string()))?;
        if hosts.insert(host.to_string(), tx).is_some() {
            info!(host, "agent reconnected; replaced command channel");
        } else {
            info!(host, "agent connected");
        }
        Ok(rx)
    }

    pub fn disconnect(&self, host: &str) {
        if let Ok(mut hosts) = self.hosts.write() {
            if hosts.remove(host).is_some() {
                info!(host, "agent disconnected");
            }
        }
    }
}

impl AgentTransport for ChannelTransport {
    fn send(&self, host: &str, command: AgentCommand) -> Result<()> {
        let dispatch_err = |reason: &str| ShepherdError::Dispatch {
            host: host.to_string(),
            reason: reason.to_string(),
        };

        let hosts = self
            .hosts
            .read()
            .map_err(|_| dispatch_err("transport lock poisoned"))?;
        let tx = hosts.get(host).ok_or_else(|| dispatch_err("no agent connected"))?;

        let task_id = command.task_id();
        match tx.try_send(command) {
            Ok(()) => {
                debug!(host, task_id = %task_id, "command enqueued");
                Ok(())
            }
            Err(TrySendError::Full(_)) => Err(dispatch_err("command channel full")),
            Err(TrySendError::Closed(_)) => Err(dispatch_err("agent connection closed")),
        }
    }
}
