use std::collections::HashSet;
use std::sync::Mutex;

use shepherd::agent::{AgentCommand, AgentTransport, CancelCommand, ExecutionCommand};
use shepherd::errors::{Result, ShepherdError};

/// A transport that:
/// - records every command handed to it, per host
/// - fails sends to hosts marked unreachable.
#[derive(Debug, Default)]
pub struct RecordingTransport {
    sent: Mutex<Vec<(String, AgentCommand)>>,
    unreachable: Mutex<HashSet<String>>,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_unreachable(&self, host: &str, unreachable: bool) {
        let mut hosts = self.unreachable.lock().unwrap();
        if unreachable {
            hosts.insert(host.to_string());
        } else {
            hosts.remove(host);
        }
    }

    pub fn sent(&self) -> Vec<(String, AgentCommand)> {
        self.sent.lock().unwrap().clone()
    }

    pub fn executions(&self) -> Vec<ExecutionCommand> {
        self.sent()
            .into_iter()
            .filter_map(|(_, cmd)| match cmd {
                AgentCommand::Execution(exec) => Some(exec),
                AgentCommand::Cancel(_) => None,
            })
            .collect()
    }

    pub fn cancels(&self) -> Vec<CancelCommand> {
        self.sent()
            .into_iter()
            .filter_map(|(_, cmd)| match cmd {
                AgentCommand::Cancel(cancel) => Some(cancel),
                AgentCommand::Execution(_) => None,
            })
            .collect()
    }

    /// Roles of the execution commands sent so far, in send order.
    pub fn executed_roles(&self) -> Vec<String> {
        self.executions().into_iter().map(|e| e.role).collect()
    }

    pub fn clear(&self) {
        self.sent.lock().unwrap().clear();
    }
}

impl AgentTransport for RecordingTransport {
    fn send(&self, host: &str, command: AgentCommand) -> Result<()> {
        if self.unreachable.lock().unwrap().contains(host) {
            return Err(ShepherdError::Dispatch {
                host: host.to_string(),
                reason: "connection refused".to_string(),
            });
        }
        self.sent.lock().unwrap().push((host.to_string(), command));
        Ok(())
    }
}
