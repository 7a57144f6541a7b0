// src/agent/local.rs

//! In-process agent that runs commands as local shell processes.
//!
//! Used by `shepherd run` to drive a cluster whose "hosts" are all this
//! machine. Each execution command runs its `script` parameter with
//! `sh -c`; commands without a script complete immediately.

use std::collections::HashMap;
use std::process::Stdio;

use anyhow::{Context, Result};
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::agent::payload::{AgentCommand, CommandReport, ExecutionCommand, ReportStatus};
use crate::model::TaskId;

/// Parameter holding the shell snippet to run.
pub const SCRIPT_PARAM: &str = "script";

/// Handle for a currently running attempt.
struct ActiveCommand {
    attempt: u32,
    cancel: Option<oneshot::Sender<()>>,
    handle: tokio::task::JoinHandle<()>,
}

/// Spawn the agent loop for `host`.
///
/// The loop ends when the command channel closes. At most one process runs
/// per task: a new attempt for a task that is still running replaces it.
pub fn spawn_local_agent(
    host: String,
    mut commands: mpsc::Receiver<AgentCommand>,
    reports: mpsc::Sender<CommandReport>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        info!(host = %host, "local agent started");

        let mut active: HashMap<TaskId, ActiveCommand> = HashMap::new();

        while let Some(command) = commands.recv().await {
            active.retain(|_, a| !a.handle.is_finished());

            match command {
                AgentCommand::Execution(cmd) => {
                    if let Some(mut previous) = active.remove(&cmd.task_id) {
                        cancel_attempt(&host, cmd.task_id, &mut previous);
                    }
                    let task_id = cmd.task_id;
                    let attempt = cmd.attempt;
                    let (cancel_tx, cancel_rx) = oneshot::channel();
                    let handle = tokio::spawn(run_command(cmd, reports.clone(), cancel_rx));
                    active.insert(
                        task_id,
                        ActiveCommand {
                            attempt,
                            cancel: Some(cancel_tx),
                            handle,
                        },
                    );
                }
                AgentCommand::Cancel(cancel) => match active.get_mut(&cancel.task_id) {
                    Some(running) if running.attempt == cancel.attempt => {
                        info!(
                            host = %host,
                            task_id = %cancel.task_id,
                            reason = %cancel.reason,
                            "cancel requested"
                        );
                        cancel_attempt(&host, cancel.task_id, running);
                    }
                    _ => {
                        debug!(
                            host = %host,
                            task_id = %cancel.task_id,
                            attempt = cancel.attempt,
                            "cancel for an attempt that is not running; ignoring"
                        );
                    }
                },
            }
        }

        info!(host = %host, "local agent finished (channel closed)");
    })
}

fn cancel_attempt(host: &str, task_id: TaskId, running: &mut ActiveCommand) {
    if let Some(cancel) = running.cancel.take() {
        if cancel.send(()).is_err() {
            debug!(host, task_id = %task_id, "attempt already finished while cancelling");
        }
    }
}

/// Run one attempt and report its outcome. Errors become a FAILED report
/// with exit code -1.
async fn run_command(
    cmd: ExecutionCommand,
    reports: mpsc::Sender<CommandReport>,
    cancel_rx: oneshot::Receiver<()>,
) {
    let task_id = cmd.task_id;
    let attempt = cmd.attempt;

    let _ = reports
        .send(CommandReport::new(task_id, attempt, ReportStatus::InProgress))
        .await;

    match run_command_inner(&cmd, cancel_rx).await {
        Ok(Some(report)) => {
            let _ = reports.send(report).await;
        }
        Ok(None) => {
            // Cancelled: no report for this attempt.
        }
        Err(err) => {
            warn!(task_id = %task_id, attempt, error = %err, "command execution error");
            let mut report = CommandReport::new(task_id, attempt, ReportStatus::Failed);
            report.stderr = format!("{err:#}");
            report.exit_code = Some(-1);
            let _ = reports.send(report).await;
        }
    }
}

async fn run_command_inner(
    cmd: &ExecutionCommand,
    mut cancel_rx: oneshot::Receiver<()>,
) -> Result<Option<CommandReport>> {
    let Some(script) = cmd.command_params.get(SCRIPT_PARAM) else {
        debug!(task_id = %cmd.task_id, role = %cmd.role, "no script; completing immediately");
        let mut report = CommandReport::new(cmd.task_id, cmd.attempt, ReportStatus::Completed);
        report.exit_code = Some(0);
        return Ok(Some(report));
    };

    info!(
        task_id = %cmd.task_id,
        attempt = cmd.attempt,
        role = %cmd.role,
        command = %cmd.role_command,
        "starting command process"
    );

    let mut child = Command::new("sh")
        .arg("-c")
        .arg(script)
        .env("SHEPHERD_TASK_ID", cmd.task_id.to_string())
        .env("SHEPHERD_CLUSTER", &cmd.cluster)
        .env("SHEPHERD_HOST", &cmd.host)
        .env("SHEPHERD_SERVICE", &cmd.service)
        .env("SHEPHERD_ROLE", &cmd.role)
        .env("SHEPHERD_ROLE_COMMAND", cmd.role_command.as_str())
        .env("SHEPHERD_CONFIG_HASH", &cmd.config_hash)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .with_context(|| format!("spawning process for task {}", cmd.task_id))?;

    let stdout = child.stdout.take().map(|mut out| {
        tokio::spawn(async move {
            let mut buf = String::new();
            let _ = out.read_to_string(&mut buf).await;
            buf
        })
    });
    let stderr = child.stderr.take().map(|mut err| {
        tokio::spawn(async move {
            let mut buf = String::new();
            let _ = err.read_to_string(&mut buf).await;
            buf
        })
    });

    tokio::select! {
        status_res = child.wait() => {
            let status = status_res
                .with_context(|| format!("waiting for process of task {}", cmd.task_id))?;
            let code = status.code().unwrap_or(-1);

            let outcome = if status.success() {
                ReportStatus::Completed
            } else {
                ReportStatus::Failed
            };
            info!(
                task_id = %cmd.task_id,
                attempt = cmd.attempt,
                exit_code = code,
                success = status.success(),
                "command process exited"
            );

            let mut report = CommandReport::new(cmd.task_id, cmd.attempt, outcome);
            report.exit_code = Some(code);
            if let Some(h) = stdout {
                report.stdout = h.await.unwrap_or_default();
            }
            if let Some(h) = stderr {
                report.stderr = h.await.unwrap_or_default();
            }
            report.structured_out = serde_json::from_str(report.stdout.trim()).ok();
            Ok(Some(report))
        }

        cancel = &mut cancel_rx => {
            if cancel.is_ok() {
                info!(task_id = %cmd.task_id, attempt = cmd.attempt, "killing cancelled command");
                if let Err(e) = child.kill().await {
                    warn!(task_id = %cmd.task_id, error = %e, "failed to kill cancelled command");
                }
            }
            // A dropped sender means the agent loop is gone; the child is
            // killed on drop.
            Ok(None)
        }
    }
}
