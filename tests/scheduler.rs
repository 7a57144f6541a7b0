// tests/scheduler.rs

use std::sync::Arc;

use chrono::Utc;

use shepherd::agent::ReportStatus;
use shepherd::model::{HostRoleStatus, RoleCommand};
use shepherd::planner::TaskDefaults;
use shepherd::publisher::StatusEvent;
use shepherd::scheduler::SchedulerConfig;
use shepherd::store::{MemoryStore, Store};
use shepherd::types::FailurePolicy;
use shepherd_test_utils::{CLUSTER, FlakyStore, Harness, op, secs};

#[test]
fn stage_gates_the_next_stage() {
    let harness = Harness::new();
    let t0 = Utc::now();
    let id = harness
        .control
        .create_request(
            CLUSTER,
            &[
                op("HDFS", "NAMENODE", RoleCommand::Start),
                op("HDFS", "DATANODE", RoleCommand::Start),
            ],
            FailurePolicy::Abort,
            None,
        )
        .unwrap();

    let report = harness.tick(t0);
    assert_eq!(report.dispatched, 1);
    assert_eq!(harness.transport.executed_roles(), vec!["NAMENODE"]);
    assert_eq!(harness.request(id).status, HostRoleStatus::InProgress);

    // Nothing from stage 1 while stage 0 runs.
    harness.tick(t0 + secs(1));
    assert_eq!(harness.transport.executions().len(), 1);
    assert!(
        harness
            .tasks_with_role(id, "DATANODE")
            .iter()
            .all(|t| t.status == HostRoleStatus::Pending)
    );

    harness.complete_running(id, t0 + secs(2));
    let report = harness.tick(t0 + secs(3));
    assert_eq!(report.dispatched, 2);
    assert_eq!(
        harness.transport.executed_roles(),
        vec!["NAMENODE", "DATANODE", "DATANODE"]
    );

    harness.complete_running(id, t0 + secs(4));
    let report = harness.tick(t0 + secs(5));
    assert_eq!(report.finished, vec![id]);

    let request = harness.request(id);
    assert_eq!(request.status, HostRoleStatus::Completed);
    assert_eq!(request.end_time, Some(t0 + secs(5)));
    assert!(harness.tick(t0 + secs(6)).is_idle());
}

#[test]
fn failed_stage_aborts_later_stages_without_dispatch() {
    let harness = Harness::new();
    let t0 = Utc::now();
    let id = harness
        .control
        .create_request(
            CLUSTER,
            &[
                op("HDFS", "NAMENODE", RoleCommand::Start),
                op("HDFS", "DATANODE", RoleCommand::Start),
            ],
            FailurePolicy::Abort,
            None,
        )
        .unwrap();

    harness.tick(t0);
    let nn = harness.in_progress(id).remove(0);
    harness.report(&nn, ReportStatus::Failed, t0 + secs(1));

    let report = harness.tick(t0 + secs(2));
    assert_eq!(report.aborted, 2);
    assert_eq!(report.dispatched, 0);
    assert_eq!(harness.transport.executed_roles(), vec!["NAMENODE"]);

    for dn in harness.tasks_with_role(id, "DATANODE") {
        assert_eq!(dn.status, HostRoleStatus::Aborted);
        assert_eq!(dn.attempt_count, 0);
    }
    let stages = harness.store.stages(id).unwrap();
    assert_eq!(stages[0].status, HostRoleStatus::Failed);
    assert_eq!(stages[1].status, HostRoleStatus::Aborted);
    assert_eq!(harness.request(id).status, HostRoleStatus::Failed);
}

#[test]
fn continue_policy_runs_later_stages_and_still_fails() {
    let harness = Harness::new();
    let t0 = Utc::now();
    let id = harness
        .control
        .create_request(
            CLUSTER,
            &[
                op("HDFS", "NAMENODE", RoleCommand::Start),
                op("HDFS", "DATANODE", RoleCommand::Start),
            ],
            FailurePolicy::Continue,
            None,
        )
        .unwrap();

    harness.tick(t0);
    let nn = harness.in_progress(id).remove(0);
    harness.report(&nn, ReportStatus::Failed, t0 + secs(1));

    let report = harness.tick(t0 + secs(2));
    assert_eq!(report.dispatched, 2);

    harness.complete_running(id, t0 + secs(3));
    harness.tick(t0 + secs(4));
    assert_eq!(harness.request(id).status, HostRoleStatus::Failed);
}

#[test]
fn timed_out_task_is_retried_once_then_times_out() {
    let harness = Harness::new();
    let t0 = Utc::now();
    let id = harness
        .control
        .create_request(
            CLUSTER,
            &[op("HDFS", "NAMENODE", RoleCommand::Start)],
            FailurePolicy::Abort,
            None,
        )
        .unwrap();

    harness.tick(t0);
    // Not yet: exactly at the timeout is still within it.
    let report = harness.tick(t0 + secs(600));
    assert_eq!(report.retried, 0);

    // First timeout: the cancel for attempt 1 goes out and attempt 2 is
    // dispatched in the same tick.
    let report = harness.tick(t0 + secs(601));
    assert_eq!(report.retried, 1);
    assert_eq!(report.dispatched, 1);
    let cancels = harness.transport.cancels();
    assert_eq!(cancels.len(), 1);
    assert_eq!(cancels[0].attempt, 1);

    let task = harness.tasks(id).remove(0);
    assert_eq!(task.status, HostRoleStatus::InProgress);
    assert_eq!(task.attempt_count, 2);

    // Second timeout: no attempts left.
    let report = harness.tick(t0 + secs(1202));
    assert_eq!(report.timed_out, 1);
    assert_eq!(report.finished, vec![id]);

    let task = harness.tasks(id).remove(0);
    assert_eq!(task.status, HostRoleStatus::Timedout);
    assert_eq!(harness.transport.executions().len(), 2);
    assert_eq!(harness.request(id).status, HostRoleStatus::Timedout);
}

#[test]
fn task_without_retry_times_out_on_first_expiry() {
    let harness = Harness::new();
    let t0 = Utc::now();
    let id = harness
        .control
        .create_request(
            CLUSTER,
            &[op("HDFS", "NAMENODE", RoleCommand::CustomCommand)],
            FailurePolicy::Abort,
            None,
        )
        .unwrap();

    harness.tick(t0);
    let report = harness.tick(t0 + secs(601));
    assert_eq!(report.retried, 0);
    assert_eq!(report.timed_out, 1);
    assert_eq!(harness.tasks(id)[0].status, HostRoleStatus::Timedout);
}

#[test]
fn per_host_limit_spans_requests() {
    let harness = Harness::new();
    let t0 = Utc::now();
    let mut first = op("HDFS", "DATANODE", RoleCommand::Stop);
    first.hosts = vec!["h2".to_string()];
    let mut second = op("YARN", "NODEMANAGER", RoleCommand::Stop);
    second.hosts = vec!["h2".to_string()];

    let a = harness
        .control
        .create_request(CLUSTER, &[first], FailurePolicy::Abort, None)
        .unwrap();
    let b = harness
        .control
        .create_request(CLUSTER, &[second], FailurePolicy::Abort, None)
        .unwrap();

    let report = harness.tick(t0);
    assert_eq!(report.dispatched, 1);
    assert_eq!(harness.in_progress(a).len(), 1);
    assert_eq!(harness.tasks(b)[0].status, HostRoleStatus::Queued);

    harness.complete_running(a, t0 + secs(1));
    let report = harness.tick(t0 + secs(2));
    assert_eq!(report.dispatched, 1);
    assert_eq!(harness.in_progress(b).len(), 1);
}

#[test]
fn higher_host_limit_allows_parallel_tasks() {
    let config = SchedulerConfig {
        max_tasks_per_host: 2,
        ..SchedulerConfig::default()
    };
    let harness = Harness::build(Arc::new(MemoryStore::new()), config, TaskDefaults::default());
    let t0 = Utc::now();
    let mut dn = op("HDFS", "DATANODE", RoleCommand::Stop);
    dn.hosts = vec!["h2".to_string()];
    let mut nm = op("YARN", "NODEMANAGER", RoleCommand::Stop);
    nm.hosts = vec!["h2".to_string()];

    let id = harness
        .control
        .create_request(CLUSTER, &[dn, nm], FailurePolicy::Abort, None)
        .unwrap();
    assert_eq!(harness.tick(t0).dispatched, 2);
    assert_eq!(harness.in_progress(id).len(), 2);
}

#[test]
fn dispatch_failure_requeues_then_fails() {
    let harness = Harness::new();
    let t0 = Utc::now();
    harness.transport.set_unreachable("h1", true);
    let id = harness
        .control
        .create_request(
            CLUSTER,
            &[op("HDFS", "NAMENODE", RoleCommand::Start)],
            FailurePolicy::Abort,
            None,
        )
        .unwrap();

    let report = harness.tick(t0);
    assert_eq!(report.dispatch_failures, 1);
    let task = harness.tasks(id).remove(0);
    assert_eq!(task.status, HostRoleStatus::Queued);
    assert_eq!(task.attempt_count, 1);

    let report = harness.tick(t0 + secs(1));
    assert_eq!(report.dispatch_failures, 1);
    let task = harness.tasks(id).remove(0);
    assert_eq!(task.status, HostRoleStatus::Failed);
    assert!(task.output.stderr.contains("dispatch failed"));
    assert_eq!(harness.request(id).status, HostRoleStatus::Failed);
}

#[test]
fn dispatch_failure_requeues_even_when_timeouts_are_not_retried() {
    let defaults = TaskDefaults {
        retry_commands: Default::default(),
        ..TaskDefaults::default()
    };
    let harness = Harness::build(
        Arc::new(MemoryStore::new()),
        SchedulerConfig::default(),
        defaults,
    );
    let t0 = Utc::now();
    harness.transport.set_unreachable("h1", true);
    let id = harness
        .control
        .create_request(
            CLUSTER,
            &[op("HDFS", "NAMENODE", RoleCommand::Start)],
            FailurePolicy::Abort,
            None,
        )
        .unwrap();
    assert!(!harness.tasks(id)[0].retry_enabled);

    assert_eq!(harness.tick(t0).dispatch_failures, 1);
    assert_eq!(harness.tasks(id)[0].status, HostRoleStatus::Queued);

    harness.transport.set_unreachable("h1", false);
    assert_eq!(harness.tick(t0 + secs(1)).dispatched, 1);
    assert_eq!(harness.in_progress(id)[0].attempt_count, 2);

    // Timeouts are still not retried.
    let report = harness.tick(t0 + secs(602));
    assert_eq!(report.retried, 0);
    assert_eq!(report.timed_out, 1);
    assert_eq!(harness.tasks(id)[0].status, HostRoleStatus::Timedout);
}

#[test]
fn store_outage_fails_the_tick_and_recovers() {
    let flaky = Arc::new(FlakyStore::new(Arc::new(MemoryStore::new())));
    let harness = Harness::with_store(flaky.clone());
    let t0 = Utc::now();
    let id = harness
        .control
        .create_request(
            CLUSTER,
            &[op("HDFS", "NAMENODE", RoleCommand::Start)],
            FailurePolicy::Abort,
            None,
        )
        .unwrap();

    flaky.set_offline(true);
    assert!(harness.scheduler.tick(t0).is_err());
    assert!(harness.transport.executions().is_empty());

    flaky.set_offline(false);
    assert_eq!(harness.tick(t0 + secs(1)).dispatched, 1);
    assert_eq!(harness.in_progress(id).len(), 1);
}

#[test]
fn transitions_are_published() {
    let mut harness = Harness::new();
    let t0 = Utc::now();
    let id = harness
        .control
        .create_request(
            CLUSTER,
            &[op("HDFS", "NAMENODE", RoleCommand::Start)],
            FailurePolicy::Abort,
            None,
        )
        .unwrap();

    let request = harness.drive(id, t0);
    assert_eq!(request.status, HostRoleStatus::Completed);

    let task_moves: Vec<_> = harness
        .drain_events()
        .into_iter()
        .filter_map(|e| match e {
            StatusEvent::TaskStatusChanged { from, to, .. } => Some((from, to)),
            _ => None,
        })
        .collect();
    assert_eq!(
        task_moves,
        vec![
            (HostRoleStatus::Pending, HostRoleStatus::Queued),
            (HostRoleStatus::Queued, HostRoleStatus::InProgress),
            (HostRoleStatus::InProgress, HostRoleStatus::Completed),
        ]
    );
}

#[test]
fn requests_run_independently() {
    let harness = Harness::new();
    let t0 = Utc::now();
    let zk = harness
        .control
        .create_request(
            CLUSTER,
            &[op("ZOOKEEPER", "ZOOKEEPER_SERVER", RoleCommand::Restart)],
            FailurePolicy::Abort,
            None,
        )
        .unwrap();
    let rm = harness
        .control
        .create_request(
            CLUSTER,
            &[op("YARN", "RESOURCEMANAGER", RoleCommand::Restart)],
            FailurePolicy::Abort,
            None,
        )
        .unwrap();

    assert_eq!(harness.tick(t0).dispatched, 2);
    let zk_task = harness.in_progress(zk).remove(0);
    harness.report(&zk_task, ReportStatus::Failed, t0 + secs(1));
    harness.complete_running(rm, t0 + secs(1));
    harness.tick(t0 + secs(2));

    assert_eq!(harness.request(zk).status, HostRoleStatus::Failed);
    assert_eq!(harness.request(rm).status, HostRoleStatus::Completed);
    assert!(harness.store.active_requests().unwrap().is_empty());
}
