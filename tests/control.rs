// tests/control.rs

use chrono::Utc;

use shepherd::agent::ReportStatus;
use shepherd::engine::HoldTarget;
use shepherd::errors::ShepherdError;
use shepherd::model::{
    HostRoleStatus, RequestId, RequestKind, RequestPlan, RoleCommand, StageFlags, StagePlan,
    TaskPlan,
};
use shepherd::publisher::StatusEvent;
use shepherd::types::{FailurePolicy, HoldingAction};
use shepherd_test_utils::{CLUSTER, Harness, op, secs};

type TestResult = Result<(), Box<dyn std::error::Error>>;

fn start_hdfs(harness: &Harness) -> RequestId {
    harness
        .control
        .create_request(
            CLUSTER,
            &[
                op("HDFS", "NAMENODE", RoleCommand::Start),
                op("HDFS", "DATANODE", RoleCommand::Start),
            ],
            FailurePolicy::Abort,
            Some("Start HDFS"),
        )
        .unwrap()
}

#[test]
fn abort_cancels_running_tasks_and_stops_the_request() -> TestResult {
    let mut harness = Harness::new();
    let t0 = Utc::now();
    let id = start_hdfs(&harness);
    harness.tick(t0);
    let running = harness.in_progress(id).remove(0);
    harness.drain_events();

    let aborted = harness.control.abort_request(id, "maintenance window closed")?;
    assert_eq!(aborted, 3);

    let cancels = harness.transport.cancels();
    assert_eq!(cancels.len(), 1);
    assert_eq!(cancels[0].task_id, running.id);
    assert_eq!(cancels[0].reason, "maintenance window closed");

    let request = harness.request(id);
    assert_eq!(request.status, HostRoleStatus::Aborted);
    assert_eq!(
        request.abort_reason.as_deref(),
        Some("maintenance window closed")
    );
    assert!(request.end_time.is_some());
    assert!(
        harness
            .tasks(id)
            .iter()
            .all(|t| t.status == HostRoleStatus::Aborted)
    );
    assert!(
        harness
            .store
            .stages(id)?
            .iter()
            .all(|s| s.status == HostRoleStatus::Aborted)
    );

    let request_events: Vec<_> = harness
        .drain_events()
        .into_iter()
        .filter(|e| matches!(e, StatusEvent::RequestStatusChanged { .. }))
        .collect();
    assert_eq!(request_events.len(), 1);

    // The late report from the cancelled attempt changes nothing, and the
    // scheduler has nothing left to do.
    harness.report(&running, ReportStatus::Completed, t0 + secs(1));
    let report = harness.tick(t0 + secs(2));
    assert!(report.is_idle());
    assert_eq!(harness.transport.executions().len(), 1);
    assert_eq!(harness.request(id).status, HostRoleStatus::Aborted);
    Ok(())
}

#[test]
fn aborting_a_finished_request_is_a_noop() -> TestResult {
    let harness = Harness::new();
    let t0 = Utc::now();
    let id = start_hdfs(&harness);
    let finished = harness.drive(id, t0);
    assert_eq!(finished.status, HostRoleStatus::Completed);

    assert_eq!(harness.control.abort_request(id, "too late")?, 0);
    let request = harness.request(id);
    assert_eq!(request.status, HostRoleStatus::Completed);
    assert_eq!(request.abort_reason, None);
    Ok(())
}

/// NAMENODE in a skippable Stage, then DATANODE.
fn skippable_first_stage(policy: FailurePolicy) -> RequestPlan {
    let task = |host: &str, role: &str| TaskPlan {
        host: host.to_string(),
        service: "HDFS".to_string(),
        role: role.to_string(),
        command: RoleCommand::Start,
        params: Default::default(),
        timeout_secs: 600,
        max_attempts: 1,
        retry_enabled: false,
    };
    RequestPlan {
        cluster: CLUSTER.to_string(),
        context: "Start HDFS".to_string(),
        created_at: Utc::now(),
        failure_policy: policy,
        kind: RequestKind::Operations,
        stages: vec![
            StagePlan {
                name: "NAMENODE START".to_string(),
                flags: StageFlags {
                    skippable: true,
                    ..StageFlags::default()
                },
                tasks: vec![task("h1", "NAMENODE")],
            },
            StagePlan {
                name: "DATANODE START".to_string(),
                flags: StageFlags::default(),
                tasks: vec![task("h2", "DATANODE")],
            },
        ],
    }
}

#[test]
fn abort_keeps_a_failure_the_policy_does_not_tolerate() -> TestResult {
    let harness = Harness::new();
    let t0 = Utc::now();

    for (policy, first_stage) in [
        (FailurePolicy::Abort, HostRoleStatus::Failed),
        (FailurePolicy::ContinueOnSkippable, HostRoleStatus::Completed),
    ] {
        let id = harness.store.insert_request(&skippable_first_stage(policy))?;
        harness.tick(t0);
        let nn = harness.in_progress(id).remove(0);
        harness.report(&nn, ReportStatus::Failed, t0 + secs(1));

        // The operator aborts before the next tick derives the Stage status.
        assert_eq!(harness.control.abort_request(id, "giving up")?, 1);

        let stages = harness.store.stages(id)?;
        assert_eq!(stages[0].status, first_stage, "{policy:?}");
        assert_eq!(stages[1].status, HostRoleStatus::Aborted, "{policy:?}");
        assert_eq!(harness.request(id).status, HostRoleStatus::Aborted);
    }
    Ok(())
}

#[test]
fn abort_of_unknown_request_fails() {
    let harness = Harness::new();
    let err = harness
        .control
        .abort_request(RequestId(99), "nope")
        .unwrap_err();
    assert!(matches!(err, ShepherdError::UnknownRequest(_)), "{err}");
}

#[test]
fn resuming_a_task_that_is_not_held_is_rejected() {
    let harness = Harness::new();
    let t0 = Utc::now();
    let id = start_hdfs(&harness);
    harness.tick(t0);
    let running = harness.in_progress(id).remove(0);

    let err = harness
        .control
        .resume_holding(HoldTarget::Task(running.id), HoldingAction::Skip)
        .unwrap_err();
    assert!(matches!(err, ShepherdError::ActionRejected(_)), "{err}");

    let err = harness
        .control
        .resume_holding(HoldTarget::Stage(running.stage_id), HoldingAction::Retry)
        .unwrap_err();
    assert!(matches!(err, ShepherdError::ActionRejected(_)), "{err}");
    assert_eq!(
        harness.control.task_status(running.id).unwrap().status,
        HostRoleStatus::InProgress
    );
}

#[test]
fn status_views_break_down_by_stage() -> TestResult {
    let harness = Harness::new();
    let t0 = Utc::now();
    let id = start_hdfs(&harness);

    let view = harness.control.request_status(id)?;
    assert_eq!(view.request.context, "Start HDFS");
    assert_eq!(view.stages.len(), 2);
    assert_eq!(view.summary.total(), 3);
    assert_eq!(view.percent_complete, 0.0);

    harness.tick(t0);
    harness.complete_running(id, t0 + secs(1));
    harness.tick(t0 + secs(2));

    let view = harness.control.request_status(id)?;
    assert_eq!(view.request.status, HostRoleStatus::InProgress);
    assert_eq!(view.stages[0].stage.status, HostRoleStatus::Completed);
    assert_eq!(view.stages[1].summary.count(HostRoleStatus::InProgress), 2);
    assert!((view.percent_complete - 100.0 / 3.0).abs() < 1e-9);

    let stage = harness.control.stage_status(view.stages[1].stage.id)?;
    assert_eq!(stage.tasks.len(), 2);

    let json = serde_json::to_value(&view)?;
    assert_eq!(json["request"]["status"], "IN_PROGRESS");
    Ok(())
}

#[test]
fn requests_are_listed_oldest_first() -> TestResult {
    let harness = Harness::new();
    let first = start_hdfs(&harness);
    let second = start_hdfs(&harness);

    let ids: Vec<_> = harness
        .control
        .list_requests()?
        .into_iter()
        .map(|r| r.id)
        .collect();
    assert_eq!(ids, vec![first, second]);
    assert!(first < second);
    Ok(())
}

#[test]
fn unknown_service_state_is_an_error() {
    let harness = Harness::new();
    assert!(harness.control.service_state(CLUSTER, "HBASE").is_err());
    assert!(harness.control.service_state("nope", "HDFS").is_err());
}
