//! Orchestrator and queue runner tests

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use provisioner::deploy::executor::{ExecutionStatus, CANCELLED_MESSAGE};
use provisioner::deploy::orchestrator::{Orchestrator, RunResult};
use provisioner::deploy::queue::{NextOperation, OperationQueue, INTERRUPTED_MESSAGE};
use provisioner::deploy::runner::{self, RunnerExit};
use provisioner::errors::ProvisionError;
use provisioner::filesys::dir::Dir;
use provisioner::models::operation::{DeploymentState, OperationStatus};
use provisioner::state::memory::MemoryBacking;
use provisioner::state::store::StateStore;
use provisioner::topology::StaticTopology;

use crate::support::{
    descriptors, failure_frames, harness, harness_with, success_frames, FailingBacking, Script,
    ScriptedTransport, SlowTopology, SESSION,
};

fn never() -> Pin<Box<dyn Future<Output = ()> + Send>> {
    Box::pin(std::future::pending())
}

async fn stored(backing: &MemoryBacking) -> DeploymentState {
    serde_json::from_value(backing.get(SESSION).await.unwrap()).unwrap()
}

async fn wait_until_active(orchestrator: &Orchestrator) {
    for _ in 0..200 {
        if orchestrator.active_operation().is_some() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("no execution became active");
}

#[tokio::test]
async fn test_run_next_requires_initialize() {
    let h = harness(vec![]);
    assert!(matches!(
        h.orchestrator.run_next(None).await,
        Err(ProvisionError::ValidationError(_))
    ));
}

#[tokio::test]
async fn test_runner_completes_queue() {
    let h = harness(vec![
        Script::Frames(success_frames("Deploy Keycloak")),
        Script::Frames(success_frames("Deploy Harbor")),
    ]);
    h.orchestrator
        .initialize(descriptors(&["keycloak", "harbor"]))
        .await
        .unwrap();

    let exit = runner::run(
        &runner::Options::default(),
        &h.orchestrator,
        None,
        |_| async {},
        never(),
    )
    .await
    .unwrap();

    assert_eq!(exit, RunnerExit::Complete);
    assert_eq!(h.transport.opened().len(), 2);

    let state = h.orchestrator.snapshot().await.unwrap();
    assert_eq!(state.current_index, 2);
    assert_eq!(state.completed_ids.len(), 2);
    assert_eq!(stored(&h.remote).await, state);
    assert_eq!(stored(&h.local).await, state);
}

#[tokio::test]
async fn test_auto_advance_stops_after_failure() {
    let h = harness(vec![
        Script::Frames(success_frames("Deploy Keycloak")),
        Script::Frames(failure_frames("Deploy Harbor", "Playbook execution failed")),
        Script::Frames(success_frames("Deploy Gitea")),
    ]);
    h.orchestrator
        .initialize(descriptors(&["keycloak", "harbor", "gitea"]))
        .await
        .unwrap();

    let exit = runner::run(
        &runner::Options::default(),
        &h.orchestrator,
        None,
        |_| async {},
        never(),
    )
    .await
    .unwrap();

    match exit {
        RunnerExit::Halted(report) => {
            assert_eq!(report.operation_id, "harbor");
            assert_eq!(report.outcome.status, ExecutionStatus::Error);
        }
        other => panic!("expected halt, got {:?}", other),
    }
    assert_eq!(h.transport.opened().len(), 2);

    let state = h.orchestrator.snapshot().await.unwrap();
    assert_eq!(state.current_index, 1);
    let harbor = state.operation("harbor").unwrap();
    assert_eq!(harbor.status, OperationStatus::Failed);
    assert_eq!(harbor.error.as_deref(), Some("Playbook execution failed"));
    assert_eq!(
        h.orchestrator.last_run().unwrap().outcome.message,
        "Playbook execution failed"
    );
}

#[tokio::test]
async fn test_step_mode_runs_one_operation() {
    let h = harness(vec![Script::Frames(success_frames("Deploy Keycloak"))]);
    h.orchestrator
        .initialize(descriptors(&["keycloak", "harbor"]))
        .await
        .unwrap();
    let options = runner::Options {
        auto_advance: false,
        ..Default::default()
    };

    let exit = runner::run(&options, &h.orchestrator, None, |_| async {}, never())
        .await
        .unwrap();

    assert!(matches!(exit, RunnerExit::Stepped(report) if report.operation_id == "keycloak"));
    let progress = h.orchestrator.progress().await.unwrap();
    assert_eq!(progress.total, 2);
    assert_eq!(progress.completed, 1);
    assert_eq!(progress.current_index, 1);
    assert_eq!(progress.current_title.as_deref(), Some("Deploy harbor"));
}

#[tokio::test]
async fn test_blocked_until_retry() {
    let h = harness(vec![
        Script::Frames(failure_frames("Deploy Keycloak", "ssh timeout")),
        Script::Frames(success_frames("Deploy Keycloak")),
        Script::Frames(success_frames("Deploy Harbor")),
    ]);
    h.orchestrator
        .initialize(descriptors(&["keycloak", "harbor"]))
        .await
        .unwrap();

    h.orchestrator.run_next(None).await.unwrap();
    assert!(matches!(
        h.orchestrator.run_next(None).await.unwrap(),
        RunResult::Blocked(op) if op.id == "keycloak"
    ));

    let retried = h.orchestrator.retry_failed().await.unwrap();
    assert_eq!(retried, vec!["keycloak".to_string()]);
    assert_eq!(stored(&h.remote).await.failed_ids.len(), 0);

    let exit = runner::run(
        &runner::Options::default(),
        &h.orchestrator,
        None,
        |_| async {},
        never(),
    )
    .await
    .unwrap();
    assert_eq!(exit, RunnerExit::Complete);
    assert_eq!(h.transport.opened().len(), 3);
}

#[tokio::test]
async fn test_initialize_resumes_stored_progress() {
    let h = harness(vec![Script::Frames(success_frames("Deploy Harbor"))]);
    let mut queue = OperationQueue::from_descriptors(descriptors(&["keycloak", "harbor"])).unwrap();
    queue.mark_completed("keycloak").unwrap();
    h.remote
        .put(SESSION, serde_json::to_value(queue.state()).unwrap())
        .await;

    let state = h
        .orchestrator
        .initialize(descriptors(&["keycloak", "harbor"]))
        .await
        .unwrap();

    assert_eq!(state.current_index, 1);
    // the missing local copy was written back
    assert_eq!(stored(&h.local).await.current_index, 1);

    let result = h.orchestrator.run_next(None).await.unwrap();
    assert!(matches!(result, RunResult::Ran(report) if report.operation_id == "harbor"));
    assert_eq!(
        h.transport.opened(),
        vec!["ansible/40_thinkube/core/harbor/10_deploy.yaml".to_string()]
    );
}

#[tokio::test]
async fn test_initialize_fails_interrupted_operation() {
    let h = harness(vec![]);
    let mut queue = OperationQueue::from_descriptors(descriptors(&["keycloak", "harbor"])).unwrap();
    queue.mark_running("keycloak").unwrap();
    h.local
        .put(SESSION, serde_json::to_value(queue.state()).unwrap())
        .await;

    let state = h
        .orchestrator
        .initialize(descriptors(&["keycloak", "harbor"]))
        .await
        .unwrap();

    let keycloak = state.operation("keycloak").unwrap();
    assert_eq!(keycloak.status, OperationStatus::Failed);
    assert_eq!(keycloak.error.as_deref(), Some(INTERRUPTED_MESSAGE));
    assert!(matches!(
        h.orchestrator.next_operation().await.unwrap(),
        NextOperation::Blocked(op) if op.id == "keycloak"
    ));
}

#[tokio::test]
async fn test_initialize_replaces_state_for_other_queue() {
    let h = harness(vec![]);
    let mut queue = OperationQueue::from_descriptors(descriptors(&["a", "b"])).unwrap();
    queue.mark_completed("a").unwrap();
    h.remote
        .put(SESSION, serde_json::to_value(queue.state()).unwrap())
        .await;

    let state = h
        .orchestrator
        .initialize(descriptors(&["keycloak"]))
        .await
        .unwrap();

    assert_eq!(state.operations.len(), 1);
    assert_eq!(state.current_index, 0);
    assert!(state.completed_ids.is_empty());
    assert_eq!(stored(&h.remote).await, state);
}

#[tokio::test]
async fn test_cancel_persists_failed_state_before_returning() {
    let h = harness(vec![Script::Hang(vec![])]);
    h.orchestrator
        .initialize(descriptors(&["keycloak", "harbor"]))
        .await
        .unwrap();

    let orchestrator = h.orchestrator.clone();
    let run = tokio::spawn(async move { orchestrator.run_next(None).await });
    wait_until_active(&h.orchestrator).await;

    // single flight
    assert!(matches!(
        h.orchestrator.run_next(None).await,
        Err(ProvisionError::ExecutionInProgress(_))
    ));
    assert!(matches!(
        h.orchestrator.retry_failed().await,
        Err(ProvisionError::ExecutionInProgress(_))
    ));

    assert!(h.orchestrator.cancel().await);

    let persisted = stored(&h.remote).await;
    let keycloak = persisted.operation("keycloak").unwrap();
    assert_eq!(keycloak.status, OperationStatus::Failed);
    assert_eq!(keycloak.error.as_deref(), Some(CANCELLED_MESSAGE));

    match run.await.unwrap().unwrap() {
        RunResult::Ran(report) => {
            assert_eq!(report.outcome.status, ExecutionStatus::Cancelled);
            assert!(report.outcome.failure.is_none());
        }
        other => panic!("expected a run, got {:?}", other),
    }
    assert!(h.orchestrator.active_operation().is_none());
    assert!(!h.orchestrator.cancel().await);
}

#[tokio::test]
async fn test_runner_shutdown_cancels_running_operation() {
    let h = harness(vec![Script::Hang(vec![])]);
    h.orchestrator
        .initialize(descriptors(&["keycloak"]))
        .await
        .unwrap();

    let exit = runner::run(
        &runner::Options::default(),
        &h.orchestrator,
        None,
        |_| async {},
        Box::pin(tokio::time::sleep(Duration::from_millis(50))),
    )
    .await
    .unwrap();

    assert_eq!(exit, RunnerExit::Shutdown);
    let state = stored(&h.local).await;
    assert_eq!(state.operations[0].status, OperationStatus::Failed);
    assert_eq!(state.operations[0].error.as_deref(), Some(CANCELLED_MESSAGE));
}

#[tokio::test]
async fn test_runner_shutdown_while_fetching_topology() {
    let h = harness_with(
        vec![Script::Hang(vec![])],
        Arc::new(SlowTopology(Duration::from_millis(200))),
        None,
    );
    h.orchestrator
        .initialize(descriptors(&["keycloak"]))
        .await
        .unwrap();

    let exit = tokio::time::timeout(
        Duration::from_secs(3),
        runner::run(
            &runner::Options::default(),
            &h.orchestrator,
            None,
            |_| async {},
            Box::pin(tokio::time::sleep(Duration::from_millis(50))),
        ),
    )
    .await
    .expect("runner ignored shutdown")
    .unwrap();

    assert_eq!(exit, RunnerExit::Shutdown);
    assert!(h.transport.opened().is_empty());
    assert!(h.orchestrator.active_operation().is_none());

    let state = stored(&h.remote).await;
    assert_eq!(state.operations[0].status, OperationStatus::Failed);
    assert_eq!(state.operations[0].error.as_deref(), Some(CANCELLED_MESSAGE));
}

#[tokio::test]
async fn test_failed_run_writes_failure_log() {
    let dir = Dir::create_temp_dir("provisioner-failures").await.unwrap();
    let h = harness_with(
        vec![
            Script::Frames(success_frames("Deploy Keycloak")),
            Script::Frames(failure_frames("Deploy Harbor", "boom")),
        ],
        Arc::new(StaticTopology("[all]\nnode1\n".to_string())),
        Some(dir.clone()),
    );
    h.orchestrator
        .initialize(descriptors(&["keycloak", "harbor"]))
        .await
        .unwrap();

    h.orchestrator.run_next(None).await.unwrap();
    h.orchestrator.run_next(None).await.unwrap();

    let mut names = Vec::new();
    let mut entries = tokio::fs::read_dir(dir.path()).await.unwrap();
    while let Some(entry) = entries.next_entry().await.unwrap() {
        names.push(entry.file_name().to_string_lossy().to_string());
    }
    assert_eq!(names.len(), 1);
    assert!(names[0].starts_with("harbor-"));
    assert!(names[0].ends_with(".log"));

    let text = dir.file(&names[0]).read_string().await.unwrap();
    assert!(text.starts_with("Operation: harbor (Deploy harbor)\n"));
    assert!(text.contains("Message: boom\n"));
    assert!(text.contains("Return code: 2\n"));

    let task = text.find("[task] (Deploy Harbor)").unwrap();
    let failed = text.find("[failed] (Deploy Harbor) fatal: [node1]").unwrap();
    let complete = text.find("[complete] boom").unwrap();
    assert!(task < failed && failed < complete);

    dir.delete().await.unwrap();
}

#[tokio::test]
async fn test_reset_discards_progress() {
    let h = harness(vec![Script::Frames(failure_frames("Deploy Keycloak", "boom"))]);
    h.orchestrator
        .initialize(descriptors(&["keycloak", "harbor"]))
        .await
        .unwrap();
    h.orchestrator.run_next(None).await.unwrap();

    let state = h.orchestrator.reset().await.unwrap();

    assert!(state
        .operations
        .iter()
        .all(|op| op.status == OperationStatus::Pending));
    assert!(h.orchestrator.last_run().is_none());
    assert_eq!(stored(&h.remote).await, state);
}

#[tokio::test]
async fn test_initialize_fails_without_storage() {
    let store = StateStore::new(Arc::new(FailingBacking), Arc::new(FailingBacking), SESSION);
    let orchestrator = Orchestrator::new(
        store,
        ScriptedTransport::new(vec![]),
        Arc::new(StaticTopology::default()),
    );

    let result = orchestrator.initialize(descriptors(&["keycloak"])).await;

    assert!(matches!(result, Err(ProvisionError::StorageUnavailable(_))));
}
