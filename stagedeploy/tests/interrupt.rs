//! Operator interrupts while a stage is running.

use futures::FutureExt;
use stagedeploy::cancellation::CancellationToken;
use stagedeploy::config::{Configuration, DeploySettings};
use stagedeploy::errors::DeployError;
use stagedeploy::events::CollectingEventSink;
use stagedeploy::orchestrator::{Orchestrator, OrchestratorState, StageRegistry};
use stagedeploy::progress::InMemoryProgressStore;
use stagedeploy::prompt::AutoConfirm;
use stagedeploy::stages::{FnStage, Stage, StageContext};
use stagedeploy::testing::{InMemoryCloud, PendingConfirm, PendingStage, RecordingStage, StageLog};
use std::sync::Arc;
use std::time::Duration;

#[tokio::test]
async fn interrupt_keeps_progress_at_last_completed_stage() {
    let log = StageLog::new();
    let stages: Vec<Arc<dyn Stage>> = vec![
        Arc::new(RecordingStage::new("first", log.clone())),
        Arc::new(RecordingStage::new("second", log.clone())),
        Arc::new(PendingStage::new("third", log.clone())),
        Arc::new(RecordingStage::new("fourth", log.clone())),
    ];
    let store = Arc::new(InMemoryProgressStore::new());
    let events = Arc::new(CollectingEventSink::new());
    let cancel = Arc::new(CancellationToken::new());
    let orchestrator = Orchestrator::new(StageRegistry::new(stages).unwrap(), store.clone())
        .with_event_sink(events.clone())
        .with_cancellation(cancel.clone());

    let ctx = StageContext::new(
        Configuration::new("demo"),
        Arc::new(InMemoryCloud::new()),
        Arc::new(DeploySettings::default()),
        Arc::new(AutoConfirm),
    );

    let interrupter = tokio::spawn({
        let cancel = cancel.clone();
        async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            cancel.cancel("interrupted by operator");
        }
    });

    let err = tokio::time::timeout(Duration::from_secs(5), orchestrator.run(&ctx, 1))
        .await
        .expect("run should stop once cancelled")
        .unwrap_err();
    interrupter.await.unwrap();

    match &err {
        DeployError::Interrupted {
            index,
            name,
            resume_command,
        } => {
            assert_eq!(*index, 3);
            assert_eq!(name, "third");
            assert!(resume_command.contains("--resume-from-stage 3"));
        }
        other => panic!("unexpected: {other:?}"),
    }
    assert_eq!(store.current().unwrap().last_completed_stage, 2);
    assert_eq!(log.entries(), vec!["first", "second", "third"]);
    assert_eq!(orchestrator.state(), OrchestratorState::Failed(3));
    assert_eq!(events.events_of_type("pipeline.interrupted").len(), 1);
    assert!(events.events_of_type("stage.completed").len() == 2);
}

#[tokio::test]
async fn interrupt_while_waiting_for_an_answer() {
    let log = StageLog::new();
    let asking = FnStage::new("ask", |ctx| {
        async move {
            if ctx.confirm.confirm("Overwrite existing resources?").await {
                Ok(())
            } else {
                Err(DeployError::Conflict {
                    summary: "declined".to_string(),
                })
            }
        }
        .boxed()
    });
    let stages: Vec<Arc<dyn Stage>> = vec![
        Arc::new(RecordingStage::new("first", log.clone())),
        Arc::new(asking),
        Arc::new(RecordingStage::new("third", log.clone())),
    ];
    let store = Arc::new(InMemoryProgressStore::new());
    let cancel = Arc::new(CancellationToken::new());
    let orchestrator = Orchestrator::new(StageRegistry::new(stages).unwrap(), store.clone())
        .with_cancellation(cancel.clone());

    let operator = Arc::new(PendingConfirm::new());
    let ctx = StageContext::new(
        Configuration::new("demo"),
        Arc::new(InMemoryCloud::new()),
        Arc::new(DeploySettings::default()),
        operator.clone(),
    );

    let interrupter = tokio::spawn({
        let cancel = cancel.clone();
        async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            cancel.cancel("interrupted by operator");
        }
    });

    let err = tokio::time::timeout(Duration::from_secs(5), orchestrator.run(&ctx, 1))
        .await
        .expect("an unanswered question must not hold up the interrupt")
        .unwrap_err();
    interrupter.await.unwrap();

    assert!(matches!(err, DeployError::Interrupted { index: 2, .. }));
    assert_eq!(operator.questions(), vec!["Overwrite existing resources?"]);
    assert_eq!(store.current().unwrap().last_completed_stage, 1);
    assert_eq!(log.entries(), vec!["first"]);
}
