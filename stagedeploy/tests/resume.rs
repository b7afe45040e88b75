//! Failure, resume and configuration recall across separate runs.

use pretty_assertions::assert_eq;
use stagedeploy::config::{ConfigResolver, Configuration, DeploySettings, InvocationConfig};
use stagedeploy::errors::DeployError;
use stagedeploy::orchestrator::{Orchestrator, StageRegistry};
use stagedeploy::progress::{FileProgressStore, InMemoryProgressStore, ProgressStore};
use stagedeploy::prompt::{AutoConfirm, Confirm};
use stagedeploy::stages::{Stage, StageContext};
use stagedeploy::testing::{FailingStage, InMemoryCloud, RecordingStage, ScriptedConfirm, StageLog};
use std::sync::Arc;

const STAGES: usize = 8;

fn registry(log: &StageLog, flaky: Option<(usize, usize)>) -> StageRegistry {
    let stages: Vec<Arc<dyn Stage>> = (1..=STAGES)
        .map(|i| -> Arc<dyn Stage> {
            let name = format!("stage-{i}");
            match flaky {
                Some((index, failures)) if index == i => {
                    Arc::new(FailingStage::times(name, log.clone(), failures))
                }
                _ => Arc::new(RecordingStage::new(name, log.clone())),
            }
        })
        .collect();
    StageRegistry::new(stages).unwrap()
}

fn context(config: Configuration, confirm: Arc<dyn Confirm>) -> StageContext {
    StageContext::new(
        config,
        Arc::new(InMemoryCloud::new()),
        Arc::new(DeploySettings::default()),
        confirm,
    )
}

fn resolver() -> ConfigResolver {
    ConfigResolver::with_entropy(|| "0a1b2c3d".to_string())
}

#[tokio::test]
async fn stage_three_fails_then_resume_retries_it() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(FileProgressStore::new(dir.path().join(".stagedeploy-progress")));
    let log = StageLog::new();
    let registry = registry(&log, Some((3, 1)));

    // First run: fresh, stage 3 fails.
    let explicit = InvocationConfig {
        name: Some("demo".to_string()),
        region: Some("eu-west-1".to_string()),
        ..InvocationConfig::default()
    };
    let resolution = resolver().resolve(&explicit, 0, None).unwrap();
    assert_eq!(resolution.configuration.name, "demo-0a1b2c");

    let first = Orchestrator::new(registry.clone(), store.clone());
    let err = first
        .run(&context(resolution.configuration.clone(), Arc::new(AutoConfirm)), 1)
        .await
        .unwrap_err();

    let resume_command = err.resume_command().unwrap().to_string();
    assert!(matches!(err, DeployError::StageExecution { index: 3, .. }));
    assert!(resume_command.contains("--resume-from-stage 3"));
    assert!(resume_command.contains("--name demo-0a1b2c"));
    let record = store.load().unwrap().unwrap();
    assert_eq!(record.last_completed_stage, 2);
    assert_eq!(record.last_completed_stage_name, "stage-2");

    // Second run: operator passes only --resume-from-stage 3.
    let stored = store.load().unwrap();
    let resolution = resolver()
        .resolve(&InvocationConfig::default(), 3, stored.as_ref())
        .unwrap();
    assert_eq!(resolution.configuration.name, "demo-0a1b2c");
    assert_eq!(resolution.configuration.region, "eu-west-1");

    let confirm = Arc::new(ScriptedConfirm::new([]));
    let start = resolver()
        .plan_start(3, stored.as_ref(), &resolution.configuration, STAGES, confirm.as_ref())
        .await
        .unwrap();
    assert_eq!(start, 3);
    assert!(confirm.questions().is_empty());

    let second = Orchestrator::new(registry, store.clone());
    let ctx = context(resolution.configuration, confirm).with_start_stage(start);
    let report = second.run(&ctx, start).await.unwrap();

    assert_eq!(report.skipped, vec![1, 2]);
    assert_eq!(report.executed, vec![3, 4, 5, 6, 7, 8]);
    assert_eq!(log.count("stage-1"), 1);
    assert_eq!(log.count("stage-2"), 1);
    assert_eq!(log.count("stage-3"), 2);
    assert!(store.load().unwrap().is_none());
}

#[tokio::test]
async fn declined_rerun_skips_completed_work() {
    let log = StageLog::new();
    let store = Arc::new(InMemoryProgressStore::new());
    let config = Configuration::new("demo");
    store.save(5, "stage-5", &config).unwrap();

    let stored = store.load().unwrap();
    let confirm = ScriptedConfirm::new([false]);
    let start = resolver()
        .plan_start(2, stored.as_ref(), &config, STAGES, &confirm)
        .await
        .unwrap();
    assert_eq!(start, 6);

    let orchestrator = Orchestrator::new(registry(&log, None), store.clone());
    let ctx = context(config, Arc::new(AutoConfirm)).with_start_stage(start);
    orchestrator.run(&ctx, start).await.unwrap();

    assert_eq!(log.entries(), vec!["stage-6", "stage-7", "stage-8"]);
}

#[tokio::test]
async fn confirmed_rerun_executes_from_requested_stage() {
    let log = StageLog::new();
    let store = Arc::new(InMemoryProgressStore::new());
    let config = Configuration::new("demo");
    store.save(5, "stage-5", &config).unwrap();

    let stored = store.load().unwrap();
    let confirm = ScriptedConfirm::new([true]);
    let start = resolver()
        .plan_start(2, stored.as_ref(), &config, STAGES, &confirm)
        .await
        .unwrap();
    assert_eq!(start, 2);

    let orchestrator = Orchestrator::new(registry(&log, None), store.clone());
    let ctx = context(config, Arc::new(AutoConfirm)).with_start_stage(start);
    let report = orchestrator.run(&ctx, start).await.unwrap();

    assert_eq!(report.skipped, vec![1]);
    assert_eq!(log.count("stage-1"), 0);
    assert_eq!(log.entries().len(), 7);
}

#[tokio::test]
async fn progress_index_never_decreases_within_a_run() {
    let log = StageLog::new();
    let store = Arc::new(InMemoryProgressStore::new());
    let orchestrator = Orchestrator::new(registry(&log, Some((7, usize::MAX))), store.clone());

    let _ = orchestrator
        .run(&context(Configuration::new("demo"), Arc::new(AutoConfirm)), 1)
        .await;

    let history = store.history();
    assert_eq!(history, vec![1, 2, 3, 4, 5, 6]);
    assert!(history.windows(2).all(|w| w[0] <= w[1]));
    assert_eq!(store.reset_count(), 0);
}

#[test]
fn explicit_values_beat_stored_ones() {
    let store = InMemoryProgressStore::new();
    let stored_config = Configuration::new("stored-abc123")
        .with_region("ap-south-1")
        .with_environment("prod")
        .with_profile("ops");
    store.save(4, "stage-4", &stored_config).unwrap();
    let stored = store.load().unwrap();

    let explicit = InvocationConfig {
        environment: Some("staging".to_string()),
        ..InvocationConfig::default()
    };
    let resolved = resolver()
        .resolve(&explicit, 5, stored.as_ref())
        .unwrap()
        .configuration;

    assert_eq!(resolved.name, "stored-abc123");
    assert_eq!(resolved.region, "ap-south-1");
    assert_eq!(resolved.environment, "staging");
    assert_eq!(resolved.profile, "ops");
}
