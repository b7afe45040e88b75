//! Sequential stage execution with persisted progress.
//!
//! States move `NotStarted → Running(i) → {Running(i+1) | Failed(i) | Complete}`.
//! Progress is saved only after a stage fully succeeds and removed once the
//! last stage is done, so the record always names the last stage it is safe
//! to resume after.

mod registry;

pub use registry::StageRegistry;

use crate::cancellation::CancellationToken;
use crate::errors::{DeployError, Result};
use crate::events::{EventSink, LoggingEventSink};
use crate::progress::ProgressStore;
use crate::stages::StageContext;
use parking_lot::Mutex;
use serde_json::json;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

/// Where a run is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrchestratorState {
    /// `run` has not been called.
    NotStarted,
    /// Stage `i` is executing.
    Running(usize),
    /// Stage `i` failed or was interrupted.
    Failed(usize),
    /// Every stage succeeded.
    Complete,
}

impl fmt::Display for OrchestratorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotStarted => f.write_str("not started"),
            Self::Running(i) => write!(f, "running stage {i}"),
            Self::Failed(i) => write!(f, "failed at stage {i}"),
            Self::Complete => f.write_str("complete"),
        }
    }
}

/// Summary of a completed run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    /// Stages executed, in order.
    pub executed: Vec<usize>,
    /// Stages skipped because an earlier run completed them.
    pub skipped: Vec<usize>,
    /// State the run ended in.
    pub final_state: OrchestratorState,
    /// Wall-clock duration.
    pub duration: Duration,
}

/// Runs a [`StageRegistry`] from a start stage to the end.
pub struct Orchestrator {
    registry: StageRegistry,
    store: Arc<dyn ProgressStore>,
    events: Arc<dyn EventSink>,
    cancel: Arc<CancellationToken>,
    state: Mutex<OrchestratorState>,
}

impl fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Orchestrator")
            .field("stages", &self.registry.len())
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl Orchestrator {
    /// Creates an orchestrator that logs lifecycle events.
    #[must_use]
    pub fn new(registry: StageRegistry, store: Arc<dyn ProgressStore>) -> Self {
        Self {
            registry,
            store,
            events: Arc::new(LoggingEventSink::default()),
            cancel: Arc::new(CancellationToken::new()),
            state: Mutex::new(OrchestratorState::NotStarted),
        }
    }

    /// Sends lifecycle events to `events`.
    #[must_use]
    pub fn with_event_sink(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    /// Uses `cancel` to interrupt the active stage.
    #[must_use]
    pub fn with_cancellation(mut self, cancel: Arc<CancellationToken>) -> Self {
        self.cancel = cancel;
        self
    }

    /// The stage registry.
    pub fn registry(&self) -> &StageRegistry {
        &self.registry
    }

    /// The cancellation token the run listens to.
    pub fn cancellation(&self) -> Arc<CancellationToken> {
        Arc::clone(&self.cancel)
    }

    /// Current state.
    pub fn state(&self) -> OrchestratorState {
        *self.state.lock()
    }

    fn transition(&self, next: OrchestratorState) {
        *self.state.lock() = next;
    }

    /// Runs stages `start_stage..=N`, skipping the ones before it.
    ///
    /// `start_stage == N + 1` means everything already ran: every stage is
    /// skipped and the progress record is removed.
    ///
    /// # Errors
    ///
    /// - [`DeployError::InvalidResumeStage`] if `start_stage` is out of range.
    /// - [`DeployError::Preflight`] if credentials are invalid when resuming.
    /// - [`DeployError::StageExecution`] if a stage fails or its progress
    ///   cannot be saved.
    /// - [`DeployError::Interrupted`] if the cancellation token fires.
    pub async fn run(&self, ctx: &StageContext, start_stage: usize) -> Result<RunReport> {
        let total = self.registry.len();
        if start_stage == 0 || start_stage > total + 1 {
            return Err(DeployError::InvalidResumeStage {
                requested: start_stage,
                max: total,
            });
        }

        let started = Instant::now();
        let mut report = RunReport {
            executed: Vec::new(),
            skipped: Vec::new(),
            final_state: OrchestratorState::NotStarted,
            duration: Duration::ZERO,
        };

        self.events
            .emit(
                "pipeline.started",
                Some(json!({
                    "name": ctx.config.name,
                    "stages": total,
                    "start_stage": start_stage,
                })),
            )
            .await;

        if start_stage > 1 {
            let identity = ctx
                .provider
                .validate_credentials()
                .await
                .map_err(|e| DeployError::Preflight(format!("invalid credentials: {e}")))?;
            info!(identity = %identity, start_stage, "Resuming run, credentials valid");
        }

        for (index, stage) in self.registry.iter() {
            let name = stage.name().to_string();

            if index < start_stage {
                info!(stage = index, stage_name = %name, "Skipping stage completed in a previous run");
                self.events
                    .emit("stage.skipped", Some(json!({ "stage": index, "stage_name": name })))
                    .await;
                report.skipped.push(index);
                continue;
            }

            if let Err(err) = self.run_stage(ctx, index, stage.as_ref()).await {
                self.transition(OrchestratorState::Failed(index));
                return Err(err);
            }
            report.executed.push(index);
        }

        self.transition(OrchestratorState::Complete);
        if let Err(e) = self.store.reset() {
            warn!(
                error = %e,
                location = %self.store.location(),
                "Deployment complete but the progress record could not be removed; run --reset-progress"
            );
        }
        report.final_state = OrchestratorState::Complete;
        report.duration = started.elapsed();

        info!(
            executed = report.executed.len(),
            skipped = report.skipped.len(),
            duration_ms = u64::try_from(report.duration.as_millis()).unwrap_or(u64::MAX),
            "Deployment complete"
        );
        self.events
            .emit(
                "pipeline.completed",
                Some(json!({
                    "executed": report.executed,
                    "skipped": report.skipped,
                })),
            )
            .await;
        Ok(report)
    }

    async fn run_stage(
        &self,
        ctx: &StageContext,
        index: usize,
        stage: &dyn crate::stages::Stage,
    ) -> Result<()> {
        let name = stage.name().to_string();
        let total = self.registry.len();

        if self.cancel.is_cancelled() {
            return Err(self.interrupted(ctx, index, &name).await);
        }

        self.transition(OrchestratorState::Running(index));
        info!(stage = index, stage_name = %name, "Stage {index}/{total}: {name}");
        self.events
            .emit("stage.started", Some(json!({ "stage": index, "stage_name": name })))
            .await;

        let stage_started = Instant::now();
        let outcome = tokio::select! {
            biased;
            () = self.cancel.cancelled() => None,
            result = stage.execute(ctx) => Some(result),
        };

        let result = match outcome {
            None => return Err(self.interrupted(ctx, index, &name).await),
            Some(result) => result.and_then(|()| {
                self.store
                    .save(index, &name, &ctx.config)
                    .map_err(DeployError::from)
            }),
        };

        match result {
            Ok(()) => {
                info!(
                    stage = index,
                    stage_name = %name,
                    duration_ms = u64::try_from(stage_started.elapsed().as_millis()).unwrap_or(u64::MAX),
                    "Stage completed"
                );
                self.events
                    .emit("stage.completed", Some(json!({ "stage": index, "stage_name": name })))
                    .await;
                Ok(())
            }
            Err(source) => {
                let resume_command = ctx.resume_command(index);
                error!(stage = index, stage_name = %name, error = %source, "Stage failed");
                self.events
                    .emit(
                        "stage.failed",
                        Some(json!({
                            "stage": index,
                            "stage_name": name,
                            "error": source.to_string(),
                            "resume_command": resume_command,
                        })),
                    )
                    .await;
                Err(DeployError::StageExecution {
                    index,
                    name,
                    source: Box::new(source),
                    resume_command,
                })
            }
        }
    }

    async fn interrupted(&self, ctx: &StageContext, index: usize, name: &str) -> DeployError {
        let resume_command = ctx.resume_command(index);
        warn!(
            stage = index,
            stage_name = name,
            reason = ?self.cancel.reason(),
            "Run interrupted; progress kept at the last completed stage"
        );
        self.events
            .emit(
                "pipeline.interrupted",
                Some(json!({
                    "stage": index,
                    "stage_name": name,
                    "reason": self.cancel.reason(),
                    "resume_command": resume_command,
                })),
            )
            .await;
        DeployError::Interrupted {
            index,
            name: name.to_string(),
            resume_command,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Configuration, DeploySettings};
    use crate::events::CollectingEventSink;
    use crate::progress::InMemoryProgressStore;
    use crate::prompt::AutoConfirm;
    use crate::stages::Stage;
    use crate::testing::{FailingStage, InMemoryCloud, RecordingStage, StageLog};
    use pretty_assertions::assert_eq;

    struct Harness {
        orchestrator: Orchestrator,
        store: Arc<InMemoryProgressStore>,
        events: Arc<CollectingEventSink>,
        log: StageLog,
        ctx: StageContext,
        cloud: Arc<InMemoryCloud>,
    }

    fn harness(fail_at: Option<usize>) -> Harness {
        let log = StageLog::new();
        let stages: Vec<Arc<dyn Stage>> = (1..=5)
            .map(|i| -> Arc<dyn Stage> {
                if Some(i) == fail_at {
                    Arc::new(FailingStage::new(format!("stage-{i}"), log.clone()))
                } else {
                    Arc::new(RecordingStage::new(format!("stage-{i}"), log.clone()))
                }
            })
            .collect();
        let store = Arc::new(InMemoryProgressStore::new());
        let events = Arc::new(CollectingEventSink::new());
        let cloud = Arc::new(InMemoryCloud::new());
        let orchestrator = Orchestrator::new(StageRegistry::new(stages).unwrap(), store.clone())
            .with_event_sink(events.clone());
        let ctx = StageContext::new(
            Configuration::new("demo"),
            cloud.clone(),
            Arc::new(DeploySettings::default()),
            Arc::new(AutoConfirm),
        );
        Harness {
            orchestrator,
            store,
            events,
            log,
            ctx,
            cloud,
        }
    }

    #[tokio::test]
    async fn test_full_run_saves_each_stage_then_resets() {
        let h = harness(None);
        let report = h.orchestrator.run(&h.ctx, 1).await.unwrap();

        assert_eq!(report.executed, vec![1, 2, 3, 4, 5]);
        assert!(report.skipped.is_empty());
        assert_eq!(report.final_state, OrchestratorState::Complete);
        assert_eq!(h.store.history(), vec![1, 2, 3, 4, 5]);
        assert!(h.store.current().is_none());
        assert_eq!(h.orchestrator.state(), OrchestratorState::Complete);
        assert_eq!(h.cloud.calls("validate_credentials"), 0);
        assert_eq!(h.events.event_types().first().map(String::as_str), Some("pipeline.started"));
        assert_eq!(h.events.event_types().last().map(String::as_str), Some("pipeline.completed"));
    }

    #[tokio::test]
    async fn test_failure_stops_without_saving() {
        let h = harness(Some(3));
        let err = h.orchestrator.run(&h.ctx, 1).await.unwrap_err();

        match &err {
            DeployError::StageExecution {
                index,
                name,
                resume_command,
                ..
            } => {
                assert_eq!(*index, 3);
                assert_eq!(name, "stage-3");
                assert!(resume_command.contains("--resume-from-stage 3"));
            }
            other => panic!("unexpected: {other:?}"),
        }
        assert_eq!(h.store.current().unwrap().last_completed_stage, 2);
        assert_eq!(h.log.entries(), vec!["stage-1", "stage-2", "stage-3"]);
        assert_eq!(h.orchestrator.state(), OrchestratorState::Failed(3));
        assert_eq!(h.events.events_of_type("stage.failed").len(), 1);
    }

    #[tokio::test]
    async fn test_resume_skips_earlier_stages_and_validates_credentials() {
        let h = harness(None);
        let ctx = h.ctx.clone().with_start_stage(3);
        let report = h.orchestrator.run(&ctx, 3).await.unwrap();

        assert_eq!(report.skipped, vec![1, 2]);
        assert_eq!(report.executed, vec![3, 4, 5]);
        assert_eq!(h.log.entries(), vec!["stage-3", "stage-4", "stage-5"]);
        assert_eq!(h.cloud.calls("validate_credentials"), 1);
        assert_eq!(h.events.events_of_type("stage.skipped").len(), 2);
    }

    #[tokio::test]
    async fn test_resume_with_invalid_credentials_runs_nothing() {
        let h = harness(None);
        h.cloud.set_credentials_valid(false);

        let err = h.orchestrator.run(&h.ctx, 2).await.unwrap_err();
        assert!(matches!(err, DeployError::Preflight(_)));
        assert!(h.log.entries().is_empty());
    }

    #[tokio::test]
    async fn test_start_past_last_stage_completes_and_resets() {
        let h = harness(None);
        let report = h.orchestrator.run(&h.ctx, 6).await.unwrap();

        assert!(report.executed.is_empty());
        assert_eq!(report.skipped.len(), 5);
        assert_eq!(h.store.reset_count(), 1);
    }

    #[tokio::test]
    async fn test_reset_failure_after_last_stage_still_succeeds() {
        let h = harness(None);
        h.store.fail_resets(true);

        let report = h.orchestrator.run(&h.ctx, 1).await.unwrap();

        assert_eq!(report.final_state, OrchestratorState::Complete);
        assert_eq!(h.orchestrator.state(), OrchestratorState::Complete);
        assert_eq!(h.store.current().unwrap().last_completed_stage, 5);
        assert_eq!(h.events.event_types().last().map(String::as_str), Some("pipeline.completed"));
    }

    #[tokio::test]
    async fn test_out_of_range_start() {
        let h = harness(None);
        assert!(matches!(
            h.orchestrator.run(&h.ctx, 7).await,
            Err(DeployError::InvalidResumeStage { requested: 7, max: 5 })
        ));
        assert!(matches!(
            h.orchestrator.run(&h.ctx, 0).await,
            Err(DeployError::InvalidResumeStage { .. })
        ));
    }

    #[tokio::test]
    async fn test_save_failure_fails_the_stage() {
        let h = harness(None);
        h.store.fail_writes(true);

        let err = h.orchestrator.run(&h.ctx, 1).await.unwrap_err();
        match err {
            DeployError::StageExecution { index, source, .. } => {
                assert_eq!(index, 1);
                assert!(matches!(*source, DeployError::Progress(_)));
            }
            other => panic!("unexpected: {other:?}"),
        }
        assert_eq!(h.log.entries(), vec!["stage-1"]);
    }

    #[tokio::test]
    async fn test_cancelled_before_start_is_interrupted() {
        let h = harness(None);
        h.orchestrator.cancellation().cancel("operator interrupt");

        let err = h.orchestrator.run(&h.ctx, 1).await.unwrap_err();
        assert!(matches!(err, DeployError::Interrupted { index: 1, .. }));
        assert!(h.log.entries().is_empty());
        assert!(h.store.current().is_none());
        assert_eq!(h.events.events_of_type("pipeline.interrupted").len(), 1);
    }
}
