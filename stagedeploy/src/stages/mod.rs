//! Stage trait and the context stages run with.
//!
//! Stages are the units the orchestrator sequences. Each one must be safe
//! to run again after a failure, because resume retries the failed stage
//! from the top.

mod preflight;

pub use preflight::PreflightStage;

use crate::config::{Configuration, DeploySettings};
use crate::errors::Result;
use crate::namespace::ResourceNamespace;
use crate::polling::PollPolicy;
use crate::ports::CloudProvider;
use crate::prompt::Confirm;
use async_trait::async_trait;
use futures::future::BoxFuture;
use std::fmt::Debug;
use std::sync::Arc;

/// Everything a stage can reach while it runs.
///
/// Cheap to clone; the configuration is shared and never changes after the
/// run starts.
#[derive(Clone)]
pub struct StageContext {
    /// Configuration in effect for the run.
    pub config: Arc<Configuration>,
    /// Cloud collaborators.
    pub provider: Arc<dyn CloudProvider>,
    /// Tunables.
    pub settings: Arc<DeploySettings>,
    /// Operator confirmation.
    pub confirm: Arc<dyn Confirm>,
    /// Names of the resources the deployment owns.
    pub namespace: Arc<ResourceNamespace>,
    start_stage: usize,
    poll_override: Option<PollPolicy>,
}

impl StageContext {
    /// Creates a context for a run starting at stage 1.
    pub fn new(
        config: Configuration,
        provider: Arc<dyn CloudProvider>,
        settings: Arc<DeploySettings>,
        confirm: Arc<dyn Confirm>,
    ) -> Self {
        let namespace = ResourceNamespace::new(&settings.namespace, &config);
        Self {
            config: Arc::new(config),
            provider,
            settings,
            confirm,
            namespace: Arc::new(namespace),
            start_stage: 1,
            poll_override: None,
        }
    }

    /// Records the stage the run starts at.
    #[must_use]
    pub fn with_start_stage(mut self, start_stage: usize) -> Self {
        self.start_stage = start_stage.max(1);
        self
    }

    /// Uses `policy` for every wait instead of the configured cadence.
    #[must_use]
    pub fn with_poll_policy(mut self, policy: PollPolicy) -> Self {
        self.poll_override = Some(policy);
        self
    }

    /// The stage the run starts at.
    pub fn start_stage(&self) -> usize {
        self.start_stage
    }

    /// True when the run skips at least one stage.
    pub fn is_resuming(&self) -> bool {
        self.start_stage > 1
    }

    /// Poll policy for a wait bounded by `timeout_seconds`.
    pub fn poll_policy(&self, timeout_seconds: u64) -> PollPolicy {
        self.poll_override
            .clone()
            .unwrap_or_else(|| self.settings.poll_policy(timeout_seconds))
    }

    /// Poll policy at the plain configured interval for a wait bounded by
    /// `timeout_seconds`.
    pub fn fixed_poll_policy(&self, timeout_seconds: u64) -> PollPolicy {
        self.poll_override
            .clone()
            .unwrap_or_else(|| self.settings.fixed_poll_policy(timeout_seconds))
    }

    /// Command that retries the run from `stage`.
    pub fn resume_command(&self, stage: usize) -> String {
        self.config.resume_command(&self.settings.program_name, stage)
    }
}

impl Debug for StageContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StageContext")
            .field("config", &self.config)
            .field("start_stage", &self.start_stage)
            .finish_non_exhaustive()
    }
}

/// One step of a deployment.
#[async_trait]
pub trait Stage: Send + Sync + Debug {
    /// Human-readable stage name, unique within a registry.
    fn name(&self) -> &str;

    /// Performs the stage's work.
    ///
    /// # Errors
    ///
    /// Any error aborts the run; it can be resumed at this stage.
    async fn execute(&self, ctx: &StageContext) -> Result<()>;

    /// Whether running the stage twice is safe.
    fn rerunnable(&self) -> bool {
        true
    }
}

/// Future returned by a [`FnStage`] body.
pub type StageFuture<'a> = BoxFuture<'a, Result<()>>;

type StageFn = Box<dyn for<'a> Fn(&'a StageContext) -> StageFuture<'a> + Send + Sync>;

/// A stage defined by an async closure.
///
/// ```rust
/// use futures::FutureExt;
/// use stagedeploy::stages::{FnStage, Stage};
///
/// let stage = FnStage::new("Say hello", |ctx| {
///     async move {
///         tracing::info!(name = %ctx.config.name, "hello");
///         Ok(())
///     }
///     .boxed()
/// });
/// assert_eq!(stage.name(), "Say hello");
/// ```
pub struct FnStage {
    name: String,
    func: StageFn,
}

impl FnStage {
    /// Creates a new function-based stage.
    pub fn new<F>(name: impl Into<String>, func: F) -> Self
    where
        F: for<'a> Fn(&'a StageContext) -> StageFuture<'a> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            func: Box::new(func),
        }
    }
}

impl Debug for FnStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnStage").field("name", &self.name).finish()
    }
}

#[async_trait]
impl Stage for FnStage {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, ctx: &StageContext) -> Result<()> {
        (self.func)(ctx).await
    }
}
