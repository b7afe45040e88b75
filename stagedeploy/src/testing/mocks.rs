//! Mock stages for testing.

use crate::errors::{DeployError, Result};
use crate::ports::ProviderError;
use crate::stages::{Stage, StageContext};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Shared, ordered log of stage executions.
#[derive(Debug, Clone, Default)]
pub struct StageLog {
    entries: Arc<Mutex<Vec<String>>>,
}

impl StageLog {
    /// Creates an empty log.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an entry.
    pub fn record(&self, entry: impl Into<String>) {
        self.entries.lock().push(entry.into());
    }

    /// Entries so far, in order.
    #[must_use]
    pub fn entries(&self) -> Vec<String> {
        self.entries.lock().clone()
    }

    /// Number of times `name` ran.
    #[must_use]
    pub fn count(&self, name: &str) -> usize {
        self.entries.lock().iter().filter(|e| *e == name).count()
    }
}

/// A stage that succeeds and records each execution.
#[derive(Debug)]
pub struct RecordingStage {
    name: String,
    log: StageLog,
}

impl RecordingStage {
    /// Creates a new recording stage.
    #[must_use]
    pub fn new(name: impl Into<String>, log: StageLog) -> Self {
        Self {
            name: name.into(),
            log,
        }
    }
}

#[async_trait]
impl Stage for RecordingStage {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, _ctx: &StageContext) -> Result<()> {
        self.log.record(&self.name);
        Ok(())
    }
}

/// A stage that records each execution and fails.
///
/// By default it fails every time; [`FailingStage::times`] makes it succeed
/// once it has failed `n` times, which is what a transient fault fixed
/// between a failed run and its resume looks like.
#[derive(Debug)]
pub struct FailingStage {
    name: String,
    log: StageLog,
    remaining: AtomicUsize,
}

impl FailingStage {
    /// Creates a stage that always fails.
    #[must_use]
    pub fn new(name: impl Into<String>, log: StageLog) -> Self {
        Self::times(name, log, usize::MAX)
    }

    /// Creates a stage that fails `failures` times, then succeeds.
    #[must_use]
    pub fn times(name: impl Into<String>, log: StageLog, failures: usize) -> Self {
        Self {
            name: name.into(),
            log,
            remaining: AtomicUsize::new(failures),
        }
    }
}

#[async_trait]
impl Stage for FailingStage {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, _ctx: &StageContext) -> Result<()> {
        self.log.record(&self.name);
        let failing = self
            .remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            Err(DeployError::Provider(ProviderError::Command {
                command: self.name.clone(),
                status: 1,
                stderr: "simulated stage failure".to_string(),
            }))
        } else {
            Ok(())
        }
    }
}

/// A stage that never finishes on its own.
#[derive(Debug)]
pub struct PendingStage {
    name: String,
    log: StageLog,
}

impl PendingStage {
    /// Creates a new pending stage.
    #[must_use]
    pub fn new(name: impl Into<String>, log: StageLog) -> Self {
        Self {
            name: name.into(),
            log,
        }
    }
}

#[async_trait]
impl Stage for PendingStage {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, _ctx: &StageContext) -> Result<()> {
        self.log.record(&self.name);
        futures::future::pending::<()>().await;
        Ok(())
    }
}
