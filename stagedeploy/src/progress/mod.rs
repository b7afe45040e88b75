//! Persisted progress of a deployment run.
//!
//! The orchestrator is the only writer: it saves after every stage that
//! fully succeeded and resets once the last stage is done. The
//! configuration resolver reads the record once at startup.

mod codec;
mod file;

pub use codec::{decode, encode};
pub use file::FileProgressStore;

use crate::config::Configuration;
use crate::errors::ProgressError;
use crate::utils::Timestamp;
use chrono::Utc;
use parking_lot::Mutex;

/// Marker of the last fully completed stage and the configuration it ran with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressRecord {
    /// One-based index of the last stage that succeeded.
    pub last_completed_stage: usize,
    /// Name of that stage.
    pub last_completed_stage_name: String,
    /// Configuration in effect.
    pub configuration: Configuration,
    /// When the record was written.
    pub timestamp: Timestamp,
}

impl ProgressRecord {
    /// Creates a record stamped with the current time.
    #[must_use]
    pub fn now(stage_index: usize, stage_name: impl Into<String>, configuration: Configuration) -> Self {
        Self {
            last_completed_stage: stage_index,
            last_completed_stage_name: stage_name.into(),
            configuration,
            timestamp: Utc::now(),
        }
    }

    /// Returns true if the record belongs to the deployment called `name`.
    #[must_use]
    pub fn is_for(&self, name: &str) -> bool {
        self.configuration.name == name
    }
}

/// Storage for the progress record.
pub trait ProgressStore: Send + Sync {
    /// Overwrites the record with a newly completed stage.
    ///
    /// # Errors
    ///
    /// A failed write must be reported: resume depends on it.
    fn save(
        &self,
        stage_index: usize,
        stage_name: &str,
        configuration: &Configuration,
    ) -> Result<(), ProgressError>;

    /// Returns the record, or `None` if there is none.
    ///
    /// # Errors
    ///
    /// Returns an error if the record exists but cannot be read or parsed.
    fn load(&self) -> Result<Option<ProgressRecord>, ProgressError>;

    /// Deletes the record. Deleting a missing record is not an error.
    ///
    /// # Errors
    ///
    /// Returns an error if an existing record cannot be removed.
    fn reset(&self) -> Result<(), ProgressError>;

    /// Human-readable location, for messages.
    fn location(&self) -> String;
}

/// In-memory store for tests and dry runs.
///
/// Remembers every saved stage index so callers can check the record only
/// ever moves forward during a run.
#[derive(Debug, Default)]
pub struct InMemoryProgressStore {
    record: Mutex<Option<ProgressRecord>>,
    history: Mutex<Vec<usize>>,
    resets: Mutex<usize>,
    fail_writes: Mutex<bool>,
    fail_resets: Mutex<bool>,
}

impl InMemoryProgressStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store that already holds `record`.
    #[must_use]
    pub fn with_record(record: ProgressRecord) -> Self {
        let store = Self::default();
        *store.record.lock() = Some(record);
        store
    }

    /// Makes every subsequent `save` fail.
    pub fn fail_writes(&self, fail: bool) {
        *self.fail_writes.lock() = fail;
    }

    /// Makes every subsequent `reset` fail.
    pub fn fail_resets(&self, fail: bool) {
        *self.fail_resets.lock() = fail;
    }

    /// Stage indices saved so far, in order.
    #[must_use]
    pub fn history(&self) -> Vec<usize> {
        self.history.lock().clone()
    }

    /// Number of times `reset` ran.
    #[must_use]
    pub fn reset_count(&self) -> usize {
        *self.resets.lock()
    }

    /// Returns the current record without going through the trait.
    #[must_use]
    pub fn current(&self) -> Option<ProgressRecord> {
        self.record.lock().clone()
    }
}

impl ProgressStore for InMemoryProgressStore {
    fn save(
        &self,
        stage_index: usize,
        stage_name: &str,
        configuration: &Configuration,
    ) -> Result<(), ProgressError> {
        if *self.fail_writes.lock() {
            return Err(ProgressError::Write {
                path: self.location(),
                source: std::io::Error::new(std::io::ErrorKind::Other, "simulated write failure"),
            });
        }
        *self.record.lock() = Some(ProgressRecord::now(stage_index, stage_name, configuration.clone()));
        self.history.lock().push(stage_index);
        Ok(())
    }

    fn load(&self) -> Result<Option<ProgressRecord>, ProgressError> {
        Ok(self.record.lock().clone())
    }

    fn reset(&self) -> Result<(), ProgressError> {
        if *self.fail_resets.lock() {
            return Err(ProgressError::Write {
                path: self.location(),
                source: std::io::Error::new(std::io::ErrorKind::Other, "simulated remove failure"),
            });
        }
        *self.record.lock() = None;
        *self.resets.lock() += 1;
        Ok(())
    }

    fn location(&self) -> String {
        "<memory>".to_string()
    }
}
