//! Error types for the stagedeploy engine.
//!
//! The taxonomy follows the lifecycle of a deployment run: pre-flight
//! problems are fatal before anything has changed, conflicts wait on an
//! operator decision, stage failures are fatal but resumable at the failing
//! stage, and timeouts surface as whichever of those fits their context.
//! Cleanup never produces an error; see [`crate::cleanup::CleanupResult`].

use crate::ports::ProviderError;
use std::time::Duration;
use thiserror::Error;

/// The main error type for stagedeploy operations.
#[derive(Debug, Error)]
pub enum DeployError {
    /// A missing tool, invalid credentials or an unreachable service.
    #[error("Pre-flight check failed: {0}")]
    Preflight(String),

    /// The operator declined to proceed past detected conflicts.
    #[error("Unresolved conflicts: {summary}")]
    Conflict {
        /// One-line description of what collided.
        summary: String,
    },

    /// A stage action failed. The run can be resumed at `index`.
    #[error("Stage {index} ({name}) failed: {source}")]
    StageExecution {
        /// One-based index of the failed stage.
        index: usize,
        /// Human-readable stage name.
        name: String,
        /// What went wrong inside the stage.
        #[source]
        source: Box<DeployError>,
        /// Command that retries exactly this stage.
        resume_command: String,
    },

    /// The operator interrupted the run while a stage was active.
    #[error("Interrupted during stage {index} ({name})")]
    Interrupted {
        /// One-based index of the interrupted stage.
        index: usize,
        /// Human-readable stage name.
        name: String,
        /// Command that retries exactly this stage.
        resume_command: String,
    },

    /// A bounded wait ran out.
    #[error("Timed out after {}s waiting for {what}", waited.as_secs())]
    Timeout {
        /// What was being waited on.
        what: String,
        /// How long the wait lasted.
        waited: Duration,
    },

    /// The requested resume stage is outside `[1, max]`.
    #[error("Invalid resume stage {requested}: must be between 1 and {max}")]
    InvalidResumeStage {
        /// The stage the operator asked for.
        requested: usize,
        /// Number of registered stages.
        max: usize,
    },

    /// The deployment identifier does not satisfy naming rules.
    #[error(
        "Invalid deployment identifier '{0}': use at most 53 lowercase letters, digits and hyphens, \
         starting with a letter"
    )]
    InvalidIdentifier(String),

    /// An operator-supplied value cannot be stored in the progress record.
    #[error("Invalid {field} {value:?}: control characters are not allowed")]
    InvalidValue {
        /// Configuration field name.
        field: &'static str,
        /// The rejected value.
        value: String,
    },

    /// Provisioned resources are not in the state a stage expects.
    #[error("Verification failed: {0}")]
    Verification(String),

    /// The stage registry could not be built.
    #[error("Invalid stage registry: {0}")]
    Registry(String),

    /// A settings file could not be read or parsed.
    #[error("Settings error: {0}")]
    Settings(String),

    /// Reading or writing the progress record failed.
    #[error("{0}")]
    Progress(#[from] ProgressError),

    /// An external collaborator call failed.
    #[error("{0}")]
    Provider(#[from] ProviderError),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl DeployError {
    /// Returns the resume command carried by this error, if any.
    #[must_use]
    pub fn resume_command(&self) -> Option<&str> {
        match self {
            Self::StageExecution { resume_command, .. } | Self::Interrupted { resume_command, .. } => {
                Some(resume_command)
            }
            _ => None,
        }
    }

    /// Returns true if the run can be continued with `--resume-from-stage`.
    #[must_use]
    pub fn is_resumable(&self) -> bool {
        self.resume_command().is_some()
    }

    /// Creates a timeout error.
    #[must_use]
    pub fn timeout(what: impl Into<String>, waited: Duration) -> Self {
        Self::Timeout {
            what: what.into(),
            waited,
        }
    }
}

/// Errors raised by a [`crate::progress::ProgressStore`].
#[derive(Debug, Error)]
pub enum ProgressError {
    /// The record could not be written. Fatal to the current stage.
    #[error("Failed to persist progress to {path}: {source}")]
    Write {
        /// Location of the record.
        path: String,
        /// Underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// The record could not be read.
    #[error("Failed to read progress from {path}: {source}")]
    Read {
        /// Location of the record.
        path: String,
        /// Underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// The record exists but is missing fields or holds bad values.
    #[error("Malformed progress record: {0}")]
    Malformed(String),
}

/// Convenience alias used throughout the crate.
pub type Result<T, E = DeployError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_execution_carries_resume_command() {
        let err = DeployError::StageExecution {
            index: 3,
            name: "Upload assets".to_string(),
            source: Box::new(DeployError::Preflight("boom".to_string())),
            resume_command: "stagedeploy --resume-from-stage 3".to_string(),
        };

        assert!(err.is_resumable());
        assert_eq!(err.resume_command(), Some("stagedeploy --resume-from-stage 3"));
        assert!(err.to_string().contains("Stage 3 (Upload assets) failed"));
    }

    #[test]
    fn test_timeout_display() {
        let err = DeployError::timeout("stack demo to delete", Duration::from_secs(90));
        assert_eq!(err.to_string(), "Timed out after 90s waiting for stack demo to delete");
        assert!(!err.is_resumable());
    }

    #[test]
    fn test_invalid_resume_stage_display() {
        let err = DeployError::InvalidResumeStage { requested: 9, max: 8 };
        assert!(err.to_string().contains("between 1 and 8"));
    }

    #[test]
    fn test_provider_error_converts() {
        let err: DeployError = ProviderError::NotFound("demo".to_string()).into();
        assert!(matches!(err, DeployError::Provider(ProviderError::NotFound(_))));
    }
}
