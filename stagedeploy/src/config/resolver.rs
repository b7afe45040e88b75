//! Merges operator input with the configuration of a previous run.

use super::{
    validate_identifier, with_suffix, Configuration, FeatureToggles, InvocationConfig,
    DEFAULT_ENVIRONMENT, DEFAULT_NAME, DEFAULT_PROFILE, DEFAULT_REGION,
};
use crate::errors::{DeployError, Result};
use crate::progress::ProgressRecord;
use crate::prompt::Confirm;
use tracing::{info, warn};

/// One field that was filled in from the stored record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Substitution {
    /// Configuration field name.
    pub field: &'static str,
    /// The stored value that was used.
    pub value: String,
}

/// The resolved configuration plus what was substituted to get it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    /// Configuration for this run.
    pub configuration: Configuration,
    /// Fields taken from the stored record.
    pub substitutions: Vec<Substitution>,
}

type EntropySource = Box<dyn Fn() -> String + Send + Sync>;

/// Resolves the configuration and start stage of a run.
///
/// Explicit values always win. Fields left at their default are filled in
/// from the stored record, but only when resuming; a fresh run ignores any
/// record on disk.
pub struct ConfigResolver {
    entropy: EntropySource,
}

impl Default for ConfigResolver {
    fn default() -> Self {
        Self {
            entropy: Box::new(|| uuid::Uuid::new_v4().simple().to_string()),
        }
    }
}

impl std::fmt::Debug for ConfigResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfigResolver").finish_non_exhaustive()
    }
}

impl ConfigResolver {
    /// Creates a resolver that suffixes identifiers with random hex.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the suffix source, for deterministic identifiers.
    #[must_use]
    pub fn with_entropy<F>(entropy: F) -> Self
    where
        F: Fn() -> String + Send + Sync + 'static,
    {
        Self {
            entropy: Box::new(entropy),
        }
    }

    /// Resolves the configuration for a run.
    ///
    /// `requested_resume_stage == 0` is a fresh run: no substitution happens
    /// and, unless disabled, the identifier gets a uniqueness suffix.
    ///
    /// # Errors
    ///
    /// Returns [`DeployError::InvalidIdentifier`] if the resulting
    /// identifier is not usable, or [`DeployError::InvalidValue`] if a value
    /// could not be stored in the progress record.
    pub fn resolve(
        &self,
        explicit: &InvocationConfig,
        requested_resume_stage: usize,
        stored: Option<&ProgressRecord>,
    ) -> Result<Resolution> {
        let fresh = requested_resume_stage == 0;
        let stored = match stored {
            Some(record) if fresh => {
                warn!(
                    last_completed_stage = record.last_completed_stage,
                    stored_name = %record.configuration.name,
                    "Starting a fresh run; the stored progress will be overwritten. \
                     Use --resume-from-stage to continue the previous run instead"
                );
                None
            }
            other => Self::matching_record(explicit, other).map(|record| &record.configuration),
        };

        let mut substitutions = Vec::new();
        let mut name = pick(
            "name",
            explicit.name.as_deref(),
            stored.map(|c| c.name.as_str()),
            DEFAULT_NAME,
            &mut substitutions,
        );
        let region = pick(
            "region",
            explicit.region.as_deref(),
            stored.map(|c| c.region.as_str()),
            DEFAULT_REGION,
            &mut substitutions,
        );
        let environment = pick(
            "environment",
            explicit.environment.as_deref(),
            stored.map(|c| c.environment.as_str()),
            DEFAULT_ENVIRONMENT,
            &mut substitutions,
        );
        let profile = pick(
            "profile",
            explicit.profile.as_deref(),
            stored.map(|c| c.profile.as_str()),
            DEFAULT_PROFILE,
            &mut substitutions,
        );
        let toggles = FeatureToggles {
            skip_prerequisites: pick_flag(
                "skip_prerequisites",
                explicit.skip_prerequisites,
                stored.map(|c| c.toggles.skip_prerequisites),
                &mut substitutions,
            ),
            no_identifier_suffix: pick_flag(
                "no_identifier_suffix",
                explicit.no_identifier_suffix,
                stored.map(|c| c.toggles.no_identifier_suffix),
                &mut substitutions,
            ),
        };

        if fresh && !toggles.no_identifier_suffix {
            name = with_suffix(&name, &(self.entropy)());
            info!(name = %name, "Using suffixed deployment identifier");
        }
        validate_identifier(&name)?;
        for (field, value) in [
            ("region", &region),
            ("environment", &environment),
            ("profile", &profile),
        ] {
            validate_value(field, value)?;
        }

        Ok(Resolution {
            configuration: Configuration {
                name,
                region,
                environment,
                profile,
                toggles,
            },
            substitutions,
        })
    }

    /// The stored record, if it belongs to the deployment the operator named.
    ///
    /// Without an explicit name any record matches, since the name itself
    /// is recalled from it.
    pub fn matching_record<'r>(
        explicit: &InvocationConfig,
        stored: Option<&'r ProgressRecord>,
    ) -> Option<&'r ProgressRecord> {
        let record = stored?;
        match explicit.name.as_deref() {
            Some(name) if !record.is_for(name) => {
                warn!(
                    requested = name,
                    stored_name = %record.configuration.name,
                    "Stored progress belongs to another deployment, ignoring it"
                );
                None
            }
            _ => Some(record),
        }
    }

    /// Decides which stage the run starts at.
    ///
    /// Re-running a stage that already succeeded needs operator
    /// confirmation; without it the run continues after the last completed
    /// stage. A return value of `stage_count + 1` means nothing is left.
    /// A record of a deployment other than `config` is not consulted.
    ///
    /// # Errors
    ///
    /// Returns [`DeployError::InvalidResumeStage`] if `requested` is
    /// outside `[1, stage_count]`.
    pub async fn plan_start(
        &self,
        requested: usize,
        stored: Option<&ProgressRecord>,
        config: &Configuration,
        stage_count: usize,
        confirm: &dyn Confirm,
    ) -> Result<usize> {
        if requested == 0 {
            return Ok(1);
        }
        if requested > stage_count {
            return Err(DeployError::InvalidResumeStage {
                requested,
                max: stage_count,
            });
        }

        let Some(record) = stored.filter(|record| record.is_for(&config.name)) else {
            if requested > 1 {
                warn!(
                    stage = requested,
                    "No progress record found; resuming with the supplied configuration only"
                );
            }
            return Ok(requested);
        };

        let last = record.last_completed_stage;
        if requested <= last {
            let question = format!(
                "Stage {last} ({}) already completed at {}. Re-run stages {requested} through {last}?",
                record.last_completed_stage_name,
                crate::utils::format_timestamp(&record.timestamp),
            );
            if confirm.confirm(&question).await {
                info!(stage = requested, "Re-running already completed stages");
                return Ok(requested);
            }
            let next = last + 1;
            info!(stage = next, "Keeping completed stages, continuing after the last one");
            return Ok(next.min(stage_count + 1));
        }

        if requested > last + 1 {
            warn!(
                requested,
                last_completed = last,
                "Stages between the last completed stage and the requested one never completed"
            );
        }
        Ok(requested)
    }
}

fn validate_value(field: &'static str, value: &str) -> Result<()> {
    if value.chars().any(char::is_control) {
        return Err(DeployError::InvalidValue {
            field,
            value: value.to_string(),
        });
    }
    Ok(())
}

fn pick(
    field: &'static str,
    explicit: Option<&str>,
    stored: Option<&str>,
    default: &str,
    substitutions: &mut Vec<Substitution>,
) -> String {
    if let Some(value) = explicit {
        return value.to_string();
    }
    if let Some(value) = stored {
        info!(field, value, "Using value from previous run");
        substitutions.push(Substitution {
            field,
            value: value.to_string(),
        });
        return value.to_string();
    }
    default.to_string()
}

fn pick_flag(
    field: &'static str,
    explicit: bool,
    stored: Option<bool>,
    substitutions: &mut Vec<Substitution>,
) -> bool {
    if explicit {
        return true;
    }
    match stored {
        Some(true) => {
            info!(field, "Using flag from previous run");
            substitutions.push(Substitution {
                field,
                value: "true".to_string(),
            });
            true
        }
        _ => false,
    }
}
