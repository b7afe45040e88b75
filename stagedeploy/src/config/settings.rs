//! Tunables loaded from `stagedeploy.toml`.
//!
//! Every field has a default, so an absent or partial file is fine.
//! Templates may use `{name}`, `{environment}` and `{region}`, expanded
//! from the run's [`Configuration`].

use super::Configuration;
use crate::errors::{DeployError, Result};
use crate::polling::{BackoffStrategy, JitterStrategy, PollPolicy};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeploySettings {
    /// Where the progress record lives.
    pub progress_file: PathBuf,
    /// Program name used in printed resume commands.
    pub program_name: String,
    /// Poll cadence.
    pub polling: PollingSettings,
    /// Wait budgets.
    pub timeouts: TimeoutSettings,
    /// Resource naming.
    pub namespace: NamespaceSettings,
    /// Inputs to the deployment stages.
    pub deploy: DeploySection,
}

impl Default for DeploySettings {
    fn default() -> Self {
        Self {
            progress_file: PathBuf::from(".stagedeploy-progress"),
            program_name: "stagedeploy".to_string(),
            polling: PollingSettings::default(),
            timeouts: TimeoutSettings::default(),
            namespace: NamespaceSettings::default(),
            deploy: DeploySection::default(),
        }
    }
}

/// Poll cadence shared by every wait.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollingSettings {
    /// Base delay between checks.
    pub interval_seconds: u64,
    /// Ceiling for the delay between checks.
    pub max_interval_seconds: u64,
    /// Backoff strategy.
    pub backoff: BackoffStrategy,
    /// Jitter applied to each delay.
    pub jitter: JitterStrategy,
}

impl Default for PollingSettings {
    fn default() -> Self {
        Self {
            interval_seconds: 10,
            max_interval_seconds: 60,
            backoff: BackoffStrategy::Constant,
            jitter: JitterStrategy::None,
        }
    }
}

/// Wait budgets, in seconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutSettings {
    /// Waiting for a stack to finish deleting.
    pub stack_delete_seconds: u64,
    /// Waiting for a stack to finish deploying.
    pub stack_deploy_seconds: u64,
    /// Waiting for a release pipeline to report a status.
    pub pipeline_start_seconds: u64,
}

impl Default for TimeoutSettings {
    fn default() -> Self {
        Self {
            stack_delete_seconds: 1800,
            stack_deploy_seconds: 1800,
            pipeline_start_seconds: 300,
        }
    }
}

/// Names of the resources a deployment owns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NamespaceSettings {
    /// Parameters most likely to collide with a new deployment.
    pub critical_parameters: Vec<String>,
    /// Parameter path prefixes owned by the deployment.
    pub parameter_prefixes: Vec<String>,
    /// Buckets owned by the deployment.
    pub buckets: Vec<String>,
}

impl Default for NamespaceSettings {
    fn default() -> Self {
        Self {
            critical_parameters: vec![
                "/{name}/config/agent-id".to_string(),
                "/{name}/config/service-role-arn".to_string(),
                "/{name}/config/artifact-bucket".to_string(),
            ],
            parameter_prefixes: vec!["/{name}/".to_string()],
            buckets: vec!["{name}-artifacts".to_string(), "{name}-templates".to_string()],
        }
    }
}

/// Inputs to the concrete deployment stages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeploySection {
    /// Infrastructure template.
    pub template: PathBuf,
    /// Directory uploaded to the artifacts bucket.
    pub assets_dir: PathBuf,
    /// Release pipeline name template.
    pub pipeline: String,
    /// Foundation model for the agent.
    pub agent_model: String,
    /// Agent system instruction.
    pub agent_instruction: String,
    /// Object versions deleted per request during purge.
    pub purge_batch_size: usize,
}

impl Default for DeploySection {
    fn default() -> Self {
        Self {
            template: PathBuf::from("infrastructure/main.yaml"),
            assets_dir: PathBuf::from("assets"),
            pipeline: "{name}-release".to_string(),
            agent_model: "anthropic.claude-3-haiku-20240307-v1:0".to_string(),
            agent_instruction: "You answer questions about the {environment} deployment {name}."
                .to_string(),
            purge_batch_size: 1000,
        }
    }
}

impl DeploySettings {
    /// Parses settings from TOML text.
    ///
    /// # Errors
    ///
    /// Returns [`DeployError::Settings`] on malformed TOML.
    pub fn from_toml(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| DeployError::Settings(e.to_string()))
    }

    /// Loads settings from a file.
    ///
    /// # Errors
    ///
    /// Returns [`DeployError::Settings`] if the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| DeployError::Settings(format!("{}: {e}", path.display())))?;
        Self::from_toml(&text)
    }

    /// Loads `path` if given, else `default_path` if it exists, else defaults.
    ///
    /// # Errors
    ///
    /// Returns [`DeployError::Settings`] if a file that should be used
    /// cannot be read or parsed.
    pub fn load_or_default(path: Option<&Path>, default_path: &Path) -> Result<Self> {
        match path {
            Some(path) => Self::load(path),
            None if default_path.exists() => Self::load(default_path),
            None => Ok(Self::default()),
        }
    }

    /// Poll policy bounded by `timeout_seconds`.
    #[must_use]
    pub fn poll_policy(&self, timeout_seconds: u64) -> PollPolicy {
        PollPolicy::fixed(
            Duration::from_secs(self.polling.interval_seconds),
            Duration::from_secs(timeout_seconds),
        )
        .with_backoff(self.polling.backoff)
        .with_jitter(self.polling.jitter)
        .with_max_interval(Duration::from_secs(
            self.polling.max_interval_seconds.max(self.polling.interval_seconds),
        ))
    }

    /// Poll policy at the plain configured interval, without backoff or
    /// jitter, bounded by `timeout_seconds`.
    #[must_use]
    pub fn fixed_poll_policy(&self, timeout_seconds: u64) -> PollPolicy {
        PollPolicy::fixed(
            Duration::from_secs(self.polling.interval_seconds),
            Duration::from_secs(timeout_seconds),
        )
    }

    /// Release pipeline name for this configuration.
    #[must_use]
    pub fn pipeline_name(&self, config: &Configuration) -> String {
        expand(&self.deploy.pipeline, config)
    }
}

/// Expands `{name}`, `{environment}` and `{region}` in a template.
#[must_use]
pub fn expand(template: &str, config: &Configuration) -> String {
    template
        .replace("{name}", &config.name)
        .replace("{environment}", &config.environment)
        .replace("{region}", &config.region)
}
