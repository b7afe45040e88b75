//! Deployment configuration.
//!
//! [`InvocationConfig`] is what the operator typed; [`ConfigResolver`]
//! merges it with the persisted record into the immutable
//! [`Configuration`] a run uses. [`DeploySettings`] holds the tunables that
//! do not change between runs (timeouts, namespace templates, paths).

mod identifier;
mod resolver;
mod settings;

pub use identifier::{validate_identifier, with_suffix};
pub use resolver::{ConfigResolver, Resolution, Substitution};
pub use settings::{
    expand, DeploySection, DeploySettings, NamespaceSettings, PollingSettings, TimeoutSettings,
};

use serde::{Deserialize, Serialize};

/// Default deployment identifier.
pub const DEFAULT_NAME: &str = "stagedeploy";
/// Default target region.
pub const DEFAULT_REGION: &str = "us-east-1";
/// Default environment tag.
pub const DEFAULT_ENVIRONMENT: &str = "dev";
/// Default credential profile.
pub const DEFAULT_PROFILE: &str = "default";

/// Boolean switches that change how a run behaves.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureToggles {
    /// Bypass prerequisite tool and service reachability checks.
    pub skip_prerequisites: bool,
    /// Use the deployment identifier exactly as given.
    pub no_identifier_suffix: bool,
}

/// The configuration in effect for one run. Never mutated once a run starts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Configuration {
    /// Deployment identifier (stack/resource-group name).
    pub name: String,
    /// Target region.
    pub region: String,
    /// Environment tag.
    pub environment: String,
    /// Credential profile.
    pub profile: String,
    /// Feature toggles.
    pub toggles: FeatureToggles,
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            name: DEFAULT_NAME.to_string(),
            region: DEFAULT_REGION.to_string(),
            environment: DEFAULT_ENVIRONMENT.to_string(),
            profile: DEFAULT_PROFILE.to_string(),
            toggles: FeatureToggles::default(),
        }
    }
}

impl Configuration {
    /// Creates a configuration with defaults for everything but the name.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Sets the region.
    #[must_use]
    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = region.into();
        self
    }

    /// Sets the environment.
    #[must_use]
    pub fn with_environment(mut self, environment: impl Into<String>) -> Self {
        self.environment = environment.into();
        self
    }

    /// Sets the credential profile.
    #[must_use]
    pub fn with_profile(mut self, profile: impl Into<String>) -> Self {
        self.profile = profile.into();
        self
    }

    /// Sets the feature toggles.
    #[must_use]
    pub fn with_toggles(mut self, toggles: FeatureToggles) -> Self {
        self.toggles = toggles;
        self
    }

    /// Builds the command line that re-runs the pipeline from `stage` with
    /// exactly this configuration.
    ///
    /// Resumed runs never re-suffix, so the identifier is passed as-is.
    #[must_use]
    pub fn resume_command(&self, program: &str, stage: usize) -> String {
        let mut args = vec![
            program.to_string(),
            "--resume-from-stage".to_string(),
            stage.to_string(),
            "--name".to_string(),
            self.name.clone(),
            "--region".to_string(),
            self.region.clone(),
            "--environment".to_string(),
            self.environment.clone(),
            "--profile".to_string(),
            self.profile.clone(),
        ];
        if self.toggles.skip_prerequisites {
            args.push("--skip-prerequisites".to_string());
        }
        if self.toggles.no_identifier_suffix {
            args.push("--no-identifier-suffix".to_string());
        }
        shell_words::join(args)
    }

    /// Builds the command line that tears this deployment down.
    #[must_use]
    pub fn cleanup_command(&self, program: &str) -> String {
        shell_words::join([
            program,
            "--cleanup",
            "--name",
            self.name.as_str(),
            "--region",
            self.region.as_str(),
            "--profile",
            self.profile.as_str(),
        ])
    }
}

/// What the operator supplied on the command line.
///
/// `None` (or `false` for toggles) means "left at the documented default",
/// which is what lets the resolver tell explicit values from defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InvocationConfig {
    /// `--name`
    pub name: Option<String>,
    /// `--region`
    pub region: Option<String>,
    /// `--environment`
    pub environment: Option<String>,
    /// `--profile`
    pub profile: Option<String>,
    /// `--skip-prerequisites`
    pub skip_prerequisites: bool,
    /// `--no-identifier-suffix`
    pub no_identifier_suffix: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Configuration::default();
        assert_eq!(config.name, DEFAULT_NAME);
        assert_eq!(config.region, DEFAULT_REGION);
        assert_eq!(config.environment, DEFAULT_ENVIRONMENT);
        assert_eq!(config.profile, DEFAULT_PROFILE);
        assert_eq!(config.toggles, FeatureToggles::default());
    }

    #[test]
    fn test_resume_command_includes_every_field() {
        let config = Configuration::new("demo-a1b2c3")
            .with_region("eu-west-1")
            .with_environment("prod")
            .with_toggles(FeatureToggles {
                skip_prerequisites: true,
                no_identifier_suffix: false,
            });

        assert_eq!(
            config.resume_command("stagedeploy", 3),
            "stagedeploy --resume-from-stage 3 --name demo-a1b2c3 --region eu-west-1 \
             --environment prod --profile default --skip-prerequisites"
        );
    }

    #[test]
    fn test_resume_command_quotes_unusual_profiles() {
        let config = Configuration::new("demo").with_profile("team admin");
        assert!(config.resume_command("stagedeploy", 1).contains("--profile 'team admin'"));
    }

    #[test]
    fn test_cleanup_command() {
        let config = Configuration::new("demo");
        assert_eq!(
            config.cleanup_command("stagedeploy"),
            "stagedeploy --cleanup --name demo --region us-east-1 --profile default"
        );
    }
}
