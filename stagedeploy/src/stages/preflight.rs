//! Stage 1: everything that must hold before any resource is touched.

use super::{Stage, StageContext};
use crate::conflict::{ConflictDetector, ConflictReport};
use crate::errors::{DeployError, Result};
use async_trait::async_trait;
use tracing::{info, warn};

/// Checks tools, services, credentials and conflicts.
///
/// Tool and service reachability checks are bypassed by
/// `--skip-prerequisites`; credential validation and conflict detection
/// always run.
#[derive(Debug, Clone, Default)]
pub struct PreflightStage;

impl PreflightStage {
    /// Stage name as shown to operators.
    pub const NAME: &'static str = "Preflight checks";

    /// Creates the stage.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    fn announce(report: &ConflictReport) {
        for conflict in report.iter() {
            warn!(
                kind = %conflict.kind,
                identifier = %conflict.identifier,
                remediation = %conflict.remediation,
                "Conflicting resource"
            );
        }
    }
}

#[async_trait]
impl Stage for PreflightStage {
    fn name(&self) -> &str {
        Self::NAME
    }

    async fn execute(&self, ctx: &StageContext) -> Result<()> {
        let provider = ctx.provider.as_ref();

        if ctx.config.toggles.skip_prerequisites {
            warn!("Skipping prerequisite and service reachability checks");
        } else {
            provider
                .check_prerequisites()
                .await
                .map_err(|e| DeployError::Preflight(e.to_string()))?;
            provider
                .check_service_reachability()
                .await
                .map_err(|e| DeployError::Preflight(e.to_string()))?;
        }

        let identity = provider
            .validate_credentials()
            .await
            .map_err(|e| DeployError::Preflight(format!("invalid credentials: {e}")))?;
        info!(identity = %identity, profile = %ctx.config.profile, "Credentials valid");

        let policy = ctx.poll_policy(ctx.settings.timeouts.stack_delete_seconds);
        let report = ConflictDetector::new(
            provider.stacks(),
            provider.parameters(),
            &ctx.namespace,
            policy,
        )
        .check(&ctx.config)
        .await?;

        if report.is_empty() {
            info!("No conflicting resources");
            return Ok(());
        }

        Self::announce(&report);
        let question = format!(
            "{}. Run the commands above to remove them, or continue and overwrite. Continue?",
            report.summary()
        );
        if ctx.confirm.confirm(&question).await {
            warn!(conflicts = report.len(), "Proceeding despite conflicts");
            Ok(())
        } else {
            Err(DeployError::Conflict {
                summary: report.summary(),
            })
        }
    }
}
