//! The deployment stages, in the order they run.
//!
//! Every stage reads what it needs from the provider instead of from an
//! earlier stage, so any of them can be the first stage of a resumed run.

use async_trait::async_trait;
use stagedeploy::config::expand;
use stagedeploy::errors::{DeployError, Result};
use stagedeploy::monitor::{MonitorOutcome, PipelineMonitor};
use stagedeploy::orchestrator::StageRegistry;
use stagedeploy::polling::{poll_until, PollOutcome};
use stagedeploy::ports::{AgentRequest, ProviderError, StackDeployment, StackStatus};
use stagedeploy::stages::{PreflightStage, Stage, StageContext};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Stack output holding the role the agent runs as.
pub const SERVICE_ROLE_OUTPUT: &str = "ServiceRoleArn";

/// Key prefix for uploaded assets.
pub const ASSETS_PREFIX: &str = "assets/";

/// Builds the registry of every deployment stage.
pub fn registry() -> Result<StageRegistry> {
    StageRegistry::new(vec![
        Arc::new(PreflightStage::new()),
        Arc::new(DeployStackStage),
        Arc::new(VerifyServiceRoleStage),
        Arc::new(UploadAssetsStage),
        Arc::new(StoreParametersStage),
        Arc::new(ProvisionAgentStage),
        Arc::new(TriggerPipelineStage),
        Arc::new(VerifyDeploymentStage),
    ])
}

fn settled(status: &StackStatus) -> bool {
    status.is_stable() || status.is_failed() || status.is_delete_failed()
}

/// Waits for the deployment stack to stop moving.
async fn wait_for_stack(ctx: &StageContext) -> Result<StackStatus> {
    let stacks = ctx.provider.stacks();
    let name = ctx.config.name.as_str();
    let policy = ctx.poll_policy(ctx.settings.timeouts.stack_deploy_seconds);
    let what = format!("stack {name} to settle");

    let outcome = poll_until(&policy, &what, |_| async move {
        match stacks.stack_status(name).await {
            Ok(Some(status)) if settled(&status) => Ok(Some(status)),
            Ok(Some(_)) => Ok(None),
            Ok(None) => Err(ProviderError::NotFound(name.to_string())),
            Err(e) => Err(e),
        }
    })
    .await?;

    match outcome {
        PollOutcome::Ready { value, .. } if !value.is_failed() && value.is_stable() => Ok(value),
        PollOutcome::Ready { value, .. } => Err(DeployError::Verification(format!(
            "stack {name} ended in {value}"
        ))),
        PollOutcome::TimedOut { waited, .. } => Err(DeployError::timeout(what, waited)),
    }
}

async fn service_role(ctx: &StageContext) -> Result<String> {
    let outputs = ctx.provider.stack_outputs(&ctx.config.name).await?;
    outputs.get(SERVICE_ROLE_OUTPUT).cloned().ok_or_else(|| {
        DeployError::Verification(format!(
            "stack {} has no {SERVICE_ROLE_OUTPUT} output",
            ctx.config.name
        ))
    })
}

fn artifact_bucket(ctx: &StageContext) -> Result<String> {
    ctx.namespace
        .artifact_bucket()
        .map(str::to_string)
        .ok_or_else(|| DeployError::Verification("no artifacts bucket is configured".to_string()))
}

/// Stage 2: creates or updates the infrastructure stack.
#[derive(Debug, Clone, Copy, Default)]
pub struct DeployStackStage;

#[async_trait]
impl Stage for DeployStackStage {
    fn name(&self) -> &str {
        "Deploy infrastructure stack"
    }

    async fn execute(&self, ctx: &StageContext) -> Result<()> {
        let config = &ctx.config;
        let bucket = artifact_bucket(ctx)?;
        let template = &ctx.settings.deploy.template;
        tokio::fs::metadata(template).await.map_err(|e| {
            DeployError::Io(std::io::Error::new(
                e.kind(),
                format!("template {}: {e}", template.display()),
            ))
        })?;
        let deployment = StackDeployment {
            name: config.name.clone(),
            template: template.clone(),
            parameters: BTreeMap::from([
                ("DeploymentName".to_string(), config.name.clone()),
                ("Environment".to_string(), config.environment.clone()),
                ("ArtifactBucket".to_string(), bucket),
            ]),
            tags: BTreeMap::from([
                ("stagedeploy:deployment".to_string(), config.name.clone()),
                ("stagedeploy:environment".to_string(), config.environment.clone()),
            ]),
        };

        info!(stack = %config.name, template = %deployment.template.display(), "Deploying stack");
        ctx.provider.deploy_stack(&deployment).await?;
        let status = wait_for_stack(ctx).await?;
        info!(stack = %config.name, %status, "Stack ready");
        Ok(())
    }
}

/// Stage 3: checks the stack's service role can be assumed.
#[derive(Debug, Clone, Copy, Default)]
pub struct VerifyServiceRoleStage;

#[async_trait]
impl Stage for VerifyServiceRoleStage {
    fn name(&self) -> &str {
        "Verify service role"
    }

    async fn execute(&self, ctx: &StageContext) -> Result<()> {
        let role = service_role(ctx).await?;
        ctx.provider.assume_role(&role).await?;
        info!(role = %role, "Service role can be assumed");
        Ok(())
    }
}

/// Stage 4: uploads the assets directory.
#[derive(Debug, Clone, Copy, Default)]
pub struct UploadAssetsStage;

#[async_trait]
impl Stage for UploadAssetsStage {
    fn name(&self) -> &str {
        "Upload assets"
    }

    async fn execute(&self, ctx: &StageContext) -> Result<()> {
        let bucket = artifact_bucket(ctx)?;
        if !ctx.provider.bucket_exists(&bucket).await? {
            return Err(DeployError::Verification(format!(
                "bucket {bucket} does not exist; the stack should have created it"
            )));
        }

        let assets = &ctx.settings.deploy.assets_dir;
        if !assets.is_dir() {
            warn!(path = %assets.display(), "No assets directory, nothing to upload");
            return Ok(());
        }

        let uploaded = ctx
            .provider
            .sync_directory(assets, &bucket, ASSETS_PREFIX)
            .await?;
        info!(bucket = %bucket, uploaded, "Assets uploaded");
        Ok(())
    }
}

/// Stage 5: writes the configuration parameters other services read.
#[derive(Debug, Clone, Copy, Default)]
pub struct StoreParametersStage;

#[async_trait]
impl Stage for StoreParametersStage {
    fn name(&self) -> &str {
        "Store configuration parameters"
    }

    async fn execute(&self, ctx: &StageContext) -> Result<()> {
        let values = [
            ("config/environment", ctx.config.environment.clone()),
            ("config/region", ctx.config.region.clone()),
            ("config/artifact-bucket", artifact_bucket(ctx)?),
            ("config/service-role-arn", service_role(ctx).await?),
        ];

        for (relative, value) in &values {
            let name = ctx.namespace.parameter(relative);
            ctx.provider.put_parameter(&name, value).await?;
            info!(parameter = %name, "Parameter stored");
        }
        Ok(())
    }
}

/// Stage 6: creates the agent and records its identifier.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProvisionAgentStage;

#[async_trait]
impl Stage for ProvisionAgentStage {
    fn name(&self) -> &str {
        "Provision AI agent"
    }

    async fn execute(&self, ctx: &StageContext) -> Result<()> {
        let id_parameter = ctx.namespace.parameter("config/agent-id");
        if let Some(existing) = ctx.provider.get_parameter(&id_parameter).await? {
            info!(agent_id = %existing, "Agent already provisioned");
            return Ok(());
        }

        let request = AgentRequest {
            name: format!("{}-agent", ctx.config.name),
            role_arn: service_role(ctx).await?,
            model: ctx.settings.deploy.agent_model.clone(),
            instruction: expand(&ctx.settings.deploy.agent_instruction, &ctx.config),
        };
        let agent_id = ctx.provider.create_agent(&request).await?;
        ctx.provider.put_parameter(&id_parameter, &agent_id).await?;
        info!(agent_id = %agent_id, model = %request.model, "Agent provisioned");
        Ok(())
    }
}

/// Stage 7: starts the release pipeline and waits for it to pick up.
#[derive(Debug, Clone, Copy, Default)]
pub struct TriggerPipelineStage;

#[async_trait]
impl Stage for TriggerPipelineStage {
    fn name(&self) -> &str {
        "Trigger release pipeline"
    }

    async fn execute(&self, ctx: &StageContext) -> Result<()> {
        let pipeline = ctx.settings.pipeline_name(&ctx.config);
        let requested = ctx.provider.start_pipeline(&pipeline).await?;
        info!(pipeline = %pipeline, execution_id = %requested, "Release pipeline triggered");

        let interval = Duration::from_secs(ctx.settings.polling.interval_seconds);
        let policy = ctx.fixed_poll_policy(ctx.settings.timeouts.pipeline_start_seconds);
        match PipelineMonitor::new(ctx.provider.pipelines(), interval)
            .monitor_with(&pipeline, &policy)
            .await
        {
            MonitorOutcome::Started { status, .. } => {
                info!(pipeline = %pipeline, %status, "Release pipeline running");
            }
            // The release keeps going without us; nothing here needs undoing.
            MonitorOutcome::NotFound => warn!(
                pipeline = %pipeline,
                "Release pipeline has not reported a status yet; check its console"
            ),
        }
        Ok(())
    }
}

/// Stage 8: confirms the stack and critical parameters are in place.
#[derive(Debug, Clone, Copy, Default)]
pub struct VerifyDeploymentStage;

#[async_trait]
impl Stage for VerifyDeploymentStage {
    fn name(&self) -> &str {
        "Verify deployment"
    }

    async fn execute(&self, ctx: &StageContext) -> Result<()> {
        let name = &ctx.config.name;
        match ctx.provider.stack_status(name).await? {
            Some(status) if status.is_stable() && !status.is_failed() => {}
            Some(status) => {
                return Err(DeployError::Verification(format!("stack {name} is {status}")));
            }
            None => return Err(DeployError::Verification(format!("stack {name} does not exist"))),
        }

        let mut missing = Vec::new();
        for parameter in &ctx.namespace.critical_parameters {
            if !ctx.provider.parameter_exists(parameter).await? {
                missing.push(parameter.as_str());
            }
        }
        if !missing.is_empty() {
            return Err(DeployError::Verification(format!(
                "missing parameters: {}",
                missing.join(", ")
            )));
        }

        info!(
            deployment = %name,
            cleanup = %ctx.config.cleanup_command(&ctx.settings.program_name),
            "Deployment verified"
        );
        Ok(())
    }
}
