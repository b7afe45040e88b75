//! Provider backed by the `aws` command-line tool.
//!
//! Every call runs `aws <service> <operation> ... --output json --region R
//! --profile P` and parses stdout with `serde_json`. Failures are
//! classified from stderr into [`ProviderError`] variants so the engine
//! can tell "gone" from "forbidden" from everything else.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use stagedeploy::config::Configuration;
use stagedeploy::ports::{
    AgentApi, AgentRequest, BuildPipelineApi, IdentityApi, ObjectStoreApi, ObjectVersion,
    ParameterStoreApi, PipelineExecution, PrerequisiteApi, ProviderError, ProviderResult,
    StackApi, StackDeployment, StackStatus, StackSummary, VersionListing,
};
use std::collections::BTreeMap;
use std::path::Path;
use tokio::process::Command;
use tracing::{debug, trace};

const NOT_FOUND_MARKERS: &[&str] = &[
    "does not exist",
    "NoSuchBucket",
    "ParameterNotFound",
    "NotFound",
    "(404)",
    "ResourceNotFoundException",
    "PipelineNotFoundException",
];

const ACCESS_DENIED_MARKERS: &[&str] = &[
    "AccessDenied",
    "UnauthorizedOperation",
    "ExpiredToken",
    "InvalidClientTokenId",
    "(403)",
];

/// Shells out to `aws` for every port.
#[derive(Debug, Clone)]
pub struct AwsCli {
    program: String,
    region: String,
    profile: String,
}

impl AwsCli {
    /// Targets the region and profile of a configuration.
    pub fn new(config: &Configuration) -> Self {
        Self {
            program: "aws".to_string(),
            region: config.region.clone(),
            profile: config.profile.clone(),
        }
    }

    /// Full argument list for one call, global options included.
    pub fn arguments<S: AsRef<str>>(&self, args: &[S]) -> Vec<String> {
        let mut out: Vec<String> = args.iter().map(|a| a.as_ref().to_string()).collect();
        out.extend([
            "--output".to_string(),
            "json".to_string(),
            "--region".to_string(),
            self.region.clone(),
            "--profile".to_string(),
            self.profile.clone(),
        ]);
        out
    }

    async fn run<S: AsRef<str>>(&self, args: &[S]) -> ProviderResult<String> {
        let args = self.arguments(args);
        let command = format!("{} {}", self.program, shell_words::join(&args));
        debug!(command = %command, "Running");

        let output = Command::new(&self.program)
            .args(&args)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| ProviderError::Command {
                command: command.clone(),
                status: -1,
                stderr: e.to_string(),
            })?;

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        trace!(command = %command, stdout = %stdout, "Finished");
        if output.status.success() {
            Ok(stdout)
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            Err(classify(command, output.status.code().unwrap_or(-1), stderr))
        }
    }

    async fn run_json<T, S>(&self, args: &[S]) -> ProviderResult<T>
    where
        T: DeserializeOwned,
        S: AsRef<str>,
    {
        let stdout = self.run(args).await?;
        parse_json(&stdout)
    }
}

/// Maps a failed command to the most specific error its stderr allows.
pub fn classify(command: String, status: i32, stderr: String) -> ProviderError {
    if ACCESS_DENIED_MARKERS.iter().any(|m| stderr.contains(m)) {
        ProviderError::AccessDenied(stderr)
    } else if NOT_FOUND_MARKERS.iter().any(|m| stderr.contains(m)) {
        ProviderError::NotFound(stderr)
    } else {
        ProviderError::Command {
            command,
            status,
            stderr,
        }
    }
}

/// Parses JSON stdout; empty output reads as an empty object.
pub fn parse_json<T: DeserializeOwned>(stdout: &str) -> ProviderResult<T> {
    let text = if stdout.trim().is_empty() { "{}" } else { stdout };
    serde_json::from_str(text).map_err(|e| ProviderError::Parse(e.to_string()))
}

/// The stack a parameter under `/<stack>/...` belongs to.
fn owning_stack(parameter: &str) -> String {
    parameter
        .trim_start_matches('/')
        .split('/')
        .next()
        .unwrap_or_default()
        .to_string()
}

fn not_found_as_none<T>(result: ProviderResult<T>) -> ProviderResult<Option<T>> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(ProviderError::NotFound(_)) => Ok(None),
        Err(e) => Err(e),
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
struct DescribeStacks {
    stacks: Vec<StackDescription>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
struct StackDescription {
    stack_name: String,
    stack_status: String,
    outputs: Vec<StackOutput>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
struct StackOutput {
    output_key: String,
    output_value: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
struct ListStacks {
    stack_summaries: Vec<StackDescription>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
struct ListBuckets {
    buckets: Vec<BucketEntry>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
struct BucketEntry {
    name: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
struct ListObjectVersions {
    versions: Option<Vec<VersionEntry>>,
    delete_markers: Option<Vec<VersionEntry>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
struct VersionEntry {
    key: String,
    version_id: String,
}

impl From<VersionEntry> for ObjectVersion {
    fn from(entry: VersionEntry) -> Self {
        Self::new(entry.key, entry.version_id)
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
struct DeleteObjects {
    errors: Vec<serde_json::Value>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
struct GetParameter {
    parameter: ParameterEntry,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
struct ParametersByPath {
    parameters: Vec<ParameterEntry>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
struct ParameterEntry {
    name: String,
    value: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
struct CallerIdentity {
    arn: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct CreateAgent {
    agent: AgentEntry,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct AgentEntry {
    agent_id: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct StartExecution {
    pipeline_execution_id: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct ListExecutions {
    pipeline_execution_summaries: Vec<ExecutionSummary>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct ExecutionSummary {
    pipeline_execution_id: String,
    status: String,
}

#[async_trait]
impl StackApi for AwsCli {
    async fn stack_status(&self, name: &str) -> ProviderResult<Option<StackStatus>> {
        let described: Option<DescribeStacks> = not_found_as_none(
            self.run_json(&["cloudformation", "describe-stacks", "--stack-name", name])
                .await,
        )?;
        Ok(described
            .and_then(|d| d.stacks.into_iter().next())
            .map(|s| StackStatus::parse(&s.stack_status))
            .filter(|status| !status.is_deleted()))
    }

    async fn list_stacks(&self) -> ProviderResult<Vec<StackSummary>> {
        let listed: ListStacks = self.run_json(&["cloudformation", "list-stacks"]).await?;
        Ok(listed
            .stack_summaries
            .into_iter()
            .map(|s| StackSummary::new(s.stack_name, StackStatus::parse(&s.stack_status)))
            .filter(|s| !s.status.is_deleted())
            .collect())
    }

    async fn delete_stack(&self, name: &str) -> ProviderResult<()> {
        self.run(&["cloudformation", "delete-stack", "--stack-name", name])
            .await
            .map(drop)
    }

    async fn deploy_stack(&self, deployment: &StackDeployment) -> ProviderResult<()> {
        let mut args = vec![
            "cloudformation".to_string(),
            "deploy".to_string(),
            "--stack-name".to_string(),
            deployment.name.clone(),
            "--template-file".to_string(),
            deployment.template.display().to_string(),
            "--capabilities".to_string(),
            "CAPABILITY_NAMED_IAM".to_string(),
            "--no-fail-on-empty-changeset".to_string(),
        ];
        if !deployment.parameters.is_empty() {
            args.push("--parameter-overrides".to_string());
            args.extend(deployment.parameters.iter().map(|(k, v)| format!("{k}={v}")));
        }
        if !deployment.tags.is_empty() {
            args.push("--tags".to_string());
            args.extend(deployment.tags.iter().map(|(k, v)| format!("{k}={v}")));
        }
        self.run(args.as_slice()).await.map(drop)
    }

    async fn stack_outputs(&self, name: &str) -> ProviderResult<BTreeMap<String, String>> {
        let described: DescribeStacks = self
            .run_json(&["cloudformation", "describe-stacks", "--stack-name", name])
            .await?;
        let stack = described
            .stacks
            .into_iter()
            .next()
            .ok_or_else(|| ProviderError::NotFound(name.to_string()))?;
        Ok(stack
            .outputs
            .into_iter()
            .map(|o| (o.output_key, o.output_value))
            .collect())
    }
}

#[async_trait]
impl ObjectStoreApi for AwsCli {
    async fn list_buckets(&self) -> ProviderResult<Vec<String>> {
        let listed: ListBuckets = self.run_json(&["s3api", "list-buckets"]).await?;
        Ok(listed.buckets.into_iter().map(|b| b.name).collect())
    }

    async fn bucket_exists(&self, bucket: &str) -> ProviderResult<bool> {
        let found = not_found_as_none(self.run(&["s3api", "head-bucket", "--bucket", bucket]).await)?;
        Ok(found.is_some())
    }

    async fn list_object_versions(&self, bucket: &str) -> ProviderResult<VersionListing> {
        let listed: ListObjectVersions = self
            .run_json(&["s3api", "list-object-versions", "--bucket", bucket])
            .await?;
        Ok(VersionListing {
            versions: listed.versions.unwrap_or_default().into_iter().map(Into::into).collect(),
            delete_markers: listed
                .delete_markers
                .unwrap_or_default()
                .into_iter()
                .map(Into::into)
                .collect(),
        })
    }

    async fn delete_object_versions(
        &self,
        bucket: &str,
        batch: &[ObjectVersion],
    ) -> ProviderResult<usize> {
        if batch.is_empty() {
            return Ok(0);
        }
        let request = delete_request(batch);
        let response: DeleteObjects = self
            .run_json(&["s3api", "delete-objects", "--bucket", bucket, "--delete", request.as_str()])
            .await?;
        Ok(batch.len().saturating_sub(response.errors.len()))
    }

    async fn delete_bucket(&self, bucket: &str) -> ProviderResult<()> {
        self.run(&["s3api", "delete-bucket", "--bucket", bucket])
            .await
            .map(drop)
    }

    async fn sync_directory(
        &self,
        local: &Path,
        bucket: &str,
        prefix: &str,
    ) -> ProviderResult<usize> {
        let destination = format!("s3://{bucket}/{prefix}");
        let local = local.display().to_string();
        let stdout = self.run(&["s3", "sync", local.as_str(), destination.as_str()]).await?;
        Ok(stdout.lines().filter(|l| l.starts_with("upload:")).count())
    }
}

/// Body of an `s3api delete-objects` call.
pub fn delete_request(batch: &[ObjectVersion]) -> String {
    let objects: Vec<serde_json::Value> = batch
        .iter()
        .map(|v| serde_json::json!({ "Key": v.key, "VersionId": v.version_id }))
        .collect();
    serde_json::json!({ "Objects": objects, "Quiet": true }).to_string()
}

#[async_trait]
impl ParameterStoreApi for AwsCli {
    async fn parameter_exists(&self, name: &str) -> ProviderResult<bool> {
        Ok(self.get_parameter(name).await?.is_some())
    }

    async fn list_parameters(&self, prefix: &str) -> ProviderResult<Vec<String>> {
        let path = match prefix.trim_end_matches('/') {
            "" => "/",
            trimmed => trimmed,
        };
        let listed: ParametersByPath = self
            .run_json(&["ssm", "get-parameters-by-path", "--path", path, "--recursive"])
            .await?;
        Ok(listed.parameters.into_iter().map(|p| p.name).collect())
    }

    async fn get_parameter(&self, name: &str) -> ProviderResult<Option<String>> {
        let found: Option<GetParameter> =
            not_found_as_none(self.run_json(&["ssm", "get-parameter", "--name", name]).await)?;
        Ok(found.map(|p| p.parameter.value))
    }

    async fn put_parameter(&self, name: &str, value: &str) -> ProviderResult<()> {
        self.run(&[
            "ssm",
            "put-parameter",
            "--name",
            name,
            "--value",
            value,
            "--type",
            "String",
            "--overwrite",
        ])
        .await
        .map(drop)
    }

    async fn delete_parameter(&self, name: &str) -> ProviderResult<()> {
        match self.run(&["ssm", "delete-parameter", "--name", name]).await {
            Ok(_) => Ok(()),
            Err(ProviderError::AccessDenied(_)) => Err(ProviderError::Protected {
                identifier: name.to_string(),
                owner: owning_stack(name),
            }),
            Err(e) => Err(e),
        }
    }
}

#[async_trait]
impl IdentityApi for AwsCli {
    async fn validate_credentials(&self) -> ProviderResult<String> {
        let identity: CallerIdentity = self.run_json(&["sts", "get-caller-identity"]).await?;
        Ok(identity.arn)
    }

    async fn assume_role(&self, role_arn: &str) -> ProviderResult<()> {
        self.run(&[
            "sts",
            "assume-role",
            "--role-arn",
            role_arn,
            "--role-session-name",
            "stagedeploy-verify",
        ])
        .await
        .map(drop)
    }
}

#[async_trait]
impl AgentApi for AwsCli {
    async fn create_agent(&self, request: &AgentRequest) -> ProviderResult<String> {
        let created: CreateAgent = self
            .run_json(&[
                "bedrock-agent",
                "create-agent",
                "--agent-name",
                request.name.as_str(),
                "--agent-resource-role-arn",
                request.role_arn.as_str(),
                "--foundation-model",
                request.model.as_str(),
                "--instruction",
                request.instruction.as_str(),
            ])
            .await?;
        if created.agent.agent_id.is_empty() {
            return Err(ProviderError::Parse("create-agent returned no agentId".to_string()));
        }
        Ok(created.agent.agent_id)
    }
}

#[async_trait]
impl BuildPipelineApi for AwsCli {
    async fn start_pipeline(&self, pipeline: &str) -> ProviderResult<String> {
        let started: StartExecution = self
            .run_json(&["codepipeline", "start-pipeline-execution", "--name", pipeline])
            .await?;
        Ok(started.pipeline_execution_id)
    }

    async fn latest_execution(&self, pipeline: &str) -> ProviderResult<Option<PipelineExecution>> {
        let listed: ListExecutions = self
            .run_json(&[
                "codepipeline",
                "list-pipeline-executions",
                "--pipeline-name",
                pipeline,
                "--max-items",
                "1",
            ])
            .await?;
        Ok(listed
            .pipeline_execution_summaries
            .into_iter()
            .next()
            .map(|s| PipelineExecution {
                id: s.pipeline_execution_id,
                status: s.status,
            }))
    }
}

#[async_trait]
impl PrerequisiteApi for AwsCli {
    async fn check_prerequisites(&self) -> ProviderResult<()> {
        which::which(&self.program)
            .map(drop)
            .map_err(|_| ProviderError::MissingPrerequisite(format!("`{}` is not on PATH", self.program)))
    }

    async fn check_service_reachability(&self) -> ProviderResult<()> {
        self.run(&["cloudformation", "describe-account-limits"])
            .await
            .map(drop)
    }
}
