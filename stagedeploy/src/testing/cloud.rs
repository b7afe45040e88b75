//! In-memory fake of every cloud port.

use crate::ports::{
    AgentApi, AgentRequest, BuildPipelineApi, IdentityApi, ObjectStoreApi, ObjectVersion,
    ParameterStoreApi, PipelineExecution, PrerequisiteApi, ProviderError, ProviderResult,
    StackApi, StackDeployment, StackStatus, StackSummary, VersionListing,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::path::Path;

#[derive(Debug, Default)]
struct Bucket {
    versions: Vec<ObjectVersion>,
    delete_markers: Vec<ObjectVersion>,
}

#[derive(Debug, Default)]
struct State {
    stacks: BTreeMap<String, StackStatus>,
    stack_outputs: HashMap<String, BTreeMap<String, String>>,
    stuck_deletions: HashSet<String>,
    failing_deletions: HashSet<String>,
    deletion_countdown: HashMap<String, usize>,
    deploy_outcomes: HashMap<String, StackStatus>,
    deployments: Vec<StackDeployment>,
    buckets: BTreeMap<String, Bucket>,
    delete_batches: Vec<usize>,
    synced: Vec<(String, String, usize)>,
    parameters: BTreeMap<String, String>,
    protected: HashMap<String, String>,
    agents: Vec<AgentRequest>,
    assumed_roles: Vec<String>,
    pipelines: HashMap<String, VecDeque<Option<PipelineExecution>>>,
    started_pipelines: Vec<String>,
    credentials_valid: bool,
    prerequisite_error: Option<ProviderError>,
    service_error: Option<ProviderError>,
    failures: HashMap<String, Option<usize>>,
    calls: HashMap<String, usize>,
}

/// A fake cloud that keeps every resource in memory.
///
/// Stacks reach their target state immediately unless told otherwise with
/// [`stick_stack_deletion`](Self::stick_stack_deletion),
/// [`fail_stack_deletion`](Self::fail_stack_deletion) or
/// [`finish_deletion_after`](Self::finish_deletion_after). Any operation can
/// be made to fail by name with [`fail_operation`](Self::fail_operation).
#[derive(Debug)]
pub struct InMemoryCloud {
    state: Mutex<State>,
}

impl Default for InMemoryCloud {
    fn default() -> Self {
        Self {
            state: Mutex::new(State {
                credentials_valid: true,
                ..State::default()
            }),
        }
    }
}

impl InMemoryCloud {
    /// Creates an empty cloud with valid credentials.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    // -- setup -------------------------------------------------------------

    /// Adds a stack in `status`.
    pub fn add_stack(&self, name: &str, status: StackStatus) {
        self.state.lock().stacks.insert(name.to_string(), status);
    }

    /// Sets the outputs a stack reports.
    pub fn set_stack_outputs(&self, name: &str, outputs: BTreeMap<String, String>) {
        self.state.lock().stack_outputs.insert(name.to_string(), outputs);
    }

    /// Makes deleting `name` hang in `DELETE_IN_PROGRESS` forever.
    pub fn stick_stack_deletion(&self, name: &str) {
        self.state.lock().stuck_deletions.insert(name.to_string());
    }

    /// Makes deleting `name` end in `DELETE_FAILED`.
    pub fn fail_stack_deletion(&self, name: &str) {
        self.state.lock().failing_deletions.insert(name.to_string());
    }

    /// Makes a deleting stack disappear after `polls` status lookups.
    pub fn finish_deletion_after(&self, name: &str, polls: usize) {
        self.state.lock().deletion_countdown.insert(name.to_string(), polls);
    }

    /// Makes deploying `name` leave the stack in `status`.
    pub fn deploy_ends_in(&self, name: &str, status: StackStatus) {
        self.state.lock().deploy_outcomes.insert(name.to_string(), status);
    }

    /// Adds an empty bucket.
    pub fn add_bucket(&self, bucket: &str) {
        self.state.lock().buckets.entry(bucket.to_string()).or_default();
    }

    /// Adds an object version to a bucket, creating the bucket if needed.
    pub fn add_object_version(&self, bucket: &str, key: &str, version_id: &str) {
        self.state
            .lock()
            .buckets
            .entry(bucket.to_string())
            .or_default()
            .versions
            .push(ObjectVersion::new(key, version_id));
    }

    /// Adds a delete marker to a bucket, creating the bucket if needed.
    pub fn add_delete_marker(&self, bucket: &str, key: &str, version_id: &str) {
        self.state
            .lock()
            .buckets
            .entry(bucket.to_string())
            .or_default()
            .delete_markers
            .push(ObjectVersion::new(key, version_id));
    }

    /// Adds a parameter.
    pub fn add_parameter(&self, name: &str, value: &str) {
        self.state.lock().parameters.insert(name.to_string(), value.to_string());
    }

    /// Adds a parameter that refuses deletion because `owner` owns it.
    pub fn protect_parameter(&self, name: &str, owner: &str) {
        let mut state = self.state.lock();
        state.parameters.entry(name.to_string()).or_insert_with(|| "protected".to_string());
        state.protected.insert(name.to_string(), owner.to_string());
    }

    /// Scripts the answers of `latest_execution` for a pipeline.
    ///
    /// Each lookup consumes one answer; the last one repeats.
    pub fn script_pipeline(&self, pipeline: &str, answers: Vec<Option<PipelineExecution>>) {
        self.state
            .lock()
            .pipelines
            .insert(pipeline.to_string(), answers.into_iter().collect());
    }

    /// Sets whether credential validation succeeds.
    pub fn set_credentials_valid(&self, valid: bool) {
        self.state.lock().credentials_valid = valid;
    }

    /// Makes the tool prerequisite check fail with `error`.
    pub fn set_prerequisite_error(&self, error: ProviderError) {
        self.state.lock().prerequisite_error = Some(error);
    }

    /// Makes the service reachability check fail with `error`.
    pub fn set_service_error(&self, error: ProviderError) {
        self.state.lock().service_error = Some(error);
    }

    /// Makes every call to `operation` fail.
    pub fn fail_operation(&self, operation: &str) {
        self.state.lock().failures.insert(operation.to_string(), None);
    }

    /// Makes the next `times` calls to `operation` fail.
    pub fn fail_operation_times(&self, operation: &str, times: usize) {
        self.state
            .lock()
            .failures
            .insert(operation.to_string(), Some(times));
    }

    /// Stops injecting failures into `operation`.
    pub fn heal_operation(&self, operation: &str) {
        self.state.lock().failures.remove(operation);
    }

    // -- inspection --------------------------------------------------------

    /// How many times `operation` was called.
    #[must_use]
    pub fn calls(&self, operation: &str) -> usize {
        self.state.lock().calls.get(operation).copied().unwrap_or(0)
    }

    /// Returns true if the stack exists and is not deleted.
    #[must_use]
    pub fn has_stack(&self, name: &str) -> bool {
        self.state
            .lock()
            .stacks
            .get(name)
            .is_some_and(|s| !s.is_deleted())
    }

    /// Current status of a stack.
    #[must_use]
    pub fn stack(&self, name: &str) -> Option<StackStatus> {
        self.state.lock().stacks.get(name).cloned()
    }

    /// Every deployment request, in order.
    #[must_use]
    pub fn deployments(&self) -> Vec<StackDeployment> {
        self.state.lock().deployments.clone()
    }

    /// Returns true if the bucket exists.
    #[must_use]
    pub fn has_bucket(&self, bucket: &str) -> bool {
        self.state.lock().buckets.contains_key(bucket)
    }

    /// Number of versions plus delete markers left in a bucket.
    #[must_use]
    pub fn object_count(&self, bucket: &str) -> usize {
        self.state
            .lock()
            .buckets
            .get(bucket)
            .map_or(0, |b| b.versions.len() + b.delete_markers.len())
    }

    /// Size of every delete batch, in order.
    #[must_use]
    pub fn delete_batch_sizes(&self) -> Vec<usize> {
        self.state.lock().delete_batches.clone()
    }

    /// `(bucket, prefix, file count)` of every directory sync.
    #[must_use]
    pub fn synced(&self) -> Vec<(String, String, usize)> {
        self.state.lock().synced.clone()
    }

    /// Value of a parameter.
    #[must_use]
    pub fn parameter(&self, name: &str) -> Option<String> {
        self.state.lock().parameters.get(name).cloned()
    }

    /// Every parameter name.
    #[must_use]
    pub fn parameter_names(&self) -> Vec<String> {
        self.state.lock().parameters.keys().cloned().collect()
    }

    /// Every agent request.
    #[must_use]
    pub fn agents(&self) -> Vec<AgentRequest> {
        self.state.lock().agents.clone()
    }

    /// Every role assumed.
    #[must_use]
    pub fn assumed_roles(&self) -> Vec<String> {
        self.state.lock().assumed_roles.clone()
    }

    /// Every pipeline started.
    #[must_use]
    pub fn started_pipelines(&self) -> Vec<String> {
        self.state.lock().started_pipelines.clone()
    }

    /// Counts the call and applies any injected failure.
    fn enter(&self, operation: &str) -> ProviderResult<parking_lot::MutexGuard<'_, State>> {
        let mut state = self.state.lock();
        *state.calls.entry(operation.to_string()).or_default() += 1;

        let fail = match state.failures.get_mut(operation) {
            Some(None) => true,
            Some(Some(0)) | None => false,
            Some(Some(remaining)) => {
                *remaining -= 1;
                true
            }
        };
        if fail {
            return Err(ProviderError::Command {
                command: operation.to_string(),
                status: 1,
                stderr: "injected failure".to_string(),
            });
        }
        Ok(state)
    }
}

fn count_files(dir: &Path) -> std::io::Result<usize> {
    let mut count = 0;
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            count += count_files(&entry.path())?;
        } else {
            count += 1;
        }
    }
    Ok(count)
}

#[async_trait]
impl StackApi for InMemoryCloud {
    async fn stack_status(&self, name: &str) -> ProviderResult<Option<StackStatus>> {
        let mut state = self.enter("stack_status")?;
        match state.deletion_countdown.get(name).copied() {
            Some(0) => {
                state.deletion_countdown.remove(name);
                state.stacks.remove(name);
                return Ok(None);
            }
            Some(remaining) => {
                state.deletion_countdown.insert(name.to_string(), remaining - 1);
            }
            None => {}
        }
        Ok(state.stacks.get(name).filter(|s| !s.is_deleted()).cloned())
    }

    async fn list_stacks(&self) -> ProviderResult<Vec<StackSummary>> {
        let state = self.enter("list_stacks")?;
        Ok(state
            .stacks
            .iter()
            .filter(|(_, status)| !status.is_deleted())
            .map(|(name, status)| StackSummary::new(name.clone(), status.clone()))
            .collect())
    }

    async fn delete_stack(&self, name: &str) -> ProviderResult<()> {
        let mut state = self.enter("delete_stack")?;
        if !state.stacks.contains_key(name) {
            return Err(ProviderError::NotFound(name.to_string()));
        }
        if state.stuck_deletions.contains(name) || state.deletion_countdown.contains_key(name) {
            state.stacks.insert(name.to_string(), StackStatus::DeleteInProgress);
        } else if state.failing_deletions.contains(name) {
            state.stacks.insert(name.to_string(), StackStatus::DeleteFailed);
        } else {
            state.stacks.remove(name);
            state.stack_outputs.remove(name);
        }
        Ok(())
    }

    async fn deploy_stack(&self, deployment: &StackDeployment) -> ProviderResult<()> {
        let mut state = self.enter("deploy_stack")?;
        let status = if let Some(outcome) = state.deploy_outcomes.get(&deployment.name) {
            outcome.clone()
        } else if state.stacks.contains_key(&deployment.name) {
            StackStatus::UpdateComplete
        } else {
            StackStatus::CreateComplete
        };
        state.stacks.insert(deployment.name.clone(), status);
        state.deployments.push(deployment.clone());
        Ok(())
    }

    async fn stack_outputs(&self, name: &str) -> ProviderResult<BTreeMap<String, String>> {
        let state = self.enter("stack_outputs")?;
        if !state.stacks.contains_key(name) {
            return Err(ProviderError::NotFound(name.to_string()));
        }
        Ok(state.stack_outputs.get(name).cloned().unwrap_or_default())
    }
}

#[async_trait]
impl ObjectStoreApi for InMemoryCloud {
    async fn list_buckets(&self) -> ProviderResult<Vec<String>> {
        let state = self.enter("list_buckets")?;
        Ok(state.buckets.keys().cloned().collect())
    }

    async fn bucket_exists(&self, bucket: &str) -> ProviderResult<bool> {
        let state = self.enter("bucket_exists")?;
        Ok(state.buckets.contains_key(bucket))
    }

    async fn list_object_versions(&self, bucket: &str) -> ProviderResult<VersionListing> {
        let state = self.enter("list_object_versions")?;
        let b = state
            .buckets
            .get(bucket)
            .ok_or_else(|| ProviderError::NotFound(bucket.to_string()))?;
        Ok(VersionListing {
            versions: b.versions.clone(),
            delete_markers: b.delete_markers.clone(),
        })
    }

    async fn delete_object_versions(
        &self,
        bucket: &str,
        batch: &[ObjectVersion],
    ) -> ProviderResult<usize> {
        let mut state = self.enter("delete_object_versions")?;
        state.delete_batches.push(batch.len());
        let b = state
            .buckets
            .get_mut(bucket)
            .ok_or_else(|| ProviderError::NotFound(bucket.to_string()))?;
        let before = b.versions.len() + b.delete_markers.len();
        b.versions.retain(|v| !batch.contains(v));
        b.delete_markers.retain(|v| !batch.contains(v));
        Ok(before - (b.versions.len() + b.delete_markers.len()))
    }

    async fn delete_bucket(&self, bucket: &str) -> ProviderResult<()> {
        let mut state = self.enter("delete_bucket")?;
        match state.buckets.get(bucket) {
            None => Err(ProviderError::NotFound(bucket.to_string())),
            Some(b) if !b.versions.is_empty() || !b.delete_markers.is_empty() => {
                Err(ProviderError::Command {
                    command: "delete_bucket".to_string(),
                    status: 1,
                    stderr: format!("BucketNotEmpty: {bucket}"),
                })
            }
            Some(_) => {
                state.buckets.remove(bucket);
                Ok(())
            }
        }
    }

    async fn sync_directory(
        &self,
        local: &Path,
        bucket: &str,
        prefix: &str,
    ) -> ProviderResult<usize> {
        let mut state = self.enter("sync_directory")?;
        let count = count_files(local).map_err(|e| ProviderError::Command {
            command: format!("sync {}", local.display()),
            status: 1,
            stderr: e.to_string(),
        })?;
        let b = state
            .buckets
            .get_mut(bucket)
            .ok_or_else(|| ProviderError::NotFound(bucket.to_string()))?;
        for i in 0..count {
            b.versions
                .push(ObjectVersion::new(format!("{prefix}object-{i}"), format!("v{i}")));
        }
        state
            .synced
            .push((bucket.to_string(), prefix.to_string(), count));
        Ok(count)
    }
}

#[async_trait]
impl ParameterStoreApi for InMemoryCloud {
    async fn parameter_exists(&self, name: &str) -> ProviderResult<bool> {
        let state = self.enter("parameter_exists")?;
        Ok(state.parameters.contains_key(name))
    }

    async fn list_parameters(&self, prefix: &str) -> ProviderResult<Vec<String>> {
        let state = self.enter("list_parameters")?;
        Ok(state
            .parameters
            .keys()
            .filter(|name| name.starts_with(prefix))
            .cloned()
            .collect())
    }

    async fn get_parameter(&self, name: &str) -> ProviderResult<Option<String>> {
        let state = self.enter("get_parameter")?;
        Ok(state.parameters.get(name).cloned())
    }

    async fn put_parameter(&self, name: &str, value: &str) -> ProviderResult<()> {
        let mut state = self.enter("put_parameter")?;
        state.parameters.insert(name.to_string(), value.to_string());
        Ok(())
    }

    async fn delete_parameter(&self, name: &str) -> ProviderResult<()> {
        let mut state = self.enter("delete_parameter")?;
        if let Some(owner) = state.protected.get(name) {
            return Err(ProviderError::Protected {
                identifier: name.to_string(),
                owner: owner.clone(),
            });
        }
        state
            .parameters
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| ProviderError::NotFound(name.to_string()))
    }
}

#[async_trait]
impl IdentityApi for InMemoryCloud {
    async fn validate_credentials(&self) -> ProviderResult<String> {
        let state = self.enter("validate_credentials")?;
        if state.credentials_valid {
            Ok("arn:aws:iam::123456789012:user/tester".to_string())
        } else {
            Err(ProviderError::AccessDenied("credentials rejected".to_string()))
        }
    }

    async fn assume_role(&self, role_arn: &str) -> ProviderResult<()> {
        let mut state = self.enter("assume_role")?;
        state.assumed_roles.push(role_arn.to_string());
        Ok(())
    }
}

#[async_trait]
impl AgentApi for InMemoryCloud {
    async fn create_agent(&self, request: &AgentRequest) -> ProviderResult<String> {
        let mut state = self.enter("create_agent")?;
        state.agents.push(request.clone());
        Ok(format!("AGENT{:04}", state.agents.len()))
    }
}

#[async_trait]
impl BuildPipelineApi for InMemoryCloud {
    async fn start_pipeline(&self, pipeline: &str) -> ProviderResult<String> {
        let mut state = self.enter("start_pipeline")?;
        state.started_pipelines.push(pipeline.to_string());
        let id = format!("exec-{}", state.started_pipelines.len());
        state
            .pipelines
            .entry(pipeline.to_string())
            .or_insert_with(|| {
                VecDeque::from([Some(PipelineExecution {
                    id: id.clone(),
                    status: "InProgress".to_string(),
                })])
            });
        Ok(id)
    }

    async fn latest_execution(&self, pipeline: &str) -> ProviderResult<Option<PipelineExecution>> {
        let mut state = self.enter("latest_execution")?;
        let Some(answers) = state.pipelines.get_mut(pipeline) else {
            return Ok(None);
        };
        if answers.len() > 1 {
            Ok(answers.pop_front().flatten())
        } else {
            Ok(answers.front().cloned().flatten())
        }
    }
}

#[async_trait]
impl PrerequisiteApi for InMemoryCloud {
    async fn check_prerequisites(&self) -> ProviderResult<()> {
        let state = self.enter("check_prerequisites")?;
        state.prerequisite_error.clone().map_or(Ok(()), Err)
    }

    async fn check_service_reachability(&self) -> ProviderResult<()> {
        let state = self.enter("check_service_reachability")?;
        state.service_error.clone().map_or(Ok(()), Err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_failure_injection_counts_down() {
        let cloud = InMemoryCloud::new();
        cloud.fail_operation_times("list_stacks", 1);

        assert!(cloud.list_stacks().await.is_err());
        assert!(cloud.list_stacks().await.is_ok());
        assert_eq!(cloud.calls("list_stacks"), 2);
    }

    #[tokio::test]
    async fn test_deletion_countdown() {
        let cloud = InMemoryCloud::new();
        cloud.add_stack("demo", StackStatus::DeleteInProgress);
        cloud.finish_deletion_after("demo", 1);

        assert_eq!(
            cloud.stack_status("demo").await.unwrap(),
            Some(StackStatus::DeleteInProgress)
        );
        assert_eq!(cloud.stack_status("demo").await.unwrap(), None);
        assert!(!cloud.has_stack("demo"));
    }

    #[tokio::test]
    async fn test_protected_parameter() {
        let cloud = InMemoryCloud::new();
        cloud.protect_parameter("/demo/x", "demo");
        assert!(matches!(
            cloud.delete_parameter("/demo/x").await,
            Err(ProviderError::Protected { .. })
        ));
        assert!(cloud.parameter_exists("/demo/x").await.unwrap());
    }

    #[tokio::test]
    async fn test_bucket_refuses_deletion_until_empty() {
        let cloud = InMemoryCloud::new();
        cloud.add_object_version("b", "k", "v1");
        assert!(cloud.delete_bucket("b").await.is_err());

        let listing = cloud.list_object_versions("b").await.unwrap();
        assert_eq!(cloud.delete_object_versions("b", &listing.versions).await.unwrap(), 1);
        cloud.delete_bucket("b").await.unwrap();
        assert!(!cloud.has_bucket("b"));
    }
}
