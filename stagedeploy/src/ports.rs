//! Ports - the external collaborators that stages, the conflict detector
//! and the cleanup manager talk to.
//!
//! Each resource family gets its own minimal trait so components only
//! depend on the operations they use. [`CloudProvider`] bundles all of them
//! for stage actions and is implemented automatically for any type that
//! implements every port.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors returned by collaborator calls.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProviderError {
    /// The resource does not exist.
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// The caller is not allowed to perform the operation.
    #[error("Access denied: {0}")]
    AccessDenied(String),

    /// The resource is owned by a parent that must be removed first.
    #[error("{identifier} is protected by {owner}")]
    Protected {
        /// The resource that could not be changed.
        identifier: String,
        /// The owning parent (usually a stack).
        owner: String,
    },

    /// An external command exited unsuccessfully.
    #[error("`{command}` exited with status {status}: {stderr}")]
    Command {
        /// The command line that ran.
        command: String,
        /// Exit status, or -1 if the process never started.
        status: i32,
        /// Captured standard error.
        stderr: String,
    },

    /// The collaborator answered with something we could not interpret.
    #[error("Unexpected response: {0}")]
    Parse(String),

    /// A required local tool is not installed.
    #[error("Missing prerequisite: {0}")]
    MissingPrerequisite(String),
}

/// Result alias for port calls.
pub type ProviderResult<T> = Result<T, ProviderError>;

/// Lifecycle state of an infrastructure stack.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StackStatus {
    /// Creation in progress.
    CreateInProgress,
    /// Created.
    CreateComplete,
    /// Creation failed.
    CreateFailed,
    /// Update in progress.
    UpdateInProgress,
    /// Updated.
    UpdateComplete,
    /// Update rolled back.
    UpdateRollbackComplete,
    /// Rolling back a failed update failed; the stack needs manual repair.
    UpdateRollbackFailed,
    /// Rollback in progress.
    RollbackInProgress,
    /// Create rolled back; the stack still exists.
    RollbackComplete,
    /// Rolling back a failed create failed; the stack still exists.
    RollbackFailed,
    /// Deletion in progress.
    DeleteInProgress,
    /// Deletion failed; the stack still exists.
    DeleteFailed,
    /// Deleted.
    DeleteComplete,
    /// Any state this crate does not model explicitly.
    Other(String),
}

impl StackStatus {
    /// Parses the provider's upper snake case representation.
    #[must_use]
    pub fn parse(raw: &str) -> Self {
        match raw.trim() {
            "CREATE_IN_PROGRESS" => Self::CreateInProgress,
            "CREATE_COMPLETE" => Self::CreateComplete,
            "CREATE_FAILED" => Self::CreateFailed,
            "UPDATE_IN_PROGRESS" => Self::UpdateInProgress,
            "UPDATE_COMPLETE" => Self::UpdateComplete,
            "UPDATE_ROLLBACK_COMPLETE" => Self::UpdateRollbackComplete,
            "UPDATE_ROLLBACK_FAILED" => Self::UpdateRollbackFailed,
            "ROLLBACK_IN_PROGRESS" => Self::RollbackInProgress,
            "ROLLBACK_COMPLETE" => Self::RollbackComplete,
            "ROLLBACK_FAILED" => Self::RollbackFailed,
            "DELETE_IN_PROGRESS" => Self::DeleteInProgress,
            "DELETE_FAILED" => Self::DeleteFailed,
            "DELETE_COMPLETE" => Self::DeleteComplete,
            other => Self::Other(other.to_string()),
        }
    }

    /// Created or updated and not moving.
    #[must_use]
    pub fn is_stable(&self) -> bool {
        matches!(
            self,
            Self::CreateComplete
                | Self::UpdateComplete
                | Self::UpdateRollbackComplete
                | Self::RollbackComplete
        )
    }

    /// Deletion has been issued and has not finished.
    #[must_use]
    pub fn is_deleting(&self) -> bool {
        matches!(self, Self::DeleteInProgress)
    }

    /// Deletion was attempted and failed.
    #[must_use]
    pub fn is_delete_failed(&self) -> bool {
        matches!(self, Self::DeleteFailed)
    }

    /// The stack is gone.
    #[must_use]
    pub fn is_deleted(&self) -> bool {
        matches!(self, Self::DeleteComplete)
    }

    /// A create or update ended in failure.
    #[must_use]
    pub fn is_failed(&self) -> bool {
        matches!(
            self,
            Self::CreateFailed
                | Self::RollbackComplete
                | Self::RollbackFailed
                | Self::UpdateRollbackComplete
                | Self::UpdateRollbackFailed
        )
    }
}

impl fmt::Display for StackStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let raw = match self {
            Self::CreateInProgress => "CREATE_IN_PROGRESS",
            Self::CreateComplete => "CREATE_COMPLETE",
            Self::CreateFailed => "CREATE_FAILED",
            Self::UpdateInProgress => "UPDATE_IN_PROGRESS",
            Self::UpdateComplete => "UPDATE_COMPLETE",
            Self::UpdateRollbackComplete => "UPDATE_ROLLBACK_COMPLETE",
            Self::UpdateRollbackFailed => "UPDATE_ROLLBACK_FAILED",
            Self::RollbackInProgress => "ROLLBACK_IN_PROGRESS",
            Self::RollbackComplete => "ROLLBACK_COMPLETE",
            Self::RollbackFailed => "ROLLBACK_FAILED",
            Self::DeleteInProgress => "DELETE_IN_PROGRESS",
            Self::DeleteFailed => "DELETE_FAILED",
            Self::DeleteComplete => "DELETE_COMPLETE",
            Self::Other(raw) => raw,
        };
        f.write_str(raw)
    }
}

/// A stack as returned by a listing call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StackSummary {
    /// Stack name.
    pub name: String,
    /// Current lifecycle state.
    pub status: StackStatus,
}

impl StackSummary {
    /// Creates a new stack summary.
    #[must_use]
    pub fn new(name: impl Into<String>, status: StackStatus) -> Self {
        Self {
            name: name.into(),
            status,
        }
    }
}

/// Request to create or update a stack from a template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackDeployment {
    /// Stack name.
    pub name: String,
    /// Path to the template file.
    pub template: PathBuf,
    /// Template parameters.
    pub parameters: BTreeMap<String, String>,
    /// Tags applied to every resource in the stack.
    pub tags: BTreeMap<String, String>,
}

/// One version (or delete marker) of an object in a versioned store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ObjectVersion {
    /// Object key.
    pub key: String,
    /// Version identifier.
    pub version_id: String,
}

impl ObjectVersion {
    /// Creates a new object version reference.
    #[must_use]
    pub fn new(key: impl Into<String>, version_id: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            version_id: version_id.into(),
        }
    }
}

/// Every version and delete marker in a container.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VersionListing {
    /// Historical and current object versions.
    pub versions: Vec<ObjectVersion>,
    /// Delete markers.
    pub delete_markers: Vec<ObjectVersion>,
}

impl VersionListing {
    /// Returns true if nothing remains in the container.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.versions.is_empty() && self.delete_markers.is_empty()
    }
}

/// Request to provision a managed AI agent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentRequest {
    /// Agent name.
    pub name: String,
    /// Role the agent runs as.
    pub role_arn: String,
    /// Foundation model identifier.
    pub model: String,
    /// System instruction.
    pub instruction: String,
}

/// The latest execution of an external build/release pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineExecution {
    /// Execution identifier.
    pub id: String,
    /// Reported status; empty while the pipeline has not picked it up.
    pub status: String,
}

/// Template/stack provisioning.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait StackApi: Send + Sync {
    /// Returns the stack's state, or `None` if it does not exist.
    async fn stack_status(&self, name: &str) -> ProviderResult<Option<StackStatus>>;

    /// Lists every stack that has not been fully deleted.
    async fn list_stacks(&self) -> ProviderResult<Vec<StackSummary>>;

    /// Issues deletion. Returns once the request is accepted.
    async fn delete_stack(&self, name: &str) -> ProviderResult<()>;

    /// Creates or updates a stack. Returns once the request is accepted.
    async fn deploy_stack(&self, deployment: &StackDeployment) -> ProviderResult<()>;

    /// Returns the stack's outputs.
    async fn stack_outputs(&self, name: &str) -> ProviderResult<BTreeMap<String, String>>;
}

/// Versioned object storage.
#[async_trait]
pub trait ObjectStoreApi: Send + Sync {
    /// Lists every bucket visible to the caller.
    async fn list_buckets(&self) -> ProviderResult<Vec<String>>;

    /// Returns true if the bucket exists.
    async fn bucket_exists(&self, bucket: &str) -> ProviderResult<bool>;

    /// Lists every object version and delete marker in the bucket.
    async fn list_object_versions(&self, bucket: &str) -> ProviderResult<VersionListing>;

    /// Deletes a batch of versions or markers, returning how many went away.
    async fn delete_object_versions(
        &self,
        bucket: &str,
        batch: &[ObjectVersion],
    ) -> ProviderResult<usize>;

    /// Deletes an empty bucket.
    async fn delete_bucket(&self, bucket: &str) -> ProviderResult<()>;

    /// Uploads a local directory under `prefix`, returning the object count.
    async fn sync_directory(&self, local: &Path, bucket: &str, prefix: &str)
        -> ProviderResult<usize>;
}

/// Hierarchical configuration-parameter store.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ParameterStoreApi: Send + Sync {
    /// Returns true if the parameter exists.
    async fn parameter_exists(&self, name: &str) -> ProviderResult<bool>;

    /// Lists every parameter under `prefix`, descending into sub-paths.
    async fn list_parameters(&self, prefix: &str) -> ProviderResult<Vec<String>>;

    /// Reads a parameter value.
    async fn get_parameter(&self, name: &str) -> ProviderResult<Option<String>>;

    /// Creates or overwrites a parameter.
    async fn put_parameter(&self, name: &str, value: &str) -> ProviderResult<()>;

    /// Deletes a parameter.
    async fn delete_parameter(&self, name: &str) -> ProviderResult<()>;
}

/// Directory/identity service.
#[async_trait]
pub trait IdentityApi: Send + Sync {
    /// Validates the configured credentials, returning the caller identity.
    async fn validate_credentials(&self) -> ProviderResult<String>;

    /// Verifies the role can be assumed.
    async fn assume_role(&self, role_arn: &str) -> ProviderResult<()>;
}

/// Managed AI agent provisioning.
#[async_trait]
pub trait AgentApi: Send + Sync {
    /// Creates the agent, returning its identifier.
    async fn create_agent(&self, request: &AgentRequest) -> ProviderResult<String>;
}

/// External CI/build pipeline.
#[async_trait]
pub trait BuildPipelineApi: Send + Sync {
    /// Starts a pipeline execution, returning its identifier.
    async fn start_pipeline(&self, pipeline: &str) -> ProviderResult<String>;

    /// Returns the most recent execution, or `None` if none is visible yet.
    async fn latest_execution(&self, pipeline: &str) -> ProviderResult<Option<PipelineExecution>>;
}

/// Local environment checks run during pre-flight.
#[async_trait]
pub trait PrerequisiteApi: Send + Sync {
    /// Verifies the required local tools are installed.
    async fn check_prerequisites(&self) -> ProviderResult<()>;

    /// Verifies the external services the pipeline needs respond.
    async fn check_service_reachability(&self) -> ProviderResult<()>;
}

/// Every port a stage action may need.
pub trait CloudProvider:
    StackApi
    + ObjectStoreApi
    + ParameterStoreApi
    + IdentityApi
    + AgentApi
    + BuildPipelineApi
    + PrerequisiteApi
{
    /// Views the provider as a stack port.
    fn stacks(&self) -> &dyn StackApi;

    /// Views the provider as an object store port.
    fn objects(&self) -> &dyn ObjectStoreApi;

    /// Views the provider as a parameter store port.
    fn parameters(&self) -> &dyn ParameterStoreApi;

    /// Views the provider as a pipeline port.
    fn pipelines(&self) -> &dyn BuildPipelineApi;
}

impl<T> CloudProvider for T
where
    T: StackApi
        + ObjectStoreApi
        + ParameterStoreApi
        + IdentityApi
        + AgentApi
        + BuildPipelineApi
        + PrerequisiteApi,
{
    fn stacks(&self) -> &dyn StackApi {
        self
    }

    fn objects(&self) -> &dyn ObjectStoreApi {
        self
    }

    fn parameters(&self) -> &dyn ParameterStoreApi {
        self
    }

    fn pipelines(&self) -> &dyn BuildPipelineApi {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stack_status_parse_and_display() {
        for raw in [
            "CREATE_COMPLETE",
            "DELETE_IN_PROGRESS",
            "DELETE_FAILED",
            "ROLLBACK_COMPLETE",
            "ROLLBACK_FAILED",
            "UPDATE_ROLLBACK_FAILED",
        ] {
            assert_eq!(StackStatus::parse(raw).to_string(), raw);
        }
        assert_eq!(
            StackStatus::parse("IMPORT_COMPLETE"),
            StackStatus::Other("IMPORT_COMPLETE".to_string())
        );
    }

    #[test]
    fn test_stack_status_classification() {
        assert!(StackStatus::CreateComplete.is_stable());
        assert!(StackStatus::UpdateComplete.is_stable());
        assert!(!StackStatus::DeleteInProgress.is_stable());
        assert!(StackStatus::DeleteInProgress.is_deleting());
        assert!(StackStatus::DeleteFailed.is_delete_failed());
        assert!(StackStatus::DeleteComplete.is_deleted());
        assert!(StackStatus::CreateFailed.is_failed());
        assert!(StackStatus::parse("ROLLBACK_FAILED").is_failed());
        assert!(StackStatus::parse("UPDATE_ROLLBACK_FAILED").is_failed());
        assert!(!StackStatus::UpdateRollbackFailed.is_stable());
    }

    #[test]
    fn test_version_listing_is_empty() {
        let mut listing = VersionListing::default();
        assert!(listing.is_empty());
        listing.delete_markers.push(ObjectVersion::new("a", "v1"));
        assert!(!listing.is_empty());
    }
}
