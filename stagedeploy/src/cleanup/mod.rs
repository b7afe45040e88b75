//! Teardown of everything a deployment identifier owns.
//!
//! Cleanup is a fold over per-resource results: every step runs, every
//! failure is recorded, and nothing is raised. The order is fixed:
//!
//! 1. the top-level stack;
//! 2. buckets, purged of every object version and delete marker first;
//! 3. parameters, critical ones first, then everything under each prefix.

use crate::config::Configuration;
use crate::namespace::ResourceNamespace;
use crate::polling::{poll_until, PollOutcome, PollPolicy};
use crate::ports::{
    ObjectStoreApi, ObjectVersion, ParameterStoreApi, ProviderError, StackApi, StackStatus,
};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use tracing::{info, warn};

/// Guidance shown for resources protected by an owning parent.
pub const OWNER_GUIDANCE: &str = "delete the owning stack first";

/// Upper bound on list-then-delete rounds for a single bucket.
const MAX_PURGE_ROUNDS: usize = 50;

/// Kinds of resources cleanup touches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceClass {
    /// Infrastructure stacks.
    Stack,
    /// Object versions and delete markers.
    ObjectVersion,
    /// Object-store buckets.
    Bucket,
    /// Configuration parameters.
    Parameter,
}

impl ResourceClass {
    /// Every class, in cleanup order.
    pub const ALL: [Self; 4] = [Self::Stack, Self::ObjectVersion, Self::Bucket, Self::Parameter];
}

impl fmt::Display for ResourceClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Stack => "stacks",
            Self::ObjectVersion => "object versions",
            Self::Bucket => "buckets",
            Self::Parameter => "parameters",
        })
    }
}

/// Counts for one resource class.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ClassTally {
    /// Resources found.
    pub found: usize,
    /// Resources removed.
    pub removed: usize,
    /// Resources that failed to go away for an unexpected reason.
    pub failed: usize,
}

impl ClassTally {
    /// Nothing of this class existed.
    #[must_use]
    pub fn nothing_to_do(&self) -> bool {
        self.found == 0 && self.failed == 0
    }
}

/// A deletion refused because a parent still owns the resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BlockedResource {
    /// Resource class.
    pub class: ResourceClass,
    /// Resource identifier.
    pub identifier: String,
    /// Why it was refused.
    pub reason: String,
}

/// A deletion that failed unexpectedly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CleanupFailure {
    /// Resource class.
    pub class: ResourceClass,
    /// Resource identifier.
    pub identifier: String,
    /// What went wrong.
    pub reason: String,
}

/// Aggregate outcome of a cleanup.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CleanupResult {
    /// Per-class counts.
    pub tallies: BTreeMap<ResourceClass, ClassTally>,
    /// Deletions blocked by an owning parent.
    pub blocked: Vec<BlockedResource>,
    /// Unexpected failures.
    pub failures: Vec<CleanupFailure>,
}

impl CleanupResult {
    /// Counts for `class`.
    #[must_use]
    pub fn tally(&self, class: ResourceClass) -> ClassTally {
        self.tallies.get(&class).copied().unwrap_or_default()
    }

    /// Nothing existed for any class.
    #[must_use]
    pub fn nothing_to_do(&self) -> bool {
        ResourceClass::ALL.iter().all(|c| self.tally(*c).nothing_to_do()) && self.blocked.is_empty()
    }

    /// No unexpected failures. Blocked resources do not count as failures.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }

    fn found(&mut self, class: ResourceClass, count: usize) {
        self.tallies.entry(class).or_default().found += count;
    }

    fn removed(&mut self, class: ResourceClass, count: usize) {
        self.tallies.entry(class).or_default().removed += count;
    }

    fn fail(&mut self, class: ResourceClass, identifier: &str, reason: impl Into<String>) {
        let reason = reason.into();
        warn!(%class, identifier, reason = %reason, "Cleanup failure");
        self.tallies.entry(class).or_default().failed += 1;
        self.failures.push(CleanupFailure {
            class,
            identifier: identifier.to_string(),
            reason,
        });
    }

    fn record_error(&mut self, class: ResourceClass, identifier: &str, error: &ProviderError) {
        if let ProviderError::Protected { owner, .. } = error {
            info!(%class, identifier, owner = %owner, "Deletion blocked by owner");
            self.blocked.push(BlockedResource {
                class,
                identifier: identifier.to_string(),
                reason: format!("protected by {owner}; {OWNER_GUIDANCE}"),
            });
        } else {
            self.fail(class, identifier, error.to_string());
        }
    }
}

impl fmt::Display for CleanupResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for class in ResourceClass::ALL {
            let tally = self.tally(class);
            if tally.nothing_to_do() {
                writeln!(f, "{class}: nothing to do")?;
            } else {
                writeln!(
                    f,
                    "{class}: {} found, {} removed, {} failed",
                    tally.found, tally.removed, tally.failed
                )?;
            }
        }
        if !self.blocked.is_empty() {
            writeln!(f, "Blocked:")?;
            for blocked in &self.blocked {
                writeln!(f, "  {}: {}", blocked.identifier, blocked.reason)?;
            }
        }
        if !self.failures.is_empty() {
            writeln!(f, "Failures:")?;
            for failure in &self.failures {
                writeln!(f, "  {} {}: {}", failure.class, failure.identifier, failure.reason)?;
            }
        }
        Ok(())
    }
}

/// Tears down a deployment.
pub struct CleanupManager<'a> {
    stacks: &'a dyn StackApi,
    objects: &'a dyn ObjectStoreApi,
    parameters: &'a dyn ParameterStoreApi,
    namespace: &'a ResourceNamespace,
    policy: PollPolicy,
    batch_size: usize,
}

impl<'a> CleanupManager<'a> {
    /// Creates a cleanup manager. `policy` bounds each stack wait.
    #[must_use]
    pub fn new(
        stacks: &'a dyn StackApi,
        objects: &'a dyn ObjectStoreApi,
        parameters: &'a dyn ParameterStoreApi,
        namespace: &'a ResourceNamespace,
        policy: PollPolicy,
    ) -> Self {
        Self {
            stacks,
            objects,
            parameters,
            namespace,
            policy,
            batch_size: 1000,
        }
    }

    /// Sets how many versions are deleted per request.
    #[must_use]
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Removes every resource the deployment owns.
    pub async fn cleanup(&self, config: &Configuration) -> CleanupResult {
        info!(name = %config.name, region = %config.region, "Starting cleanup");
        let mut result = CleanupResult::default();

        self.teardown_stack(&config.name, &mut result).await;
        self.purge_buckets(&mut result).await;
        self.purge_parameters(&mut result).await;

        info!(
            failures = result.failures.len(),
            blocked = result.blocked.len(),
            "Cleanup finished"
        );
        result
    }

    async fn teardown_stack(&self, name: &str, result: &mut CleanupResult) {
        let status = match self.stacks.stack_status(name).await {
            Ok(Some(status)) if !status.is_deleted() => status,
            Ok(_) | Err(ProviderError::NotFound(_)) => {
                info!(stack = name, "No stack to delete");
                return;
            }
            Err(e) => return result.record_error(ResourceClass::Stack, name, &e),
        };
        result.found(ResourceClass::Stack, 1);

        if status.is_deleting() {
            info!(stack = name, "Stack already deleting, waiting");
        } else {
            if status.is_delete_failed() {
                warn!(stack = name, "Previous delete failed, re-issuing");
            } else {
                info!(stack = name, %status, "Deleting stack");
            }
            if let Err(e) = self.stacks.delete_stack(name).await {
                return result.record_error(ResourceClass::Stack, name, &e);
            }
        }

        let what = format!("stack {name} to delete");
        let stacks = self.stacks;
        let outcome = poll_until(&self.policy, &what, |_| async move {
            match stacks.stack_status(name).await {
                Ok(None) | Err(ProviderError::NotFound(_)) => Ok(Some(StackStatus::DeleteComplete)),
                Ok(Some(status)) if status.is_deleted() || status.is_delete_failed() => {
                    Ok(Some(status))
                }
                Ok(Some(_)) => Ok(None),
                Err(e) => Err(e),
            }
        })
        .await;

        match outcome {
            Ok(PollOutcome::Ready { value, .. }) if value.is_deleted() => {
                info!(stack = name, "Stack deleted");
                result.removed(ResourceClass::Stack, 1);
            }
            Ok(PollOutcome::Ready { .. }) => {
                result.fail(ResourceClass::Stack, name, "stack deletion failed");
            }
            Ok(PollOutcome::TimedOut { waited, .. }) => {
                result.fail(
                    ResourceClass::Stack,
                    name,
                    format!("timed out after {}s waiting for deletion", waited.as_secs()),
                );
            }
            Err(e) => result.record_error(ResourceClass::Stack, name, &e),
        }
    }

    async fn purge_buckets(&self, result: &mut CleanupResult) {
        let mut buckets: Vec<String> = Vec::new();

        for bucket in &self.namespace.buckets {
            match self.objects.bucket_exists(bucket).await {
                Ok(true) => buckets.push(bucket.clone()),
                Ok(false) => {}
                Err(e) => result.record_error(ResourceClass::Bucket, bucket, &e),
            }
        }
        match self.objects.list_buckets().await {
            Ok(all) => {
                for bucket in all {
                    if self.namespace.owns(&bucket) && !buckets.contains(&bucket) {
                        buckets.push(bucket);
                    }
                }
            }
            Err(e) => result.fail(ResourceClass::Bucket, "bucket listing", e.to_string()),
        }

        if buckets.is_empty() {
            info!("No buckets to purge");
        }
        for bucket in buckets {
            result.found(ResourceClass::Bucket, 1);
            if self.purge_bucket(&bucket, result).await {
                match self.objects.delete_bucket(&bucket).await {
                    Ok(()) => {
                        info!(bucket = %bucket, "Bucket deleted");
                        result.removed(ResourceClass::Bucket, 1);
                    }
                    Err(e) => result.record_error(ResourceClass::Bucket, &bucket, &e),
                }
            }
        }
    }

    /// Empties a bucket. Returns false if anything was left behind.
    async fn purge_bucket(&self, bucket: &str, result: &mut CleanupResult) -> bool {
        for round in 0..MAX_PURGE_ROUNDS {
            let listing = match self.objects.list_object_versions(bucket).await {
                Ok(listing) => listing,
                Err(e) => {
                    result.record_error(ResourceClass::Bucket, bucket, &e);
                    return false;
                }
            };
            if listing.is_empty() {
                return true;
            }
            if round == 0 {
                result.found(
                    ResourceClass::ObjectVersion,
                    listing.versions.len() + listing.delete_markers.len(),
                );
            }
            info!(
                bucket,
                versions = listing.versions.len(),
                delete_markers = listing.delete_markers.len(),
                "Purging bucket"
            );

            let mut deleted = 0;
            for batch in [&listing.versions, &listing.delete_markers] {
                match self.delete_in_batches(bucket, batch).await {
                    Ok(n) => deleted += n,
                    Err(e) => {
                        result.fail(ResourceClass::ObjectVersion, bucket, e.to_string());
                        return false;
                    }
                }
            }
            result.removed(ResourceClass::ObjectVersion, deleted);

            if deleted == 0 {
                result.fail(ResourceClass::ObjectVersion, bucket, "objects remain after purge");
                return false;
            }
        }
        result.fail(
            ResourceClass::ObjectVersion,
            bucket,
            format!("still not empty after {MAX_PURGE_ROUNDS} rounds"),
        );
        false
    }

    async fn delete_in_batches(
        &self,
        bucket: &str,
        items: &[ObjectVersion],
    ) -> Result<usize, ProviderError> {
        let mut deleted = 0;
        for batch in items.chunks(self.batch_size) {
            deleted += self.objects.delete_object_versions(bucket, batch).await?;
        }
        Ok(deleted)
    }

    async fn purge_parameters(&self, result: &mut CleanupResult) {
        let mut handled: Vec<String> = Vec::new();

        for name in &self.namespace.critical_parameters {
            match self.parameters.parameter_exists(name).await {
                Ok(true) => {
                    self.delete_parameter(name, result).await;
                    handled.push(name.clone());
                }
                Ok(false) => {}
                Err(e) => result.record_error(ResourceClass::Parameter, name, &e),
            }
        }

        for prefix in &self.namespace.parameter_prefixes {
            let names = match self.parameters.list_parameters(prefix).await {
                Ok(names) => names,
                Err(e) => {
                    result.record_error(ResourceClass::Parameter, prefix, &e);
                    continue;
                }
            };
            for name in names {
                if handled.contains(&name) {
                    continue;
                }
                self.delete_parameter(&name, result).await;
                handled.push(name);
            }
        }

        if handled.is_empty() {
            info!("No parameters to delete");
        }
    }

    async fn delete_parameter(&self, name: &str, result: &mut CleanupResult) {
        result.found(ResourceClass::Parameter, 1);
        match self.parameters.delete_parameter(name).await {
            Ok(()) | Err(ProviderError::NotFound(_)) => {
                result.removed(ResourceClass::Parameter, 1);
            }
            Err(e) => result.record_error(ResourceClass::Parameter, name, &e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::InMemoryCloud;
    use pretty_assertions::assert_eq;

    fn config() -> Configuration {
        Configuration::new("demo")
    }

    async fn run(cloud: &InMemoryCloud, batch: usize) -> CleanupResult {
        let ns = ResourceNamespace::for_configuration(&config());
        CleanupManager::new(cloud, cloud, cloud, &ns, PollPolicy::immediate(5))
            .with_batch_size(batch)
            .cleanup(&config())
            .await
    }

    #[tokio::test]
    async fn test_nothing_to_do() {
        let cloud = InMemoryCloud::new();
        let result = run(&cloud, 1000).await;

        assert!(result.nothing_to_do());
        assert!(result.is_success());
        assert!(result.to_string().contains("stacks: nothing to do"));
    }

    #[tokio::test]
    async fn test_purge_removes_versions_markers_and_bucket() {
        let cloud = InMemoryCloud::new();
        cloud.add_bucket("demo-artifacts");
        for i in 0..5 {
            cloud.add_object_version("demo-artifacts", &format!("key-{i}"), &format!("v{i}"));
        }
        cloud.add_delete_marker("demo-artifacts", "key-0", "m0");
        cloud.add_bucket("demo-extra-logs");
        cloud.add_object_version("demo-extra-logs", "log", "v1");
        cloud.add_bucket("someone-else");

        let result = run(&cloud, 2).await;

        assert!(result.is_success());
        assert_eq!(result.tally(ResourceClass::Bucket).removed, 2);
        assert_eq!(result.tally(ResourceClass::ObjectVersion).removed, 7);
        assert!(!cloud.has_bucket("demo-artifacts"));
        assert!(!cloud.has_bucket("demo-extra-logs"));
        assert!(cloud.has_bucket("someone-else"));
        assert!(cloud.delete_batch_sizes().iter().all(|n| *n <= 2));
    }

    #[tokio::test]
    async fn test_stack_teardown_and_protected_parameters() {
        let cloud = InMemoryCloud::new();
        cloud.add_stack("demo", StackStatus::CreateComplete);
        cloud.add_parameter("/demo/config/agent-id", "agent-1");
        cloud.add_parameter("/demo/config/region", "us-east-1");
        cloud.protect_parameter("/demo/config/service-role-arn", "other-stack");

        let result = run(&cloud, 1000).await;

        assert_eq!(result.tally(ResourceClass::Stack).removed, 1);
        assert_eq!(result.tally(ResourceClass::Parameter).removed, 2);
        assert_eq!(result.blocked.len(), 1);
        assert!(result.blocked[0].reason.contains(OWNER_GUIDANCE));
        assert!(result.is_success());
        assert!(!cloud.has_stack("demo"));
    }

    #[tokio::test]
    async fn test_failed_delete_is_reissued() {
        let cloud = InMemoryCloud::new();
        cloud.add_stack("demo", StackStatus::DeleteFailed);

        let result = run(&cloud, 1000).await;

        assert_eq!(result.tally(ResourceClass::Stack).removed, 1);
        assert!(!cloud.has_stack("demo"));
    }

    #[tokio::test]
    async fn test_stuck_stack_and_failing_bucket_do_not_stop_cleanup() {
        let cloud = InMemoryCloud::new();
        cloud.add_stack("demo", StackStatus::CreateComplete);
        cloud.stick_stack_deletion("demo");
        cloud.add_bucket("demo-artifacts");
        cloud.fail_operation("delete_bucket");
        cloud.add_parameter("/demo/config/agent-id", "agent-1");

        let result = run(&cloud, 1000).await;

        assert!(!result.is_success());
        assert_eq!(result.tally(ResourceClass::Stack).failed, 1);
        assert_eq!(result.tally(ResourceClass::Bucket).failed, 1);
        assert_eq!(result.tally(ResourceClass::Parameter).removed, 1);
        assert!(result.failures[0].reason.contains("timed out"));
    }
}
