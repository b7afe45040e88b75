//! Pre-flight detection of resources that would collide with a deployment.
//!
//! Scanning follows the typed [`ResourceNamespace`]:
//!
//! 1. look up each critical parameter;
//! 2. list every parameter under each namespace prefix;
//! 3. list stacks owned by the identifier and report every one that still
//!    exists and is not being deleted;
//! 4. wait out stacks that are mid-deletion.
//!
//! Once [`ConflictDetector::check`] returns `Ok`, nothing in the namespace
//! is still being deleted.

use crate::config::Configuration;
use crate::errors::{DeployError, Result};
use crate::namespace::ResourceNamespace;
use crate::polling::{poll_until, PollOutcome, PollPolicy};
use crate::ports::{ParameterStoreApi, ProviderError, StackApi, StackStatus};
use serde::Serialize;
use std::fmt;
use tracing::{debug, info, warn};

/// What kind of resource collides.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictKind {
    /// A stack that exists in a stable state.
    Stack,
    /// A stack whose deletion failed and still exists.
    StackDeleteFailed,
    /// A stack left behind by a failed create, update or rollback.
    StackFailed,
    /// A configuration parameter.
    Parameter,
}

impl fmt::Display for ConflictKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Stack => "stack",
            Self::StackDeleteFailed => "stack (delete failed)",
            Self::StackFailed => "stack (failed)",
            Self::Parameter => "parameter",
        })
    }
}

/// One colliding resource and the command that removes it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Conflict {
    /// Resource kind.
    pub kind: ConflictKind,
    /// Resource identifier.
    pub identifier: String,
    /// Exact command that removes the resource.
    pub remediation: String,
}

impl Conflict {
    fn stack(kind: ConflictKind, name: &str, config: &Configuration) -> Self {
        Self {
            kind,
            identifier: name.to_string(),
            remediation: shell_words::join([
                "aws",
                "cloudformation",
                "delete-stack",
                "--stack-name",
                name,
                "--region",
                config.region.as_str(),
                "--profile",
                config.profile.as_str(),
            ]),
        }
    }

    fn parameter(name: &str, config: &Configuration) -> Self {
        Self {
            kind: ConflictKind::Parameter,
            identifier: name.to_string(),
            remediation: shell_words::join([
                "aws",
                "ssm",
                "delete-parameter",
                "--name",
                name,
                "--region",
                config.region.as_str(),
                "--profile",
                config.profile.as_str(),
            ]),
        }
    }
}

/// Result of a conflict scan.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ConflictReport {
    /// Must be removed (or explicitly accepted) before deploying.
    pub must_resolve: Vec<Conflict>,
    /// Leftovers the deployment will overwrite if the operator agrees.
    pub may_proceed: Vec<Conflict>,
}

impl ConflictReport {
    /// Returns true if nothing collides.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.must_resolve.is_empty() && self.may_proceed.is_empty()
    }

    /// Total number of conflicts.
    #[must_use]
    pub fn len(&self) -> usize {
        self.must_resolve.len() + self.may_proceed.len()
    }

    /// All conflicts, must-resolve first.
    pub fn iter(&self) -> impl Iterator<Item = &Conflict> {
        self.must_resolve.iter().chain(self.may_proceed.iter())
    }

    /// One-line summary for error messages.
    #[must_use]
    pub fn summary(&self) -> String {
        format!(
            "{} stack(s) and {} parameter(s) already exist",
            self.must_resolve.len(),
            self.may_proceed.len()
        )
    }

    fn push_parameter(&mut self, conflict: Conflict) {
        if !self.may_proceed.iter().any(|c| c.identifier == conflict.identifier) {
            self.may_proceed.push(conflict);
        }
    }

    fn push_stack(&mut self, conflict: Conflict) {
        if !self.must_resolve.iter().any(|c| c.identifier == conflict.identifier) {
            self.must_resolve.push(conflict);
        }
    }
}

/// Scans a deployment namespace for collisions.
pub struct ConflictDetector<'a> {
    stacks: &'a dyn StackApi,
    parameters: &'a dyn ParameterStoreApi,
    namespace: &'a ResourceNamespace,
    policy: PollPolicy,
}

impl<'a> ConflictDetector<'a> {
    /// Creates a detector. `policy` bounds the wait for deleting stacks.
    #[must_use]
    pub fn new(
        stacks: &'a dyn StackApi,
        parameters: &'a dyn ParameterStoreApi,
        namespace: &'a ResourceNamespace,
        policy: PollPolicy,
    ) -> Self {
        Self {
            stacks,
            parameters,
            namespace,
            policy,
        }
    }

    /// Runs the scan.
    ///
    /// # Errors
    ///
    /// Returns [`DeployError::Timeout`] if a deleting stack does not finish
    /// within the policy, or [`DeployError::Provider`] if a lookup fails.
    pub async fn check(&self, config: &Configuration) -> Result<ConflictReport> {
        let mut report = ConflictReport::default();

        for name in &self.namespace.critical_parameters {
            if self.parameters.parameter_exists(name).await? {
                warn!(parameter = %name, "Critical parameter already exists");
                report.push_parameter(Conflict::parameter(name, config));
            }
        }

        for prefix in &self.namespace.parameter_prefixes {
            for name in self.parameters.list_parameters(prefix).await? {
                report.push_parameter(Conflict::parameter(&name, config));
            }
        }

        let mut deleting = Vec::new();
        for stack in self.stacks.list_stacks().await? {
            if !self.namespace.owns(&stack.name) {
                continue;
            }
            match stack.status {
                StackStatus::DeleteComplete => {
                    debug!(stack = %stack.name, "Ignoring deleted stack");
                }
                StackStatus::DeleteInProgress => deleting.push(stack.name),
                status if status.is_failed() && !status.is_stable() => {
                    warn!(stack = %stack.name, %status, "Stack is left over from a failed deployment");
                    report.push_stack(Conflict::stack(ConflictKind::StackFailed, &stack.name, config));
                }
                StackStatus::DeleteFailed => {
                    warn!(stack = %stack.name, "Stack is stuck after a failed delete");
                    report.push_stack(Conflict::stack(
                        ConflictKind::StackDeleteFailed,
                        &stack.name,
                        config,
                    ));
                }
                status => {
                    warn!(stack = %stack.name, %status, "Stack already exists");
                    report.push_stack(Conflict::stack(ConflictKind::Stack, &stack.name, config));
                }
            }
        }

        for name in deleting {
            if self.wait_for_deletion(&name).await? == StackStatus::DeleteFailed {
                report.push_stack(Conflict::stack(ConflictKind::StackDeleteFailed, &name, config));
            }
        }

        info!(
            must_resolve = report.must_resolve.len(),
            may_proceed = report.may_proceed.len(),
            "Conflict check finished"
        );
        Ok(report)
    }

    /// Blocks until `name` is deleted or its deletion fails.
    async fn wait_for_deletion(&self, name: &str) -> Result<StackStatus> {
        info!(stack = %name, "Stack is being deleted, waiting for it to finish");
        let what = format!("stack {name} to finish deleting");

        let stacks = self.stacks;
        let outcome = poll_until(&self.policy, &what, |_| async move {
            match stacks.stack_status(name).await {
                Ok(None) | Err(ProviderError::NotFound(_)) => Ok(Some(StackStatus::DeleteComplete)),
                Ok(Some(status)) if status.is_deleting() => Ok(None),
                Ok(Some(status)) => Ok(Some(status)),
                Err(e) => Err(e),
            }
        })
        .await?;

        match outcome {
            PollOutcome::Ready { value, attempts } => {
                if value.is_deleted() {
                    info!(stack = %name, attempts, "Stack deletion finished");
                } else {
                    warn!(stack = %name, status = %value, "Stack left the deleting state without being deleted");
                }
                Ok(value)
            }
            PollOutcome::TimedOut { waited, .. } => Err(DeployError::timeout(what, waited)),
        }
    }
}
