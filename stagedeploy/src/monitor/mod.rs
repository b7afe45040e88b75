//! Watches an external release pipeline until it reports that it started.

use crate::polling::{poll_until, PollOutcome, PollPolicy};
use crate::ports::{BuildPipelineApi, PipelineExecution};
use std::time::Duration;
use tracing::{debug, info, warn};

/// What the monitor saw.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MonitorOutcome {
    /// An execution reported a status within the timeout.
    Started {
        /// Execution identifier.
        execution_id: String,
        /// First non-empty status.
        status: String,
    },
    /// No execution reported a status before the timeout.
    NotFound,
}

impl MonitorOutcome {
    /// Returns true if the pipeline started.
    #[must_use]
    pub fn started(&self) -> bool {
        matches!(self, Self::Started { .. })
    }
}

/// Polls a pipeline's latest execution at a fixed interval.
pub struct PipelineMonitor<'a> {
    pipelines: &'a dyn BuildPipelineApi,
    interval: Duration,
}

impl<'a> PipelineMonitor<'a> {
    /// Creates a monitor polling every `interval`.
    #[must_use]
    pub fn new(pipelines: &'a dyn BuildPipelineApi, interval: Duration) -> Self {
        Self {
            pipelines,
            interval,
        }
    }

    /// Waits up to `timeout` for `pipeline` to report a status.
    pub async fn monitor(&self, pipeline: &str, timeout: Duration) -> MonitorOutcome {
        self.monitor_with(pipeline, &PollPolicy::fixed(self.interval, timeout))
            .await
    }

    /// Same as [`monitor`](Self::monitor) with an explicit policy.
    pub async fn monitor_with(&self, pipeline: &str, policy: &PollPolicy) -> MonitorOutcome {
        info!(pipeline, "Waiting for release pipeline to start");
        let pipelines = self.pipelines;
        let what = format!("pipeline {pipeline} to start");

        let outcome = poll_until(policy, &what, |attempt| async move {
            match pipelines.latest_execution(pipeline).await {
                Ok(Some(PipelineExecution { id, status })) if !status.trim().is_empty() => {
                    Ok::<_, std::convert::Infallible>(Some((id, status)))
                }
                Ok(_) => Ok(None),
                Err(e) => {
                    debug!(pipeline, attempt, error = %e, "Pipeline status unavailable, retrying");
                    Ok(None)
                }
            }
        })
        .await;

        match outcome {
            Ok(PollOutcome::Ready {
                value: (execution_id, status),
                attempts,
            }) => {
                info!(pipeline, execution_id = %execution_id, status = %status, attempts, "Release pipeline started");
                MonitorOutcome::Started {
                    execution_id,
                    status,
                }
            }
            Ok(PollOutcome::TimedOut { waited, .. }) => {
                warn!(pipeline, waited_secs = waited.as_secs(), "Release pipeline did not report a status");
                MonitorOutcome::NotFound
            }
            Err(never) => match never {},
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::InMemoryCloud;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_started_after_status_appears() {
        let cloud = InMemoryCloud::new();
        cloud.script_pipeline(
            "demo-release",
            vec![
                None,
                Some(PipelineExecution {
                    id: "exec-1".to_string(),
                    status: String::new(),
                }),
                Some(PipelineExecution {
                    id: "exec-1".to_string(),
                    status: "InProgress".to_string(),
                }),
            ],
        );

        let outcome = PipelineMonitor::new(&cloud, Duration::ZERO)
            .monitor_with("demo-release", &PollPolicy::immediate(10))
            .await;

        assert_eq!(
            outcome,
            MonitorOutcome::Started {
                execution_id: "exec-1".to_string(),
                status: "InProgress".to_string(),
            }
        );
    }

    #[tokio::test]
    async fn test_not_found_within_budget() {
        let cloud = InMemoryCloud::new();
        let outcome = PipelineMonitor::new(&cloud, Duration::ZERO)
            .monitor_with("missing", &PollPolicy::immediate(3))
            .await;
        assert!(!outcome.started());
    }

    #[tokio::test]
    async fn test_transient_errors_are_retried() {
        let cloud = InMemoryCloud::new();
        cloud.fail_operation_times("latest_execution", 2);
        cloud.script_pipeline(
            "demo-release",
            vec![Some(PipelineExecution {
                id: "exec-9".to_string(),
                status: "Succeeded".to_string(),
            })],
        );

        let outcome = PipelineMonitor::new(&cloud, Duration::ZERO)
            .monitor_with("demo-release", &PollPolicy::immediate(5))
            .await;
        assert!(outcome.started());
    }

    #[tokio::test]
    async fn test_monitor_uses_fixed_interval_timeout() {
        let cloud = InMemoryCloud::new();
        let outcome = PipelineMonitor::new(&cloud, Duration::from_millis(1))
            .monitor("missing", Duration::from_millis(5))
            .await;
        assert_eq!(outcome, MonitorOutcome::NotFound);
    }
}
