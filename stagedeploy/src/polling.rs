//! Bounded polling with configurable backoff and jitter.
//!
//! Every wait in the engine (stack deletion, stack deployment, pipeline
//! start) goes through [`poll_until`] with an injected [`PollPolicy`], so
//! nothing ever blocks without a bound and tests can swap in
//! [`PollPolicy::immediate`].

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::{Duration, Instant};

/// Backoff strategy for the delay between checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackoffStrategy {
    /// delay = interval (constant)
    #[default]
    Constant,
    /// delay = interval * (attempt + 1)
    Linear,
    /// delay = interval * 2^attempt
    Exponential,
}

/// Jitter strategy applied on top of the backoff delay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JitterStrategy {
    /// No jitter
    #[default]
    None,
    /// Random from 0 to delay
    Full,
    /// Half fixed, half random
    Equal,
}

/// How long and how often to poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollPolicy {
    /// Base delay between checks.
    pub interval: Duration,
    /// Ceiling for the delay between checks.
    pub max_interval: Duration,
    /// Backoff strategy.
    pub backoff: BackoffStrategy,
    /// Jitter strategy.
    pub jitter: JitterStrategy,
    /// Total wall-clock budget, if bounded by time.
    pub timeout: Option<Duration>,
    /// Maximum number of checks, if bounded by count.
    pub max_attempts: Option<usize>,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(10),
            max_interval: Duration::from_secs(60),
            backoff: BackoffStrategy::Constant,
            jitter: JitterStrategy::None,
            timeout: Some(Duration::from_secs(1800)),
            max_attempts: None,
        }
    }
}

impl PollPolicy {
    /// Polls at a fixed interval until `timeout` elapses.
    #[must_use]
    pub fn fixed(interval: Duration, timeout: Duration) -> Self {
        Self {
            interval,
            max_interval: interval,
            timeout: Some(timeout),
            ..Self::default()
        }
    }

    /// Checks up to `max_attempts` times with no delay.
    #[must_use]
    pub fn immediate(max_attempts: usize) -> Self {
        Self {
            interval: Duration::ZERO,
            max_interval: Duration::ZERO,
            backoff: BackoffStrategy::Constant,
            jitter: JitterStrategy::None,
            timeout: None,
            max_attempts: Some(max_attempts),
        }
    }

    /// Sets the total time budget.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Sets the backoff strategy.
    #[must_use]
    pub fn with_backoff(mut self, backoff: BackoffStrategy) -> Self {
        self.backoff = backoff;
        self
    }

    /// Sets the jitter strategy.
    #[must_use]
    pub fn with_jitter(mut self, jitter: JitterStrategy) -> Self {
        self.jitter = jitter;
        self
    }

    /// Sets the delay ceiling.
    #[must_use]
    pub fn with_max_interval(mut self, max_interval: Duration) -> Self {
        self.max_interval = max_interval;
        self
    }

    /// Calculates the delay after the given zero-based check.
    #[must_use]
    pub fn delay_for(&self, attempt: usize) -> Duration {
        let base = u64::try_from(self.interval.as_millis()).unwrap_or(u64::MAX);
        let max = u64::try_from(self.max_interval.as_millis()).unwrap_or(u64::MAX).max(base);

        let delay = match self.backoff {
            BackoffStrategy::Constant => base,
            BackoffStrategy::Linear => base.saturating_mul(attempt as u64 + 1),
            BackoffStrategy::Exponential => {
                let exponent = u32::try_from(attempt).unwrap_or(u32::MAX);
                base.saturating_mul(2u64.saturating_pow(exponent))
            }
        }
        .min(max);

        let jittered = match self.jitter {
            JitterStrategy::None => delay,
            JitterStrategy::Full => {
                if delay == 0 {
                    0
                } else {
                    rand::thread_rng().gen_range(0..=delay)
                }
            }
            JitterStrategy::Equal => {
                let half = delay / 2;
                if half == 0 {
                    delay
                } else {
                    half + rand::thread_rng().gen_range(0..=half)
                }
            }
        };

        Duration::from_millis(jittered)
    }

    fn attempts_exhausted(&self, attempts: usize) -> bool {
        self.max_attempts.is_some_and(|max| attempts >= max)
    }

    fn budget_exceeded(&self, elapsed: Duration, next_delay: Duration) -> bool {
        self.timeout.is_some_and(|timeout| elapsed + next_delay > timeout)
    }
}

/// Outcome of a bounded poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome<T> {
    /// The check reported a value.
    Ready {
        /// The value the check produced.
        value: T,
        /// How many checks ran.
        attempts: usize,
    },
    /// The policy ran out before the check reported a value.
    TimedOut {
        /// How many checks ran.
        attempts: usize,
        /// Wall-clock time spent.
        waited: Duration,
    },
}

/// Repeatedly runs `check` until it yields `Some`, or the policy runs out.
///
/// `check` receives the zero-based attempt number. An `Err` from the check
/// aborts polling immediately; checks that want to ride out transient
/// errors should map them to `Ok(None)`.
pub async fn poll_until<T, E, F, Fut>(
    policy: &PollPolicy,
    what: &str,
    mut check: F,
) -> Result<PollOutcome<T>, E>
where
    F: FnMut(usize) -> Fut,
    Fut: Future<Output = Result<Option<T>, E>>,
{
    let started = Instant::now();
    let mut attempts = 0;

    loop {
        let result = check(attempts).await?;
        attempts += 1;

        if let Some(value) = result {
            return Ok(PollOutcome::Ready { value, attempts });
        }

        let delay = policy.delay_for(attempts - 1);
        if policy.attempts_exhausted(attempts) || policy.budget_exceeded(started.elapsed(), delay) {
            tracing::warn!(what, attempts, "Gave up waiting");
            return Ok(PollOutcome::TimedOut {
                attempts,
                waited: started.elapsed(),
            });
        }

        tracing::debug!(
            what,
            attempt = attempts,
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            "Not ready, polling again"
        );
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_delay_constant() {
        let policy = PollPolicy::fixed(Duration::from_millis(100), Duration::from_secs(5));
        assert_eq!(policy.delay_for(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for(7), Duration::from_millis(100));
    }

    #[test]
    fn test_delay_linear_and_exponential_capped() {
        let linear = PollPolicy::fixed(Duration::from_millis(100), Duration::from_secs(5))
            .with_backoff(BackoffStrategy::Linear)
            .with_max_interval(Duration::from_millis(250));
        assert_eq!(linear.delay_for(0), Duration::from_millis(100));
        assert_eq!(linear.delay_for(1), Duration::from_millis(200));
        assert_eq!(linear.delay_for(2), Duration::from_millis(250));

        let exponential = PollPolicy::fixed(Duration::from_millis(100), Duration::from_secs(5))
            .with_backoff(BackoffStrategy::Exponential)
            .with_max_interval(Duration::from_secs(1));
        assert_eq!(exponential.delay_for(2), Duration::from_millis(400));
        assert_eq!(exponential.delay_for(30), Duration::from_secs(1));
    }

    #[test]
    fn test_full_jitter_stays_within_delay() {
        let policy = PollPolicy::fixed(Duration::from_millis(100), Duration::from_secs(5))
            .with_jitter(JitterStrategy::Full);
        for attempt in 0..20 {
            assert!(policy.delay_for(attempt) <= Duration::from_millis(100));
        }
    }

    #[tokio::test]
    async fn test_poll_until_ready_after_some_attempts() {
        let calls = AtomicUsize::new(0);
        let outcome: Result<_, String> = poll_until(&PollPolicy::immediate(10), "value", |_| {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move { Ok(if n >= 2 { Some("done") } else { None }) }
        })
        .await;

        assert_eq!(outcome, Ok(PollOutcome::Ready { value: "done", attempts: 3 }));
    }

    #[tokio::test]
    async fn test_poll_until_times_out_on_attempts() {
        let outcome: PollOutcome<()> =
            poll_until(&PollPolicy::immediate(4), "never", |_| async { Ok::<_, String>(None) })
                .await
                .unwrap();

        assert!(matches!(outcome, PollOutcome::TimedOut { attempts: 4, .. }));
    }

    #[tokio::test]
    async fn test_poll_until_times_out_on_budget() {
        let policy = PollPolicy::fixed(Duration::from_millis(5), Duration::from_millis(12));
        let outcome: PollOutcome<()> =
            poll_until(&policy, "never", |_| async { Ok::<_, String>(None) })
                .await
                .unwrap();

        match outcome {
            PollOutcome::TimedOut { attempts, .. } => assert!((2..=3).contains(&attempts)),
            PollOutcome::Ready { .. } => panic!("expected timeout"),
        }
    }

    #[tokio::test]
    async fn test_poll_until_propagates_check_error() {
        let outcome: Result<PollOutcome<()>, String> =
            poll_until(&PollPolicy::immediate(5), "broken", |_| async {
                Err("access denied".to_string())
            })
            .await;

        assert_eq!(outcome, Err("access denied".to_string()));
    }
}
