//! Operator confirmation.
//!
//! The engine never reads from a terminal itself. Anything that needs an
//! operator decision asks through [`Confirm`], so the CLI can prompt on
//! stdin while tests and `--yes` answer without one.
//!
//! Asking is async: a stage waiting on an answer is still raced against
//! the cancellation token, so an interrupt does not wait for the operator.

use async_trait::async_trait;

/// Asks the operator a yes/no question.
#[async_trait]
pub trait Confirm: Send + Sync {
    /// Returns true if the operator agreed.
    async fn confirm(&self, question: &str) -> bool;
}

/// Answers yes to everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct AutoConfirm;

#[async_trait]
impl Confirm for AutoConfirm {
    async fn confirm(&self, question: &str) -> bool {
        tracing::info!(question, "Auto-confirmed");
        true
    }
}

/// Answers no to everything. Used for non-interactive sessions.
#[derive(Debug, Clone, Copy, Default)]
pub struct DenyAll;

#[async_trait]
impl Confirm for DenyAll {
    async fn confirm(&self, question: &str) -> bool {
        tracing::warn!(question, "No operator available, declining");
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fixed_answers() {
        assert!(AutoConfirm.confirm("proceed?").await);
        assert!(!DenyAll.confirm("proceed?").await);
    }
}
