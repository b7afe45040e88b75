//! Scripted operator answers.

use crate::prompt::Confirm;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;

/// Answers questions from a fixed script and remembers what was asked.
///
/// Once the script runs out every further question is declined.
#[derive(Debug, Default)]
pub struct ScriptedConfirm {
    answers: Mutex<VecDeque<bool>>,
    questions: Mutex<Vec<String>>,
}

impl ScriptedConfirm {
    /// Creates a confirmer that gives `answers` in order.
    #[must_use]
    pub fn new(answers: impl IntoIterator<Item = bool>) -> Self {
        Self {
            answers: Mutex::new(answers.into_iter().collect()),
            questions: Mutex::new(Vec::new()),
        }
    }

    /// Questions asked so far.
    #[must_use]
    pub fn questions(&self) -> Vec<String> {
        self.questions.lock().clone()
    }

    /// Answers not yet given.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.answers.lock().len()
    }
}

#[async_trait]
impl Confirm for ScriptedConfirm {
    async fn confirm(&self, question: &str) -> bool {
        self.questions.lock().push(question.to_string());
        self.answers.lock().pop_front().unwrap_or(false)
    }
}

/// An operator who never answers. Records the question, then waits forever.
#[derive(Debug, Default)]
pub struct PendingConfirm {
    questions: Mutex<Vec<String>>,
}

impl PendingConfirm {
    /// Creates a new pending confirmer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Questions asked so far.
    #[must_use]
    pub fn questions(&self) -> Vec<String> {
        self.questions.lock().clone()
    }
}

#[async_trait]
impl Confirm for PendingConfirm {
    async fn confirm(&self, question: &str) -> bool {
        self.questions.lock().push(question.to_string());
        futures::future::pending().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_answers_in_order_then_declines() {
        let confirm = ScriptedConfirm::new([true, false]);
        assert!(confirm.confirm("one?").await);
        assert!(!confirm.confirm("two?").await);
        assert!(!confirm.confirm("three?").await);
        assert_eq!(confirm.questions(), vec!["one?", "two?", "three?"]);
        assert_eq!(confirm.remaining(), 0);
    }

    #[tokio::test]
    async fn test_pending_confirm_never_answers() {
        let confirm = PendingConfirm::new();
        let answer =
            tokio::time::timeout(Duration::from_millis(10), confirm.confirm("wait?")).await;
        assert!(answer.is_err());
        assert_eq!(confirm.questions(), vec!["wait?"]);
    }
}
