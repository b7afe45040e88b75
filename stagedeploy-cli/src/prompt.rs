//! Terminal confirmation.

use async_trait::async_trait;
use stagedeploy::prompt::{AutoConfirm, Confirm, DenyAll};
use std::io::{self, BufRead, IsTerminal, Write};
use std::sync::Arc;
use tokio::sync::oneshot;

/// Asks on stderr and reads the answer from stdin.
///
/// The read happens on a detached thread. If the stage asking is dropped
/// (Ctrl-C), the run stops at once and the thread ends with the process.
#[derive(Debug, Clone, Copy, Default)]
pub struct StdinConfirm;

fn ask(question: &str) -> bool {
    eprint!("{question} [y/N] ");
    io::stderr().flush().ok();

    let mut line = String::new();
    match io::stdin().lock().read_line(&mut line) {
        Ok(_) => is_yes(&line),
        Err(e) => {
            tracing::warn!(error = %e, "Could not read answer, declining");
            false
        }
    }
}

#[async_trait]
impl Confirm for StdinConfirm {
    async fn confirm(&self, question: &str) -> bool {
        let (tx, rx) = oneshot::channel();
        let question = question.to_string();
        let spawned = std::thread::Builder::new()
            .name("stdin-confirm".to_string())
            .spawn(move || {
                // The receiver is gone when the run was interrupted.
                let _ = tx.send(ask(&question));
            });

        if let Err(e) = spawned {
            tracing::warn!(error = %e, "Could not start prompt, declining");
            return false;
        }
        rx.await.unwrap_or(false)
    }
}

/// Returns true for "y" or "yes", in any case.
pub fn is_yes(answer: &str) -> bool {
    matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes")
}

/// Picks how this session answers questions.
///
/// `--yes` answers everything. Otherwise the operator is asked when both
/// stdin and stderr are terminals, and every question is declined when
/// they are not.
pub fn for_session(assume_yes: bool) -> Arc<dyn Confirm> {
    if assume_yes {
        Arc::new(AutoConfirm)
    } else if io::stdin().is_terminal() && io::stderr().is_terminal() {
        Arc::new(StdinConfirm)
    } else {
        Arc::new(DenyAll)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_yes() {
        for answer in ["y", "Y", "yes", " YES\n", "Yes\r\n"] {
            assert!(is_yes(answer), "{answer:?}");
        }
        for answer in ["", "\n", "n", "no", "yep", "y e s"] {
            assert!(!is_yes(answer), "{answer:?}");
        }
    }

    #[tokio::test]
    async fn test_assume_yes_confirms() {
        assert!(for_session(true).confirm("continue?").await);
    }
}
