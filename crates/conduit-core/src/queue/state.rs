//! Task status as seen by producers.

use serde::{Deserialize, Serialize};

/// Task status.
///
/// State transitions:
/// - Pending -> Processing -> Completed
/// - Pending -> Processing -> Failed -> Processing ... (retry copy handed out again)
/// - Pending -> Processing -> DeadLetter (retry budget exhausted)
///
/// `Failed` means "this attempt failed and a retry is scheduled"; a task
/// that will not run again is `DeadLetter`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    /// Appended to its lane, not yet handed to a worker.
    Pending,

    /// Delivered to a worker and not yet acknowledged.
    Processing,

    Completed,

    /// Last attempt failed, retry copy queued.
    Failed,

    /// Moved to the dead-letter lane.
    DeadLetter,
}

impl TaskStatus {
    /// Is this a terminal state (no further transitions without an operator)?
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::DeadLetter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_states() {
        assert!(TaskStatus::Completed.is_terminal());
        assert!(TaskStatus::DeadLetter.is_terminal());
        assert!(!TaskStatus::Failed.is_terminal());
        assert_eq!(
            serde_json::to_string(&TaskStatus::DeadLetter).unwrap(),
            "\"DEAD_LETTER\""
        );
    }
}
