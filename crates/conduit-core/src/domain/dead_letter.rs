//! Dead letter records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{AttemptFailure, Priority, Task, TaskId, TaskType};

/// A task that exhausted its retry budget (or could not be recovered).
///
/// Records are append-only and never consumed automatically. Getting the
/// work running again is an explicit `resubmit_dead_letter` call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeadLetterRecord {
    pub task_id: TaskId,
    pub task_type: TaskType,
    pub priority: Priority,
    pub original_payload: serde_json::Value,
    pub failure_reason: String,
    pub retry_history: Vec<AttemptFailure>,
    pub moved_at: DateTime<Utc>,
}

impl DeadLetterRecord {
    pub fn from_task(task: &Task, failure_reason: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            task_id: task.id,
            task_type: task.task_type.clone(),
            priority: task.priority,
            original_payload: task.payload.clone(),
            failure_reason: failure_reason.into(),
            retry_history: task.retry_history.clone(),
            moved_at: now,
        }
    }
}
