//! Task status view: what `TaskQueue::task_status` reports.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::TaskStatus;
use crate::domain::{Priority, Task, TaskId, TaskType};

/// Latest known state of one task.
///
/// The log store remains the source of truth for ownership; this view is
/// kept per queue instance for observability only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskStatusView {
    pub task_id: TaskId,
    pub task_type: TaskType,
    pub priority: Priority,
    pub status: TaskStatus,
    pub retry_count: u32,
    pub max_retries: u32,

    /// Last error message (if any).
    pub last_error: Option<String>,

    /// Handler result once completed.
    pub result: Option<serde_json::Value>,

    pub updated_at: DateTime<Utc>,
}

impl TaskStatusView {
    pub fn new(task: &Task, status: TaskStatus, now: DateTime<Utc>) -> Self {
        Self {
            task_id: task.id,
            task_type: task.task_type.clone(),
            priority: task.priority,
            status,
            retry_count: task.retry_count,
            max_retries: task.max_retries,
            last_error: task.retry_history.last().map(|f| f.error.clone()),
            result: None,
            updated_at: now,
        }
    }
}
