use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::{Priority, TaskId};

/// Default retry budget for a task (retries after the first attempt).
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Prefix of the audit line written when a dead letter is resubmitted.
pub const RESUBMITTED_AUDIT_PREFIX: &str = "resubmitted from dead letter";

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskType(String);

impl TaskType {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<&str> for TaskType {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for TaskType {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// One failed attempt, kept on the task so the dead-letter record can
/// explain the whole history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttemptFailure {
    /// 1-based attempt number.
    pub attempt: u32,
    pub error: String,
    pub failed_at: DateTime<Utc>,
}

/// The unit of work carried on a lane.
///
/// This is exactly what gets serialized into a log entry; the store never
/// sees anything else.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub task_type: TaskType,
    pub payload: serde_json::Value,
    pub priority: Priority,

    pub retry_count: u32,
    pub max_retries: u32,

    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub last_attempt_at: Option<DateTime<Utc>>,

    /// Backoff gate for retry copies. Consumers hold the entry until then.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub not_before: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub retry_history: Vec<AttemptFailure>,

    /// Times this task was reclaimed from a worker presumed dead.
    #[serde(default)]
    pub recovery_count: u32,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub audit: Vec<String>,
}

impl Task {
    pub fn new(
        id: TaskId,
        task_type: TaskType,
        payload: serde_json::Value,
        priority: Priority,
        max_retries: u32,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            task_type,
            payload,
            priority,
            retry_count: 0,
            max_retries,
            created_at,
            last_attempt_at: None,
            not_before: None,
            retry_history: Vec::new(),
            recovery_count: 0,
            audit: Vec::new(),
        }
    }

    /// 1-based number of the attempt currently being made.
    pub fn attempt(&self) -> u32 {
        self.retry_count + 1
    }

    /// Whether another attempt is allowed after the current one fails.
    pub fn can_retry(&self) -> bool {
        self.retry_count < self.max_retries
    }

    /// The task came back from the dead-letter lane by hand.
    pub fn was_resubmitted(&self) -> bool {
        self.audit
            .iter()
            .any(|line| line.starts_with(RESUBMITTED_AUDIT_PREFIX))
    }

    /// Neither a retry nor a recovered redelivery.
    pub fn is_first_delivery(&self) -> bool {
        self.retry_count == 0 && self.recovery_count == 0
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.not_before.is_none_or(|t| t <= now)
    }

    pub fn record_failure(&mut self, error: impl Into<String>, now: DateTime<Utc>) {
        self.retry_history.push(AttemptFailure {
            attempt: self.attempt(),
            error: error.into(),
            failed_at: now,
        });
        self.last_attempt_at = Some(now);
    }

    pub fn encode(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}

/// Producer-side request for `TaskQueue::enqueue_with`.
#[derive(Debug, Clone)]
pub struct NewTask {
    pub task_type: TaskType,
    pub payload: serde_json::Value,
    pub priority: Priority,
    pub max_retries: Option<u32>,
}

impl NewTask {
    pub fn new(task_type: impl Into<TaskType>, payload: serde_json::Value) -> Self {
        Self {
            task_type: task_type.into(),
            payload,
            priority: Priority::default(),
            max_retries: None,
        }
    }

    pub fn priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }
}
