//! Queue module: priority lanes over a log store, retry, dead-letter, recovery.

mod dead_letter;
mod record;
mod recovery;
mod retry;
mod state;
mod stats;
mod task_queue;

pub use dead_letter::UNDECODABLE_TASK_TYPE;
pub use record::TaskStatusView;
pub use recovery::RecoveryReport;
pub use retry::RetryPolicy;
pub use state::TaskStatus;
pub use stats::QueueStats;
pub use task_queue::{FailOutcome, TaskQueue};

use std::time::Duration;

use crate::domain::{DEFAULT_MAX_RETRIES, Priority, Task, TaskId};
use crate::ports::{EntryId, LogStoreError};

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error(transparent)]
    Store(#[from] LogStoreError),

    #[error("task codec: {0}")]
    Codec(#[from] serde_json::Error),

    #[error("no dead-letter record for task {0}")]
    DeadLetterNotFound(TaskId),
}

impl QueueError {
    /// The log store could not be reached (as opposed to a bad request).
    pub fn is_unavailable(&self) -> bool {
        matches!(self, QueueError::Store(LogStoreError::Unavailable(_)))
    }
}

/// Where a delivered task lives in the log store.
/// The worker hands it back to `complete` or `fail`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryHandle {
    pub priority: Priority,
    pub entry_id: EntryId,
    pub task_id: TaskId,
}

/// A task handed to one consumer.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub handle: DeliveryHandle,
    pub task: Task,
}

#[derive(Debug, Clone, PartialEq)]
pub struct QueueConfig {
    /// Prefix of every lane key.
    pub namespace: String,

    /// Consumer group shared by all workers.
    pub group: String,

    /// Backoff between task attempts.
    pub retry_policy: RetryPolicy,

    /// Retry budget when the producer does not set one.
    pub default_max_retries: u32,

    /// Sleep between empty poll cycles inside `consume`.
    pub poll_interval: Duration,

    /// Reclaims allowed before a task is treated as poison.
    pub max_recoveries: u32,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            namespace: "conduit".to_string(),
            group: "workers".to_string(),
            retry_policy: RetryPolicy::default(),
            default_max_retries: DEFAULT_MAX_RETRIES,
            poll_interval: Duration::from_millis(50),
            max_recoveries: 5,
        }
    }
}

impl QueueConfig {
    pub fn lane(&self, priority: Priority) -> String {
        priority.lane(&self.namespace)
    }

    pub fn dead_letter_lane(&self) -> String {
        format!("{}:dead_letter", self.namespace)
    }
}
