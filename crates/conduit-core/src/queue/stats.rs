//! Queue counters and the snapshot returned by `TaskQueue::stats`.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

use crate::domain::Priority;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    /// Entries per lane not yet acknowledged by the consumer group.
    pub lane_depth: BTreeMap<Priority, u64>,
    pub dead_letter_depth: u64,
    pub tasks_enqueued: u64,
    pub tasks_completed: u64,
    pub tasks_failed: u64,
    pub tasks_retried: u64,
    pub tasks_dead_lettered: u64,
    pub tasks_recovered: u64,
}

impl QueueStats {
    pub fn total_depth(&self) -> u64 {
        self.lane_depth.values().sum()
    }
}

/// Monotonic counters shared by every caller of one queue.
#[derive(Debug, Default)]
pub(crate) struct QueueCounters {
    pub enqueued: AtomicU64,
    pub completed: AtomicU64,
    pub failed: AtomicU64,
    pub retried: AtomicU64,
    pub dead_lettered: AtomicU64,
    pub recovered: AtomicU64,
}

impl QueueCounters {
    pub fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::SeqCst);
    }

    pub fn fill(&self, stats: &mut QueueStats) {
        stats.tasks_enqueued = self.enqueued.load(Ordering::SeqCst);
        stats.tasks_completed = self.completed.load(Ordering::SeqCst);
        stats.tasks_failed = self.failed.load(Ordering::SeqCst);
        stats.tasks_retried = self.retried.load(Ordering::SeqCst);
        stats.tasks_dead_lettered = self.dead_lettered.load(Ordering::SeqCst);
        stats.tasks_recovered = self.recovered.load(Ordering::SeqCst);
    }
}
