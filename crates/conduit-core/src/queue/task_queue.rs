//! TaskQueue - 優先度レーン上のタスクキュー
//!
//! # フロー
//! 1. enqueue: 優先度レーンに 1 回 append
//! 2. consume: CRITICAL → HIGH → NORMAL → LOW の順に consumer group で読み、
//!    期限の来た保留中 retry copy と優先度順にマージして batch_size 件に切る
//! 3. complete: ack（2 回目は no-op）
//! 4. fail: retry_count < max_retries なら backoff 付きで再 append → ack、
//!    そうでなければ dead-letter レーンへ
//!
//! # 設計原則
//! - 所有権（誰が処理中か）は log store だけが知っている
//! - 再 append は必ず ack より先（落ちても at-least-once が保たれる）
//! - backoff は `not_before` として task に書き込み、読んだ consumer が期限まで保留する
//! - store のエラーは握りつぶさず呼び出し側に返す

use std::collections::{BinaryHeap, HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::{debug, info, warn};

use super::stats::QueueCounters;
use super::{
    Delivery, DeliveryHandle, QueueConfig, QueueError, QueueStats, TaskStatus, TaskStatusView,
};
use crate::domain::{NewTask, Priority, Task, TaskId, TaskType};
use crate::ports::{Clock, EntryId, IdGenerator, LogStore};
use crate::typed::{PayloadCodec, TaskPayload};

/// What `fail` did with the task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailOutcome {
    /// A retry copy was appended; it becomes visible to handlers after `delay`.
    Retried { retry_count: u32, delay: Duration },
    DeadLettered,
}

/// Retry copy read before its `not_before`, parked by the worker that read it.
///
/// We use Reverse ordering so BinaryHeap acts as a min-heap (earliest first).
struct Deferred {
    due: DateTime<Utc>,
    seq: u64,
    delivery: Delivery,
}

impl PartialEq for Deferred {
    fn eq(&self, other: &Self) -> bool {
        self.due == other.due && self.seq == other.seq
    }
}

impl Eq for Deferred {}

impl PartialOrd for Deferred {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Deferred {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        other
            .due
            .cmp(&self.due)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

pub(super) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

pub(super) fn after(now: DateTime<Utc>, delay: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(delay)
        .ok()
        .and_then(|d| now.checked_add_signed(d))
        .unwrap_or(now)
}

pub struct TaskQueue {
    pub(super) store: Arc<dyn LogStore>,
    pub(super) clock: Arc<dyn Clock>,
    pub(super) ids: Arc<dyn IdGenerator>,
    pub(super) config: QueueConfig,
    /// Task types some worker can handle. `None` accepts everything.
    pub(super) known_types: Option<HashSet<TaskType>>,
    pub(super) statuses: Mutex<HashMap<TaskId, TaskStatusView>>,
    deferred: Mutex<HashMap<String, BinaryHeap<Deferred>>>,
    deferred_seq: AtomicU64,
    pub(super) counters: QueueCounters,
}

impl TaskQueue {
    /// Create the consumer group on every lane (idempotent) and build the queue.
    pub async fn open(
        store: Arc<dyn LogStore>,
        clock: Arc<dyn Clock>,
        ids: Arc<dyn IdGenerator>,
        config: QueueConfig,
    ) -> Result<Self, QueueError> {
        for priority in Priority::ALL {
            store
                .ensure_group(&config.lane(priority), &config.group)
                .await?;
        }
        store
            .ensure_group(&config.dead_letter_lane(), &config.group)
            .await?;
        debug!(namespace = %config.namespace, group = %config.group, "queue lanes ready");

        Ok(Self {
            store,
            clock,
            ids,
            config,
            known_types: None,
            statuses: Mutex::new(HashMap::new()),
            deferred: Mutex::new(HashMap::new()),
            deferred_seq: AtomicU64::new(0),
            counters: QueueCounters::default(),
        })
    }

    /// Restrict recovery to task types some worker can still handle.
    pub fn with_known_types<I>(mut self, types: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<TaskType>,
    {
        self.known_types = Some(types.into_iter().map(Into::into).collect());
        self
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    pub async fn enqueue(
        &self,
        task_type: impl Into<TaskType>,
        payload: Value,
        priority: Priority,
    ) -> Result<TaskId, QueueError> {
        self.enqueue_with(NewTask::new(task_type, payload).priority(priority))
            .await
    }

    /// Enqueue a typed payload under its `TaskPayload::TYPE`.
    pub async fn enqueue_typed<T: TaskPayload>(
        &self,
        payload: &T,
        priority: Priority,
    ) -> Result<TaskId, QueueError> {
        let (task_type, payload) = PayloadCodec::encode(payload)?;
        self.enqueue(task_type, payload, priority).await
    }

    pub async fn enqueue_with(&self, new_task: NewTask) -> Result<TaskId, QueueError> {
        let task = Task::new(
            self.ids.generate_task_id(),
            new_task.task_type,
            new_task.payload,
            new_task.priority,
            new_task
                .max_retries
                .unwrap_or(self.config.default_max_retries),
            self.clock.now(),
        );
        self.append_task(&task).await?;
        QueueCounters::bump(&self.counters.enqueued);
        self.set_status(&task, TaskStatus::Pending);
        info!(
            task_id = %task.id,
            task_type = %task.task_type,
            priority = %task.priority,
            "task enqueued"
        );
        Ok(task.id)
    }

    /// Hand up to `batch_size` tasks to `worker_id`, most urgent lane first.
    ///
    /// Waits up to `block_timeout` for work; an empty batch on timeout is not
    /// an error.
    pub async fn consume(
        &self,
        worker_id: &str,
        batch_size: usize,
        block_timeout: Duration,
    ) -> Result<Vec<Delivery>, QueueError> {
        let deadline = tokio::time::Instant::now() + block_timeout;
        loop {
            let batch = self.poll_once(worker_id, batch_size).await?;
            let now = tokio::time::Instant::now();
            if !batch.is_empty() || now >= deadline {
                return Ok(batch);
            }
            let wait = self.config.poll_interval.min(deadline - now);
            tokio::time::sleep(wait).await;
        }
    }

    /// One poll cycle: read each lane in priority order, then merge in due
    /// parked entries and keep the `batch_size` most urgent. Anything that
    /// does not fit stays parked for the next cycle.
    async fn poll_once(
        &self,
        worker_id: &str,
        batch_size: usize,
    ) -> Result<Vec<Delivery>, QueueError> {
        let now = self.clock.now();
        let mut candidates = Vec::with_capacity(batch_size);

        for priority in Priority::ALL {
            if candidates.len() >= batch_size {
                break;
            }
            let lane = self.config.lane(priority);
            let entries = self
                .store
                .read_group(
                    &lane,
                    &self.config.group,
                    worker_id,
                    batch_size - candidates.len(),
                    Duration::ZERO,
                )
                .await?;

            for entry in entries {
                let task = match Task::decode(&entry.data) {
                    Ok(task) => task,
                    Err(e) => {
                        self.dead_letter_entry(priority, &entry, format!("undecodable entry: {e}"))
                            .await?;
                        continue;
                    }
                };
                let delivery = Delivery {
                    handle: DeliveryHandle {
                        priority,
                        entry_id: entry.id,
                        task_id: task.id,
                    },
                    task,
                };
                if delivery.task.is_due(now) {
                    candidates.push(delivery);
                } else {
                    self.park(worker_id, delivery, now);
                }
            }
        }

        for delivery in self.take_due(worker_id, batch_size, now) {
            // recovery may have moved the entry elsewhere while it was parked
            let lane = self.config.lane(delivery.handle.priority);
            let still_pending = self
                .store
                .claim(
                    &lane,
                    &self.config.group,
                    worker_id,
                    &delivery.handle.entry_id,
                    Duration::ZERO,
                )
                .await?;
            if still_pending.is_none() {
                debug!(task_id = %delivery.task.id, "parked entry no longer pending, dropped");
                continue;
            }
            candidates.push(delivery);
        }

        // stable: within a lane, fresh entries keep read order ahead of parked ones
        candidates.sort_by_key(|d| d.handle.priority);
        let surplus = candidates.split_off(batch_size.min(candidates.len()));
        for delivery in surplus {
            self.park(worker_id, delivery, now);
        }

        for delivery in &mut candidates {
            delivery.task.last_attempt_at = Some(now);
            self.set_status(&delivery.task, TaskStatus::Processing);
            debug!(
                worker_id,
                task_id = %delivery.task.id,
                priority = %delivery.handle.priority,
                attempt = delivery.task.attempt(),
                "task delivered"
            );
        }
        Ok(candidates)
    }

    /// Re-take ownership of a delivery right before its handler starts so the
    /// entry's idle clock restarts. `false` if the entry is no longer pending
    /// for `worker_id` (recovered, or already acknowledged).
    pub async fn renew(
        &self,
        handle: &DeliveryHandle,
        worker_id: &str,
    ) -> Result<bool, QueueError> {
        let lane = self.config.lane(handle.priority);
        let owned = self
            .store
            .pending_entries(&lane, &self.config.group, Duration::ZERO)
            .await?
            .into_iter()
            .any(|p| p.id == handle.entry_id && p.consumer == worker_id);
        if !owned {
            return Ok(false);
        }
        Ok(self
            .store
            .claim(
                &lane,
                &self.config.group,
                worker_id,
                &handle.entry_id,
                Duration::ZERO,
            )
            .await?
            .is_some())
    }

    /// Acknowledge a finished task. A second call for the same delivery is a
    /// no-op and returns `false`.
    pub async fn complete(
        &self,
        handle: &DeliveryHandle,
        result: Option<Value>,
    ) -> Result<bool, QueueError> {
        let acked = self
            .store
            .ack(
                &self.config.lane(handle.priority),
                &self.config.group,
                &handle.entry_id,
            )
            .await?;
        if !acked {
            debug!(task_id = %handle.task_id, "duplicate completion ignored");
            return Ok(false);
        }

        QueueCounters::bump(&self.counters.completed);
        if let Some(view) = lock(&self.statuses).get_mut(&handle.task_id) {
            view.status = TaskStatus::Completed;
            view.result = result;
            view.updated_at = self.clock.now();
        }
        info!(task_id = %handle.task_id, "task completed");
        Ok(true)
    }

    /// Record a failed attempt: schedule a retry copy or dead-letter the task.
    pub async fn fail(
        &self,
        handle: &DeliveryHandle,
        task: &Task,
        error: &str,
    ) -> Result<FailOutcome, QueueError> {
        let now = self.clock.now();
        let mut next = task.clone();
        next.record_failure(error, now);
        QueueCounters::bump(&self.counters.failed);

        if !task.can_retry() {
            self.dead_letter_task(
                handle,
                &next,
                &format!("retries exhausted after {} attempts: {error}", task.attempt()),
            )
            .await?;
            return Ok(FailOutcome::DeadLettered);
        }

        // base_delay * 2^retry_count, using the count before the increment
        let delay = self.config.retry_policy.next_delay(task.retry_count + 1);
        next.retry_count += 1;
        next.not_before = Some(after(now, delay));

        let lane = self.config.lane(handle.priority);
        self.store.append(&lane, next.encode()?).await?;
        self.store
            .ack(&lane, &self.config.group, &handle.entry_id)
            .await?;

        QueueCounters::bump(&self.counters.retried);
        self.set_status(&next, TaskStatus::Failed);
        warn!(
            task_id = %task.id,
            retry_count = next.retry_count,
            max_retries = next.max_retries,
            delay_ms = delay.as_millis() as u64,
            error,
            "task failed, retry scheduled"
        );
        Ok(FailOutcome::Retried {
            retry_count: next.retry_count,
            delay,
        })
    }

    pub fn task_status(&self, task_id: TaskId) -> Option<TaskStatusView> {
        lock(&self.statuses).get(&task_id).cloned()
    }

    pub async fn stats(&self) -> Result<QueueStats, QueueError> {
        let mut stats = QueueStats::default();
        for priority in Priority::ALL {
            let depth = self
                .store
                .depth(&self.config.lane(priority), &self.config.group)
                .await?;
            stats.lane_depth.insert(priority, depth);
        }
        stats.dead_letter_depth = self.dead_letter_depth().await?;
        self.counters.fill(&mut stats);
        Ok(stats)
    }

    /// Retry copies `worker_id` is holding until their backoff expires.
    pub fn parked(&self, worker_id: &str) -> usize {
        lock(&self.deferred).get(worker_id).map_or(0, |h| h.len())
    }

    pub(super) async fn append_task(&self, task: &Task) -> Result<EntryId, QueueError> {
        let data = task.encode()?;
        Ok(self
            .store
            .append(&self.config.lane(task.priority), data)
            .await?)
    }

    pub(super) fn set_status(&self, task: &Task, status: TaskStatus) {
        let view = TaskStatusView::new(task, status, self.clock.now());
        lock(&self.statuses).insert(task.id, view);
    }

    fn park(&self, worker_id: &str, delivery: Delivery, now: DateTime<Utc>) {
        let due = delivery.task.not_before.unwrap_or(now);
        debug!(worker_id, task_id = %delivery.task.id, %due, "retry copy parked until due");
        let seq = self.deferred_seq.fetch_add(1, Ordering::SeqCst);
        lock(&self.deferred)
            .entry(worker_id.to_string())
            .or_default()
            .push(Deferred { due, seq, delivery });
    }

    fn take_due(&self, worker_id: &str, limit: usize, now: DateTime<Utc>) -> Vec<Delivery> {
        let mut deferred = lock(&self.deferred);
        let Some(heap) = deferred.get_mut(worker_id) else {
            return Vec::new();
        };
        let mut due = Vec::new();
        while due.len() < limit {
            match heap.peek() {
                Some(next) if next.due <= now => {}
                _ => break,
            }
            if let Some(next) = heap.pop() {
                due.push(next.delivery);
            }
        }
        due
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::impls::InMemoryLogStore;
    use crate::ports::{FixedClock, LogStoreError, UlidGenerator};
    use crate::queue::RetryPolicy;
    use chrono::TimeZone;
    use serde_json::json;

    const NO_WAIT: Duration = Duration::ZERO;

    struct Fixture {
        queue: TaskQueue,
        store: Arc<InMemoryLogStore>,
        clock: Arc<FixedClock>,
    }

    async fn fixture() -> Fixture {
        let clock = Arc::new(FixedClock::new(
            Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
        ));
        let store = Arc::new(InMemoryLogStore::new(clock.clone()));
        let ids = Arc::new(UlidGenerator::new(clock.clone()));
        let config = QueueConfig {
            namespace: "test".to_string(),
            retry_policy: RetryPolicy::exponential(Duration::from_secs(2)),
            ..QueueConfig::default()
        };
        let queue = TaskQueue::open(store.clone(), clock.clone(), ids, config)
            .await
            .unwrap();
        Fixture {
            queue,
            store,
            clock,
        }
    }

    #[tokio::test]
    async fn critical_lane_is_served_first() {
        let f = fixture().await;
        let low = f.queue.enqueue("report", json!({}), Priority::Low).await.unwrap();
        let critical = f
            .queue
            .enqueue("report", json!({}), Priority::Critical)
            .await
            .unwrap();

        let first = f.queue.consume("w1", 1, NO_WAIT).await.unwrap();
        assert_eq!(first[0].task.id, critical);
        let second = f.queue.consume("w1", 1, NO_WAIT).await.unwrap();
        assert_eq!(second[0].task.id, low);
    }

    #[tokio::test]
    async fn batch_fills_from_lower_lanes() {
        let f = fixture().await;
        f.queue.enqueue("a", json!({}), Priority::High).await.unwrap();
        f.queue.enqueue("b", json!({}), Priority::Normal).await.unwrap();
        f.queue.enqueue("c", json!({}), Priority::Normal).await.unwrap();

        let batch = f.queue.consume("w1", 2, NO_WAIT).await.unwrap();
        let types: Vec<&str> = batch.iter().map(|d| d.task.task_type.as_str()).collect();
        assert_eq!(types, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn two_consumers_never_share_an_entry() {
        let f = fixture().await;
        f.queue.enqueue("a", json!({}), Priority::Normal).await.unwrap();

        let w1 = f.queue.consume("w1", 10, NO_WAIT).await.unwrap();
        let w2 = f.queue.consume("w2", 10, NO_WAIT).await.unwrap();
        assert_eq!(w1.len(), 1);
        assert!(w2.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn consume_times_out_empty() {
        let f = fixture().await;
        let batch = f
            .queue
            .consume("w1", 1, Duration::from_millis(200))
            .await
            .unwrap();
        assert!(batch.is_empty());
    }

    #[tokio::test]
    async fn complete_is_idempotent() {
        let f = fixture().await;
        let id = f.queue.enqueue("a", json!({}), Priority::Normal).await.unwrap();
        let delivery = f.queue.consume("w1", 1, NO_WAIT).await.unwrap().remove(0);

        assert!(f.queue.complete(&delivery.handle, Some(json!({"ok": 1}))).await.unwrap());
        assert!(!f.queue.complete(&delivery.handle, None).await.unwrap());

        let stats = f.queue.stats().await.unwrap();
        assert_eq!(stats.tasks_completed, 1);
        assert_eq!(stats.total_depth(), 0);

        let view = f.queue.task_status(id).unwrap();
        assert_eq!(view.status, TaskStatus::Completed);
        assert_eq!(view.result, Some(json!({"ok": 1})));
    }

    #[tokio::test]
    async fn failed_task_comes_back_after_backoff() {
        let f = fixture().await;
        let id = f.queue.enqueue("a", json!({}), Priority::High).await.unwrap();
        let d = f.queue.consume("w1", 1, NO_WAIT).await.unwrap().remove(0);

        let outcome = f.queue.fail(&d.handle, &d.task, "boom").await.unwrap();
        assert_eq!(
            outcome,
            FailOutcome::Retried {
                retry_count: 1,
                delay: Duration::from_secs(2)
            }
        );
        assert_eq!(f.queue.task_status(id).unwrap().status, TaskStatus::Failed);

        // read but held back until not_before
        assert!(f.queue.consume("w1", 1, NO_WAIT).await.unwrap().is_empty());
        assert_eq!(f.queue.parked("w1"), 1);

        f.clock.advance(Duration::from_secs(2));
        let retried = f.queue.consume("w1", 1, NO_WAIT).await.unwrap().remove(0);
        assert_eq!(retried.task.id, id);
        assert_eq!(retried.task.retry_count, 1);
        assert_eq!(retried.task.retry_history[0].error, "boom");
        assert_eq!(f.queue.parked("w1"), 0);
    }

    #[tokio::test]
    async fn backoff_doubles_per_retry() {
        let f = fixture().await;
        f.queue.enqueue("a", json!({}), Priority::Normal).await.unwrap();

        let mut delays = Vec::new();
        for _ in 0..3 {
            f.clock.advance(Duration::from_secs(60));
            let d = f.queue.consume("w1", 1, NO_WAIT).await.unwrap().remove(0);
            if let FailOutcome::Retried { delay, .. } =
                f.queue.fail(&d.handle, &d.task, "boom").await.unwrap()
            {
                delays.push(delay.as_secs());
            }
        }
        assert_eq!(delays, vec![2, 4, 8]);
    }

    #[tokio::test]
    async fn due_retry_waits_behind_a_more_urgent_lane() {
        let f = fixture().await;
        let low = f.queue.enqueue("report", json!({}), Priority::Low).await.unwrap();
        let d = f.queue.consume("w1", 1, NO_WAIT).await.unwrap().remove(0);
        f.queue.fail(&d.handle, &d.task, "boom").await.unwrap();
        assert!(f.queue.consume("w1", 1, NO_WAIT).await.unwrap().is_empty());
        assert_eq!(f.queue.parked("w1"), 1);

        f.clock.advance(Duration::from_secs(2));
        let critical = f
            .queue
            .enqueue("report", json!({}), Priority::Critical)
            .await
            .unwrap();

        let first = f.queue.consume("w1", 1, NO_WAIT).await.unwrap();
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].task.id, critical);
        assert_eq!(f.queue.parked("w1"), 1);

        let second = f.queue.consume("w1", 1, NO_WAIT).await.unwrap().remove(0);
        assert_eq!(second.task.id, low);
        assert_eq!(second.task.retry_count, 1);
        assert_eq!(f.queue.parked("w1"), 0);
    }

    #[tokio::test]
    async fn delivery_stamps_last_attempt() {
        let f = fixture().await;
        f.queue.enqueue("a", json!({}), Priority::Normal).await.unwrap();
        f.clock.advance(Duration::from_secs(5));

        let d = f.queue.consume("w1", 1, NO_WAIT).await.unwrap().remove(0);
        assert_eq!(d.task.last_attempt_at, Some(f.clock.now()));
    }

    #[tokio::test]
    async fn renew_only_succeeds_for_the_current_owner() {
        let f = fixture().await;
        f.queue.enqueue("a", json!({}), Priority::High).await.unwrap();
        let d = f.queue.consume("w1", 1, NO_WAIT).await.unwrap().remove(0);

        f.clock.advance(Duration::from_secs(50));
        assert!(f.queue.renew(&d.handle, "w1").await.unwrap());
        assert!(!f.queue.renew(&d.handle, "w2").await.unwrap());

        // renewal restarted the idle clock
        let report = f
            .queue
            .recover_pending("monitor", Duration::from_secs(30))
            .await
            .unwrap();
        assert_eq!(report.recovered, 0);

        f.clock.advance(Duration::from_secs(31));
        let report = f
            .queue
            .recover_pending("monitor", Duration::from_secs(30))
            .await
            .unwrap();
        assert_eq!(report.recovered, 1);
        assert!(!f.queue.renew(&d.handle, "w1").await.unwrap());
    }

    #[tokio::test]
    async fn exhausted_task_is_dead_lettered() {
        let f = fixture().await;
        let id = f
            .queue
            .enqueue_with(NewTask::new("a", json!({"n": 1})).max_retries(1))
            .await
            .unwrap();

        let d = f.queue.consume("w1", 1, NO_WAIT).await.unwrap().remove(0);
        f.queue.fail(&d.handle, &d.task, "first").await.unwrap();
        f.clock.advance(Duration::from_secs(10));
        let d = f.queue.consume("w1", 1, NO_WAIT).await.unwrap().remove(0);
        let outcome = f.queue.fail(&d.handle, &d.task, "second").await.unwrap();

        assert_eq!(outcome, FailOutcome::DeadLettered);
        let stats = f.queue.stats().await.unwrap();
        assert_eq!(stats.tasks_dead_lettered, 1);
        assert_eq!(stats.tasks_retried, 1);
        assert_eq!(stats.tasks_failed, 2);
        assert_eq!(stats.dead_letter_depth, 1);
        assert_eq!(stats.total_depth(), 0);
        assert_eq!(f.queue.task_status(id).unwrap().status, TaskStatus::DeadLetter);

        // never consumed again
        f.clock.advance(Duration::from_secs(3600));
        assert!(f.queue.consume("w1", 1, NO_WAIT).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn undecodable_entries_are_dead_lettered() {
        let f = fixture().await;
        f.store
            .append(&f.queue.config().lane(Priority::Normal), b"not json".to_vec())
            .await
            .unwrap();

        assert!(f.queue.consume("w1", 1, NO_WAIT).await.unwrap().is_empty());
        let stats = f.queue.stats().await.unwrap();
        assert_eq!(stats.dead_letter_depth, 1);
        assert_eq!(stats.total_depth(), 0);
    }

    #[tokio::test]
    async fn store_outage_surfaces() {
        let f = fixture().await;
        f.store.set_available(false);
        let err = f
            .queue
            .enqueue("a", json!({}), Priority::Normal)
            .await
            .unwrap_err();
        assert!(err.is_unavailable());
        assert!(matches!(err, QueueError::Store(LogStoreError::Unavailable(_))));
        assert!(f.queue.stats().await.unwrap_err().is_unavailable());
    }
}
