//! InMemoryLogStore - 開発用・テスト用の log store
//!
//! Redis Streams の consumer group と同じ意味論を持つ in-memory 実装です。
//!
//! # 実装詳細
//! - レーンごとに append-only の `Vec<LogEntry>`（ack 済みでも消さない）
//! - group ごとに「次に配送する位置」と PEL（pending entries list）を保持
//! - idle 時間は Clock から計算するので、FixedClock で時間を進めて検証できる
//! - `Notify` で append 時にブロック中の read_group を起こす

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, Notify};

use crate::ports::{Clock, EntryId, LogEntry, LogStore, LogStoreError, PendingEntry};

#[derive(Debug)]
struct PendingSlot {
    consumer: String,
    delivered_at: DateTime<Utc>,
    delivery_count: u64,
}

#[derive(Debug, Default)]
struct Group {
    /// Index of the first entry never delivered to this group.
    next_index: usize,
    /// PEL keyed by entry index.
    pending: BTreeMap<usize, PendingSlot>,
}

#[derive(Debug, Default)]
struct Lane {
    entries: Vec<LogEntry>,
    index_of: HashMap<EntryId, usize>,
    groups: HashMap<String, Group>,
}

impl Lane {
    fn group_mut(&mut self, lane: &str, group: &str) -> Result<&mut Group, LogStoreError> {
        self.groups
            .get_mut(group)
            .ok_or_else(|| no_such_group(lane, group))
    }
}

fn no_such_group(lane: &str, group: &str) -> LogStoreError {
    LogStoreError::NoSuchGroup {
        lane: lane.to_string(),
        group: group.to_string(),
    }
}

fn idle_since(delivered_at: DateTime<Utc>, now: DateTime<Utc>) -> Duration {
    (now - delivered_at).to_std().unwrap_or(Duration::ZERO)
}

pub struct InMemoryLogStore {
    lanes: Mutex<HashMap<String, Lane>>,
    notify: Notify,
    clock: Arc<dyn Clock>,
    available: AtomicBool,
}

impl InMemoryLogStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            lanes: Mutex::new(HashMap::new()),
            notify: Notify::new(),
            clock,
            available: AtomicBool::new(true),
        }
    }

    /// Simulate an outage: every call fails with `Unavailable` until re-enabled.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<(), LogStoreError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(LogStoreError::Unavailable(
                "in-memory store switched off".to_string(),
            ))
        }
    }

    async fn try_read(
        &self,
        lane: &str,
        group: &str,
        consumer: &str,
        count: usize,
    ) -> Result<Vec<LogEntry>, LogStoreError> {
        let now = self.clock.now();
        let mut lanes = self.lanes.lock().await;
        let state = lanes.get_mut(lane).ok_or_else(|| no_such_group(lane, group))?;
        let total = state.entries.len();
        let grp = state.group_mut(lane, group)?;

        let end = total.min(grp.next_index.saturating_add(count));
        let start = grp.next_index;
        for index in start..end {
            grp.pending.insert(
                index,
                PendingSlot {
                    consumer: consumer.to_string(),
                    delivered_at: now,
                    delivery_count: 1,
                },
            );
        }
        grp.next_index = end;
        Ok(state.entries[start..end].to_vec())
    }
}

#[async_trait]
impl LogStore for InMemoryLogStore {
    async fn ensure_group(&self, lane: &str, group: &str) -> Result<(), LogStoreError> {
        self.check_available()?;
        let mut lanes = self.lanes.lock().await;
        lanes
            .entry(lane.to_string())
            .or_default()
            .groups
            .entry(group.to_string())
            .or_default();
        Ok(())
    }

    async fn append(&self, lane: &str, data: Vec<u8>) -> Result<EntryId, LogStoreError> {
        self.check_available()?;
        let id = {
            let mut lanes = self.lanes.lock().await;
            let state = lanes.entry(lane.to_string()).or_default();
            let index = state.entries.len();
            let id = EntryId::new(format!("{}-{}", self.clock.now().timestamp_millis(), index));
            state.index_of.insert(id.clone(), index);
            state.entries.push(LogEntry {
                id: id.clone(),
                data,
            });
            id
        };
        // ロックの外で通知する
        self.notify.notify_waiters();
        Ok(id)
    }

    async fn read_group(
        &self,
        lane: &str,
        group: &str,
        consumer: &str,
        count: usize,
        block: Duration,
    ) -> Result<Vec<LogEntry>, LogStoreError> {
        self.check_available()?;
        let deadline = tokio::time::Instant::now() + block;
        loop {
            // notified() は生成した時点で notify_waiters を受け取れる
            let notified = self.notify.notified();
            let entries = self.try_read(lane, group, consumer, count).await?;
            if !entries.is_empty() || block.is_zero() {
                return Ok(entries);
            }
            tokio::select! {
                _ = notified => {}
                _ = tokio::time::sleep_until(deadline) => return Ok(Vec::new()),
            }
        }
    }

    async fn ack(&self, lane: &str, group: &str, id: &EntryId) -> Result<bool, LogStoreError> {
        self.check_available()?;
        let mut lanes = self.lanes.lock().await;
        let Some(state) = lanes.get_mut(lane) else {
            return Ok(false);
        };
        let Some(&index) = state.index_of.get(id) else {
            return Ok(false);
        };
        let Some(grp) = state.groups.get_mut(group) else {
            return Ok(false);
        };
        Ok(grp.pending.remove(&index).is_some())
    }

    async fn pending_entries(
        &self,
        lane: &str,
        group: &str,
        min_idle: Duration,
    ) -> Result<Vec<PendingEntry>, LogStoreError> {
        self.check_available()?;
        let now = self.clock.now();
        let lanes = self.lanes.lock().await;
        let state = lanes.get(lane).ok_or_else(|| no_such_group(lane, group))?;
        let grp = state
            .groups
            .get(group)
            .ok_or_else(|| no_such_group(lane, group))?;

        Ok(grp
            .pending
            .iter()
            .filter_map(|(&index, slot)| {
                let idle = idle_since(slot.delivered_at, now);
                (idle >= min_idle).then(|| PendingEntry {
                    id: state.entries[index].id.clone(),
                    consumer: slot.consumer.clone(),
                    idle,
                    delivery_count: slot.delivery_count,
                })
            })
            .collect())
    }

    async fn claim(
        &self,
        lane: &str,
        group: &str,
        new_consumer: &str,
        id: &EntryId,
        min_idle: Duration,
    ) -> Result<Option<LogEntry>, LogStoreError> {
        self.check_available()?;
        let now = self.clock.now();
        let mut lanes = self.lanes.lock().await;
        let state = lanes.get_mut(lane).ok_or_else(|| no_such_group(lane, group))?;
        let Some(&index) = state.index_of.get(id) else {
            return Ok(None);
        };
        let grp = state.group_mut(lane, group)?;
        let Some(slot) = grp.pending.get_mut(&index) else {
            return Ok(None);
        };
        if idle_since(slot.delivered_at, now) < min_idle {
            return Ok(None);
        }
        slot.consumer = new_consumer.to_string();
        slot.delivered_at = now;
        slot.delivery_count += 1;
        Ok(Some(state.entries[index].clone()))
    }

    async fn range(&self, lane: &str) -> Result<Vec<LogEntry>, LogStoreError> {
        self.check_available()?;
        let lanes = self.lanes.lock().await;
        Ok(lanes
            .get(lane)
            .map(|state| state.entries.clone())
            .unwrap_or_default())
    }

    async fn depth(&self, lane: &str, group: &str) -> Result<u64, LogStoreError> {
        self.check_available()?;
        let lanes = self.lanes.lock().await;
        let state = lanes.get(lane).ok_or_else(|| no_such_group(lane, group))?;
        let grp = state
            .groups
            .get(group)
            .ok_or_else(|| no_such_group(lane, group))?;
        let undelivered = state.entries.len().saturating_sub(grp.next_index);
        Ok((undelivered + grp.pending.len()) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::FixedClock;
    use chrono::TimeZone;

    const LANE: &str = "test:lane:normal";
    const GROUP: &str = "workers";

    fn clock() -> Arc<FixedClock> {
        Arc::new(FixedClock::new(
            Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
        ))
    }

    async fn store_with_group(clock: Arc<FixedClock>) -> InMemoryLogStore {
        let store = InMemoryLogStore::new(clock);
        store.ensure_group(LANE, GROUP).await.unwrap();
        store
    }

    #[tokio::test]
    async fn read_group_delivers_in_append_order() {
        let store = store_with_group(clock()).await;
        for n in 0..3u8 {
            store.append(LANE, vec![n]).await.unwrap();
        }

        let entries = store
            .read_group(LANE, GROUP, "w1", 10, Duration::ZERO)
            .await
            .unwrap();
        let data: Vec<u8> = entries.iter().map(|e| e.data[0]).collect();
        assert_eq!(data, vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn an_entry_is_delivered_to_one_consumer_only() {
        let store = store_with_group(clock()).await;
        store.append(LANE, b"a".to_vec()).await.unwrap();

        let first = store
            .read_group(LANE, GROUP, "w1", 1, Duration::ZERO)
            .await
            .unwrap();
        let second = store
            .read_group(LANE, GROUP, "w2", 1, Duration::ZERO)
            .await
            .unwrap();

        assert_eq!(first.len(), 1);
        assert!(second.is_empty());
    }

    #[tokio::test]
    async fn ack_removes_from_pending_once() {
        let store = store_with_group(clock()).await;
        let id = store.append(LANE, b"a".to_vec()).await.unwrap();
        store
            .read_group(LANE, GROUP, "w1", 1, Duration::ZERO)
            .await
            .unwrap();

        assert_eq!(store.depth(LANE, GROUP).await.unwrap(), 1);
        assert!(store.ack(LANE, GROUP, &id).await.unwrap());
        assert!(!store.ack(LANE, GROUP, &id).await.unwrap());
        assert_eq!(store.depth(LANE, GROUP).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn pending_entries_report_idle_time_from_clock() {
        let clock = clock();
        let store = store_with_group(clock.clone()).await;
        store.append(LANE, b"a".to_vec()).await.unwrap();
        store
            .read_group(LANE, GROUP, "w1", 1, Duration::ZERO)
            .await
            .unwrap();

        assert!(
            store
                .pending_entries(LANE, GROUP, Duration::from_secs(30))
                .await
                .unwrap()
                .is_empty()
        );

        clock.advance(Duration::from_secs(31));
        let pending = store
            .pending_entries(LANE, GROUP, Duration::from_secs(30))
            .await
            .unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].consumer, "w1");
        assert_eq!(pending[0].idle, Duration::from_secs(31));
    }

    #[tokio::test]
    async fn second_claim_is_rejected_because_idle_resets() {
        let clock = clock();
        let store = store_with_group(clock.clone()).await;
        let id = store.append(LANE, b"a".to_vec()).await.unwrap();
        store
            .read_group(LANE, GROUP, "w1", 1, Duration::ZERO)
            .await
            .unwrap();
        clock.advance(Duration::from_secs(60));

        let min_idle = Duration::from_secs(30);
        let first = store.claim(LANE, GROUP, "r1", &id, min_idle).await.unwrap();
        let second = store.claim(LANE, GROUP, "r2", &id, min_idle).await.unwrap();

        assert!(first.is_some());
        assert!(second.is_none());
        let pending = store
            .pending_entries(LANE, GROUP, Duration::ZERO)
            .await
            .unwrap();
        assert_eq!(pending[0].consumer, "r1");
        assert_eq!(pending[0].delivery_count, 2);
    }

    #[tokio::test]
    async fn read_group_without_group_is_an_error() {
        let store = InMemoryLogStore::new(clock());
        store.append(LANE, b"a".to_vec()).await.unwrap();
        let err = store
            .read_group(LANE, "missing", "w1", 1, Duration::ZERO)
            .await
            .unwrap_err();
        assert!(matches!(err, LogStoreError::NoSuchGroup { .. }));
    }

    #[tokio::test]
    async fn blocking_read_times_out_empty() {
        let store = store_with_group(clock()).await;
        let entries = store
            .read_group(LANE, GROUP, "w1", 1, Duration::from_millis(50))
            .await
            .unwrap();
        assert!(entries.is_empty());
    }

    #[tokio::test]
    async fn append_wakes_blocking_read() {
        let store = Arc::new(store_with_group(clock()).await);

        let reader = tokio::spawn({
            let store = store.clone();
            async move {
                store
                    .read_group(LANE, GROUP, "w1", 1, Duration::from_secs(5))
                    .await
                    .unwrap()
            }
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        store.append(LANE, b"late".to_vec()).await.unwrap();

        let entries = reader.await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].data, b"late".to_vec());
    }

    #[tokio::test]
    async fn outage_surfaces_as_unavailable() {
        let store = store_with_group(clock()).await;
        store.set_available(false);
        let err = store.append(LANE, b"a".to_vec()).await.unwrap_err();
        assert!(matches!(err, LogStoreError::Unavailable(_)));

        store.set_available(true);
        assert!(store.append(LANE, b"a".to_vec()).await.is_ok());
    }

    #[tokio::test]
    async fn range_reads_without_consuming() {
        let store = store_with_group(clock()).await;
        store.append(LANE, b"a".to_vec()).await.unwrap();

        assert_eq!(store.range(LANE).await.unwrap().len(), 1);
        assert_eq!(store.depth(LANE, GROUP).await.unwrap(), 1);
        assert!(store.range("nothing:here").await.unwrap().is_empty());
    }
}
