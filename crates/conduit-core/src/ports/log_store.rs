//! LogStore port - 追記型ログ（Redis Streams 相当）
//!
//! TaskQueue はこの trait だけを通して log store に触れます。
//! 実装は consumer group / pending entries list (PEL) / claim の意味論を
//! 満たす必要があります。
//!
//! # 設計原則
//! - 「いま誰がこの entry を持っているか」の正本は store 側にある
//! - 同じ group の中で 1 つの entry は同時に 1 consumer にしか配送されない
//! - claim は min_idle を満たさない entry を拒否する（二重 claim は store が弾く）

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Store-assigned entry id (`<millis>-<seq>` in Redis).
///
/// Internal to the queue: it is never part of the producer-facing contract.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntryId(String);

impl EntryId {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    pub id: EntryId,
    pub data: Vec<u8>,
}

/// One row of the pending entries list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingEntry {
    pub id: EntryId,
    pub consumer: String,
    pub idle: Duration,
    pub delivery_count: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LogStoreError {
    /// Network / connection failure. Callers decide their own retry policy.
    #[error("log store unavailable: {0}")]
    Unavailable(String),

    #[error("consumer group '{group}' does not exist on lane '{lane}'")]
    NoSuchGroup { lane: String, group: String },

    #[error("log store error: {0}")]
    Backend(String),
}

#[async_trait]
pub trait LogStore: Send + Sync {
    /// Create `group` on `lane` (and the lane itself) if missing.
    async fn ensure_group(&self, lane: &str, group: &str) -> Result<(), LogStoreError>;

    async fn append(&self, lane: &str, data: Vec<u8>) -> Result<EntryId, LogStoreError>;

    /// Deliver up to `count` entries never delivered to `group` before.
    /// Waits up to `block` when nothing is available (`Duration::ZERO` = no wait).
    async fn read_group(
        &self,
        lane: &str,
        group: &str,
        consumer: &str,
        count: usize,
        block: Duration,
    ) -> Result<Vec<LogEntry>, LogStoreError>;

    /// Returns `false` if the entry was not pending (already acked or unknown).
    async fn ack(&self, lane: &str, group: &str, id: &EntryId) -> Result<bool, LogStoreError>;

    async fn pending_entries(
        &self,
        lane: &str,
        group: &str,
        min_idle: Duration,
    ) -> Result<Vec<PendingEntry>, LogStoreError>;

    /// Atomically move ownership of a pending entry to `new_consumer`.
    /// `None` if it is no longer pending or has been idle less than `min_idle`.
    async fn claim(
        &self,
        lane: &str,
        group: &str,
        new_consumer: &str,
        id: &EntryId,
        min_idle: Duration,
    ) -> Result<Option<LogEntry>, LogStoreError>;

    /// Every entry on the lane, oldest first, without touching any group.
    async fn range(&self, lane: &str) -> Result<Vec<LogEntry>, LogStoreError>;

    /// Entries `group` has not acknowledged yet (undelivered + pending).
    async fn depth(&self, lane: &str, group: &str) -> Result<u64, LogStoreError>;
}
