//! Recovery of tasks whose consumer stopped making progress.
//!
//! # フロー
//! 1. 各レーンの PEL から idle_threshold 以上放置された entry を列挙
//! 2. claim で所有権を奪う（すでに他の recoverer が取った entry は store が拒否する）
//! 3. backoff 待ちの retry copy（not_before が未来）はそのまま PEL に残す
//! 4. task を再 append してから古い entry を ack
//! 5. decode できない・task type が未知・回収回数超過のものは dead-letter

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::stats::QueueCounters;
use super::{DeliveryHandle, QueueError, TaskQueue, TaskStatus};
use crate::domain::{Priority, Task};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecoveryReport {
    /// Pending entries idle past the threshold.
    pub scanned: usize,
    /// Re-appended for any worker.
    pub recovered: usize,
    /// Moved to the dead-letter lane instead.
    pub dead_lettered: usize,
    /// Claimed by someone else first.
    pub skipped: usize,
    /// Retry copies still inside their backoff. They stay pending; the
    /// worker that parked them takes them back once due.
    #[serde(default)]
    pub deferred: usize,
}

impl TaskQueue {
    /// Reclaim tasks delivered more than `idle_threshold` ago and never
    /// acknowledged. Safe to run from several processes at once.
    pub async fn recover_pending(
        &self,
        recoverer: &str,
        idle_threshold: Duration,
    ) -> Result<RecoveryReport, QueueError> {
        let mut report = RecoveryReport::default();
        for priority in Priority::ALL {
            self.recover_lane(priority, recoverer, idle_threshold, &mut report)
                .await?;
        }
        if report.recovered > 0 || report.dead_lettered > 0 {
            info!(
                recoverer,
                recovered = report.recovered,
                dead_lettered = report.dead_lettered,
                skipped = report.skipped,
                "pending recovery finished"
            );
        }
        Ok(report)
    }

    async fn recover_lane(
        &self,
        priority: Priority,
        recoverer: &str,
        idle_threshold: Duration,
        report: &mut RecoveryReport,
    ) -> Result<(), QueueError> {
        let lane = self.config.lane(priority);
        let group = &self.config.group;
        let now = self.clock.now();
        let pending = self
            .store
            .pending_entries(&lane, group, idle_threshold)
            .await?;

        for stale in pending {
            report.scanned += 1;
            let Some(entry) = self
                .store
                .claim(&lane, group, recoverer, &stale.id, idle_threshold)
                .await?
            else {
                report.skipped += 1;
                continue;
            };

            let mut task = match Task::decode(&entry.data) {
                Ok(task) => task,
                Err(e) => {
                    self.dead_letter_entry(
                        priority,
                        &entry,
                        format!("undecodable entry found during recovery: {e}"),
                    )
                    .await?;
                    report.dead_lettered += 1;
                    continue;
                }
            };

            // idle because it is waiting out its backoff, not because its owner died
            if !task.is_due(now) {
                report.deferred += 1;
                debug!(
                    task_id = %task.id,
                    owner = %stale.consumer,
                    "retry copy not due yet, left pending"
                );
                continue;
            }

            let handle = DeliveryHandle {
                priority,
                entry_id: entry.id.clone(),
                task_id: task.id,
            };
            if let Some(reason) = self.recovery_anomaly(&task) {
                self.dead_letter_task(&handle, &task, &reason).await?;
                report.dead_lettered += 1;
                continue;
            }

            task.recovery_count += 1;
            self.append_task(&task).await?;
            self.store.ack(&lane, group, &entry.id).await?;

            QueueCounters::bump(&self.counters.recovered);
            self.set_status(&task, TaskStatus::Pending);
            report.recovered += 1;
            warn!(
                task_id = %task.id,
                previous_owner = %stale.consumer,
                idle_ms = stale.idle.as_millis() as u64,
                recovery_count = task.recovery_count,
                "recovered task from idle consumer"
            );
        }
        Ok(())
    }

    fn recovery_anomaly(&self, task: &Task) -> Option<String> {
        if let Some(known) = &self.known_types
            && !known.contains(&task.task_type)
        {
            return Some(format!(
                "task type '{}' has no registered handler",
                task.task_type
            ));
        }
        if task.recovery_count >= self.config.max_recoveries {
            return Some(format!(
                "recovered {} times without completing",
                task.recovery_count
            ));
        }
        None
    }
}
