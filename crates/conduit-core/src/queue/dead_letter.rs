//! Dead-letter lane: moving tasks in, listing and resubmitting them.
//!
//! The lane is append-only. Records count as outstanding until an operator
//! resubmits them; resubmission acknowledges the record so it drops out of
//! `list_dead_letters` and `dead_letter_depth`, while the entry itself stays
//! in the lane as history.

use std::collections::HashSet;
use std::time::Duration;

use serde_json::Value;
use tracing::{error, info, warn};

use super::stats::QueueCounters;
use super::task_queue::lock;
use super::{DeliveryHandle, QueueError, TaskQueue, TaskStatus};
use crate::domain::{DeadLetterRecord, Priority, RESUBMITTED_AUDIT_PREFIX, Task, TaskId, TaskType};
use crate::ports::{EntryId, LogEntry};

/// Task type recorded for entries whose bytes could not be decoded.
pub const UNDECODABLE_TASK_TYPE: &str = "conduit.undecodable";

/// Consumer name used to take dead-letter records into the group's
/// pending list. Nothing ever processes them under this name.
const DEAD_LETTER_ADMIN: &str = "dead-letter-admin";

impl TaskQueue {
    /// Outstanding dead-letter records, oldest first.
    pub async fn list_dead_letters(&self) -> Result<Vec<DeadLetterRecord>, QueueError> {
        Ok(self
            .outstanding_dead_letters()
            .await?
            .into_iter()
            .map(|(_, record)| record)
            .collect())
    }

    /// Put a dead-lettered task back on its lane with a fresh retry budget.
    ///
    /// The task keeps its id, history is cleared and `note` is kept as an
    /// audit entry.
    pub async fn resubmit_dead_letter(
        &self,
        task_id: TaskId,
        note: &str,
    ) -> Result<TaskId, QueueError> {
        let (entry_id, record) = self
            .outstanding_dead_letters()
            .await?
            .into_iter()
            .rev()
            .find(|(_, record)| record.task_id == task_id)
            .ok_or(QueueError::DeadLetterNotFound(task_id))?;

        let now = self.clock.now();
        let mut task = Task::new(
            record.task_id,
            record.task_type,
            record.original_payload,
            record.priority,
            self.config.default_max_retries,
            now,
        );
        task.audit.push(format!(
            "{RESUBMITTED_AUDIT_PREFIX} at {}: {note}",
            now.to_rfc3339()
        ));

        self.append_task(&task).await?;
        self.store
            .ack(&self.config.dead_letter_lane(), &self.config.group, &entry_id)
            .await?;
        self.set_status(&task, TaskStatus::Pending);
        info!(task_id = %task_id, note, "dead letter resubmitted");
        Ok(task.id)
    }

    pub(super) async fn dead_letter_depth(&self) -> Result<u64, QueueError> {
        Ok(self
            .store
            .depth(&self.config.dead_letter_lane(), &self.config.group)
            .await?)
    }

    /// Move a delivered task to the dead-letter lane and acknowledge it.
    pub(super) async fn dead_letter_task(
        &self,
        handle: &DeliveryHandle,
        task: &Task,
        reason: &str,
    ) -> Result<(), QueueError> {
        let record = DeadLetterRecord::from_task(task, reason, self.clock.now());
        self.store
            .append(&self.config.dead_letter_lane(), serde_json::to_vec(&record)?)
            .await?;
        self.store
            .ack(
                &self.config.lane(handle.priority),
                &self.config.group,
                &handle.entry_id,
            )
            .await?;

        QueueCounters::bump(&self.counters.dead_lettered);
        self.set_status(task, TaskStatus::DeadLetter);
        if let Some(view) = lock(&self.statuses).get_mut(&task.id) {
            view.last_error = Some(reason.to_string());
        }
        error!(
            task_id = %task.id,
            task_type = %task.task_type,
            reason,
            "task moved to dead letter"
        );
        Ok(())
    }

    /// Dead-letter a raw entry that is not a task at all.
    pub(super) async fn dead_letter_entry(
        &self,
        priority: Priority,
        entry: &LogEntry,
        reason: String,
    ) -> Result<(), QueueError> {
        let now = self.clock.now();
        let record = DeadLetterRecord {
            task_id: self.ids.generate_task_id(),
            task_type: TaskType::new(UNDECODABLE_TASK_TYPE),
            priority,
            original_payload: Value::String(String::from_utf8_lossy(&entry.data).into_owned()),
            failure_reason: reason,
            retry_history: Vec::new(),
            moved_at: now,
        };
        self.store
            .append(&self.config.dead_letter_lane(), serde_json::to_vec(&record)?)
            .await?;
        self.store
            .ack(&self.config.lane(priority), &self.config.group, &entry.id)
            .await?;

        QueueCounters::bump(&self.counters.dead_lettered);
        error!(
            entry_id = %entry.id,
            priority = %priority,
            reason = %record.failure_reason,
            "undecodable entry moved to dead letter"
        );
        Ok(())
    }

    async fn outstanding_dead_letters(
        &self,
    ) -> Result<Vec<(EntryId, DeadLetterRecord)>, QueueError> {
        let lane = self.config.dead_letter_lane();
        let group = &self.config.group;

        // take every new record into the pending list, so "pending" means outstanding
        self.store
            .read_group(&lane, group, DEAD_LETTER_ADMIN, usize::MAX, Duration::ZERO)
            .await?;
        let outstanding: HashSet<EntryId> = self
            .store
            .pending_entries(&lane, group, Duration::ZERO)
            .await?
            .into_iter()
            .map(|p| p.id)
            .collect();

        let mut records = Vec::new();
        for entry in self.store.range(&lane).await? {
            if !outstanding.contains(&entry.id) {
                continue;
            }
            match serde_json::from_slice::<DeadLetterRecord>(&entry.data) {
                Ok(record) => records.push((entry.id, record)),
                Err(e) => warn!(entry_id = %entry.id, error = %e, "unreadable dead-letter record"),
            }
        }
        Ok(records)
    }
}
