//! Task Result Store
//!
//! Holds the per-task record (`Pending` → `Processing` → terminal) and the single
//! immutable `TaskResult`, both under the same TTL window. The result slot is
//! write-once: the first worker to publish wins, later writes are rejected.

use super::memory::TtlMap;
use crate::executor::types::*;

use std::time::Duration;

pub struct ResultStore {
    tasks: TtlMap<TaskRecord>,
    results: TtlMap<TaskResult>,
    cancelled: TtlMap<u64>,
    ttl: Duration,
}

impl ResultStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            tasks: TtlMap::new(),
            results: TtlMap::new(),
            cancelled: TtlMap::new(),
            ttl,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Writes the initial `Pending` record for a freshly submitted task.
    pub fn put_pending(&self, task: &Task) {
        let record = TaskRecord {
            task: task.clone(),
            status: TaskStatus::Pending,
            assigned_to: None,
            updated_at: now_ms(),
        };
        self.tasks.set(task.task_id.as_str(), record, self.ttl);
    }

    pub fn task(&self, task_id: &TaskId) -> Option<TaskRecord> {
        self.tasks.get(task_id.as_str())
    }

    pub fn status(&self, task_id: &TaskId) -> Option<TaskStatus> {
        self.task(task_id).map(|record| record.status)
    }

    /// Moves a task to `status`. Terminal records are never reopened.
    pub fn set_status(&self, task_id: &TaskId, status: TaskStatus, worker: Option<&str>) -> bool {
        let mut changed = false;
        self.tasks.update(task_id.as_str(), |record| {
            if record.status.is_terminal() {
                return;
            }
            record.status = status;
            if let Some(worker) = worker {
                record.assigned_to = Some(worker.to_string());
            }
            record.updated_at = now_ms();
            changed = true;
        });
        changed
    }

    /// Publishes the task's result. Returns `false` if a result already exists.
    pub fn put_result(&self, result: TaskResult) -> bool {
        let task_id = result.task_id.clone();
        let status = result.status;

        if !self
            .results
            .set_if_absent(task_id.as_str(), result, self.ttl)
        {
            tracing::debug!("Result for task {} already published", task_id);
            return false;
        }

        self.tasks.update(task_id.as_str(), |record| {
            record.status = status;
            record.updated_at = now_ms();
        });
        true
    }

    pub fn result(&self, task_id: &TaskId) -> Option<TaskResult> {
        self.results.get(task_id.as_str())
    }

    pub fn has_result(&self, task_id: &TaskId) -> bool {
        self.results.contains(task_id.as_str())
    }

    /// Flags a task for cooperative cancellation. Workers check this between attempts.
    pub fn mark_cancelled(&self, task_id: &TaskId) {
        self.cancelled.set(task_id.as_str(), now_ms(), self.ttl);
    }

    pub fn is_cancelled(&self, task_id: &TaskId) -> bool {
        self.cancelled.contains(task_id.as_str())
    }

    /// Returns `(pending, processing, completed, failed)` over live records.
    pub fn status_counts(&self) -> (usize, usize, usize, usize) {
        let mut pending = 0;
        let mut processing = 0;
        let mut completed = 0;
        let mut failed = 0;

        for record in self.tasks.values() {
            match record.status {
                TaskStatus::Pending => pending += 1,
                TaskStatus::Processing => processing += 1,
                TaskStatus::Completed => completed += 1,
                TaskStatus::Failed => failed += 1,
            }
        }

        (pending, processing, completed, failed)
    }

    /// Drops expired records, results and cancellation flags.
    pub fn purge_expired(&self) -> usize {
        self.tasks.purge_expired() + self.results.purge_expired() + self.cancelled.purge_expired()
    }
}
