//! Task Dispatcher
//!
//! A shared priority queue in front of the `ResultStore`. Submission persists the
//! `Pending` record and wakes one waiting worker; workers block on `pop` with a
//! bounded timeout instead of spinning.
//!
//! ## Responsibilities
//! - **Ordering**: Lower `priority` dequeues first, ties are FIFO by enqueue sequence.
//! - **Observation**: Status, result and a bounded polling wait for callers.
//! - **Cancellation**: Queued tasks are dropped outright; running tasks are flagged
//!   and the worker stops before its next retry.

use super::types::*;
use crate::error::{Result, ServiceError};
use crate::storage::results::ResultStore;

use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::time::Duration;
use tokio::sync::{Mutex, Notify};

/// Heap entry. Only `(priority, seq)` takes part in ordering.
struct QueuedTask {
    priority: i32,
    seq: u64,
    task: Task,
}

impl PartialEq for QueuedTask {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.seq == other.seq
    }
}

impl Eq for QueuedTask {}

impl PartialOrd for QueuedTask {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueuedTask {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.priority, self.seq).cmp(&(other.priority, other.seq))
    }
}

pub struct TaskDispatcher {
    /// Min-heap on `(priority, seq)`.
    queue: Mutex<BinaryHeap<Reverse<QueuedTask>>>,
    next_seq: AtomicU64,
    notify: Notify,
    store: Arc<ResultStore>,
    default_priority: i32,
    poll_interval: Duration,
}

impl TaskDispatcher {
    pub fn new(store: Arc<ResultStore>, default_priority: i32, poll_interval: Duration) -> Arc<Self> {
        Arc::new(Self {
            queue: Mutex::new(BinaryHeap::new()),
            next_seq: AtomicU64::new(0),
            notify: Notify::new(),
            store,
            default_priority,
            poll_interval,
        })
    }

    pub fn store(&self) -> &Arc<ResultStore> {
        &self.store
    }

    /// Enqueues a task and records it as `Pending`.
    pub async fn submit(&self, task: Task) -> Result<TaskId> {
        if self.store.task(&task.task_id).is_some() {
            return Err(ServiceError::Processing(format!(
                "task {} already submitted",
                task.task_id
            )));
        }

        let task_id = task.task_id.clone();
        self.store.put_pending(&task);

        let entry = QueuedTask {
            priority: task.priority,
            seq: self.next_seq.fetch_add(1, AtomicOrdering::SeqCst),
            task,
        };
        tracing::debug!(
            "Queued task {} (priority {}, seq {})",
            task_id,
            entry.priority,
            entry.seq
        );

        self.queue.lock().await.push(Reverse(entry));
        self.notify.notify_one();

        Ok(task_id)
    }

    /// Builds a task from its parts and submits it. `None` priority takes the configured default.
    pub async fn submit_task(
        &self,
        task_type: TaskType,
        payload: serde_json::Value,
        priority: Option<i32>,
    ) -> Result<TaskId> {
        let task = Task::new(task_type, payload, priority.unwrap_or(self.default_priority));
        self.submit(task).await
    }

    /// Takes the highest-priority task, waiting up to `timeout` for one to arrive.
    pub async fn pop(&self, timeout: Duration) -> Option<Task> {
        let deadline = tokio::time::Instant::now() + timeout;

        loop {
            // Register interest before checking, so a push between the check and
            // the wait is not missed.
            let notified = self.notify.notified();

            if let Some(Reverse(entry)) = self.queue.lock().await.pop() {
                return Some(entry.task);
            }

            let now = tokio::time::Instant::now();
            if now >= deadline {
                return None;
            }

            if tokio::time::timeout(deadline - now, notified).await.is_err() {
                return None;
            }
        }
    }

    pub fn status(&self, task_id: &TaskId) -> Option<TaskRecord> {
        self.store.task(task_id)
    }

    pub fn result(&self, task_id: &TaskId) -> Option<TaskResult> {
        self.store.result(task_id)
    }

    /// Polls for the task's result every `poll_interval` until `timeout`.
    ///
    /// Returns `None` when the deadline passes. The task itself keeps running.
    pub async fn wait_for_task(&self, task_id: &TaskId, timeout: Duration) -> Option<TaskResult> {
        let deadline = tokio::time::Instant::now() + timeout;

        loop {
            if let Some(result) = self.store.result(task_id) {
                return Some(result);
            }

            let now = tokio::time::Instant::now();
            if now >= deadline {
                tracing::debug!("Wait for task {} timed out", task_id);
                return None;
            }

            tracing::trace!("Task {} not ready, polling again", task_id);
            tokio::time::sleep(self.poll_interval.min(deadline - now)).await;
        }
    }

    /// Cancels a task that has not finished yet.
    ///
    /// A task still in the queue is removed and receives a `Failed` result. A task
    /// already running is flagged; its worker gives up before the next retry.
    /// Returns `false` for unknown or already finished tasks.
    pub async fn cancel(&self, task_id: &TaskId) -> bool {
        match self.store.status(task_id) {
            None => return false,
            Some(status) if status.is_terminal() => return false,
            Some(_) => {}
        }

        self.store.mark_cancelled(task_id);

        let removed = {
            let mut queue = self.queue.lock().await;
            let before = queue.len();
            queue.retain(|Reverse(entry)| &entry.task.task_id != task_id);
            before != queue.len()
        };

        if removed {
            self.store
                .put_result(TaskResult::failed(task_id.clone(), "cancelled"));
            tracing::info!("Cancelled queued task {}", task_id);
        } else {
            tracing::info!("Flagged running task {} for cancellation", task_id);
        }

        true
    }

    /// Number of tasks still waiting in the queue.
    pub async fn pending_len(&self) -> usize {
        self.queue.lock().await.len()
    }

    /// `(pending, processing, completed, failed)` over live task records.
    pub fn status_counts(&self) -> (usize, usize, usize, usize) {
        self.store.status_counts()
    }
}
