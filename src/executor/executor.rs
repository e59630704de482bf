//! Worker Pool Implementation
//!
//! Spawns background workers that block on the shared `TaskDispatcher` and run each
//! task at most once.
//!
//! ## Responsibilities
//! - **Claiming**: A worker only runs a task after winning its `task:{id}` lease.
//! - **Lease Management**: A sidecar renews the lease during long-running operations.
//! - **Execution**: Routing to the first capable `Processor`, retrying failures with a
//!   fixed delay and catching panics.
//! - **Publishing**: Writing the single `TaskResult` and releasing the lease on every path.

use super::queue::TaskDispatcher;
use super::registry::ProcessorRegistry;
use super::types::*;
use crate::config::Config;
use crate::storage::lease::{LockManager, task_lease_key};
use crate::storage::results::ResultStore;

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// The subset of `Config` the pool needs.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub worker_count: usize,
    pub lease_ttl: Duration,
    pub lease_renew_interval: Duration,
    /// Retries after the first attempt.
    pub max_retries: u32,
    pub retry_delay: Duration,
    pub pop_timeout: Duration,
}

impl From<&Config> for WorkerConfig {
    fn from(config: &Config) -> Self {
        Self {
            worker_count: config.worker_count,
            lease_ttl: config.lease_ttl,
            lease_renew_interval: config.lease_renew_interval,
            max_retries: config.max_retries,
            retry_delay: config.retry_delay,
            pop_timeout: config.pop_timeout,
        }
    }
}

/// What a worker did with a popped task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskOutcome {
    Completed,
    Failed,
    /// A result was already published, nothing to do.
    SkippedAlreadyDone,
    /// Another worker holds the lease.
    SkippedLeaseBusy,
}

/// The engine that drives task execution.
pub struct WorkerPool {
    dispatcher: Arc<TaskDispatcher>,
    store: Arc<ResultStore>,
    locks: Arc<LockManager>,
    registry: Arc<ProcessorRegistry>,
    config: WorkerConfig,
    /// Prefix for worker names, unique per pool instance.
    pool_id: String,
    shutdown: CancellationToken,
}

impl WorkerPool {
    pub fn new(
        dispatcher: Arc<TaskDispatcher>,
        locks: Arc<LockManager>,
        registry: Arc<ProcessorRegistry>,
        config: WorkerConfig,
    ) -> Arc<Self> {
        let pool_id = uuid::Uuid::new_v4().simple().to_string()[..8].to_string();
        Arc::new(Self {
            store: dispatcher.store().clone(),
            dispatcher,
            locks,
            registry,
            config,
            pool_id,
            shutdown: CancellationToken::new(),
        })
    }

    /// Spawns the worker loops and returns immediately.
    pub fn start(self: &Arc<Self>) -> Vec<JoinHandle<()>> {
        tracing::info!("Starting {} task workers", self.config.worker_count);

        let handles = (0..self.config.worker_count)
            .map(|worker_id| {
                let pool = self.clone();
                tokio::spawn(async move {
                    pool.worker_loop(worker_id).await;
                })
            })
            .collect();

        tracing::info!("Worker pool {} started", self.pool_id);
        handles
    }

    /// Signals every worker to stop after its current task.
    pub fn shutdown(&self) {
        tracing::info!("Shutting down worker pool {}", self.pool_id);
        self.shutdown.cancel();
    }

    pub fn worker_name(&self, worker_id: usize) -> String {
        format!("{}-worker-{}", self.pool_id, worker_id)
    }

    async fn worker_loop(&self, worker_id: usize) {
        let worker = self.worker_name(worker_id);
        tracing::info!("Worker {} started", worker);

        loop {
            let popped = tokio::select! {
                _ = self.shutdown.cancelled() => break,
                popped = self.dispatcher.pop(self.config.pop_timeout) => popped,
            };

            let Some(task) = popped else {
                continue;
            };

            self.process_task(&worker, task).await;
        }

        tracing::info!("Worker {} stopped", worker);
    }

    /// Runs one task under its lease and publishes the result.
    pub async fn process_task(&self, worker: &str, task: Task) -> TaskOutcome {
        let task_id = task.task_id.clone();

        if self.store.has_result(&task_id) {
            tracing::debug!("Task {} already has a result, skipping", task_id);
            return TaskOutcome::SkippedAlreadyDone;
        }

        let key = task_lease_key(&task_id);
        let Some(lease) = self.locks.acquire(&key, worker, self.config.lease_ttl) else {
            tracing::trace!("Task {} is leased by another worker", task_id);
            return TaskOutcome::SkippedLeaseBusy;
        };
        // Released on drop, whichever way this function returns.
        let _guard = self.locks.guard(&lease);

        // The previous holder may have published between our check and the acquire.
        if self.store.has_result(&task_id) {
            return TaskOutcome::SkippedAlreadyDone;
        }

        self.store
            .set_status(&task_id, TaskStatus::Processing, Some(worker));
        tracing::info!(
            "Worker {} claimed task {} ({})",
            worker,
            task_id,
            task.task_type
        );

        let renewal_handle = self.spawn_lease_renewal(&key, worker);
        let result = self.execute_with_retry(&task).await;
        renewal_handle.abort();

        let outcome = if result.is_success() {
            tracing::info!("Task {} completed", task_id);
            TaskOutcome::Completed
        } else {
            tracing::error!(
                "Task {} failed: {}",
                task_id,
                result.error.as_deref().unwrap_or("unknown error")
            );
            TaskOutcome::Failed
        };

        if !self.store.put_result(result) {
            tracing::warn!("Result for task {} was already published", task_id);
        }

        outcome
    }

    /// Renews `key` every `lease_renew_interval` until aborted or the lease is lost.
    fn spawn_lease_renewal(&self, key: &str, owner: &str) -> JoinHandle<()> {
        let locks = self.locks.clone();
        let key = key.to_string();
        let owner = owner.to_string();
        let interval = self.config.lease_renew_interval;
        let ttl = self.config.lease_ttl;

        tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;

                match locks.renew(&key, &owner, ttl) {
                    Ok(()) => tracing::trace!("Renewed lease {}", key),
                    Err(e) => {
                        tracing::warn!("Stopped renewing lease {}: {}", key, e);
                        break;
                    }
                }
            }
        })
    }

    async fn execute_with_retry(&self, task: &Task) -> TaskResult {
        let task_id = task.task_id.clone();

        let Some(processor) = self.registry.find(task.task_type) else {
            tracing::warn!("No processor registered for {}", task.task_type);
            return TaskResult::failed(
                task_id,
                format!("no processor for task type {}", task.task_type),
            );
        };

        let attempts = self.config.max_retries.saturating_add(1);
        let mut last_error = String::new();

        for attempt in 1..=attempts {
            if self.store.is_cancelled(&task_id) {
                tracing::info!("Task {} cancelled before attempt {}", task_id, attempt);
                return TaskResult::failed(task_id, "cancelled");
            }

            tracing::debug!(
                "Running task {} with {} (attempt {}/{})",
                task_id,
                processor.name(),
                attempt,
                attempts
            );

            // Run on its own tokio task so a panicking processor surfaces as a JoinError.
            let runner = processor.clone();
            let owned = task.clone();
            let joined = tokio::spawn(async move { runner.process(&owned).await }).await;

            match joined {
                Ok(Ok(value)) => return TaskResult::completed(task_id, value),
                Ok(Err(e)) => last_error = e.to_string(),
                Err(e) if e.is_panic() => last_error = format!("processor panicked: {}", e),
                Err(e) => last_error = e.to_string(),
            }

            tracing::warn!(
                "Task {} attempt {}/{} failed: {}",
                task_id,
                attempt,
                attempts,
                last_error
            );

            if attempt < attempts {
                tokio::time::sleep(self.config.retry_delay).await;
            }
        }

        TaskResult::failed(task_id, last_error)
    }
}
