//! Processor Registry
//!
//! Routes a task to the first registered processor whose capability matches its
//! `TaskType`. Processors are trait objects, so extraction, index builds and
//! test doubles all live in the same map.

use super::types::*;

use anyhow::Result;
use dashmap::DashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// A unit of capability the worker pool can route tasks to.
pub trait Processor: Send + Sync {
    fn name(&self) -> &str;

    fn can_handle(&self, task_type: TaskType) -> bool;

    fn process<'a>(&'a self, task: &'a Task) -> BoxFuture<'a, Result<serde_json::Value>>;
}

/// Type-erased async closure used by `register_fn`.
type ProcessorFn =
    Arc<dyn Fn(Task) -> BoxFuture<'static, Result<serde_json::Value>> + Send + Sync>;

struct FnProcessor {
    name: String,
    task_types: Vec<TaskType>,
    handler: ProcessorFn,
}

impl Processor for FnProcessor {
    fn name(&self) -> &str {
        &self.name
    }

    fn can_handle(&self, task_type: TaskType) -> bool {
        self.task_types.contains(&task_type)
    }

    fn process<'a>(&'a self, task: &'a Task) -> BoxFuture<'a, Result<serde_json::Value>> {
        (self.handler)(task.clone())
    }
}

pub struct ProcessorRegistry {
    /// name -> (registration order, processor)
    processors: DashMap<String, (usize, Arc<dyn Processor>)>,
    next_seq: AtomicUsize,
}

impl ProcessorRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Registers a processor under its own name, replacing any previous one with that name.
    pub fn register(&self, processor: Arc<dyn Processor>) {
        let name = processor.name().to_string();
        let seq = self.next_seq.fetch_add(1, Ordering::SeqCst);
        self.processors.insert(name.clone(), (seq, processor));

        tracing::info!("Registered processor: {}", name);
    }

    /// Registers an async closure as a processor for `task_types`.
    pub fn register_fn<F, Fut>(&self, name: &str, task_types: &[TaskType], handler: F)
    where
        F: Fn(Task) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<serde_json::Value>> + Send + 'static,
    {
        // Box::pin erases the concrete future type so closures share one map.
        let handler: ProcessorFn = Arc::new(move |task: Task| {
            Box::pin(handler(task)) as BoxFuture<'static, Result<serde_json::Value>>
        });

        self.register(Arc::new(FnProcessor {
            name: name.to_string(),
            task_types: task_types.to_vec(),
            handler,
        }));
    }

    /// First processor, in registration order, that can handle `task_type`.
    pub fn find(&self, task_type: TaskType) -> Option<Arc<dyn Processor>> {
        self.processors
            .iter()
            .filter(|entry| entry.value().1.can_handle(task_type))
            .min_by_key(|entry| entry.value().0)
            .map(|entry| entry.value().1.clone())
    }

    pub fn list_processors(&self) -> Vec<String> {
        let mut entries: Vec<(usize, String)> = self
            .processors
            .iter()
            .map(|entry| (entry.value().0, entry.key().clone()))
            .collect();
        entries.sort();
        entries.into_iter().map(|(_, name)| name).collect()
    }

    pub fn has_processor(&self, name: &str) -> bool {
        self.processors.contains_key(name)
    }

    pub fn processor_count(&self) -> usize {
        self.processors.len()
    }
}

impl Default for ProcessorRegistry {
    fn default() -> Self {
        Self {
            processors: DashMap::new(),
            next_seq: AtomicUsize::new(0),
        }
    }
}
