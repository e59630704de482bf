use serde::{Deserialize, Serialize};
use std::fmt;

/// Unique identifier for a task within the cluster.
///
/// Wrapper around a UUID string to ensure global uniqueness. The same id keys
/// the task record, the task result and the execution lease.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(transparent)]
pub struct TaskId(pub String);

impl TaskId {
    /// Generates a new random UUID v4-based TaskId.
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The kinds of work the pool knows how to route.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    FeatureExtraction,
    BatchFeatureExtraction,
    IndexBuild,
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TaskType::FeatureExtraction => "feature_extraction",
            TaskType::BatchFeatureExtraction => "batch_feature_extraction",
            TaskType::IndexBuild => "index_build",
        };
        f.write_str(name)
    }
}

/// Represents the lifecycle state of a task.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Submitted but not yet picked up by any worker.
    Pending,
    /// A worker holds the lease and is executing it.
    Processing,
    Completed,
    /// The processor failed after its retries, or no processor matched.
    Failed,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }
}

/// The definition of a unit of work, exactly as it travels on the wire:
/// `{task_id, task_type, payload, priority, created_at}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub task_id: TaskId,
    pub task_type: TaskType,
    /// Arbitrary JSON payload handed to the processor.
    pub payload: serde_json::Value,
    /// Lower value = higher priority.
    pub priority: i32,
    /// Timestamp (ms) when the task was created.
    pub created_at: u64,
}

impl Task {
    pub fn new(task_type: TaskType, payload: serde_json::Value, priority: i32) -> Self {
        Self {
            task_id: TaskId::new(),
            task_type,
            payload,
            priority,
            created_at: now_ms(),
        }
    }
}

/// The mutable record the dispatcher and workers keep for each task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRecord {
    pub task: Task,
    pub status: TaskStatus,
    /// The worker currently (or last) processing this task.
    pub assigned_to: Option<String>,
    pub updated_at: u64,
}

/// The outcome of a task: `{task_id, status, result|error, completed_at}`.
///
/// Written exactly once, by the worker that won the lease.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskResult {
    pub task_id: TaskId,
    pub status: TaskStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub completed_at: u64,
}

impl TaskResult {
    pub fn completed(task_id: TaskId, result: serde_json::Value) -> Self {
        Self {
            task_id,
            status: TaskStatus::Completed,
            result: Some(result),
            error: None,
            completed_at: now_ms(),
        }
    }

    pub fn failed(task_id: TaskId, error: impl Into<String>) -> Self {
        Self {
            task_id,
            status: TaskStatus::Failed,
            result: None,
            error: Some(error.into()),
            completed_at: now_ms(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == TaskStatus::Completed
    }
}

/// Helper to get the current system time in milliseconds.
pub fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
