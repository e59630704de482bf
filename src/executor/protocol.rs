//! Task Protocol Definitions
//!
//! Payload shapes for each `TaskType`, constructors for well-formed tasks, and the
//! DTOs used by the HTTP task endpoints. Image bytes travel base64-encoded inside
//! the JSON payload.

use super::types::*;

use base64::{Engine as _, engine::general_purpose::STANDARD};
use serde::{Deserialize, Serialize};

pub const ENDPOINT_SUBMIT_TASK: &str = "/task/submit";
pub const ENDPOINT_TASK_STATUS: &str = "/task/status";
pub const ENDPOINT_TASK_RESULT: &str = "/task/result";
pub const ENDPOINT_TASK_CANCEL: &str = "/task/cancel";

#[derive(Debug, Serialize, Deserialize)]
pub struct FeatureExtractionPayload {
    /// Base64-encoded image bytes.
    pub image_data: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct BatchFeatureExtractionPayload {
    pub image_list: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct IndexBuildPayload {
    pub dataset_id: String,
    pub features: Vec<Vec<f32>>,
    pub ids: Vec<i64>,
}

pub fn feature_extraction_task(image: &[u8], priority: i32) -> Task {
    let payload = FeatureExtractionPayload {
        image_data: STANDARD.encode(image),
    };
    Task::new(
        TaskType::FeatureExtraction,
        serde_json::json!(payload),
        priority,
    )
}

pub fn batch_feature_extraction_task(images: &[Vec<u8>], priority: i32) -> Task {
    let payload = BatchFeatureExtractionPayload {
        image_list: images.iter().map(|img| STANDARD.encode(img)).collect(),
    };
    Task::new(
        TaskType::BatchFeatureExtraction,
        serde_json::json!(payload),
        priority,
    )
}

pub fn index_build_task(
    dataset_id: &str,
    features: Vec<Vec<f32>>,
    ids: Vec<i64>,
    priority: i32,
) -> Task {
    let payload = IndexBuildPayload {
        dataset_id: dataset_id.to_string(),
        features,
        ids,
    };
    Task::new(TaskType::IndexBuild, serde_json::json!(payload), priority)
}

/// Decodes one base64 image field, naming the field in the error.
pub fn decode_image(field: &str, data: &str) -> anyhow::Result<Vec<u8>> {
    STANDARD
        .decode(data)
        .map_err(|e| anyhow::anyhow!("invalid base64 in {}: {}", field, e))
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SubmitTaskRequest {
    pub task_type: TaskType,
    pub payload: serde_json::Value,
    /// Falls back to the configured default priority.
    pub priority: Option<i32>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SubmitTaskResponse {
    pub task_id: TaskId,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TaskStatusResponse {
    pub task_id: TaskId,
    pub task_type: TaskType,
    pub status: TaskStatus,
    pub assigned_to: Option<String>,
    pub created_at: u64,
}

impl From<TaskRecord> for TaskStatusResponse {
    fn from(record: TaskRecord) -> Self {
        Self {
            task_id: record.task.task_id,
            task_type: record.task.task_type,
            status: record.status,
            assigned_to: record.assigned_to,
            created_at: record.task.created_at,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CancelTaskResponse {
    pub task_id: TaskId,
    pub cancelled: bool,
}
