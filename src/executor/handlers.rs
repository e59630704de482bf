use super::protocol::*;
use super::queue::TaskDispatcher;
use super::types::*;
use crate::error::ServiceError;

use axum::{Extension, Json, extract::Path, http::StatusCode};
use std::sync::Arc;

pub async fn handle_submit_task(
    Extension(dispatcher): Extension<Arc<TaskDispatcher>>,
    Json(req): Json<SubmitTaskRequest>,
) -> Result<(StatusCode, Json<SubmitTaskResponse>), ServiceError> {
    let task_id = dispatcher
        .submit_task(req.task_type, req.payload, req.priority)
        .await?;

    tracing::info!("Task submitted successfully: {}", task_id);
    Ok((StatusCode::OK, Json(SubmitTaskResponse { task_id })))
}

pub async fn handle_get_task_status(
    Extension(dispatcher): Extension<Arc<TaskDispatcher>>,
    Path(task_id_str): Path<String>,
) -> Result<(StatusCode, Json<TaskStatusResponse>), ServiceError> {
    let task_id = TaskId(task_id_str);

    match dispatcher.status(&task_id) {
        Some(record) => {
            tracing::debug!("Task status query: {} -> {:?}", task_id, record.status);
            Ok((StatusCode::OK, Json(record.into())))
        }
        None => Err(ServiceError::NotFound(format!("task {}", task_id))),
    }
}

/// Returns the published result. A known task without one yet answers `202 Accepted`.
pub async fn handle_get_task_result(
    Extension(dispatcher): Extension<Arc<TaskDispatcher>>,
    Path(task_id_str): Path<String>,
) -> Result<(StatusCode, Json<Option<TaskResult>>), ServiceError> {
    let task_id = TaskId(task_id_str);

    if let Some(result) = dispatcher.result(&task_id) {
        return Ok((StatusCode::OK, Json(Some(result))));
    }

    match dispatcher.status(&task_id) {
        Some(_) => Ok((StatusCode::ACCEPTED, Json(None))),
        None => Err(ServiceError::NotFound(format!("task {}", task_id))),
    }
}

pub async fn handle_cancel_task(
    Extension(dispatcher): Extension<Arc<TaskDispatcher>>,
    Path(task_id_str): Path<String>,
) -> Result<(StatusCode, Json<CancelTaskResponse>), ServiceError> {
    let task_id = TaskId(task_id_str);

    if dispatcher.status(&task_id).is_none() {
        return Err(ServiceError::NotFound(format!("task {}", task_id)));
    }

    let cancelled = dispatcher.cancel(&task_id).await;
    Ok((StatusCode::OK, Json(CancelTaskResponse { task_id, cancelled })))
}
