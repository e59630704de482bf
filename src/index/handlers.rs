use super::protocol::*;
use super::service::IndexService;
use crate::error::ServiceError;

use axum::{Extension, Json, extract::Path, http::StatusCode};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

pub async fn handle_build_index(
    Extension(service): Extension<Arc<IndexService>>,
    Json(req): Json<VectorsRequest>,
) -> Result<(StatusCode, Json<BuildIndexResponse>), ServiceError> {
    tracing::info!(
        "Build request for dataset {} ({} vectors)",
        req.dataset_id,
        req.vectors.len()
    );
    let summary = service
        .build_index(&req.dataset_id, req.vectors, req.ids, CancellationToken::new())
        .await?;
    Ok((StatusCode::OK, Json(summary)))
}

pub async fn handle_upsert_index(
    Extension(service): Extension<Arc<IndexService>>,
    Json(req): Json<VectorsRequest>,
) -> Result<(StatusCode, Json<BuildIndexResponse>), ServiceError> {
    let summary = service
        .upsert_index(&req.dataset_id, req.vectors, req.ids)
        .await?;
    Ok((StatusCode::OK, Json(summary)))
}

pub async fn handle_delete_from_index(
    Extension(service): Extension<Arc<IndexService>>,
    Json(req): Json<DeleteRequest>,
) -> Result<(StatusCode, Json<DeleteResponse>), ServiceError> {
    let removed = service.delete_from_index(&req.dataset_id, req.ids).await?;
    Ok((
        StatusCode::OK,
        Json(DeleteResponse {
            dataset_id: req.dataset_id,
            removed,
        }),
    ))
}

pub async fn handle_search_index(
    Extension(service): Extension<Arc<IndexService>>,
    Json(req): Json<SearchRequest>,
) -> Result<(StatusCode, Json<SearchResponse>), ServiceError> {
    let result = service
        .search_index(&req.query, &req.dataset_ids, req.top_k)
        .await?;
    tracing::debug!("Search over {:?} returned {} hits", req.dataset_ids, result.ids.len());
    Ok((StatusCode::OK, Json(result)))
}

pub async fn handle_find_duplicates(
    Extension(service): Extension<Arc<IndexService>>,
    Json(req): Json<DuplicatesRequest>,
) -> Result<(StatusCode, Json<DuplicatesResponse>), ServiceError> {
    let groups = service
        .find_duplicates(&req.dataset_id, req.threshold, req.dedupe, CancellationToken::new())
        .await?;
    Ok((
        StatusCode::OK,
        Json(DuplicatesResponse {
            dataset_id: req.dataset_id,
            groups,
            deduplicated: req.dedupe,
        }),
    ))
}

pub async fn handle_get_progress(
    Extension(service): Extension<Arc<IndexService>>,
    Path(subject): Path<String>,
) -> Result<(StatusCode, Json<ProgressResponse>), ServiceError> {
    let state = service.progress(&subject)?;
    Ok((StatusCode::OK, Json(state)))
}
