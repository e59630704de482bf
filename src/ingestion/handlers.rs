use super::pipeline::IndexPipeline;
use super::types::{ImageUpload, IngestReport, IngestRequest};
use crate::error::ServiceError;
use crate::executor::protocol::decode_image;

use axum::extract::Path;
use axum::http::StatusCode;
use axum::{Extension, Json};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

pub async fn handle_ingest_dataset(
    Path(name): Path<String>,
    Extension(pipeline): Extension<Arc<IndexPipeline>>,
    Json(req): Json<IngestRequest>,
) -> Result<(StatusCode, Json<IngestReport>), ServiceError> {
    let mut images = Vec::with_capacity(req.images.len());
    let mut unreadable = Vec::new();

    for image in req.images {
        match decode_image(&image.filename, &image.image_data) {
            Ok(data) => images.push(ImageUpload {
                filename: image.filename,
                data,
            }),
            Err(e) => {
                tracing::warn!("Skipping upload {}: {}", image.filename, e);
                unreadable.push(image.filename);
            }
        }
    }

    tracing::info!("Ingesting {} images into dataset '{}'", images.len(), name);
    let mut report = pipeline
        .ingest_dataset(&name, images, CancellationToken::new())
        .await?;
    report.skipped.extend(unreadable);

    Ok((StatusCode::OK, Json(report)))
}
