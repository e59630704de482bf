//! Ingestion Data Types

use crate::index::service::IndexSummary;

use serde::{Deserialize, Serialize};

/// One raw image handed to the pipeline.
#[derive(Debug, Clone)]
pub struct ImageUpload {
    pub filename: String,
    pub data: Vec<u8>,
}

/// An image as it arrives over HTTP, bytes base64-encoded.
#[derive(Debug, Serialize, Deserialize)]
pub struct EncodedImage {
    pub filename: String,
    pub image_data: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct IngestRequest {
    pub images: Vec<EncodedImage>,
}

/// Outcome of ingesting a dataset.
///
/// Images that could not be decoded or embedded in time are listed in `skipped`
/// and are not part of the index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestReport {
    pub dataset_id: i64,
    pub indexed: usize,
    pub skipped: Vec<String>,
    pub index: IndexSummary,
}
