//! HTTP contracts of the index endpoints.

use super::service::{IndexSummary, SearchResult};
use crate::progress::ProgressState;

use serde::{Deserialize, Serialize};

pub const ENDPOINT_INDEX_BUILD: &str = "/index/build";
pub const ENDPOINT_INDEX_UPSERT: &str = "/index/upsert";
pub const ENDPOINT_INDEX_DELETE: &str = "/index/delete";
pub const ENDPOINT_INDEX_SEARCH: &str = "/index/search";
pub const ENDPOINT_INDEX_DUPLICATES: &str = "/index/duplicates";
pub const ENDPOINT_INDEX_PROGRESS: &str = "/index/progress";

#[derive(Debug, Serialize, Deserialize)]
pub struct VectorsRequest {
    pub dataset_id: String,
    pub vectors: Vec<Vec<f32>>,
    pub ids: Vec<i64>,
}

pub type BuildIndexResponse = IndexSummary;

#[derive(Debug, Serialize, Deserialize)]
pub struct DeleteRequest {
    pub dataset_id: String,
    pub ids: Vec<i64>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DeleteResponse {
    pub dataset_id: String,
    pub removed: usize,
}

fn default_top_k() -> usize {
    10
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SearchRequest {
    pub query: Vec<f32>,
    pub dataset_ids: Vec<String>,
    #[serde(default = "default_top_k")]
    pub top_k: usize,
}

pub type SearchResponse = SearchResult;

fn default_threshold() -> f32 {
    95.0
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DuplicatesRequest {
    pub dataset_id: String,
    #[serde(default = "default_threshold")]
    pub threshold: f32,
    #[serde(default)]
    pub dedupe: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DuplicatesResponse {
    pub dataset_id: String,
    pub groups: Vec<Vec<i64>>,
    pub deduplicated: bool,
}

pub type ProgressResponse = ProgressState;
