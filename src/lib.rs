//! Image Similarity Cluster Library
//!
//! Per-dataset approximate nearest-neighbour indexes over image embeddings, a
//! priority task pool that produces those embeddings, and near-duplicate detection.
//! The binary (`main.rs`) wires everything behind an HTTP API.
//!
//! ## Architecture Modules
//! - **`executor`**: The task dispatcher and worker pool. Priority scheduling,
//!   lease-guarded at-most-once execution, retries and result publishing.
//! - **`index`**: IVF index lifecycle (build, save, load, search, upsert, delete)
//!   and the dataset-level `IndexService`.
//! - **`dedup`**: Threshold-based duplicate grouping and pruning.
//! - **`progress`**: Observers for long-running operations (memory and file backed).
//! - **`ingestion`**: Images in, searchable dataset out.
//! - **`storage`**: TTL key-value store for task state and the lease manager.
//! - **`extract`** / **`dataset`**: Boundaries to the embedding model and the
//!   dataset metadata store.

pub mod config;
pub mod context;
pub mod dataset;
pub mod dedup;
pub mod error;
pub mod executor;
pub mod extract;
pub mod index;
pub mod ingestion;
pub mod progress;
pub mod storage;
