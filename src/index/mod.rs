//! Vector Index Module
//!
//! One IVF index per dataset, persisted as `{index_folder}/{dataset_id}.index`.
//!
//! ## Submodules
//! - **`ivf`**: The ID-mapped IVF-Flat structure (L2) with train/add/remove/search.
//! - **`kmeans`**: Coarse quantizer training.
//! - **`manager`**: Build, save, load, search, upsert and delete with auto-tuned parameters.
//! - **`placement`**: Best-effort accelerator placement with CPU fallback.
//! - **`service`**: Dataset-level operations used by the HTTP layer and task processors.
//! - **`handlers`** / **`protocol`**: The `/index/*` HTTP endpoints.

pub mod handlers;
pub mod ivf;
pub mod kmeans;
pub mod manager;
pub mod placement;
pub mod protocol;
pub mod service;
pub mod similarity;
pub mod types;

pub use manager::IndexManager;
pub use service::IndexService;
pub use types::{IndexHandle, IndexState, IvfParams, SearchHits};
