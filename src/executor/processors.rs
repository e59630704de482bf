//! Built-in processors.
//!
//! - **`FeatureExtractionProcessor`**: single and batch image embedding through a
//!   `FeatureExtractor`.
//! - **`IndexBuildProcessor`**: runs `IndexService::build_index` on the worker pool.

use super::protocol::*;
use super::registry::{BoxFuture, Processor};
use super::types::*;
use crate::extract::FeatureExtractor;
use crate::index::service::IndexService;

use anyhow::{Context, Result};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

pub struct FeatureExtractionProcessor {
    extractor: Arc<dyn FeatureExtractor>,
}

impl FeatureExtractionProcessor {
    pub fn new(extractor: Arc<dyn FeatureExtractor>) -> Self {
        Self { extractor }
    }

    async fn run(&self, task: &Task) -> Result<serde_json::Value> {
        match task.task_type {
            TaskType::FeatureExtraction => {
                let payload: FeatureExtractionPayload = serde_json::from_value(task.payload.clone())
                    .context("invalid feature_extraction payload")?;
                let image = decode_image("image_data", &payload.image_data)?;

                let vector = self.extractor.extract(&image).await?;
                tracing::debug!("Extracted {}-d vector for task {}", vector.len(), task.task_id);
                Ok(serde_json::to_value(vector)?)
            }
            TaskType::BatchFeatureExtraction => {
                let payload: BatchFeatureExtractionPayload =
                    serde_json::from_value(task.payload.clone())
                        .context("invalid batch_feature_extraction payload")?;
                let images = payload
                    .image_list
                    .iter()
                    .enumerate()
                    .map(|(i, data)| decode_image(&format!("image_list[{}]", i), data))
                    .collect::<Result<Vec<_>>>()?;

                let vectors = self.extractor.extract_batch(&images).await?;
                tracing::debug!(
                    "Extracted {} vectors for batch task {}",
                    vectors.len(),
                    task.task_id
                );
                Ok(serde_json::to_value(vectors)?)
            }
            other => Err(anyhow::anyhow!("feature extractor cannot handle {}", other)),
        }
    }
}

impl Processor for FeatureExtractionProcessor {
    fn name(&self) -> &str {
        "feature_extraction"
    }

    fn can_handle(&self, task_type: TaskType) -> bool {
        matches!(
            task_type,
            TaskType::FeatureExtraction | TaskType::BatchFeatureExtraction
        )
    }

    fn process<'a>(&'a self, task: &'a Task) -> BoxFuture<'a, Result<serde_json::Value>> {
        Box::pin(self.run(task))
    }
}

pub struct IndexBuildProcessor {
    service: Arc<IndexService>,
    shutdown: CancellationToken,
}

impl IndexBuildProcessor {
    /// Builds started by this processor are cancelled when `shutdown` fires.
    pub fn new(service: Arc<IndexService>, shutdown: CancellationToken) -> Self {
        Self { service, shutdown }
    }

    async fn run(&self, task: &Task) -> Result<serde_json::Value> {
        let payload: IndexBuildPayload = serde_json::from_value(task.payload.clone())
            .context("invalid index_build payload")?;

        let summary = self
            .service
            .build_index(
                &payload.dataset_id,
                payload.features,
                payload.ids,
                self.shutdown.child_token(),
            )
            .await?;
        Ok(serde_json::to_value(summary)?)
    }
}

impl Processor for IndexBuildProcessor {
    fn name(&self) -> &str {
        "index_build"
    }

    fn can_handle(&self, task_type: TaskType) -> bool {
        task_type == TaskType::IndexBuild
    }

    fn process<'a>(&'a self, task: &'a Task) -> BoxFuture<'a, Result<serde_json::Value>> {
        Box::pin(self.run(task))
    }
}
