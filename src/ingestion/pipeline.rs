//! Dataset Ingestion Pipeline
//!
//! Embeds a batch of images on the worker pool and indexes the results:
//!
//! 1. Resolve (or create) the dataset.
//! 2. Submit one `feature_extraction` task per image.
//! 3. Wait for each result with a bounded timeout; failures and timeouts skip the image.
//! 4. Register every embedded image in the `DatasetStore`.
//! 5. Build the dataset's index from the collected vectors.
//!
//! Progress is reported under `{dataset_id}_ingest`: 0% on start, 10% once all tasks
//! are queued, 10-70% while results arrive, 70% before the build and 100% at the end.

use super::types::{ImageUpload, IngestReport};
use crate::dataset::DatasetStore;
use crate::error::{Result, ServiceError};
use crate::executor::protocol::feature_extraction_task;
use crate::executor::queue::TaskDispatcher;
use crate::executor::types::{TaskId, TaskStatus};
use crate::index::service::IndexService;
use crate::progress::ProgressNotifier;

use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub fn ingest_subject(dataset_id: i64) -> String {
    format!("{}_ingest", dataset_id)
}

pub struct IndexPipeline {
    dispatcher: Arc<TaskDispatcher>,
    service: Arc<IndexService>,
    datasets: Arc<dyn DatasetStore>,
    notifier: ProgressNotifier,
    extraction_timeout: Duration,
    priority: i32,
}

impl IndexPipeline {
    pub fn new(
        dispatcher: Arc<TaskDispatcher>,
        service: Arc<IndexService>,
        extraction_timeout: Duration,
        priority: i32,
    ) -> Arc<Self> {
        Arc::new(Self {
            datasets: service.datasets().clone(),
            notifier: service.notifier().clone(),
            dispatcher,
            service,
            extraction_timeout,
            priority,
        })
    }

    pub async fn ingest_dataset(
        &self,
        name: &str,
        images: Vec<ImageUpload>,
        cancel: CancellationToken,
    ) -> Result<IngestReport> {
        let dataset_id = self.datasets.get_or_create(name)?;
        let subject = ingest_subject(dataset_id);

        let outcome = self.run(dataset_id, &subject, images, cancel).await;
        match &outcome {
            Ok(report) => self.notifier.complete(
                &subject,
                true,
                &format!("indexed {} images", report.indexed),
            ),
            Err(e) => self.notifier.complete(&subject, false, &e.to_string()),
        }
        outcome
    }

    async fn run(
        &self,
        dataset_id: i64,
        subject: &str,
        images: Vec<ImageUpload>,
        cancel: CancellationToken,
    ) -> Result<IngestReport> {
        if images.is_empty() {
            return Err(ServiceError::EmptyInput(format!(
                "no images for dataset {}",
                dataset_id
            )));
        }
        self.notifier.notify(subject, 0.0, "submitting extraction tasks");

        let mut submitted: Vec<(String, TaskId)> = Vec::with_capacity(images.len());
        for image in images {
            let task = feature_extraction_task(&image.data, self.priority);
            let task_id = self.dispatcher.submit(task).await?;
            submitted.push((image.filename, task_id));
        }
        self.notifier.notify(
            subject,
            10.0,
            &format!("queued {} extraction tasks", submitted.len()),
        );

        let total = submitted.len();
        let mut vectors = Vec::with_capacity(total);
        let mut ids = Vec::with_capacity(total);
        let mut skipped = Vec::new();

        for (done, (filename, task_id)) in submitted.into_iter().enumerate() {
            if cancel.is_cancelled() {
                return Err(ServiceError::Cancelled(format!("ingest of dataset {}", dataset_id)));
            }

            match self.collect_vector(&task_id).await {
                Ok(vector) => {
                    let image_id = self.datasets.add_image(dataset_id, &filename)?;
                    vectors.push(vector);
                    ids.push(image_id);
                }
                Err(reason) => {
                    tracing::warn!("Skipping image {}: {}", filename, reason);
                    skipped.push(filename);
                }
            }

            let percent = 10.0 + 60.0 * (done + 1) as f32 / total as f32;
            self.notifier.notify(
                subject,
                percent,
                &format!("extracted {}/{} images", done + 1, total),
            );
        }

        if vectors.is_empty() {
            return Err(ServiceError::EmptyInput(format!(
                "none of the {} images could be embedded",
                total
            )));
        }

        self.notifier.notify(subject, 70.0, "building index");
        let index = self
            .service
            .build_index(&dataset_id.to_string(), vectors, ids, cancel)
            .await?;

        self.notifier.notify(subject, 100.0, "index saved");
        tracing::info!(
            "Ingested dataset {}: {} indexed, {} skipped",
            dataset_id,
            index.ntotal,
            skipped.len()
        );

        Ok(IngestReport {
            dataset_id,
            indexed: index.ntotal,
            skipped,
            index,
        })
    }

    /// Waits for one extraction task and decodes its vector.
    async fn collect_vector(&self, task_id: &TaskId) -> Result<Vec<f32>> {
        let result = self
            .dispatcher
            .wait_for_task(task_id, self.extraction_timeout)
            .await
            .ok_or_else(|| ServiceError::TaskTimeout(format!("extraction task {}", task_id)))?;

        if result.status != TaskStatus::Completed {
            return Err(ServiceError::Processing(
                result
                    .error
                    .unwrap_or_else(|| format!("task {} failed", task_id)),
            ));
        }

        let value = result
            .result
            .ok_or_else(|| ServiceError::Processing(format!("task {} has no result", task_id)))?;
        serde_json::from_value(value)
            .map_err(|e| ServiceError::Processing(format!("malformed vector: {}", e)))
    }
}
