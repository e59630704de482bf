//! Ingestion Module Tests
//!
//! ## Test Scopes
//! - **Pipeline**: Images through the real worker pool into a searchable index,
//!   including images whose extraction fails.
//! - **Handler**: Base64 decoding and per-image skipping at the HTTP boundary.

#[cfg(test)]
mod tests {
    use crate::config::Config;
    use crate::context::AppContext;
    use crate::error::ServiceError;
    use crate::executor::protocol::index_build_task;
    use crate::executor::registry::BoxFuture;
    use crate::executor::types::TaskStatus;
    use crate::extract::FeatureExtractor;
    use crate::index::placement::NoAccelerator;
    use crate::ingestion::handlers::handle_ingest_dataset;
    use crate::ingestion::pipeline::ingest_subject;
    use crate::ingestion::types::{EncodedImage, ImageUpload, IngestRequest};
    use crate::progress::ProgressStatus;

    use axum::extract::Path;
    use axum::http::StatusCode;
    use axum::{Extension, Json};
    use base64::{Engine as _, engine::general_purpose::STANDARD};
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::task::JoinHandle;
    use tokio_util::sync::CancellationToken;

    /// Embeds an image as `[byte_len, 1.0]` and refuses anything starting with `bad`.
    struct PickyExtractor;

    impl FeatureExtractor for PickyExtractor {
        fn extract<'a>(&'a self, image: &'a [u8]) -> BoxFuture<'a, anyhow::Result<Vec<f32>>> {
            Box::pin(async move {
                if image.starts_with(b"bad") {
                    anyhow::bail!("unreadable image");
                }
                Ok(vec![image.len() as f32, 1.0])
            })
        }
    }

    fn running_context(dir: &std::path::Path) -> (AppContext, Vec<JoinHandle<()>>) {
        let config = Config {
            index_folder: dir.join("indexes"),
            progress_folder: dir.join("progress"),
            vector_dim: 2,
            similarity_sigma: 1.0,
            worker_count: 2,
            max_retries: 0,
            retry_delay: Duration::from_millis(10),
            pop_timeout: Duration::from_millis(50),
            poll_interval: Duration::from_millis(10),
            extraction_timeout: Duration::from_secs(5),
            ..Config::default()
        };
        let ctx = AppContext::new(config, Arc::new(PickyExtractor), Arc::new(NoAccelerator))
            .unwrap();
        ctx.register_default_processors();
        let workers = ctx.start_workers();
        (ctx, workers)
    }

    async fn stop(ctx: AppContext, workers: Vec<JoinHandle<()>>) {
        ctx.shutdown();
        for worker in workers {
            worker.await.unwrap();
        }
    }

    fn upload(filename: &str, data: &[u8]) -> ImageUpload {
        ImageUpload {
            filename: filename.to_string(),
            data: data.to_vec(),
        }
    }

    // ============================================================
    // PIPELINE TESTS
    // ============================================================

    #[tokio::test]
    async fn test_ingest_indexes_embedded_images() {
        // ARRANGE
        let dir = tempfile::tempdir().unwrap();
        let (ctx, workers) = running_context(dir.path());
        let images = vec![
            upload("a.jpg", b"a"),
            upload("bad.jpg", b"bad bytes"),
            upload("abcd.jpg", b"abcd"),
        ];

        // ACT
        let report = ctx
            .pipeline
            .ingest_dataset("holiday", images, CancellationToken::new())
            .await
            .unwrap();

        // ASSERT: the failing image is skipped, the rest are indexed
        assert_eq!(report.dataset_id, 1);
        assert_eq!(report.indexed, 2);
        assert_eq!(report.skipped, vec!["bad.jpg"]);
        assert_eq!(report.index.ntotal, 2);
        assert_eq!(ctx.datasets.image_ids_in_order(1).unwrap(), vec![1, 2]);

        // The dataset is searchable by its id
        let result = ctx
            .index_service
            .search_index(&[4.0, 1.0], &["1".to_string()], 1)
            .await
            .unwrap();
        assert_eq!(result.ids, vec![2]);

        let progress = ctx.index_service.progress(&ingest_subject(1)).unwrap();
        assert_eq!(progress.status, ProgressStatus::Completed);
        assert_eq!(progress.percent, 100.0);

        stop(ctx, workers).await;
    }

    #[tokio::test]
    async fn test_ingest_fails_when_nothing_embeds() {
        let dir = tempfile::tempdir().unwrap();
        let (ctx, workers) = running_context(dir.path());

        let result = ctx
            .pipeline
            .ingest_dataset(
                "broken",
                vec![upload("bad1.jpg", b"bad"), upload("bad2.jpg", b"badder")],
                CancellationToken::new(),
            )
            .await;

        assert!(matches!(result, Err(ServiceError::EmptyInput(_))));
        let progress = ctx.index_service.progress(&ingest_subject(1)).unwrap();
        assert_eq!(progress.status, ProgressStatus::Failed);
        assert!(!dir.path().join("indexes").join("1.index").exists());

        stop(ctx, workers).await;
    }

    #[tokio::test]
    async fn test_ingest_rejects_empty_batch() {
        let dir = tempfile::tempdir().unwrap();
        let (ctx, workers) = running_context(dir.path());

        let result = ctx
            .pipeline
            .ingest_dataset("empty", Vec::new(), CancellationToken::new())
            .await;

        assert!(matches!(result, Err(ServiceError::EmptyInput(_))));

        stop(ctx, workers).await;
    }

    #[tokio::test]
    async fn test_index_build_task_runs_on_pool() {
        // ARRANGE
        let dir = tempfile::tempdir().unwrap();
        let (ctx, workers) = running_context(dir.path());
        let task = index_build_task(
            "77",
            vec![vec![0.0, 0.0], vec![1.0, 1.0], vec![5.0, 5.0]],
            vec![1, 2, 3],
            0,
        );

        // ACT
        let task_id = ctx.dispatcher.submit(task).await.unwrap();
        let result = ctx
            .dispatcher
            .wait_for_task(&task_id, Duration::from_secs(5))
            .await
            .unwrap();

        // ASSERT
        assert_eq!(result.status, TaskStatus::Completed);
        let summary = result.result.unwrap();
        assert_eq!(summary["dataset_id"], "77");
        assert_eq!(summary["ntotal"], 3);
        assert!(dir.path().join("indexes").join("77.index").exists());

        stop(ctx, workers).await;
    }

    // ============================================================
    // HANDLER TESTS
    // ============================================================

    #[tokio::test]
    async fn test_ingest_handler_skips_undecodable_uploads() {
        // ARRANGE
        let dir = tempfile::tempdir().unwrap();
        let (ctx, workers) = running_context(dir.path());
        let request = IngestRequest {
            images: vec![
                EncodedImage {
                    filename: "ok.jpg".to_string(),
                    image_data: STANDARD.encode(b"xyz"),
                },
                EncodedImage {
                    filename: "mangled.jpg".to_string(),
                    image_data: "%%%".to_string(),
                },
            ],
        };

        // ACT
        let (status, Json(report)) = handle_ingest_dataset(
            Path("web".to_string()),
            Extension(ctx.pipeline.clone()),
            Json(request),
        )
        .await
        .unwrap();

        // ASSERT
        assert_eq!(status, StatusCode::OK);
        assert_eq!(report.indexed, 1);
        assert_eq!(report.skipped, vec!["mangled.jpg"]);

        stop(ctx, workers).await;
    }
}
