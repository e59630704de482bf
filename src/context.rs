//! Application wiring.
//!
//! `AppContext` owns one instance of every component, built from a single `Config`
//! and shared through `Arc`s. Both `main` and the integration tests construct the
//! system through it.

use crate::config::Config;
use crate::dataset::{DatasetStore, InMemoryDatasetStore};
use crate::dedup::{DetectorConfig, DuplicateDetector, GroupingMode};
use crate::error::Result;
use crate::executor::executor::{WorkerConfig, WorkerPool};
use crate::executor::handlers::{
    handle_cancel_task, handle_get_task_result, handle_get_task_status, handle_submit_task,
};
use crate::executor::processors::{FeatureExtractionProcessor, IndexBuildProcessor};
use crate::executor::protocol::{
    ENDPOINT_SUBMIT_TASK, ENDPOINT_TASK_CANCEL, ENDPOINT_TASK_RESULT, ENDPOINT_TASK_STATUS,
};
use crate::executor::queue::TaskDispatcher;
use crate::executor::registry::ProcessorRegistry;
use crate::extract::FeatureExtractor;
use crate::index::handlers::{
    handle_build_index, handle_delete_from_index, handle_find_duplicates, handle_get_progress,
    handle_search_index, handle_upsert_index,
};
use crate::index::manager::IndexManager;
use crate::index::placement::Accelerator;
use crate::index::protocol::{
    ENDPOINT_INDEX_BUILD, ENDPOINT_INDEX_DELETE, ENDPOINT_INDEX_DUPLICATES, ENDPOINT_INDEX_PROGRESS,
    ENDPOINT_INDEX_SEARCH, ENDPOINT_INDEX_UPSERT,
};
use crate::index::service::IndexService;
use crate::ingestion::handlers::handle_ingest_dataset;
use crate::ingestion::pipeline::IndexPipeline;
use crate::progress::file::FileProgressObserver;
use crate::progress::{ProgressNotifier, ProgressTracker};
use crate::storage::lease::LockManager;
use crate::storage::results::ResultStore;

use axum::{
    Router,
    extract::Extension,
    routing::{get, post},
};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub struct AppContext {
    pub config: Arc<Config>,
    pub store: Arc<ResultStore>,
    pub locks: Arc<LockManager>,
    pub dispatcher: Arc<TaskDispatcher>,
    pub registry: Arc<ProcessorRegistry>,
    pub pool: Arc<WorkerPool>,
    pub tracker: Arc<ProgressTracker>,
    pub datasets: Arc<dyn DatasetStore>,
    pub index_service: Arc<IndexService>,
    pub pipeline: Arc<IndexPipeline>,
    pub extractor: Arc<dyn FeatureExtractor>,
    shutdown: CancellationToken,
}

impl AppContext {
    pub fn new(
        config: Config,
        extractor: Arc<dyn FeatureExtractor>,
        accelerator: Arc<dyn Accelerator>,
    ) -> Result<Self> {
        Self::with_grouping(config, extractor, accelerator, GroupingMode::default())
    }

    pub fn with_grouping(
        config: Config,
        extractor: Arc<dyn FeatureExtractor>,
        accelerator: Arc<dyn Accelerator>,
        grouping: GroupingMode,
    ) -> Result<Self> {
        config.validate()?;
        let config = Arc::new(config);

        let store = Arc::new(ResultStore::new(config.task_ttl));
        let locks = LockManager::new();
        let dispatcher =
            TaskDispatcher::new(store.clone(), config.default_priority, config.poll_interval);
        let registry = ProcessorRegistry::new();
        let pool = WorkerPool::new(
            dispatcher.clone(),
            locks.clone(),
            registry.clone(),
            WorkerConfig::from(config.as_ref()),
        );

        let tracker = Arc::new(ProgressTracker::new());
        let notifier = ProgressNotifier::new()
            .with_observer(tracker.clone())
            .with_observer(Arc::new(FileProgressObserver::new(
                config.progress_folder.clone(),
            )));

        let manager = Arc::new(IndexManager::new(config.vector_dim, accelerator));
        let detector = Arc::new(DuplicateDetector::new(
            manager.clone(),
            DetectorConfig {
                sigma: config.similarity_sigma,
                mode: grouping,
                ..DetectorConfig::default()
            },
        ));
        let datasets: Arc<dyn DatasetStore> = Arc::new(InMemoryDatasetStore::new());

        let index_service = IndexService::new(
            config.clone(),
            manager,
            detector,
            locks.clone(),
            datasets.clone(),
            tracker.clone(),
            notifier,
        );
        let pipeline = IndexPipeline::new(
            dispatcher.clone(),
            index_service.clone(),
            config.extraction_timeout,
            config.default_priority,
        );

        Ok(Self {
            config,
            store,
            locks,
            dispatcher,
            registry,
            pool,
            tracker,
            datasets,
            index_service,
            pipeline,
            extractor,
            shutdown: CancellationToken::new(),
        })
    }

    /// Registers the extraction and index-build processors.
    pub fn register_default_processors(&self) {
        self.registry
            .register(Arc::new(FeatureExtractionProcessor::new(self.extractor.clone())));
        self.registry.register(Arc::new(IndexBuildProcessor::new(
            self.index_service.clone(),
            self.shutdown.child_token(),
        )));
    }

    pub fn start_workers(&self) -> Vec<JoinHandle<()>> {
        self.pool.start()
    }

    /// Stops the workers and cancels in-flight builds started by processors.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
        self.pool.shutdown();
    }

    /// Drops expired task records, results, cancellation flags and leases.
    pub fn purge_expired(&self) -> usize {
        self.store.purge_expired() + self.locks.purge_expired()
    }

    pub fn router(&self) -> Router {
        Router::new()
            .route(ENDPOINT_SUBMIT_TASK, post(handle_submit_task))
            .route(&format!("{}/:id", ENDPOINT_TASK_STATUS), get(handle_get_task_status))
            .route(&format!("{}/:id", ENDPOINT_TASK_RESULT), get(handle_get_task_result))
            .route(&format!("{}/:id", ENDPOINT_TASK_CANCEL), post(handle_cancel_task))
            .route(ENDPOINT_INDEX_BUILD, post(handle_build_index))
            .route(ENDPOINT_INDEX_UPSERT, post(handle_upsert_index))
            .route(ENDPOINT_INDEX_DELETE, post(handle_delete_from_index))
            .route(ENDPOINT_INDEX_SEARCH, post(handle_search_index))
            .route(ENDPOINT_INDEX_DUPLICATES, post(handle_find_duplicates))
            .route(
                &format!("{}/:subject", ENDPOINT_INDEX_PROGRESS),
                get(handle_get_progress),
            )
            .route("/dataset/:name/ingest", post(handle_ingest_dataset))
            .layer(Extension(self.dispatcher.clone()))
            .layer(Extension(self.index_service.clone()))
            .layer(Extension(self.pipeline.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ServiceError;
    use crate::executor::registry::BoxFuture;
    use crate::index::placement::NoAccelerator;

    struct ZeroExtractor;

    impl FeatureExtractor for ZeroExtractor {
        fn extract<'a>(&'a self, _image: &'a [u8]) -> BoxFuture<'a, anyhow::Result<Vec<f32>>> {
            Box::pin(async { Ok::<_, anyhow::Error>(vec![0.0; 8]) })
        }
    }

    fn config(dir: &std::path::Path) -> Config {
        Config {
            index_folder: dir.join("indexes"),
            progress_folder: dir.join("progress"),
            vector_dim: 8,
            ..Config::default()
        }
    }

    #[tokio::test]
    async fn test_context_wires_processors_and_routes() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = AppContext::new(
            config(dir.path()),
            Arc::new(ZeroExtractor),
            Arc::new(NoAccelerator),
        )
        .unwrap();

        ctx.register_default_processors();
        let _router = ctx.router();

        assert_eq!(
            ctx.registry.list_processors(),
            vec!["feature_extraction", "index_build"]
        );
        assert_eq!(ctx.purge_expired(), 0);
    }

    #[test]
    fn test_context_rejects_invalid_config() {
        let dir = tempfile::tempdir().unwrap();
        let mut bad = config(dir.path());
        bad.similarity_sigma = 0.0;

        let result = AppContext::new(bad, Arc::new(ZeroExtractor), Arc::new(NoAccelerator));

        assert!(matches!(result, Err(ServiceError::Configuration(_))));
    }
}
