//! Index Service
//!
//! The operations the API layer calls. Writers of a dataset (`build`, `upsert`,
//! `delete`, dedupe) are serialized by the `dataset:{id}` lease and publish a new
//! snapshot only after it is safely on disk. Readers clone the current `Arc`
//! snapshot and never take the lease.

use super::manager::IndexManager;
use super::similarity::distance_to_similarity_percent;
use super::types::{IndexHandle, IndexState};
use crate::config::Config;
use crate::dataset::DatasetStore;
use crate::dedup::DuplicateDetector;
use crate::error::{Result, ServiceError};
use crate::progress::file::read_progress_file;
use crate::progress::{ProgressNotifier, ProgressState, ProgressTracker};
use crate::storage::lease::{LeaseGuard, LockManager, dataset_lease_key};

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexSummary {
    pub dataset_id: String,
    pub ntotal: usize,
    pub nlist: usize,
    pub nprobe: usize,
    pub state: IndexState,
}

impl IndexSummary {
    fn of(dataset_id: &str, handle: &IndexHandle) -> Self {
        Self {
            dataset_id: dataset_id.to_string(),
            ntotal: handle.ntotal(),
            nlist: handle.index.nlist(),
            nprobe: handle.index.nprobe(),
            state: handle.state,
        }
    }
}

/// Merged hits across datasets, most similar first.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    pub ids: Vec<i64>,
    /// Percent, parallel to `ids`.
    pub similarities: Vec<f32>,
}

pub struct IndexService {
    config: Arc<Config>,
    manager: Arc<IndexManager>,
    detector: Arc<DuplicateDetector>,
    locks: Arc<LockManager>,
    datasets: Arc<dyn DatasetStore>,
    tracker: Arc<ProgressTracker>,
    notifier: ProgressNotifier,
    snapshots: DashMap<String, Arc<IndexHandle>>,
    owner: String,
}

impl IndexService {
    pub fn new(
        config: Arc<Config>,
        manager: Arc<IndexManager>,
        detector: Arc<DuplicateDetector>,
        locks: Arc<LockManager>,
        datasets: Arc<dyn DatasetStore>,
        tracker: Arc<ProgressTracker>,
        notifier: ProgressNotifier,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            manager,
            detector,
            locks,
            datasets,
            tracker,
            notifier,
            snapshots: DashMap::new(),
            owner: format!("index-service-{}", uuid::Uuid::new_v4().simple()),
        })
    }

    pub fn manager(&self) -> &Arc<IndexManager> {
        &self.manager
    }

    pub fn datasets(&self) -> &Arc<dyn DatasetStore> {
        &self.datasets
    }

    pub fn notifier(&self) -> &ProgressNotifier {
        &self.notifier
    }

    /// The in-memory snapshot for a dataset, if one has been built or loaded.
    pub fn snapshot(&self, dataset_id: &str) -> Option<Arc<IndexHandle>> {
        self.snapshots.get(dataset_id).map(|entry| entry.clone())
    }

    /// Current snapshot, loading it from disk on first use.
    pub async fn handle(&self, dataset_id: &str) -> Result<Arc<IndexHandle>> {
        if let Some(handle) = self.snapshot(dataset_id) {
            return Ok(handle);
        }
        check_path_component("dataset id", dataset_id)?;

        let manager = self.manager.clone();
        let path = self.config.index_path(dataset_id);
        let handle = Arc::new(blocking(move || manager.load(&path)).await?);

        // Another reader may have loaded it concurrently; keep whichever landed first.
        let entry = self
            .snapshots
            .entry(dataset_id.to_string())
            .or_insert(handle);
        Ok(entry.clone())
    }

    /// Takes the dataset's writer lease and keeps it renewed until dropped.
    async fn write_lease(&self, dataset_id: &str) -> Result<LeaseGuard> {
        check_path_component("dataset id", dataset_id)?;
        let owner = format!("{}-{}", self.owner, uuid::Uuid::new_v4().simple());
        let ttl = self.config.dataset_lease_ttl;
        let guard = self
            .locks
            .acquire_with_wait(
                &dataset_lease_key(dataset_id),
                &owner,
                ttl,
                self.config.dataset_lease_wait,
            )
            .await?;
        Ok(guard.renewing(ttl, (ttl / 3).max(Duration::from_millis(1))))
    }

    /// Saves `handle` and only then makes it the live snapshot.
    async fn publish(&self, dataset_id: &str, handle: IndexHandle) -> Result<Arc<IndexHandle>> {
        let manager = self.manager.clone();
        let path = self.config.index_path(dataset_id);
        let handle = blocking(move || manager.save(&handle, &path).map(|_| handle)).await?;

        let handle = Arc::new(handle);
        self.snapshots
            .insert(dataset_id.to_string(), handle.clone());
        Ok(handle)
    }

    fn finish<T>(&self, subject: &str, outcome: &Result<T>, success_message: &str) {
        match outcome {
            Ok(_) => self.notifier.complete(subject, true, success_message),
            Err(e) => {
                tracing::warn!("Operation on '{}' failed: {}", subject, e);
                self.notifier.complete(subject, false, &e.to_string());
            }
        }
    }

    /// Builds a fresh index for the dataset, replacing any previous one.
    pub async fn build_index(
        &self,
        dataset_id: &str,
        vectors: Vec<Vec<f32>>,
        ids: Vec<i64>,
        cancel: CancellationToken,
    ) -> Result<IndexSummary> {
        check_path_component("dataset id", dataset_id)?;
        let outcome = self.build_inner(dataset_id, vectors, ids, cancel).await;
        self.finish(dataset_id, &outcome, "index built");
        outcome
    }

    async fn build_inner(
        &self,
        dataset_id: &str,
        vectors: Vec<Vec<f32>>,
        ids: Vec<i64>,
        cancel: CancellationToken,
    ) -> Result<IndexSummary> {
        let _lease = self.write_lease(dataset_id).await?;

        let manager = self.manager.clone();
        let notifier = self.notifier.clone();
        let subject = dataset_id.to_string();
        let handle = blocking(move || {
            manager.build_observed(&vectors, &ids, &notifier, &subject, &cancel)
        })
        .await?;

        let handle = self.publish(dataset_id, handle).await?;
        tracing::info!(
            "Built index for dataset {} with {} vectors",
            dataset_id,
            handle.ntotal()
        );
        Ok(IndexSummary::of(dataset_id, &handle))
    }

    /// Adds or replaces vectors. A dataset without an index gets one built.
    pub async fn upsert_index(
        &self,
        dataset_id: &str,
        vectors: Vec<Vec<f32>>,
        ids: Vec<i64>,
    ) -> Result<IndexSummary> {
        let lease = self.write_lease(dataset_id).await?;

        let current = match self.handle(dataset_id).await {
            Ok(handle) => handle,
            Err(ServiceError::NotFound(_)) => {
                drop(lease);
                tracing::info!("No index for dataset {} yet, building one", dataset_id);
                return self
                    .build_index(dataset_id, vectors, ids, CancellationToken::new())
                    .await;
            }
            Err(e) => return Err(e),
        };

        let manager = self.manager.clone();
        let mut updated = (*current).clone();
        let updated = blocking(move || manager.upsert(&mut updated, &vectors, &ids).map(|_| updated))
            .await?;

        let handle = self.publish(dataset_id, updated).await?;
        Ok(IndexSummary::of(dataset_id, &handle))
    }

    /// Removes ids from the dataset's index. Returns how many were present.
    pub async fn delete_from_index(&self, dataset_id: &str, ids: Vec<i64>) -> Result<usize> {
        let _lease = self.write_lease(dataset_id).await?;

        let current = self.handle(dataset_id).await?;
        let manager = self.manager.clone();
        let mut updated = (*current).clone();
        let (updated, removed) =
            blocking(move || manager.delete(&mut updated, &ids).map(|n| (updated, n))).await?;

        if removed > 0 {
            self.publish(dataset_id, updated).await?;
        }
        Ok(removed)
    }

    /// Global `top_k` over several datasets, converted to similarity percentages.
    ///
    /// Datasets without an index are skipped; if none of them has one the call
    /// fails with `NotFound`.
    pub async fn search_index(
        &self,
        query: &[f32],
        dataset_ids: &[String],
        top_k: usize,
    ) -> Result<SearchResult> {
        if dataset_ids.is_empty() {
            return Err(ServiceError::EmptyInput("no datasets to search".to_string()));
        }

        let mut merged: Vec<(f32, i64)> = Vec::new();
        let mut searched = 0usize;

        for dataset_id in dataset_ids {
            let handle = match self.handle(dataset_id).await {
                Ok(handle) => handle,
                Err(ServiceError::NotFound(_)) => {
                    tracing::warn!("Index for dataset {} not found, skipping", dataset_id);
                    continue;
                }
                Err(e) => return Err(e),
            };
            searched += 1;

            let hits = self.manager.search(&handle, query, top_k)?;
            merged.extend(hits.distances.into_iter().zip(hits.ids));
        }

        if searched == 0 {
            return Err(ServiceError::NotFound(format!(
                "no index for datasets {:?}",
                dataset_ids
            )));
        }

        merged.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));
        merged.truncate(top_k);

        let sigma = self.config.similarity_sigma;
        let (ids, similarities): (Vec<i64>, Vec<f32>) = merged
            .into_iter()
            .map(|(d, id)| (id, distance_to_similarity_percent(d, sigma)))
            .unzip();
        Ok(SearchResult { ids, similarities })
    }

    /// Near-duplicate groups of a dataset. With `dedupe`, every group is pruned to
    /// its smallest id and the index is saved.
    pub async fn find_duplicates(
        &self,
        dataset_id: &str,
        threshold: f32,
        dedupe: bool,
        cancel: CancellationToken,
    ) -> Result<Vec<Vec<i64>>> {
        check_path_component("dataset id", dataset_id)?;
        let subject = duplicates_subject(dataset_id);
        let outcome = self
            .find_duplicates_inner(dataset_id, &subject, threshold, dedupe, cancel)
            .await;
        let message = match &outcome {
            Ok(groups) => format!("{} duplicate groups", groups.len()),
            Err(_) => String::new(),
        };
        self.finish(&subject, &outcome, &message);
        outcome
    }

    async fn find_duplicates_inner(
        &self,
        dataset_id: &str,
        subject: &str,
        threshold: f32,
        dedupe: bool,
        cancel: CancellationToken,
    ) -> Result<Vec<Vec<i64>>> {
        // Pruning must act on the same snapshot that was scanned.
        let lease = if dedupe {
            Some(self.write_lease(dataset_id).await?)
        } else {
            None
        };

        let handle = self.handle(dataset_id).await?;
        let pairs = self.dataset_vectors(dataset_id, &handle);

        let detector = self.detector.clone();
        let notifier = self.notifier.clone();
        let scan_subject = subject.to_string();
        let scanned = handle.clone();
        let groups = blocking(move || {
            detector.find_groups(&scanned, &pairs, threshold, &notifier, &scan_subject, &cancel)
        })
        .await?;

        if dedupe && !groups.is_empty() {
            let detector = self.detector.clone();
            let mut updated = (*handle).clone();
            let prune = groups.clone();
            let (updated, removed) = blocking(move || {
                detector
                    .apply_dedupe(&mut updated, &prune)
                    .map(|removed| (updated, removed))
            })
            .await?;

            if !removed.is_empty() {
                self.publish(dataset_id, updated).await?;
                self.forget_images(dataset_id, &removed);
            }
            tracing::info!(
                "Deduplicated dataset {}: removed {:?}",
                dataset_id,
                removed
            );
        }

        drop(lease);
        Ok(groups)
    }

    /// Drops pruned ids from the dataset store, when the dataset is one it knows.
    fn forget_images(&self, dataset_id: &str, removed: &[i64]) {
        let Ok(id) = dataset_id.parse::<i64>() else {
            return;
        };
        match self.datasets.remove_images(id, removed) {
            Ok(count) => tracing::debug!("Removed {} images from dataset {}", count, dataset_id),
            Err(ServiceError::NotFound(_)) => {}
            Err(e) => tracing::warn!("Failed to remove images from dataset {}: {}", dataset_id, e),
        }
    }

    /// `(id, vector)` rows of the index, in the dataset's image order when known.
    fn dataset_vectors(&self, dataset_id: &str, handle: &IndexHandle) -> Vec<(i64, Vec<f32>)> {
        let order = dataset_id
            .parse::<i64>()
            .ok()
            .and_then(|id| self.datasets.image_ids_in_order(id).ok())
            .filter(|ids| !ids.is_empty());

        let Some(order) = order else {
            return handle.index.entries();
        };

        order
            .into_iter()
            .filter_map(|id| match handle.index.reconstruct(id) {
                Some(vector) => Some((id, vector)),
                None => {
                    tracing::warn!("No vector for image {} in dataset {}, skipping", id, dataset_id);
                    None
                }
            })
            .collect()
    }

    /// Latest progress of `subject`, from memory or its progress file.
    pub fn progress(&self, subject: &str) -> Result<ProgressState> {
        if let Some(state) = self.tracker.get(subject) {
            return Ok(state);
        }
        check_path_component("progress subject", subject)?;
        Ok(read_progress_file(
            subject,
            &self.config.progress_path(subject),
        )?)
    }
}

/// Progress subject used by duplicate scans of `dataset_id`.
pub fn duplicates_subject(dataset_id: &str) -> String {
    format!("{}_duplicates", dataset_id)
}

/// Dataset ids and progress subjects name files, so they must stay a single path component.
fn check_path_component(kind: &str, value: &str) -> Result<()> {
    let escapes = value.is_empty()
        || value == "."
        || value.contains("..")
        || value.contains(['/', '\\', '\0']);
    if escapes {
        return Err(ServiceError::Configuration(format!(
            "invalid {} {:?}",
            kind, value
        )));
    }
    Ok(())
}

/// Runs CPU-bound or file work off the async runtime.
async fn blocking<T, F>(f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| ServiceError::Processing(format!("blocking task failed: {}", e)))?
}
