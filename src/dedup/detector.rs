//! Duplicate Detector
//!
//! Scans a dataset's vectors against its own index and groups ids whose
//! similarity to each other reaches a percentage threshold.
//!
//! ## Grouping modes
//! - **Greedy** (default): one pass in the caller's order. An id already claimed by
//!   an earlier group is not queried again, but may still appear in a later group
//!   as someone else's neighbour. Results depend on input order.
//! - **Connected**: every above-threshold pair is an edge; groups are connected
//!   components. Order independent and never overlapping.

use super::cluster::UnionFind;
use crate::error::{Result, ServiceError};
use crate::index::manager::IndexManager;
use crate::index::similarity::distance_to_similarity_percent;
use crate::index::types::IndexHandle;
use crate::progress::{MAX_RUNNING_PERCENT, ProgressNotifier};

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupingMode {
    #[default]
    Greedy,
    Connected,
}

#[derive(Debug, Clone)]
pub struct DetectorConfig {
    pub sigma: f32,
    pub mode: GroupingMode,
    /// Queries between progress updates and cancellation checks.
    pub batch_size: usize,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            sigma: 10.0,
            mode: GroupingMode::Greedy,
            batch_size: 256,
        }
    }
}

pub struct DuplicateDetector {
    manager: Arc<IndexManager>,
    config: DetectorConfig,
}

impl DuplicateDetector {
    pub fn new(manager: Arc<IndexManager>, config: DetectorConfig) -> Self {
        Self { manager, config }
    }

    pub fn config(&self) -> &DetectorConfig {
        &self.config
    }

    /// Groups of near-identical ids, each sorted ascending.
    ///
    /// `pairs` are the dataset's `(id, vector)` rows in scan order. `threshold` is a
    /// similarity percentage in `[0, 100]`.
    pub fn find_groups(
        &self,
        handle: &IndexHandle,
        pairs: &[(i64, Vec<f32>)],
        threshold: f32,
        notifier: &ProgressNotifier,
        subject: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<Vec<i64>>> {
        if !(0.0..=100.0).contains(&threshold) {
            return Err(ServiceError::Configuration(format!(
                "threshold must be within [0, 100], got {}",
                threshold
            )));
        }
        if pairs.is_empty() {
            return Err(ServiceError::EmptyInput(format!(
                "no vectors to scan for {}",
                subject
            )));
        }

        notifier.notify(subject, 0.0, "scanning for duplicates");

        let groups = match self.config.mode {
            GroupingMode::Greedy => self.greedy(handle, pairs, threshold, notifier, subject, cancel)?,
            GroupingMode::Connected => {
                self.connected(handle, pairs, threshold, notifier, subject, cancel)?
            }
        };

        notifier.notify(
            subject,
            MAX_RUNNING_PERCENT,
            &format!("found {} duplicate groups", groups.len()),
        );
        tracing::info!(
            "Duplicate scan of '{}' found {} groups ({:?} mode)",
            subject,
            groups.len(),
            self.config.mode
        );
        Ok(groups)
    }

    /// Keeps the smallest id of every group and deletes the rest from the index.
    ///
    /// Returns the removed ids, ascending.
    pub fn apply_dedupe(&self, handle: &mut IndexHandle, groups: &[Vec<i64>]) -> Result<Vec<i64>> {
        let keep: HashSet<i64> = groups.iter().filter_map(|g| g.iter().min().copied()).collect();
        let remove: Vec<i64> = groups
            .iter()
            .flatten()
            .copied()
            .filter(|id| !keep.contains(id))
            .collect::<BTreeSet<i64>>()
            .into_iter()
            .collect();

        if remove.is_empty() {
            return Ok(remove);
        }

        let removed = self.manager.delete(handle, &remove)?;
        tracing::info!("Dedupe removed {} vectors", removed);
        Ok(remove)
    }

    /// Above-threshold neighbours of `vector`, excluding `id` itself.
    fn neighbours(&self, handle: &IndexHandle, id: i64, vector: &[f32], threshold: f32) -> Result<Vec<i64>> {
        let hits = self
            .manager
            .search_exhaustive(handle, vector, handle.ntotal())?;

        Ok(hits
            .ids
            .iter()
            .zip(hits.distances.iter())
            .filter(|&(&hit, _)| hit != id)
            .filter(|&(_, &d)| distance_to_similarity_percent(d, self.config.sigma) >= threshold)
            .map(|(&hit, _)| hit)
            .collect())
    }

    fn checkpoint(
        &self,
        done: usize,
        total: usize,
        notifier: &ProgressNotifier,
        subject: &str,
        cancel: &CancellationToken,
    ) -> Result<()> {
        if done % self.config.batch_size.max(1) != 0 {
            return Ok(());
        }
        if cancel.is_cancelled() {
            tracing::info!("Duplicate scan of '{}' cancelled at {}/{}", subject, done, total);
            return Err(ServiceError::Cancelled(format!("duplicate scan {}", subject)));
        }
        if done > 0 {
            let percent = MAX_RUNNING_PERCENT * done as f32 / total as f32;
            notifier.notify(subject, percent, &format!("scanned {}/{}", done, total));
        }
        Ok(())
    }

    fn greedy(
        &self,
        handle: &IndexHandle,
        pairs: &[(i64, Vec<f32>)],
        threshold: f32,
        notifier: &ProgressNotifier,
        subject: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<Vec<i64>>> {
        let mut visited: HashSet<i64> = HashSet::new();
        let mut groups = Vec::new();

        for (done, (id, vector)) in pairs.iter().enumerate() {
            self.checkpoint(done, pairs.len(), notifier, subject, cancel)?;

            if visited.contains(id) {
                continue;
            }

            let matches = self.neighbours(handle, *id, vector, threshold)?;
            if matches.is_empty() {
                continue;
            }

            visited.extend(matches.iter().copied());
            visited.insert(*id);

            let mut group = matches;
            group.push(*id);
            group.sort_unstable();
            group.dedup();
            groups.push(group);
        }

        Ok(groups)
    }

    fn connected(
        &self,
        handle: &IndexHandle,
        pairs: &[(i64, Vec<f32>)],
        threshold: f32,
        notifier: &ProgressNotifier,
        subject: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<Vec<i64>>> {
        let mut positions: HashMap<i64, usize> = HashMap::new();
        let mut ids: Vec<i64> = Vec::new();
        let mut position_of = |id: i64, ids: &mut Vec<i64>| -> usize {
            *positions.entry(id).or_insert_with(|| {
                ids.push(id);
                ids.len() - 1
            })
        };

        let mut edges = Vec::new();
        for (done, (id, vector)) in pairs.iter().enumerate() {
            self.checkpoint(done, pairs.len(), notifier, subject, cancel)?;

            let from = position_of(*id, &mut ids);
            for hit in self.neighbours(handle, *id, vector, threshold)? {
                edges.push((from, position_of(hit, &mut ids)));
            }
        }

        let mut sets = UnionFind::new(ids.len());
        for (a, b) in edges {
            sets.union(a, b);
        }

        let mut groups: Vec<Vec<i64>> = sets
            .duplicate_clusters()
            .into_values()
            .map(|members| {
                let mut group: Vec<i64> = members.into_iter().map(|pos| ids[pos]).collect();
                group.sort_unstable();
                group
            })
            .collect();
        groups.sort_by_key(|group| group[0]);

        Ok(groups)
    }
}
