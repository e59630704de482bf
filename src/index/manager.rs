//! Index Lifecycle Manager
//!
//! Builds, persists, reloads and queries one IVF index per dataset.
//!
//! ## State machine
//! `Uninitialized -> Trained -> Populated -> Accelerated?`. `load` lands directly in
//! `Populated` (or `Accelerated` when placement succeeds); `upsert` and `delete`
//! keep whatever state the handle is in.
//!
//! ## File format
//! `MAGIC (4 bytes) | version (u32 LE) | bincode(IvfIndex)`, written to a temp file
//! in the target directory and renamed over the target.

use super::ivf::IvfIndex;
use super::placement::{Accelerator, Placement, Placer};
use super::types::*;
use crate::error::{Result, ServiceError};
use crate::progress::{MAX_RUNNING_PERCENT, ProgressNotifier};

use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

pub const INDEX_MAGIC: [u8; 4] = *b"IVFX";
pub const INDEX_FORMAT_VERSION: u32 = 1;
/// Vectors inserted per progress step during a build.
pub const ADD_BATCH_SIZE: usize = 1024;

const DEFAULT_SEED: u64 = 0x5EED_1DC5;

pub struct IndexManager {
    dim: usize,
    placer: Placer,
    seed: u64,
}

impl IndexManager {
    pub fn new(dim: usize, accelerator: Arc<dyn Accelerator>) -> Self {
        Self {
            dim,
            placer: Placer::new(accelerator),
            seed: DEFAULT_SEED,
        }
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn build(&self, vectors: &[Vec<f32>], ids: &[i64]) -> Result<IndexHandle> {
        self.build_observed(
            vectors,
            ids,
            &ProgressNotifier::default(),
            "",
            &CancellationToken::new(),
        )
    }

    /// Trains and populates a fresh index, reporting progress per insert batch.
    ///
    /// Returns `Cancelled` as soon as `cancel` fires between batches.
    pub fn build_observed(
        &self,
        vectors: &[Vec<f32>],
        ids: &[i64],
        notifier: &ProgressNotifier,
        subject: &str,
        cancel: &CancellationToken,
    ) -> Result<IndexHandle> {
        self.validate(vectors, ids)?;

        let n = vectors.len();
        let params = IvfParams::auto(n);
        let flat: Vec<f32> = vectors.iter().flatten().copied().collect();

        notifier.notify(subject, 0.0, "training quantizer");

        let mut index = IvfIndex::new(self.dim, params.nlist, params.nprobe);
        if !index.is_trained() {
            index.train(&flat, self.seed)?;
        }
        notifier.notify(subject, 10.0, "quantizer trained");
        let mut handle = IndexHandle {
            index,
            state: IndexState::Trained,
            placement: Placement::Cpu,
        };
        tracing::debug!(
            "Building index over {} vectors (nlist={}, nprobe={})",
            n,
            params.nlist,
            params.nprobe
        );

        let mut added = 0usize;
        for (rows, batch_ids) in flat
            .chunks(ADD_BATCH_SIZE * self.dim)
            .zip(ids.chunks(ADD_BATCH_SIZE))
        {
            if cancel.is_cancelled() {
                tracing::info!("Index build for '{}' cancelled after {} vectors", subject, added);
                return Err(ServiceError::Cancelled(format!("index build {}", subject)));
            }

            handle.index.add_with_ids(rows, batch_ids)?;
            added += batch_ids.len();

            let percent = 10.0 + 85.0 * added as f32 / n as f32;
            notifier.notify(subject, percent, &format!("added {}/{} vectors", added, n));
        }

        handle.state = IndexState::Populated;
        self.place(&mut handle);

        notifier.notify(subject, MAX_RUNNING_PERCENT, "index built, saving");
        Ok(handle)
    }

    /// Atomically writes the index to `path`.
    pub fn save(&self, handle: &IndexHandle, path: &Path) -> Result<()> {
        if handle.state == IndexState::Uninitialized {
            return Err(ServiceError::NotLoaded);
        }

        let body = bincode::serialize(&handle.index)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;

        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        std::fs::create_dir_all(&dir)?;

        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "index".to_string());
        let temp_path = dir.join(format!(".{}.{}.tmp", file_name, uuid::Uuid::new_v4()));

        let written = (|| -> std::io::Result<()> {
            let mut file = File::create(&temp_path)?;
            file.write_all(&INDEX_MAGIC)?;
            file.write_all(&INDEX_FORMAT_VERSION.to_le_bytes())?;
            file.write_all(&body)?;
            file.sync_all()?;
            std::fs::rename(&temp_path, path)
        })();

        if let Err(e) = written {
            let _ = std::fs::remove_file(&temp_path);
            return Err(e.into());
        }

        tracing::info!(
            "Saved index with {} vectors to {}",
            handle.ntotal(),
            path.display()
        );
        Ok(())
    }

    pub fn load(&self, path: &Path) -> Result<IndexHandle> {
        if !path.exists() {
            return Err(ServiceError::NotFound(format!(
                "index file {}",
                path.display()
            )));
        }

        let bytes = std::fs::read(path)?;
        let index = decode_index(&bytes)?;

        if index.dim() != self.dim {
            return Err(ServiceError::DimensionMismatch {
                expected: self.dim,
                actual: index.dim(),
            });
        }

        let mut handle = IndexHandle {
            index,
            state: IndexState::Populated,
            placement: Placement::Cpu,
        };
        self.place(&mut handle);

        tracing::info!(
            "Loaded index with {} vectors from {}",
            handle.ntotal(),
            path.display()
        );
        Ok(handle)
    }

    /// The `k` nearest neighbours of `query`, closest first.
    pub fn search(&self, handle: &IndexHandle, query: &[f32], k: usize) -> Result<SearchHits> {
        self.check_query(handle, query)?;
        let k = handle.placement.cap_k(k);
        Ok(handle.index.search(query, k, None).into())
    }

    /// Row-wise `search` for a `[m, dim]` batch of queries.
    pub fn search_batch(
        &self,
        handle: &IndexHandle,
        queries: &[Vec<f32>],
        k: usize,
    ) -> Result<Vec<SearchHits>> {
        queries
            .iter()
            .map(|query| self.search(handle, query, k))
            .collect()
    }

    /// Like `search` but probes every inverted list, so every stored vector is a candidate.
    pub fn search_exhaustive(
        &self,
        handle: &IndexHandle,
        query: &[f32],
        k: usize,
    ) -> Result<SearchHits> {
        self.check_query(handle, query)?;
        let k = handle.placement.cap_k(k);
        let nlist = handle.index.nlist();
        Ok(handle.index.search(query, k, Some(nlist)).into())
    }

    /// Replaces vectors for ids already present and adds the rest.
    pub fn upsert(&self, handle: &mut IndexHandle, vectors: &[Vec<f32>], ids: &[i64]) -> Result<()> {
        if handle.state == IndexState::Uninitialized {
            return Err(ServiceError::NotLoaded);
        }
        self.validate(vectors, ids)?;

        let flat: Vec<f32> = vectors.iter().flatten().copied().collect();
        handle.index.add_with_ids(&flat, ids)?;

        if handle.state == IndexState::Trained {
            handle.state = IndexState::Populated;
        }
        self.refresh_placement(handle);

        tracing::debug!("Upserted {} vectors, ntotal={}", ids.len(), handle.ntotal());
        Ok(())
    }

    /// Removes `ids` and returns how many were present.
    pub fn delete(&self, handle: &mut IndexHandle, ids: &[i64]) -> Result<usize> {
        if handle.state == IndexState::Uninitialized {
            return Err(ServiceError::NotLoaded);
        }

        let removed = handle.index.remove_ids(ids);
        self.refresh_placement(handle);

        tracing::debug!("Deleted {} of {} ids, ntotal={}", removed, ids.len(), handle.ntotal());
        Ok(removed)
    }

    fn place(&self, handle: &mut IndexHandle) {
        handle.placement = self.placer.place(&handle.index);
        if handle.placement.is_accelerated() {
            handle.state = IndexState::Accelerated;
        }
    }

    /// Re-uploads an accelerated index after a mutation.
    fn refresh_placement(&self, handle: &mut IndexHandle) {
        if handle.state != IndexState::Accelerated {
            return;
        }
        handle.placement = self.placer.place(&handle.index);
        if !handle.placement.is_accelerated() {
            handle.state = IndexState::Populated;
        }
    }

    fn check_query(&self, handle: &IndexHandle, query: &[f32]) -> Result<()> {
        if !handle.is_searchable() {
            return Err(ServiceError::NotLoaded);
        }
        if query.len() != self.dim {
            return Err(ServiceError::DimensionMismatch {
                expected: self.dim,
                actual: query.len(),
            });
        }
        Ok(())
    }

    fn validate(&self, vectors: &[Vec<f32>], ids: &[i64]) -> Result<()> {
        if vectors.len() != ids.len() {
            return Err(ServiceError::DimensionMismatch {
                expected: vectors.len(),
                actual: ids.len(),
            });
        }
        if vectors.is_empty() {
            return Err(ServiceError::EmptyInput("no vectors to index".to_string()));
        }
        if let Some(bad) = vectors.iter().find(|v| v.len() != self.dim) {
            return Err(ServiceError::DimensionMismatch {
                expected: self.dim,
                actual: bad.len(),
            });
        }
        Ok(())
    }
}

fn decode_index(bytes: &[u8]) -> std::io::Result<IvfIndex> {
    let invalid = |msg: String| std::io::Error::new(std::io::ErrorKind::InvalidData, msg);

    if bytes.len() < 8 || bytes[..4] != INDEX_MAGIC {
        return Err(invalid("not an index file".to_string()));
    }

    let mut version = [0u8; 4];
    version.copy_from_slice(&bytes[4..8]);
    let version = u32::from_le_bytes(version);
    if version != INDEX_FORMAT_VERSION {
        return Err(invalid(format!("unsupported index format version {}", version)));
    }

    bincode::deserialize(&bytes[8..]).map_err(|e| invalid(format!("corrupt index: {}", e)))
}
