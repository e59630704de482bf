//! ID-mapped IVF-Flat index with an L2 metric.
//!
//! Vectors are bucketed under their nearest coarse centroid. A query scans the
//! `nprobe` closest buckets exhaustively. Every stored vector carries a caller
//! supplied `i64` id, and `locations` maps each id back to its bucket so removal
//! never scans the whole index.

use super::kmeans::{KMeans, nearest_centroid};
use crate::error::{Result, ServiceError};

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Squared Euclidean distance.
#[inline]
pub fn l2_squared(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| {
            let d = x - y;
            d * d
        })
        .sum()
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct InvertedList {
    ids: Vec<i64>,
    /// Row-major, `ids.len() * dim`.
    vectors: Vec<f32>,
}

impl InvertedList {
    fn row(&self, pos: usize, dim: usize) -> &[f32] {
        &self.vectors[pos * dim..(pos + 1) * dim]
    }

    fn push(&mut self, id: i64, vector: &[f32]) {
        self.ids.push(id);
        self.vectors.extend_from_slice(vector);
    }

    /// Swap-removes the entry at `pos`. The last entry moves into its slot.
    fn swap_remove(&mut self, pos: usize, dim: usize) {
        let last = self.ids.len() - 1;
        if pos != last {
            let (head, tail) = self.vectors.split_at_mut(last * dim);
            head[pos * dim..(pos + 1) * dim].copy_from_slice(&tail[..dim]);
        }
        self.ids.swap_remove(pos);
        self.vectors.truncate(last * dim);
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IvfIndex {
    dim: usize,
    nlist: usize,
    nprobe: usize,
    centroids: Vec<Vec<f32>>,
    lists: Vec<InvertedList>,
    /// id -> list number
    locations: HashMap<i64, usize>,
}

impl IvfIndex {
    pub fn new(dim: usize, nlist: usize, nprobe: usize) -> Self {
        Self {
            dim,
            nlist: nlist.max(1),
            nprobe: nprobe.max(1),
            centroids: Vec::new(),
            lists: Vec::new(),
            locations: HashMap::new(),
        }
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn nlist(&self) -> usize {
        self.nlist
    }

    pub fn nprobe(&self) -> usize {
        self.nprobe
    }

    pub fn is_trained(&self) -> bool {
        !self.centroids.is_empty()
    }

    pub fn ntotal(&self) -> usize {
        self.locations.len()
    }

    pub fn contains(&self, id: i64) -> bool {
        self.locations.contains_key(&id)
    }

    /// Trains the coarse quantizer on `vectors` (row-major).
    ///
    /// `nlist` shrinks to the number of training rows if there are fewer.
    pub fn train(&mut self, vectors: &[f32], seed: u64) -> Result<()> {
        self.check_rows(vectors)?;
        let n = vectors.len() / self.dim;
        if n == 0 {
            return Err(ServiceError::EmptyInput("no training vectors".to_string()));
        }

        self.nlist = self.nlist.min(n);
        self.nprobe = self.nprobe.min(self.nlist);
        self.centroids = KMeans::new(self.dim, self.nlist, seed).fit(vectors);
        self.lists = vec![InvertedList::default(); self.centroids.len()];
        self.locations.clear();

        tracing::debug!("Trained IVF quantizer: nlist={}, nprobe={}", self.nlist, self.nprobe);
        Ok(())
    }

    /// Inserts vectors under explicit ids. An id already present is replaced.
    pub fn add_with_ids(&mut self, vectors: &[f32], ids: &[i64]) -> Result<()> {
        if !self.is_trained() {
            return Err(ServiceError::NotLoaded);
        }
        self.check_rows(vectors)?;
        if vectors.len() / self.dim != ids.len() {
            return Err(ServiceError::DimensionMismatch {
                expected: ids.len(),
                actual: vectors.len() / self.dim,
            });
        }

        for (row, &id) in vectors.chunks_exact(self.dim).zip(ids) {
            self.remove_one(id);
            let (list, _) = nearest_centroid(row, &self.centroids);
            self.lists[list].push(id, row);
            self.locations.insert(id, list);
        }
        Ok(())
    }

    /// Removes every listed id that is present. Returns how many were removed.
    pub fn remove_ids(&mut self, ids: &[i64]) -> usize {
        ids.iter().filter(|&&id| self.remove_one(id)).count()
    }

    fn remove_one(&mut self, id: i64) -> bool {
        let Some(list_no) = self.locations.remove(&id) else {
            return false;
        };
        let list = &mut self.lists[list_no];
        if let Some(pos) = list.ids.iter().position(|&x| x == id) {
            list.swap_remove(pos, self.dim);
        }
        true
    }

    /// The `k` nearest stored vectors as `(id, squared distance)`, closest first.
    ///
    /// Probes `nprobe` lists, or `nprobe_override` when given. Fewer than `k`
    /// hits come back when the probed lists hold fewer vectors.
    pub fn search(&self, query: &[f32], k: usize, nprobe_override: Option<usize>) -> Vec<(i64, f32)> {
        if k == 0 || !self.is_trained() || query.len() != self.dim {
            return Vec::new();
        }

        let nprobe = nprobe_override.unwrap_or(self.nprobe).clamp(1, self.centroids.len());

        let mut probes: Vec<(usize, f32)> = self
            .centroids
            .iter()
            .enumerate()
            .map(|(idx, c)| (idx, l2_squared(query, c)))
            .collect();
        probes.sort_by(|a, b| a.1.total_cmp(&b.1));

        let mut hits: Vec<(i64, f32)> = Vec::new();
        for &(list_no, _) in probes.iter().take(nprobe) {
            let list = &self.lists[list_no];
            for (pos, &id) in list.ids.iter().enumerate() {
                hits.push((id, l2_squared(query, list.row(pos, self.dim))));
            }
        }

        hits.sort_by(|a, b| a.1.total_cmp(&b.1).then(a.0.cmp(&b.0)));
        hits.truncate(k);
        hits
    }

    /// Copy of the stored vector for `id`.
    pub fn reconstruct(&self, id: i64) -> Option<Vec<f32>> {
        let list = &self.lists[*self.locations.get(&id)?];
        let pos = list.ids.iter().position(|&x| x == id)?;
        Some(list.row(pos, self.dim).to_vec())
    }

    /// All stored ids, ascending.
    pub fn ids(&self) -> Vec<i64> {
        let mut ids: Vec<i64> = self.locations.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// All `(id, vector)` pairs, ascending by id.
    pub fn entries(&self) -> Vec<(i64, Vec<f32>)> {
        self.ids()
            .into_iter()
            .filter_map(|id| self.reconstruct(id).map(|v| (id, v)))
            .collect()
    }

    fn check_rows(&self, vectors: &[f32]) -> Result<()> {
        if vectors.len() % self.dim != 0 {
            return Err(ServiceError::DimensionMismatch {
                expected: self.dim,
                actual: vectors.len() % self.dim,
            });
        }
        Ok(())
    }
}
