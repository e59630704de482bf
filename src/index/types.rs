use super::ivf::IvfIndex;
use super::placement::Placement;

use serde::{Deserialize, Serialize};

/// Lifecycle of an index handle. `Load` lands directly in `Populated` or `Accelerated`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexState {
    Uninitialized,
    Trained,
    Populated,
    Accelerated,
}

/// A built or loaded index together with where it lives.
#[derive(Debug, Clone)]
pub struct IndexHandle {
    pub index: IvfIndex,
    pub state: IndexState,
    pub placement: Placement,
}

impl IndexHandle {
    pub fn uninitialized(dim: usize) -> Self {
        Self {
            index: IvfIndex::new(dim, 1, 1),
            state: IndexState::Uninitialized,
            placement: Placement::Cpu,
        }
    }

    pub fn is_searchable(&self) -> bool {
        matches!(self.state, IndexState::Populated | IndexState::Accelerated)
    }

    pub fn ntotal(&self) -> usize {
        self.index.ntotal()
    }
}

/// Result of one query: parallel arrays, closest first.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchHits {
    pub ids: Vec<i64>,
    /// Squared L2.
    pub distances: Vec<f32>,
}

impl SearchHits {
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

impl From<Vec<(i64, f32)>> for SearchHits {
    fn from(hits: Vec<(i64, f32)>) -> Self {
        let (ids, distances) = hits.into_iter().unzip();
        Self { ids, distances }
    }
}

/// IVF parameters tuned from the dataset size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IvfParams {
    pub nlist: usize,
    pub nprobe: usize,
}

impl IvfParams {
    /// `nlist = clamp(round(sqrt(n)), 1, n)`, `nprobe = max(1, ceil(nlist / 10))`.
    pub fn auto(n: usize) -> Self {
        let nlist = ((n as f64).sqrt().round() as usize).min(n).max(1);
        let nprobe = ((nlist as f64 * 0.1).ceil() as usize).max(1);
        Self { nlist, nprobe }
    }
}
