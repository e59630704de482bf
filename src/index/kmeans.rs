//! k-means coarse quantizer training (L2, k-means++ seeding).

use super::ivf::l2_squared;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

const MAX_ITERATIONS: usize = 25;
const CONVERGENCE_EPS: f32 = 1e-6;

pub struct KMeans {
    dim: usize,
    k: usize,
    seed: u64,
}

impl KMeans {
    pub fn new(dim: usize, k: usize, seed: u64) -> Self {
        Self { dim, k, seed }
    }

    /// Trains `k` centroids over `vectors` (row-major, `n * dim`).
    ///
    /// Deterministic for a given seed. Callers guarantee `1 <= k <= n`.
    pub fn fit(&self, vectors: &[f32]) -> Vec<Vec<f32>> {
        let n = vectors.len() / self.dim;
        if n == 0 || self.k == 0 {
            return Vec::new();
        }

        let mut centroids = self.kmeans_plus_plus(vectors, n);

        for _ in 0..MAX_ITERATIONS {
            let assignments = self.assign(vectors, n, &centroids);
            let updated = self.update(vectors, &assignments, &centroids);

            let converged = centroids
                .iter()
                .zip(updated.iter())
                .all(|(old, new)| l2_squared(old, new) <= CONVERGENCE_EPS);

            centroids = updated;
            if converged {
                break;
            }
        }

        centroids
    }

    fn row<'a>(&self, vectors: &'a [f32], idx: usize) -> &'a [f32] {
        &vectors[idx * self.dim..(idx + 1) * self.dim]
    }

    fn kmeans_plus_plus(&self, vectors: &[f32], n: usize) -> Vec<Vec<f32>> {
        let mut rng = StdRng::seed_from_u64(self.seed);
        let mut centroids = Vec::with_capacity(self.k);

        centroids.push(self.row(vectors, rng.gen_range(0..n)).to_vec());

        // Next centroid sampled proportional to squared distance to the nearest chosen one.
        while centroids.len() < self.k {
            let distances: Vec<f32> = (0..n)
                .map(|i| {
                    let row = self.row(vectors, i);
                    centroids
                        .iter()
                        .map(|c| l2_squared(row, c))
                        .fold(f32::INFINITY, f32::min)
                })
                .collect();

            let total: f64 = distances.iter().map(|&d| d as f64).sum();
            let threshold = rng.gen_range(0.0f64..1.0) * total;

            let mut cumulative = 0.0f64;
            let mut chosen = n - 1;
            for (i, &d) in distances.iter().enumerate() {
                cumulative += d as f64;
                if cumulative >= threshold {
                    chosen = i;
                    break;
                }
            }

            centroids.push(self.row(vectors, chosen).to_vec());
        }

        centroids
    }

    fn assign(&self, vectors: &[f32], n: usize, centroids: &[Vec<f32>]) -> Vec<usize> {
        (0..n)
            .map(|i| nearest_centroid(self.row(vectors, i), centroids).0)
            .collect()
    }

    fn update(&self, vectors: &[f32], assignments: &[usize], previous: &[Vec<f32>]) -> Vec<Vec<f32>> {
        let mut sums = vec![vec![0.0f32; self.dim]; previous.len()];
        let mut counts = vec![0usize; previous.len()];

        for (i, &cluster) in assignments.iter().enumerate() {
            counts[cluster] += 1;
            for (sum, &value) in sums[cluster].iter_mut().zip(self.row(vectors, i)) {
                *sum += value;
            }
        }

        sums.into_iter()
            .zip(counts)
            .zip(previous)
            .map(|((sum, count), old)| {
                if count == 0 {
                    // Empty cluster keeps its previous centroid.
                    old.clone()
                } else {
                    sum.into_iter().map(|s| s / count as f32).collect()
                }
            })
            .collect()
    }
}

/// `(index, squared distance)` of the centroid closest to `vector`.
pub fn nearest_centroid(vector: &[f32], centroids: &[Vec<f32>]) -> (usize, f32) {
    let mut best = (0, f32::INFINITY);
    for (idx, centroid) in centroids.iter().enumerate() {
        let dist = l2_squared(vector, centroid);
        if dist < best.1 {
            best = (idx, dist);
        }
    }
    best
}
