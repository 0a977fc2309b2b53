use ndarray::{Array2, ArrayView1, ArrayView2, Axis};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;

/// Seeded K-Means over the rows of a latent matrix.
#[derive(Debug, Clone)]
pub struct KMeans {
    pub centroids: Array2<f32>,
    pub assignments: Vec<usize>,
    pub inertia: f32,
}

impl KMeans {
    /// Runs K-Means `n_init` times from different seeds and keeps the run with
    /// the lowest inertia.
    ///
    /// # Arguments
    /// * `data` - One observation per row.
    /// * `k` - Number of clusters; clamped to the number of rows.
    /// * `max_iterations` - Iteration cap per run; at least one assignment
    ///   pass always runs.
    /// * `n_init` - Number of restarts.
    /// * `seed` - Base seed; run `i` uses `seed + i`.
    #[must_use]
    pub fn fit(
        data: ArrayView2<'_, f32>,
        k: usize,
        max_iterations: usize,
        n_init: usize,
        seed: u64,
    ) -> Self {
        let dim = data.ncols();
        if data.nrows() == 0 || k == 0 {
            return Self {
                centroids: Array2::zeros((0, dim)),
                assignments: vec![],
                inertia: 0.0,
            };
        }

        (0..n_init.max(1) as u64)
            .map(|run| Self::fit_once(data, k, max_iterations, seed.wrapping_add(run)))
            .min_by(|a, b| a.inertia.total_cmp(&b.inertia))
            .unwrap_or_else(|| Self::fit_once(data, k, max_iterations, seed))
    }

    fn fit_once(data: ArrayView2<'_, f32>, k: usize, max_iterations: usize, seed: u64) -> Self {
        let n = data.nrows();
        let k = k.min(n);
        let mut rng = StdRng::seed_from_u64(seed);

        let mut centroids = plus_plus(data, k, &mut rng);

        let mut assignments = vec![usize::MAX; n];
        for _ in 0..max_iterations.max(1) {
            // E-step: assign points to nearest centroid
            let new_assignments = assign(data, centroids.view());
            if new_assignments == assignments {
                break;
            }
            assignments = new_assignments;

            // M-step: update centroids
            let mut sums = Array2::<f32>::zeros((k, data.ncols()));
            let mut counts = vec![0_usize; k];
            for (row, &cluster) in data.axis_iter(Axis(0)).zip(&assignments) {
                let mut target = sums.row_mut(cluster);
                target += &row;
                counts[cluster] += 1;
            }
            for (cluster, &count) in counts.iter().enumerate() {
                if count > 0 {
                    #[allow(clippy::cast_precision_loss)]
                    let mean = &sums.row(cluster) / count as f32;
                    centroids.row_mut(cluster).assign(&mean);
                }
                // Empty clusters keep their previous centroid.
            }
        }

        let inertia = data
            .axis_iter(Axis(0))
            .zip(&assignments)
            .map(|(row, &cluster)| distance_sq(row, centroids.row(cluster)))
            .sum();

        Self {
            centroids,
            assignments,
            inertia,
        }
    }

    /// Nearest-centroid assignment for new observations.
    #[must_use]
    pub fn predict(&self, data: ArrayView2<'_, f32>) -> Vec<usize> {
        assign(data, self.centroids.view())
    }
}

/// k-means++ seeding: each further centroid is drawn with probability
/// proportional to its squared distance from the nearest one chosen so far.
fn plus_plus(data: ArrayView2<'_, f32>, k: usize, rng: &mut StdRng) -> Array2<f32> {
    let n = data.nrows();
    let mut centroids = Array2::zeros((k, data.ncols()));
    centroids.row_mut(0).assign(&data.row(rng.random_range(0..n)));
    let mut nearest: Vec<f32> = data
        .axis_iter(Axis(0))
        .map(|row| distance_sq(row, centroids.row(0)))
        .collect();

    for slot in 1..k {
        let total: f32 = nearest.iter().sum();
        let chosen = if total > 0.0 {
            let mut target = rng.random_range(0.0..total);
            nearest
                .iter()
                .position(|&d| {
                    target -= d;
                    target < 0.0
                })
                .unwrap_or(n - 1)
        } else {
            // Every row coincides with a centroid already.
            rng.random_range(0..n)
        };
        centroids.row_mut(slot).assign(&data.row(chosen));
        for (d, row) in nearest.iter_mut().zip(data.axis_iter(Axis(0))) {
            *d = d.min(distance_sq(row, centroids.row(slot)));
        }
    }
    centroids
}

pub(crate) fn assign(data: ArrayView2<'_, f32>, centroids: ArrayView2<'_, f32>) -> Vec<usize> {
    let rows: Vec<_> = data.axis_iter(Axis(0)).collect();
    rows.par_iter()
        .map(|point| {
            let mut min_dist_sq = f32::MAX;
            let mut best_cluster = 0;
            for (j, centroid) in centroids.axis_iter(Axis(0)).enumerate() {
                let dist_sq = distance_sq(*point, centroid);
                if dist_sq < min_dist_sq {
                    min_dist_sq = dist_sq;
                    best_cluster = j;
                }
            }
            best_cluster
        })
        .collect()
}

fn distance_sq(a: ArrayView1<'_, f32>, b: ArrayView1<'_, f32>) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| (x - y).powi(2)).sum()
}
