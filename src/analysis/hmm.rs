//! Gaussian HMM with diagonal covariances, trained by Viterbi (hard) EM.
use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};

use super::kmeans::KMeans;

const VARIANCE_FLOOR: f64 = 1e-3;
const LN_2PI: f64 = 1.837_877_066_409_345_5;

#[derive(Debug, Clone)]
pub struct GaussianHmm {
    means: Array2<f64>,
    variances: Array2<f64>,
    log_start: Array1<f64>,
    log_transition: Array2<f64>,
}

/// Training settings for [`GaussianHmm::fit`].
#[derive(Debug, Clone, Copy)]
pub struct HmmSettings {
    pub states: usize,
    pub iterations: usize,
    pub kmeans_iterations: usize,
    pub kmeans_restarts: usize,
    pub seed: u64,
}

impl GaussianHmm {
    /// Initializes states from K-Means, then alternates Viterbi decoding and
    /// maximum-likelihood re-estimation until the path stops changing.
    #[must_use]
    pub fn fit(data: ArrayView2<'_, f32>, settings: HmmSettings) -> Self {
        let states = settings.states.max(1);
        let km = KMeans::fit(
            data,
            states,
            settings.kmeans_iterations,
            settings.kmeans_restarts,
            settings.seed,
        );
        let mut path = km.assignments;
        let mut model = Self::from_path(data, &path, states);

        for iteration in 0..settings.iterations {
            let next = model.viterbi(data);
            if next == path {
                tracing::debug!(iteration, "hmm path converged");
                break;
            }
            path = next;
            model = Self::from_path(data, &path, states);
        }
        model
    }

    #[must_use]
    pub fn states(&self) -> usize {
        self.means.nrows()
    }

    fn from_path(data: ArrayView2<'_, f32>, path: &[usize], states: usize) -> Self {
        let data = data.mapv(f64::from);
        let dim = data.ncols();
        let global_mean = data
            .mean_axis(Axis(0))
            .unwrap_or_else(|| Array1::zeros(dim));
        let global_var = data
            .var_axis(Axis(0), 0.0)
            .mapv(|v| v.max(VARIANCE_FLOOR));

        let mut means = Array2::zeros((states, dim));
        let mut variances = Array2::zeros((states, dim));
        for state in 0..states {
            let rows: Vec<usize> = path
                .iter()
                .enumerate()
                .filter_map(|(t, &s)| (s == state).then_some(t))
                .collect();
            if rows.is_empty() {
                means.row_mut(state).assign(&global_mean);
                variances.row_mut(state).assign(&global_var);
                continue;
            }
            let members = data.select(Axis(0), &rows);
            let mean = members
                .mean_axis(Axis(0))
                .unwrap_or_else(|| global_mean.clone());
            let var = members
                .var_axis(Axis(0), 0.0)
                .mapv(|v| v.max(VARIANCE_FLOOR));
            means.row_mut(state).assign(&mean);
            variances.row_mut(state).assign(&var);
        }

        // Laplace smoothing keeps every log-probability finite.
        let mut start = Array1::from_elem(states, 1.0_f64);
        if let Some(&first) = path.first() {
            start[first] += 1.0;
        }
        let mut transition = Array2::from_elem((states, states), 1.0_f64);
        for pair in path.windows(2) {
            transition[[pair[0], pair[1]]] += 1.0;
        }
        let start_total = start.sum();
        let log_start = start.mapv(|c: f64| (c / start_total).ln());
        for mut row in transition.axis_iter_mut(Axis(0)) {
            let total = row.sum();
            row.mapv_inplace(|c| (c / total).ln());
        }

        Self {
            means,
            variances,
            log_start,
            log_transition: transition,
        }
    }

    fn log_emission(&self, x: ArrayView1<'_, f32>, state: usize) -> f64 {
        let mean = self.means.row(state);
        let var = self.variances.row(state);
        let mut acc = 0.0;
        for ((&xi, &mu), &v) in x.iter().zip(mean.iter()).zip(var.iter()) {
            let diff = f64::from(xi) - mu;
            acc += LN_2PI + v.ln() + diff * diff / v;
        }
        -0.5 * acc
    }

    /// Most likely state sequence for `data`.
    #[must_use]
    pub fn viterbi(&self, data: ArrayView2<'_, f32>) -> Vec<usize> {
        let n = data.nrows();
        let states = self.states();
        if n == 0 {
            return vec![];
        }

        let mut score = Array1::from_shape_fn(states, |s| {
            self.log_start[s] + self.log_emission(data.row(0), s)
        });
        let mut backpointer = Array2::<usize>::zeros((n, states));

        for t in 1..n {
            let row = data.row(t);
            let mut next = Array1::zeros(states);
            for to in 0..states {
                let (best_from, best) = (0..states)
                    .map(|from| (from, score[from] + self.log_transition[[from, to]]))
                    .max_by(|a, b| a.1.total_cmp(&b.1))
                    .unwrap_or((0, f64::NEG_INFINITY));
                next[to] = best + self.log_emission(row, to);
                backpointer[[t, to]] = best_from;
            }
            score = next;
        }

        let mut path = vec![0; n];
        path[n - 1] = score
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map_or(0, |(s, _)| s);
        for t in (1..n).rev() {
            path[t - 1] = backpointer[[t, path[t]]];
        }
        path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;

    fn settings(states: usize) -> HmmSettings {
        HmmSettings {
            states,
            iterations: 10,
            kmeans_iterations: 50,
            kmeans_restarts: 3,
            seed: 1,
        }
    }

    #[test]
    fn recovers_piecewise_constant_segments() {
        let data = Array2::from_shape_fn((60, 2), |(t, d)| {
            let level = if (t / 20) % 2 == 0 { 0.0 } else { 5.0 };
            level + 0.01 * ((t * 7 + d * 3) % 5) as f32
        });
        let hmm = GaussianHmm::fit(data.view(), settings(2));
        let path = hmm.viterbi(data.view());
        assert_eq!(path.len(), 60);
        assert!(path[..20].iter().all(|&s| s == path[0]));
        assert!(path[20..40].iter().all(|&s| s == path[20]));
        assert_ne!(path[0], path[20]);
        assert_eq!(path[0], path[45]);
    }

    #[test]
    fn transition_rows_are_log_normalised() {
        let data = Array2::from_shape_fn((30, 2), |(t, d)| (t / 10 + d) as f32);
        let hmm = GaussianHmm::fit(data.view(), settings(3));
        for row in hmm.log_transition.rows() {
            let total: f64 = row.iter().map(|v| v.exp()).sum();
            assert!((total - 1.0).abs() < 1e-9);
        }
        let start: f64 = hmm.log_start.iter().map(|v| v.exp()).sum();
        assert!((start - 1.0).abs() < 1e-9);
    }

    #[test]
    fn zero_kmeans_iterations_still_initialises() {
        let data = Array2::from_shape_fn((12, 2), |(t, d)| (t % 4 + d) as f32);
        let hmm = GaussianHmm::fit(
            data.view(),
            HmmSettings {
                kmeans_iterations: 0,
                ..settings(3)
            },
        );
        assert_eq!(hmm.viterbi(data.view()).len(), 12);
    }

    #[test]
    fn tolerates_more_states_than_distinct_points() {
        let data = Array2::from_elem((5, 3), 1.0_f32);
        let hmm = GaussianHmm::fit(data.view(), settings(4));
        assert_eq!(hmm.viterbi(data.view()).len(), 5);
    }
}
