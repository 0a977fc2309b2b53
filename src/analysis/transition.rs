use ndarray::{Array1, Array2, Axis};

/// Counts label changes `labels[t] -> labels[t+1]`; repeats of the same
/// label are not transitions.
#[must_use]
pub fn transition_counts(labels: &[usize], n_cluster: usize) -> Array2<f64> {
    let mut counts = Array2::zeros((n_cluster, n_cluster));
    for pair in labels.windows(2) {
        let (from, to) = (pair[0], pair[1]);
        if from != to && from < n_cluster && to < n_cluster {
            counts[[from, to]] += 1.0;
        }
    }
    counts
}

/// Row-stochastic transition matrix; rows without outgoing changes stay zero.
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub fn transition_matrix(counts: &Array2<f64>) -> Array2<f32> {
    let mut matrix = counts.clone();
    for mut row in matrix.axis_iter_mut(Axis(0)) {
        let total = row.sum();
        if total > 0.0 {
            row.mapv_inplace(|c| c / total);
        }
    }
    matrix.mapv(|p| p as f32)
}

/// Number of frames per motif, zero-filled up to `n_cluster`.
#[must_use]
pub fn motif_usage(labels: &[usize], n_cluster: usize) -> Array1<i64> {
    let mut usage = Array1::zeros(n_cluster);
    for &label in labels {
        if label < n_cluster {
            usage[label] += 1;
        }
    }
    usage
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn self_transitions_are_ignored() {
        let counts = transition_counts(&[0, 0, 1, 1, 0, 2], 3);
        assert_eq!(counts, array![[0.0, 1.0, 1.0], [1.0, 0.0, 0.0], [0.0, 0.0, 0.0]]);
    }

    #[test]
    fn matrix_rows_are_stochastic_or_zero() {
        let matrix = transition_matrix(&transition_counts(&[0, 1, 0, 2, 0, 1], 4));
        for row in matrix.axis_iter(Axis(0)) {
            let sum: f32 = row.sum();
            assert!(sum == 0.0 || (sum - 1.0).abs() < 1e-6);
        }
        assert!((matrix[[0, 1]] - 2.0 / 3.0).abs() < 1e-6);
    }

    #[test]
    fn usage_is_zero_filled() {
        assert_eq!(motif_usage(&[1, 1, 3], 5), array![0, 2, 0, 1, 0]);
    }
}
