//! Principal component projection, used for low-dimensional views of the
//! latent space and to fit the default linear pose model.
use ndarray::{Array1, Array2, ArrayView2, Axis};

const POWER_ITERATIONS: usize = 200;

#[derive(Debug, Clone)]
pub struct Pca {
    pub mean: Array1<f32>,
    /// One component per row, unit length.
    pub components: Array2<f32>,
    pub explained_variance: Vec<f64>,
}

impl Pca {
    /// Fits the top `k` components by power iteration with deflation.
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
    pub fn fit(data: ArrayView2<'_, f32>, k: usize) -> Self {
        let dim = data.ncols();
        let k = k.min(dim);
        let x = data.mapv(f64::from);
        let mean = x.mean_axis(Axis(0)).unwrap_or_else(|| Array1::zeros(dim));
        let centered = &x - &mean;
        let denom = (x.nrows().saturating_sub(1)).max(1) as f64;
        let mut cov = centered.t().dot(&centered) / denom;

        let mut components = Array2::zeros((k, dim));
        let mut explained_variance = Vec::with_capacity(k);
        for c in 0..k {
            // Deterministic, non-degenerate start vector.
            let mut v = Array1::from_shape_fn(dim, |i| 1.0 + ((i + c) % 7) as f64 * 0.1);
            normalize(&mut v);
            for _ in 0..POWER_ITERATIONS {
                let mut next = cov.dot(&v);
                if normalize(&mut next) == 0.0 {
                    break;
                }
                v = next;
            }
            let lambda = v.dot(&cov.dot(&v));
            explained_variance.push(lambda.max(0.0));
            cov = cov - outer(&v) * lambda;
            components.row_mut(c).assign(&v.mapv(|x| x as f32));
        }

        let mean = mean.mapv(|m| m as f32);
        Self {
            mean,
            components,
            explained_variance,
        }
    }

    #[must_use]
    pub fn transform(&self, data: ArrayView2<'_, f32>) -> Array2<f32> {
        (&data - &self.mean).dot(&self.components.t())
    }

    #[must_use]
    pub fn inverse_transform(&self, scores: ArrayView2<'_, f32>) -> Array2<f32> {
        scores.dot(&self.components) + &self.mean
    }
}

fn normalize(v: &mut Array1<f64>) -> f64 {
    let norm = v.dot(&*v).sqrt();
    if norm > 0.0 {
        v.mapv_inplace(|x| x / norm);
    }
    norm
}

fn outer(v: &Array1<f64>) -> Array2<f64> {
    let column = v.view().insert_axis(Axis(1));
    let row = v.view().insert_axis(Axis(0));
    column.dot(&row)
}
