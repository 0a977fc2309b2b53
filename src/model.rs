//! Pose model seam.
//!
//! The segmentation and generative stages only need an encoder from a pose
//! window to a latent vector and a decoder back. Trained networks plug in via
//! [`ModelLoader`]; [`LinearPoseModel`] is the built-in PCA-backed model.
use std::path::Path;

use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis, s};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::analysis::projection::Pca;
use crate::error::{PipelineError, Result};
use crate::store::{ArtifactBatch, read_pickle};

/// Upper bound on windows used to fit the linear model.
const MAX_FIT_WINDOWS: usize = 20_000;

pub trait PoseModel: Send + Sync {
    fn zdims(&self) -> usize;
    fn time_window(&self) -> usize;
    fn num_features(&self) -> usize;

    /// Encodes one `num_features x time_window` window.
    fn encode(&self, window: ArrayView2<'_, f32>) -> Array1<f32>;

    /// Decodes a latent vector into a `num_features x time_window` window.
    fn decode(&self, latent: ArrayView1<'_, f32>) -> Array2<f32>;
}

pub trait ModelLoader: Send + Sync {
    /// # Errors
    /// Implementations report unreadable or incompatible model files.
    fn load(&self, path: &Path) -> Result<Box<dyn PoseModel>>;
}

/// Loads [`LinearPoseModel`] pickles.
#[derive(Debug, Default, Clone, Copy)]
pub struct LinearModelLoader;

impl ModelLoader for LinearModelLoader {
    fn load(&self, path: &Path) -> Result<Box<dyn PoseModel>> {
        let model: LinearPoseModel = read_pickle(path)?;
        model.check_shape()?;
        Ok(Box::new(model))
    }
}

/// Linear encoder/decoder over flattened pose windows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinearPoseModel {
    pub time_window: usize,
    pub num_features: usize,
    pub zdims: usize,
    pub mean: Array1<f32>,
    /// `zdims x (num_features * time_window)`.
    pub components: Array2<f32>,
}

impl LinearPoseModel {
    /// Fits the model on pose sequences of shape `num_features x frames`.
    ///
    /// # Errors
    /// Returns [`PipelineError::Shape`] when sequences disagree on the feature
    /// count, or [`PipelineError::InsufficientFrames`] when no sequence is longer
    /// than one window.
    pub fn fit(sequences: &[(String, Array2<f32>)], time_window: usize, zdims: usize) -> Result<Self> {
        let num_features = sequences.first().map_or(0, |(_, data)| data.nrows());
        if let Some((video, data)) = sequences.iter().find(|(_, d)| d.nrows() != num_features) {
            return Err(PipelineError::Shape(format!(
                "video `{video}` has {} features, expected {num_features}",
                data.nrows()
            )));
        }

        let total: usize = sequences
            .iter()
            .map(|(_, d)| d.ncols().saturating_sub(time_window))
            .sum();
        if total == 0 {
            let (video, available) = sequences
                .first()
                .map_or((String::new(), 0), |(v, d)| (v.clone(), d.ncols()));
            return Err(PipelineError::InsufficientFrames {
                video,
                available,
                required: time_window + 1,
            });
        }

        let stride = total.div_ceil(MAX_FIT_WINDOWS).max(1);
        let dim = num_features * time_window;
        let mut rows: Vec<f32> = Vec::new();
        for (_, data) in sequences {
            for t in (0..data.ncols().saturating_sub(time_window)).step_by(stride) {
                rows.extend(data.slice(s![.., t..t + time_window]).iter().copied());
            }
        }
        let windows = Array2::from_shape_vec((rows.len() / dim, dim), rows)
            .map_err(|e| PipelineError::Shape(e.to_string()))?;

        let pca = Pca::fit(windows.view(), zdims);
        info!(
            windows = windows.nrows(),
            zdims = pca.components.nrows(),
            "linear pose model fitted"
        );
        Ok(Self {
            time_window,
            num_features,
            zdims: pca.components.nrows(),
            mean: pca.mean,
            components: pca.components,
        })
    }

    /// # Errors
    /// Propagates pickle and filesystem failures.
    pub fn save(&self, path: &Path) -> Result<()> {
        let mut batch = ArtifactBatch::new();
        batch.pickle(path.to_path_buf(), self)?;
        batch.commit().map(|_| ())
    }

    fn check_shape(&self) -> Result<()> {
        let dim = self.num_features * self.time_window;
        if self.mean.len() != dim || self.components.dim() != (self.zdims, dim) {
            return Err(PipelineError::Shape(format!(
                "linear model expects mean of {dim} and {}x{dim} components",
                self.zdims
            )));
        }
        Ok(())
    }
}

impl PoseModel for LinearPoseModel {
    fn zdims(&self) -> usize {
        self.zdims
    }

    fn time_window(&self) -> usize {
        self.time_window
    }

    fn num_features(&self) -> usize {
        self.num_features
    }

    fn encode(&self, window: ArrayView2<'_, f32>) -> Array1<f32> {
        let centered: Array1<f32> = window
            .iter()
            .zip(&self.mean)
            .map(|(x, m)| x - m)
            .collect();
        self.components.dot(&centered)
    }

    fn decode(&self, latent: ArrayView1<'_, f32>) -> Array2<f32> {
        let flat = latent.dot(&self.components) + &self.mean;
        flat.into_shape_with_order((self.num_features, self.time_window))
            .unwrap_or_else(|_| Array2::zeros((self.num_features, self.time_window)))
    }
}

/// Encodes every window `data[:, t..t + time_window]` of a
/// `num_features x frames` sequence; one latent row per window.
///
/// # Errors
/// Returns [`PipelineError::InsufficientFrames`] when the sequence is not
/// longer than one window, or [`PipelineError::Shape`] on a feature mismatch.
pub fn encode_sequence(model: &dyn PoseModel, video: &str, data: ArrayView2<'_, f32>) -> Result<Array2<f32>> {
    let window = model.time_window();
    if data.nrows() != model.num_features() {
        return Err(PipelineError::Shape(format!(
            "video `{video}` has {} features, model expects {}",
            data.nrows(),
            model.num_features()
        )));
    }
    let steps = data.ncols().saturating_sub(window);
    if steps == 0 {
        return Err(PipelineError::InsufficientFrames {
            video: video.to_string(),
            available: data.ncols(),
            required: window + 1,
        });
    }

    let latents: Vec<Array1<f32>> = (0..steps)
        .into_par_iter()
        .map(|t| model.encode(data.slice(s![.., t..t + window])))
        .collect();
    let views: Vec<ArrayView1<'_, f32>> = latents.iter().map(Array1::view).collect();
    ndarray::stack(Axis(0), &views).map_err(|e| PipelineError::Shape(e.to_string()))
}
