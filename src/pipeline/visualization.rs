//! 2-D view of the latent space.
use ndarray::{Array2, Axis};
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::index::sample;
use tracing::info;

use super::Pipeline;
use crate::analysis::projection::Pca;
use crate::error::{PipelineError, Result};
use crate::figure::{Figure, Panel};
use crate::layout::Artifact;
use crate::store::{read_f32_matrix, read_i32_vector};

/// Which labels colour a latent projection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LabelKind {
    #[default]
    None,
    Motif,
    Community,
}

impl LabelKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Motif => "motif",
            Self::Community => "community",
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct VisualizationOptions {
    pub label: LabelKind,
    /// Defaults to the first configured video.
    pub video: Option<String>,
    pub save_logs: bool,
}

pub(crate) fn run(pipeline: &Pipeline, options: &VisualizationOptions) -> Result<Figure> {
    let layout = &pipeline.layout;
    let video = pipeline.video_or_first(options.video.as_deref())?;
    let latent = read_f32_matrix(&layout.artifact(&video, &Artifact::LatentVector))?;
    let labels = match options.label {
        LabelKind::None => None,
        LabelKind::Motif => Some(read_labels(pipeline, &video, &Artifact::MotifLabel)?),
        LabelKind::Community => Some(read_labels(pipeline, &video, &Artifact::CommunityLabel)?),
    };
    if let Some(labels) = &labels {
        if labels.len() != latent.nrows() {
            return Err(PipelineError::Shape(format!(
                "{} labels for {} latent rows of `{video}`",
                labels.len(),
                latent.nrows()
            )));
        }
    }

    let (points, labels) = project_latents(
        &latent,
        labels.as_deref(),
        pipeline.config.num_points,
        pipeline.config.random_state,
    );
    info!(video = %video, points = points.len(), label = options.label.as_str(), "latent projection computed");
    Ok(Figure::new(format!("{video} latent projection")).with_panel(Panel::Scatter {
        title: format!("{video} ({})", options.label.as_str()),
        points,
        labels,
    }))
}

fn read_labels(pipeline: &Pipeline, video: &str, artifact: &Artifact) -> Result<Vec<i32>> {
    Ok(read_i32_vector(&pipeline.layout.artifact(video, artifact))?.to_vec())
}

/// Projects at most `num_points` latent rows to 2-D; rows are sampled with a
/// seeded rng when there are more, keeping labels aligned.
pub(crate) fn project_latents(
    latent: &Array2<f32>,
    labels: Option<&[i32]>,
    num_points: usize,
    seed: u64,
) -> (Vec<[f32; 2]>, Option<Vec<i32>>) {
    let rows = latent.nrows();
    let mut selected: Vec<usize> = if rows > num_points {
        let mut rng = StdRng::seed_from_u64(seed);
        sample(&mut rng, rows, num_points).into_vec()
    } else {
        (0..rows).collect()
    };
    selected.sort_unstable();

    let subset = latent.select(Axis(0), &selected);
    let projected = Pca::fit(subset.view(), 2).transform(subset.view());
    let points = projected
        .rows()
        .into_iter()
        .map(|row| [row.get(0).copied().unwrap_or(0.0), row.get(1).copied().unwrap_or(0.0)])
        .collect();
    let labels = labels.map(|labels| selected.iter().map(|&i| labels[i]).collect());
    (points, labels)
}
