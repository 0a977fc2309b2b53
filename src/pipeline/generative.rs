//! Decoding latent vectors back into pose windows.
use std::fmt;
use std::str::FromStr;

use ndarray::{Array1, Array2, ArrayView2, Axis, s};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;
use tracing::info;

use super::{Pipeline, label_indices};
use crate::error::{PipelineError, Result};
use crate::figure::{Figure, Panel};
use crate::layout::Artifact;
use crate::model::PoseModel;
use crate::store::{read_f32_matrix, read_i32_vector};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GenerativeMode {
    /// Decode draws from the standard normal prior.
    #[default]
    Sampling,
    /// Encode and decode real windows side by side.
    Reconstruction,
    /// Decode the mean latent of each used motif.
    Motifs,
    /// Decode stored k-means centres.
    Centers,
}

impl GenerativeMode {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Sampling => "sampling",
            Self::Reconstruction => "reconstruction",
            Self::Motifs => "motifs",
            Self::Centers => "centers",
        }
    }
}

impl fmt::Display for GenerativeMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for GenerativeMode {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sampling" => Ok(Self::Sampling),
            "reconstruction" => Ok(Self::Reconstruction),
            "motifs" => Ok(Self::Motifs),
            "centers" => Ok(Self::Centers),
            other => Err(PipelineError::InvalidOption {
                name: "mode",
                reason: format!("unknown generative mode `{other}`"),
            }),
        }
    }
}

#[derive(Debug, Clone)]
pub struct GenerativeOptions {
    pub mode: GenerativeMode,
    /// Defaults to the first configured video.
    pub video: Option<String>,
    /// Draws for `sampling`, windows for `reconstruction`.
    pub samples: usize,
    /// Overrides `random_state`.
    pub seed: Option<u64>,
    pub save_logs: bool,
}

impl Default for GenerativeOptions {
    fn default() -> Self {
        Self {
            mode: GenerativeMode::default(),
            video: None,
            samples: 9,
            seed: None,
            save_logs: false,
        }
    }
}

pub(crate) fn run(pipeline: &Pipeline, options: &GenerativeOptions) -> Result<Figure> {
    let parametrization = pipeline.layout.parametrization();
    if options.mode == GenerativeMode::Centers && !parametrization.is_centroid_based() {
        return Err(PipelineError::UnsupportedMode {
            mode: options.mode.to_string(),
            parametrization: parametrization.to_string(),
        });
    }

    let model = pipeline.load_model()?;
    let video = pipeline.video_or_first(options.video.as_deref())?;
    let mut rng = StdRng::seed_from_u64(options.seed.unwrap_or(pipeline.config.random_state));
    let title = format!("{video} {}", options.mode);

    let panels = match options.mode {
        GenerativeMode::Sampling => sampling(model.as_ref(), options.samples, &mut rng),
        GenerativeMode::Reconstruction => {
            let data = read_f32_matrix(&pipeline.layout.pose_data(&video))?;
            reconstruction(model.as_ref(), &video, data.view(), options.samples, &mut rng)?
        }
        GenerativeMode::Motifs => {
            let latent = read_latent(pipeline, model.as_ref(), &video)?;
            let stored = read_i32_vector(&pipeline.layout.artifact(&video, &Artifact::MotifLabel))?;
            let labels = label_indices(&stored, pipeline.layout.n_cluster(), "motif")?;
            motif_means(model.as_ref(), &latent, &labels, pipeline.layout.n_cluster())?
        }
        GenerativeMode::Centers => {
            let centers =
                read_f32_matrix(&pipeline.layout.artifact(&video, &Artifact::ClusterCenter))?;
            check_latent_width(model.as_ref(), &centers)?;
            centers
                .rows()
                .into_iter()
                .enumerate()
                .map(|(i, center)| lines(format!("center {i}"), &model.decode(center)))
                .collect()
        }
    };

    info!(video = %video, mode = %options.mode, panels = panels.len(), "generative figure built");
    Ok(panels
        .into_iter()
        .fold(Figure::new(title), Figure::with_panel))
}

fn sampling(model: &dyn PoseModel, samples: usize, rng: &mut StdRng) -> Vec<Panel> {
    (0..samples)
        .map(|i| {
            let latent: Array1<f32> = (0..model.zdims())
                .map(|_| rng.sample::<f32, _>(StandardNormal))
                .collect();
            lines(format!("sample {i}"), &model.decode(latent.view()))
        })
        .collect()
}

fn reconstruction(
    model: &dyn PoseModel,
    video: &str,
    data: ArrayView2<'_, f32>,
    samples: usize,
    rng: &mut StdRng,
) -> Result<Vec<Panel>> {
    let window = model.time_window();
    let starts = data.ncols().saturating_sub(window);
    if starts == 0 {
        return Err(PipelineError::InsufficientFrames {
            video: video.to_string(),
            available: data.ncols(),
            required: window + 1,
        });
    }
    let mut panels = Vec::with_capacity(samples * 2);
    for _ in 0..samples {
        let t = rng.random_range(0..starts);
        let original = data.slice(s![.., t..t + window]);
        let decoded = model.decode(model.encode(original).view());
        panels.push(lines(format!("original t={t}"), &original.to_owned()));
        panels.push(lines(format!("reconstruction t={t}"), &decoded));
    }
    Ok(panels)
}

fn motif_means(
    model: &dyn PoseModel,
    latent: &Array2<f32>,
    labels: &[usize],
    n_cluster: usize,
) -> Result<Vec<Panel>> {
    if labels.len() != latent.nrows() {
        return Err(PipelineError::Shape(format!(
            "{} motif labels for {} latent rows",
            labels.len(),
            latent.nrows()
        )));
    }
    let mut panels = Vec::new();
    for motif in 0..n_cluster {
        let rows: Vec<usize> = (0..labels.len()).filter(|&t| labels[t] == motif).collect();
        if rows.is_empty() {
            continue;
        }
        let Some(mean) = latent.select(Axis(0), &rows).mean_axis(Axis(0)) else {
            continue;
        };
        panels.push(lines(format!("motif {motif}"), &model.decode(mean.view())));
    }
    Ok(panels)
}

fn read_latent(pipeline: &Pipeline, model: &dyn PoseModel, video: &str) -> Result<Array2<f32>> {
    let latent = read_f32_matrix(&pipeline.layout.artifact(video, &Artifact::LatentVector))?;
    check_latent_width(model, &latent)?;
    Ok(latent)
}

fn check_latent_width(model: &dyn PoseModel, latent: &Array2<f32>) -> Result<()> {
    if latent.ncols() == model.zdims() {
        Ok(())
    } else {
        Err(PipelineError::Shape(format!(
            "latent rows have {} dims, model decodes {}",
            latent.ncols(),
            model.zdims()
        )))
    }
}

/// One line per pose feature over the window.
fn lines(title: String, window: &Array2<f32>) -> Panel {
    Panel::Lines {
        title,
        series: window.rows().into_iter().map(|row| row.to_vec()).collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("sampling", GenerativeMode::Sampling)]
    #[case("Reconstruction", GenerativeMode::Reconstruction)]
    #[case(" motifs ", GenerativeMode::Motifs)]
    #[case("centers", GenerativeMode::Centers)]
    fn modes_parse(#[case] input: &str, #[case] expected: GenerativeMode) {
        assert_eq!(input.parse::<GenerativeMode>().unwrap(), expected);
    }

    #[test]
    fn unknown_mode_is_an_invalid_option() {
        assert!(matches!(
            "umap".parse::<GenerativeMode>(),
            Err(PipelineError::InvalidOption { name: "mode", .. })
        ));
    }

    #[test]
    fn window_rows_become_series() {
        let window = Array2::from_shape_fn((3, 5), |(f, t)| (f * 10 + t) as f32);
        let Panel::Lines { series, .. } = lines("w".into(), &window) else {
            panic!("expected lines");
        };
        assert_eq!(series.len(), 3);
        assert_eq!(series[2][4], 24.0);
    }
}
