//! Pose segmentation: latent embedding and motif labelling.
use ndarray::{Array2, ArrayView2, Axis};
use tracing::{info, warn};

use super::{Pipeline, to_i32_labels};
use crate::analysis::hmm::{GaussianHmm, HmmSettings};
use crate::analysis::kmeans::KMeans;
use crate::analysis::transition::motif_usage;
use crate::config::{Parametrization, ProjectConfig};
use crate::contract::StageReport;
use crate::error::{PipelineError, Result};
use crate::layout::{Artifact, Stage};
use crate::model::encode_sequence;
use crate::store::{ArtifactBatch, read_f32_matrix};

/// Labels of one fit, plus centroids for centroid-based methods.
struct Segmentation {
    labels: Vec<usize>,
    centers: Option<Array2<f32>>,
}

pub(crate) fn run(pipeline: &Pipeline) -> Result<StageReport> {
    let config = &pipeline.config;
    let layout = &pipeline.layout;
    let model = pipeline.load_model()?;

    let existing = config
        .video_sets
        .iter()
        .filter(|video| layout.artifact(video, &Artifact::LatentVector).is_file())
        .count();
    if existing > 0 {
        let prompt = format!(
            "Latent vectors already exist for {existing} of {} videos. Recompute and overwrite? [y/N]",
            config.video_sets.len()
        );
        if !pipeline.confirm.confirm(&prompt)? {
            info!(existing, "overwrite declined, keeping existing segmentation");
            return Ok(StageReport::skipped(Stage::PoseSegmentation));
        }
    }

    let mut latents = Vec::with_capacity(config.video_sets.len());
    for video in &config.video_sets {
        let data = read_f32_matrix(&layout.pose_data(video))?;
        let latent = encode_sequence(model.as_ref(), video, data.view())?;
        info!(video = %video, windows = latent.nrows(), "latent vectors embedded");
        latents.push(latent);
    }

    let n_cluster = layout.n_cluster();
    let segmentations = if config.individual_parametrization {
        latents
            .iter()
            .map(|latent| parametrize(config, latent.view(), n_cluster))
            .collect::<Vec<_>>()
    } else {
        let views: Vec<ArrayView2<'_, f32>> = latents.iter().map(Array2::view).collect();
        let pooled = ndarray::concatenate(Axis(0), &views)
            .map_err(|e| PipelineError::Shape(e.to_string()))?;
        let fit = parametrize(config, pooled.view(), n_cluster);
        split(fit, latents.iter().map(Array2::nrows))
    };

    let windows: Vec<(String, usize)> = config
        .video_sets
        .iter()
        .zip(&latents)
        .map(|(video, latent)| (format!("windows.{video}"), latent.nrows()))
        .collect();

    let mut batch = ArtifactBatch::new();
    for ((video, latent), segmentation) in config.video_sets.iter().zip(latents).zip(segmentations) {
        let usage = motif_usage(&segmentation.labels, n_cluster);
        let unused = usage.iter().filter(|&&count| count == 0).count();
        if unused > 0 {
            warn!(video = %video, unused, "some motifs were not assigned any frame");
        }
        batch.f32_matrix(layout.artifact(video, &Artifact::LatentVector), latent);
        batch.i32_vector(
            layout.artifact(video, &Artifact::MotifLabel),
            to_i32_labels(&segmentation.labels)?,
        );
        batch.i64_vector(layout.artifact(video, &Artifact::MotifUsage), usage);
        if let Some(centers) = segmentation.centers {
            batch.f32_matrix(layout.artifact(video, &Artifact::ClusterCenter), centers);
        }
    }

    let written = batch.commit()?;
    info!(
        videos = config.video_sets.len(),
        artifacts = written.len(),
        parametrization = %config.parametrization,
        individual = config.individual_parametrization,
        "pose segmentation finished"
    );
    Ok(windows.into_iter().fold(
        StageReport::completed(Stage::PoseSegmentation, written),
        |report, (key, value)| report.with_count(key, value),
    ))
}

fn parametrize(config: &ProjectConfig, data: ArrayView2<'_, f32>, n_cluster: usize) -> Segmentation {
    if data.nrows() < n_cluster {
        warn!(
            rows = data.nrows(),
            n_cluster, "fewer latent rows than clusters, some motifs stay empty"
        );
    }
    match config.parametrization {
        Parametrization::Kmeans => {
            let km = KMeans::fit(
                data,
                n_cluster,
                config.kmeans_max_iterations,
                config.n_init_kmeans,
                config.random_state,
            );
            info!(inertia = km.inertia, "k-means fitted");
            Segmentation {
                labels: km.assignments,
                centers: Some(km.centroids),
            }
        }
        Parametrization::Hmm => {
            let hmm = GaussianHmm::fit(
                data,
                HmmSettings {
                    states: n_cluster,
                    iterations: config.hmm_iterations,
                    kmeans_iterations: config.kmeans_max_iterations,
                    kmeans_restarts: config.n_init_kmeans,
                    seed: config.random_state,
                },
            );
            Segmentation {
                labels: hmm.viterbi(data),
                centers: None,
            }
        }
    }
}

/// Splits a pooled fit back into per-video label runs; centroids are shared.
fn split(fit: Segmentation, lengths: impl Iterator<Item = usize>) -> Vec<Segmentation> {
    let mut offset = 0;
    lengths
        .map(|len| {
            let labels = fit.labels[offset..offset + len].to_vec();
            offset += len;
            Segmentation {
                labels,
                centers: fit.centers.clone(),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_restores_video_boundaries() {
        let fit = Segmentation {
            labels: vec![0, 1, 1, 2, 0],
            centers: Some(Array2::zeros((3, 2))),
        };
        let parts = split(fit, [2_usize, 3].into_iter());
        assert_eq!(parts[0].labels, vec![0, 1]);
        assert_eq!(parts[1].labels, vec![1, 2, 0]);
        assert!(parts.iter().all(|p| p.centers.is_some()));
    }
}
