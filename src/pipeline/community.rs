//! Community analysis: transition matrices, motif hierarchy and the cut into
//! communities, per video or pooled over the cohort.
use ndarray::{Array1, Array2};
use tracing::{debug, info};

use super::visualization::project_latents;
use super::{Pipeline, label_indices, to_i32_labels};
use crate::analysis::hierarchy::{Hierarchy, community_bag};
use crate::analysis::transition::{motif_usage, transition_counts, transition_matrix};
use crate::contract::StageReport;
use crate::error::{PipelineError, Result};
use crate::figure::{Figure, Panel};
use crate::layout::{Artifact, CohortArtifact, Stage};
use crate::store::{ArtifactBatch, read_f32_matrix, read_i32_vector};

#[derive(Debug, Clone, Default)]
pub struct CommunityOptions {
    /// Tree depth at which motifs are grouped.
    pub cut_tree: usize,
    /// Pool all videos into one hierarchy.
    pub cohort: bool,
    pub show_umap: bool,
    pub save_umap_figure: bool,
    pub save_logs: bool,
}

/// Result of cutting one hierarchy.
struct Communities {
    hierarchy: Hierarchy,
    counts: Array2<f64>,
    /// Community of each motif.
    of_motif: Vec<usize>,
}

impl Communities {
    fn build(labels: &[&[usize]], n_cluster: usize, cut_tree: usize) -> Result<Self> {
        let mut counts = Array2::zeros((n_cluster, n_cluster));
        let mut usage = Array1::<i64>::zeros(n_cluster);
        // Sequences are counted separately so no transition spans two videos.
        for sequence in labels {
            counts += &transition_counts(sequence, n_cluster);
            usage += &motif_usage(sequence, n_cluster);
        }
        #[allow(clippy::cast_precision_loss)]
        let usage: Vec<f64> = usage.iter().map(|&u| u as f64).collect();
        let hierarchy = Hierarchy::build(&usage, &counts)?;
        let of_motif = hierarchy.communities(cut_tree)?;
        debug!(
            depth = hierarchy.depth(),
            communities = of_motif.iter().max().map_or(0, |m| m + 1),
            "hierarchy cut"
        );
        Ok(Self {
            hierarchy,
            counts,
            of_motif,
        })
    }

    fn len(&self) -> usize {
        self.of_motif.iter().max().map_or(0, |m| m + 1)
    }

    fn label(&self, motifs: &[usize]) -> Result<Array1<i32>> {
        let communities: Vec<usize> = motifs.iter().map(|&m| self.of_motif[m]).collect();
        to_i32_labels(&communities)
    }
}

pub(crate) fn run(pipeline: &Pipeline, options: &CommunityOptions) -> Result<StageReport> {
    let config = &pipeline.config;
    let layout = &pipeline.layout;
    let n_cluster = layout.n_cluster();

    let mut motif_labels = Vec::with_capacity(config.video_sets.len());
    for video in &config.video_sets {
        let stored = read_i32_vector(&layout.artifact(video, &Artifact::MotifLabel))?;
        motif_labels.push(label_indices(&stored, n_cluster, "motif")?);
    }

    let mut batch = ArtifactBatch::new();
    let mut community_labels = Vec::with_capacity(motif_labels.len());
    let mut counts = Vec::new();

    if options.cohort {
        let sequences: Vec<&[usize]> = motif_labels.iter().map(Vec::as_slice).collect();
        let cohort = Communities::build(&sequences, n_cluster, options.cut_tree)?;
        let pooled: Vec<usize> = motif_labels.iter().flatten().copied().collect();

        batch.f32_matrix(
            layout.cohort_artifact(CohortArtifact::TransitionMatrix),
            transition_matrix(&cohort.counts),
        );
        batch.i32_vector(
            layout.cohort_artifact(CohortArtifact::CommunityLabel),
            cohort.label(&pooled)?,
        );
        batch.i32_vector(
            layout.cohort_artifact(CohortArtifact::ParametrizationLabel),
            to_i32_labels(&pooled)?,
        );
        batch.i32_matrix(
            layout.cohort_artifact(CohortArtifact::CommunityBag),
            padded_bag(&community_bag(&cohort.of_motif))?,
        );
        counts.push(("communities".to_string(), cohort.len()));
        for (video, motifs) in config.video_sets.iter().zip(&motif_labels) {
            let labels = cohort.label(motifs)?;
            batch.i32_vector(
                layout.artifact(video, &Artifact::CohortCommunityLabel),
                labels.clone(),
            );
            community_labels.push(labels);
        }
        info!(
            videos = config.video_sets.len(),
            frames = pooled.len(),
            depth = cohort.hierarchy.depth(),
            "cohort communities computed"
        );
    } else {
        for (video, motifs) in config.video_sets.iter().zip(&motif_labels) {
            let own = Communities::build(&[motifs.as_slice()], n_cluster, options.cut_tree)?;
            let labels = own.label(motifs)?;
            counts.push((format!("communities.{video}"), own.len()));
            batch.f32_matrix(
                layout.artifact(video, &Artifact::TransitionMatrix),
                transition_matrix(&own.counts),
            );
            batch.i32_vector(
                layout.artifact(video, &Artifact::CommunityLabel),
                labels.clone(),
            );
            batch.pickle(layout.artifact(video, &Artifact::Hierarchy), &own.hierarchy)?;
            info!(video = %video, depth = own.hierarchy.depth(), "communities computed");
            community_labels.push(labels);
        }
    }

    if options.show_umap {
        if options.save_umap_figure {
            for (video, labels) in config.video_sets.iter().zip(&community_labels) {
                let figure = umap_figure(pipeline, video, labels)?;
                batch.png(
                    layout.artifact(video, &Artifact::UmapFigure),
                    figure.render(480, 360),
                );
            }
        } else {
            debug!("latent projection requested without save_umap_figure, nothing rendered");
        }
    }

    let written = batch.commit()?;
    Ok(counts.into_iter().fold(
        StageReport::completed(Stage::Community, written),
        |report, (key, value)| report.with_count(key, value),
    ))
}

fn umap_figure(pipeline: &Pipeline, video: &str, labels: &Array1<i32>) -> Result<Figure> {
    let latent = read_f32_matrix(&pipeline.layout.artifact(video, &Artifact::LatentVector))?;
    if latent.nrows() != labels.len() {
        return Err(PipelineError::Shape(format!(
            "{} community labels for {} latent rows of `{video}`",
            labels.len(),
            latent.nrows()
        )));
    }
    let labels = labels.to_vec();
    let (points, labels) = project_latents(
        &latent,
        Some(&labels),
        pipeline.config.num_points,
        pipeline.config.random_state,
    );
    Ok(Figure::new(format!("{video} communities")).with_panel(Panel::Scatter {
        title: format!("{video} communities"),
        points,
        labels,
    }))
}

/// Community bag as a `communities x max_size` matrix padded with `-1`.
fn padded_bag(bag: &[Vec<usize>]) -> Result<Array2<i32>> {
    let width = bag.iter().map(Vec::len).max().unwrap_or(0);
    let mut matrix = Array2::from_elem((bag.len(), width), -1);
    for (row, motifs) in bag.iter().enumerate() {
        for (col, value) in to_i32_labels(motifs)?.iter().enumerate() {
            matrix[[row, col]] = *value;
        }
    }
    Ok(matrix)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn bag_is_padded_with_minus_one() {
        let bag = vec![vec![0, 2, 3], vec![1]];
        assert_eq!(padded_bag(&bag).unwrap(), array![[0, 2, 3], [1, -1, -1]]);
    }

    #[test]
    fn cohort_counts_do_not_bridge_videos() {
        let a = [0_usize, 0, 1];
        let b = [2_usize, 2, 3];
        let communities = Communities::build(&[&a[..], &b[..]], 4, 0).unwrap();
        // 1 -> 2 would only appear if the sequences were concatenated.
        assert_eq!(communities.counts[[1, 2]], 0.0);
        assert_eq!(communities.counts[[0, 1]], 1.0);
        assert_eq!(communities.of_motif, vec![0; 4]);
    }

    #[test]
    fn cut_below_tree_depth_fails() {
        let labels = [0_usize, 1, 0, 1];
        let err = Communities::build(&[&labels[..]], 2, 5).err().expect("too deep");
        assert!(matches!(
            err,
            PipelineError::InvalidTreeDepth {
                requested: 5,
                depth: 1
            }
        ));
    }
}
