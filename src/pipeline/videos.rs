//! Motif and community clips cut from the source videos.
use tracing::{debug, info};

use super::{Pipeline, label_indices};
use crate::contract::StageReport;
use crate::error::Result;
use crate::layout::{Artifact, Stage};
use crate::store::{ArtifactBatch, clear_matching, read_i32_vector};

#[derive(Debug, Clone, Default)]
pub struct ClipOptions {
    /// Community clips follow the cohort labels; ignored for motif clips.
    pub cohort: bool,
    pub save_logs: bool,
}

pub(crate) fn run(pipeline: &Pipeline, stage: Stage, options: &ClipOptions) -> Result<StageReport> {
    let config = &pipeline.config;
    let layout = &pipeline.layout;
    let n_cluster = layout.n_cluster();
    // Labels start at the first full window; the clip frame is its centre.
    let offset = config.time_window / 2;

    let mut batch = ArtifactBatch::new();
    let mut counts = Vec::with_capacity(config.video_sets.len());
    for video in &config.video_sets {
        let label_artifact = match stage {
            Stage::CommunityVideos if options.cohort => Artifact::CohortCommunityLabel,
            Stage::CommunityVideos => Artifact::CommunityLabel,
            _ => Artifact::MotifLabel,
        };
        let stored = read_i32_vector(&layout.artifact(video, &label_artifact))?;
        let labels = label_indices(&stored, n_cluster, stage.as_str())?;

        let mut source = pipeline
            .video
            .open(&layout.video_file(video, &config.video_type))?;
        let available = source.frame_count();
        let frames = frames_per_cluster(
            &labels,
            n_cluster,
            offset,
            config.length_of_motif_video,
            available,
        );

        let mut clips = 0_usize;
        for (cluster, indices) in frames.iter().enumerate() {
            if indices.is_empty() {
                debug!(video = %video, cluster, "no frames, clip skipped");
                continue;
            }
            let artifact = match stage {
                Stage::CommunityVideos => Artifact::CommunityClip(cluster),
                _ => Artifact::MotifClip(cluster),
            };
            let partial = batch.external(layout.artifact(video, &artifact));
            let mut writer =
                pipeline
                    .video
                    .create_clip(&partial, source.fps(), source.dimensions())?;
            for &index in indices {
                writer.push(&source.frame(index)?)?;
            }
            writer.finish()?;
            clips += 1;
        }
        info!(video = %video, clips, available, "clips encoded");
        counts.push((format!("clips.{video}"), clips));
    }

    // Clips of clusters that are now empty must not survive the rerun.
    for video in &config.video_sets {
        let removed = clear_matching(&layout.stage_dir(video, stage), &config.video_type)?;
        if removed > 0 {
            debug!(video = %video, removed, "previous clips removed");
        }
    }
    let written = batch.commit()?;
    Ok(counts.into_iter().fold(
        StageReport::completed(stage, written),
        |report, (key, value)| report.with_count(key, value),
    ))
}

/// Video frame indices of each cluster, in order, capped at `cap` and at the
/// length of the video.
fn frames_per_cluster(
    labels: &[usize],
    n_cluster: usize,
    offset: usize,
    cap: usize,
    available: usize,
) -> Vec<Vec<usize>> {
    let mut frames = vec![Vec::new(); n_cluster];
    for (t, &cluster) in labels.iter().enumerate() {
        let frame = t + offset;
        if frame >= available {
            break;
        }
        if frames[cluster].len() < cap {
            frames[cluster].push(frame);
        }
    }
    frames
}
