//! Output guarantees of each stage.
//!
//! Stages return a [`StageReport`] describing what they wrote; the same
//! guarantees can be re-checked from disk with [`verify`], e.g. before a
//! downstream stage runs or from the `verify` CLI command.
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::layout::{Artifact, CohortArtifact, ProjectLayout, Stage};

/// Structured result of one stage run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StageReport {
    pub stage: Stage,
    /// Set when the overwrite guard declined and nothing was recomputed.
    pub skipped: bool,
    pub artifacts: Vec<PathBuf>,
    /// Stage-specific counts, e.g. `clips.{video}` or `frames`.
    pub counts: BTreeMap<String, usize>,
}

impl StageReport {
    #[must_use]
    pub fn completed(stage: Stage, artifacts: Vec<PathBuf>) -> Self {
        Self {
            stage,
            skipped: false,
            artifacts,
            counts: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn skipped(stage: Stage) -> Self {
        Self {
            stage,
            skipped: true,
            artifacts: Vec::new(),
            counts: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn with_count(mut self, key: impl Into<String>, value: usize) -> Self {
        self.counts.insert(key.into(), value);
        self
    }

    #[must_use]
    pub fn count(&self, key: &str) -> Option<usize> {
        self.counts.get(key).copied()
    }

    /// Artifacts under `dir` whose file name ends with `suffix`.
    #[must_use]
    pub fn artifacts_in(&self, dir: &Path, suffix: &str) -> Vec<&PathBuf> {
        self.artifacts
            .iter()
            .filter(|path| path.parent() == Some(dir))
            .filter(|path| {
                path.file_name()
                    .and_then(|name| name.to_str())
                    .is_some_and(|name| name.ends_with(suffix))
            })
            .collect()
    }
}

/// One guaranteed output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum Expectation {
    /// A file that must exist.
    File(PathBuf),
    /// Between `min` and `max` files in `dir` ending with `suffix`.
    Count {
        dir: PathBuf,
        suffix: String,
        min: usize,
        max: usize,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum Violation {
    Missing(PathBuf),
    CountOutOfRange {
        dir: PathBuf,
        suffix: String,
        found: usize,
        min: usize,
        max: usize,
    },
}

/// Stage options that change which artifacts are guaranteed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContractOptions {
    pub cohort: bool,
    pub umap_figure: bool,
    pub gif_length: usize,
    pub video_type: String,
}

/// The artifacts `stage` guarantees for `videos` once it has completed.
///
/// Visualization and the generative model return figures and have no
/// on-disk guarantees.
#[must_use]
pub fn expectations(
    layout: &ProjectLayout,
    videos: &[String],
    stage: Stage,
    options: &ContractOptions,
) -> Vec<Expectation> {
    let mut out = Vec::new();
    if stage == Stage::Community && options.cohort {
        out.extend(
            CohortArtifact::ALL
                .iter()
                .map(|artifact| Expectation::File(layout.cohort_artifact(*artifact))),
        );
    }

    for video in videos {
        let file = |artifact: Artifact| Expectation::File(layout.artifact(video, &artifact));
        match stage {
            Stage::PoseSegmentation => {
                out.push(file(Artifact::LatentVector));
                out.push(file(Artifact::MotifUsage));
                out.push(file(Artifact::MotifLabel));
                if layout.parametrization().is_centroid_based() {
                    out.push(file(Artifact::ClusterCenter));
                }
            }
            Stage::Community => {
                if options.cohort {
                    out.push(file(Artifact::CohortCommunityLabel));
                } else {
                    out.push(file(Artifact::TransitionMatrix));
                    out.push(file(Artifact::CommunityLabel));
                    out.push(file(Artifact::Hierarchy));
                }
                if options.umap_figure {
                    out.push(file(Artifact::UmapFigure));
                }
            }
            Stage::MotifVideos | Stage::CommunityVideos => out.push(Expectation::Count {
                dir: layout.stage_dir(video, stage),
                suffix: options.video_type.clone(),
                min: 1,
                max: layout.n_cluster(),
            }),
            Stage::Gif => out.push(Expectation::Count {
                dir: layout.stage_dir(video, stage),
                suffix: ".png".to_string(),
                min: options.gif_length,
                max: options.gif_length,
            }),
            Stage::Visualization | Stage::GenerativeModel => {}
        }
    }
    out
}

/// Checks expectations against the filesystem.
#[must_use]
pub fn verify(expectations: &[Expectation]) -> Vec<Violation> {
    expectations
        .iter()
        .filter_map(|expectation| match expectation {
            Expectation::File(path) => (!path.is_file()).then(|| Violation::Missing(path.clone())),
            Expectation::Count {
                dir,
                suffix,
                min,
                max,
            } => {
                let found = count_files(dir, suffix);
                (found < *min || found > *max).then(|| Violation::CountOutOfRange {
                    dir: dir.clone(),
                    suffix: suffix.clone(),
                    found,
                    min: *min,
                    max: *max,
                })
            }
        })
        .collect()
}

fn count_files(dir: &Path, suffix: &str) -> usize {
    fs::read_dir(dir).map_or(0, |entries| {
        entries
            .filter_map(std::result::Result::ok)
            .filter(|entry| {
                entry
                    .file_name()
                    .to_str()
                    .is_some_and(|name| name.ends_with(suffix))
            })
            .count()
    })
}
