//! Canonical paths for every input and artifact of a project.
//!
//! Per-video artifacts live under
//! `{project_path}/results/{video}/{model_name}/{parametrization}-{n_cluster}/`,
//! cohort artifacts directly under `{project_path}`.
use std::fmt;
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::config::{Parametrization, ProjectConfig};
use crate::error::Result;

/// Pipeline stages, in dependency order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    PoseSegmentation,
    Community,
    MotifVideos,
    CommunityVideos,
    Visualization,
    GenerativeModel,
    Gif,
}

impl Stage {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::PoseSegmentation => "pose_segmentation",
            Self::Community => "community",
            Self::MotifVideos => "motif_videos",
            Self::CommunityVideos => "community_videos",
            Self::Visualization => "visualization",
            Self::GenerativeModel => "generative_model",
            Self::Gif => "gif",
        }
    }

    /// Subdirectory of the per-video result root, `None` for the root itself.
    #[must_use]
    pub fn subdir(self) -> Option<&'static str> {
        match self {
            Self::PoseSegmentation | Self::Visualization | Self::GenerativeModel => None,
            Self::Community => Some("community"),
            Self::MotifVideos => Some("cluster_videos"),
            Self::CommunityVideos => Some("community_videos"),
            Self::Gif => Some("gif_frames"),
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-video artifact kinds.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Artifact {
    LatentVector,
    MotifUsage,
    MotifLabel,
    ClusterCenter,
    TransitionMatrix,
    CommunityLabel,
    Hierarchy,
    CohortCommunityLabel,
    UmapFigure,
    MotifClip(usize),
    CommunityClip(usize),
    GifFrame(usize),
    Gif(String),
}

impl Artifact {
    /// The stage that owns (writes) this artifact.
    #[must_use]
    pub fn stage(&self) -> Stage {
        match self {
            Self::LatentVector | Self::MotifUsage | Self::MotifLabel | Self::ClusterCenter => {
                Stage::PoseSegmentation
            }
            Self::TransitionMatrix
            | Self::CommunityLabel
            | Self::Hierarchy
            | Self::CohortCommunityLabel
            | Self::UmapFigure => Stage::Community,
            Self::MotifClip(_) => Stage::MotifVideos,
            Self::CommunityClip(_) => Stage::CommunityVideos,
            Self::GifFrame(_) | Self::Gif(_) => Stage::Gif,
        }
    }

    fn file_name(
        &self,
        video: &str,
        n_cluster: usize,
        parametrization: Parametrization,
        video_type: &str,
    ) -> String {
        match self {
            Self::LatentVector => format!("latent_vector_{video}.npy"),
            Self::MotifUsage => format!("motif_usage_{video}.npy"),
            Self::MotifLabel => format!("{n_cluster}_{parametrization}_label_{video}.npy"),
            Self::ClusterCenter => format!("cluster_center_{video}.npy"),
            Self::TransitionMatrix => format!("transition_matrix_{video}.npy"),
            Self::CommunityLabel => format!("community_label_{video}.npy"),
            Self::Hierarchy => format!("hierarchy{video}.pkl"),
            Self::CohortCommunityLabel => format!("cohort_community_label_{video}.npy"),
            Self::UmapFigure => format!("{video}_umap.png"),
            Self::MotifClip(motif) => format!("{video}-motif_{motif}{video_type}"),
            Self::CommunityClip(community) => format!("{video}-community_{community}{video_type}"),
            Self::GifFrame(index) => format!("{video}gif_{index}.png"),
            Self::Gif(label) => format!("{video}_{label}.gif"),
        }
    }
}

/// Project-root artifacts produced by cohort-mode community analysis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CohortArtifact {
    TransitionMatrix,
    CommunityLabel,
    ParametrizationLabel,
    CommunityBag,
}

impl CohortArtifact {
    pub const ALL: [Self; 4] = [
        Self::TransitionMatrix,
        Self::CommunityLabel,
        Self::ParametrizationLabel,
        Self::CommunityBag,
    ];

    fn file_name(self, parametrization: Parametrization) -> String {
        match self {
            Self::TransitionMatrix => "cohort_transition_matrix.npy".to_string(),
            Self::CommunityLabel => "cohort_community_label.npy".to_string(),
            Self::ParametrizationLabel => format!("cohort_{parametrization}_label.npy"),
            Self::CommunityBag => "cohort_community_bag.npy".to_string(),
        }
    }
}

/// Resolves paths from a validated config.
///
/// The resolver copies the fields it needs, so a config mutated after
/// construction does not leak into paths already handed out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectLayout {
    project: String,
    project_path: PathBuf,
    model_name: String,
    parametrization: Parametrization,
    n_cluster: usize,
    video_type: String,
}

impl ProjectLayout {
    /// # Errors
    /// Fails with `ConfigIncomplete` or `InvalidClusterCount` when the config
    /// cannot produce unambiguous paths.
    pub fn new(config: &ProjectConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            project: config.project.clone(),
            project_path: config.project_path.clone(),
            model_name: config.model_name.clone(),
            parametrization: config.parametrization,
            n_cluster: config.cluster_count()?,
            video_type: config.video_type.clone(),
        })
    }

    #[must_use]
    pub fn project_path(&self) -> &Path {
        &self.project_path
    }

    #[must_use]
    pub fn n_cluster(&self) -> usize {
        self.n_cluster
    }

    #[must_use]
    pub fn parametrization(&self) -> Parametrization {
        self.parametrization
    }

    /// `{project}/results/{video}/{model}/{param}-{n}`
    #[must_use]
    pub fn results_dir(&self, video: &str) -> PathBuf {
        self.project_path
            .join("results")
            .join(video)
            .join(&self.model_name)
            .join(format!("{}-{}", self.parametrization, self.n_cluster))
    }

    #[must_use]
    pub fn stage_dir(&self, video: &str, stage: Stage) -> PathBuf {
        let root = self.results_dir(video);
        match stage.subdir() {
            Some(sub) => root.join(sub),
            None => root,
        }
    }

    #[must_use]
    pub fn artifact(&self, video: &str, artifact: &Artifact) -> PathBuf {
        let name = artifact.file_name(
            video,
            self.n_cluster,
            self.parametrization,
            &self.video_type,
        );
        // The assembled gif sits next to its frame directory, not inside it.
        if matches!(artifact, Artifact::Gif(_)) {
            return self.results_dir(video).join(name);
        }
        self.stage_dir(video, artifact.stage()).join(name)
    }

    #[must_use]
    pub fn cohort_artifact(&self, artifact: CohortArtifact) -> PathBuf {
        self.project_path
            .join(artifact.file_name(self.parametrization))
    }

    #[must_use]
    pub fn model_path(&self) -> PathBuf {
        self.project_path
            .join("model")
            .join("best_model")
            .join(format!("{}_{}.pkl", self.model_name, self.project))
    }

    /// Egocentric, cleaned pose series (features x time).
    #[must_use]
    pub fn pose_data(&self, video: &str) -> PathBuf {
        self.project_path
            .join("data")
            .join(video)
            .join(format!("{video}-PE-seq-clean.npy"))
    }

    /// Raw image-space keypoints (features x time, interleaved x/y).
    #[must_use]
    pub fn raw_pose_data(&self, video: &str) -> PathBuf {
        self.project_path
            .join("data")
            .join(video)
            .join(format!("{video}-PE-seq.npy"))
    }

    #[must_use]
    pub fn video_file(&self, video: &str, file_format: &str) -> PathBuf {
        self.project_path
            .join("videos")
            .join(format!("{video}{file_format}"))
    }

    #[must_use]
    pub fn log_file(&self, stage: Stage) -> PathBuf {
        self.project_path
            .join("logs")
            .join(format!("{}.log", stage.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn layout(n_cluster: i64, parametrization: Parametrization) -> ProjectLayout {
        let mut config = ProjectConfig::new(
            "demo",
            PathBuf::from("/data/demo"),
            vec!["mouse-1".to_string()],
        );
        config.n_cluster = n_cluster;
        config.parametrization = parametrization;
        ProjectLayout::new(&config).expect("valid config")
    }

    #[test]
    fn results_dir_follows_hierarchy() {
        let layout = layout(15, Parametrization::Hmm);
        assert_eq!(
            layout.results_dir("mouse-1"),
            PathBuf::from("/data/demo/results/mouse-1/VAME/hmm-15")
        );
    }

    #[rstest]
    #[case(Artifact::LatentVector, "hmm-15/latent_vector_mouse-1.npy")]
    #[case(Artifact::MotifLabel, "hmm-15/15_hmm_label_mouse-1.npy")]
    #[case(Artifact::Hierarchy, "hmm-15/community/hierarchymouse-1.pkl")]
    #[case(Artifact::UmapFigure, "hmm-15/community/mouse-1_umap.png")]
    #[case(Artifact::MotifClip(3), "hmm-15/cluster_videos/mouse-1-motif_3.mp4")]
    #[case(Artifact::CommunityClip(0), "hmm-15/community_videos/mouse-1-community_0.mp4")]
    #[case(Artifact::GifFrame(29), "hmm-15/gif_frames/mouse-1gif_29.png")]
    #[case(Artifact::Gif("motif".into()), "hmm-15/mouse-1_motif.gif")]
    fn artifact_paths(#[case] artifact: Artifact, #[case] suffix: &str) {
        let path = layout(15, Parametrization::Hmm).artifact("mouse-1", &artifact);
        assert!(
            path.ends_with(suffix),
            "{} does not end with {suffix}",
            path.display()
        );
    }

    #[test]
    fn cohort_artifacts_sit_at_project_root() {
        let layout = layout(10, Parametrization::Kmeans);
        assert_eq!(
            layout.cohort_artifact(CohortArtifact::ParametrizationLabel),
            PathBuf::from("/data/demo/cohort_kmeans_label.npy")
        );
        for artifact in CohortArtifact::ALL {
            assert_eq!(
                layout.cohort_artifact(artifact).parent(),
                Some(Path::new("/data/demo"))
            );
        }
    }

    #[test]
    fn distinct_parametrizations_do_not_collide() {
        let a = layout(10, Parametrization::Kmeans).artifact("v", &Artifact::LatentVector);
        let b = layout(10, Parametrization::Hmm).artifact("v", &Artifact::LatentVector);
        let c = layout(11, Parametrization::Kmeans).artifact("v", &Artifact::LatentVector);
        assert_ne!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn model_path_uses_project_name() {
        assert_eq!(
            layout(15, Parametrization::Hmm).model_path(),
            PathBuf::from("/data/demo/model/best_model/VAME_demo.pkl")
        );
    }
}
