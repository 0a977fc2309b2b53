//! 合成プロジェクトを一時ディレクトリに構築するテスト用ヘルパー。
#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::Arc;

use ndarray::Array2;
use ndarray_npy::write_npy;
use tempfile::TempDir;

use motif_worker::config::{ConfigStore, Parametrization, ProjectConfig};
use motif_worker::layout::ProjectLayout;
use motif_worker::media::SyntheticBackend;
use motif_worker::model::LinearPoseModel;
use motif_worker::pipeline::{Confirm, Overwrite, Pipeline};
use motif_worker::project::init_new_project;

pub const VIDEOS: [&str; 2] = ["mouse-a", "mouse-b"];
/// Pose frames per video.
pub const FRAMES: usize = 200;
/// Frames of the synthetic source video; longer than the pose series.
pub const VIDEO_FRAMES: usize = 300;
pub const TIME_WINDOW: usize = 10;
pub const N_CLUSTER: usize = 4;
pub const KEYPOINTS: usize = 6;

pub struct Fixture {
    pub dir: TempDir,
    pub config_path: PathBuf,
    pub config: ProjectConfig,
}

impl Fixture {
    /// Initialized project with pose data for [`VIDEOS`] and a trained linear model.
    pub fn new(parametrization: Parametrization) -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let videos: Vec<String> = VIDEOS.iter().map(ToString::to_string).collect();
        let config_path = init_new_project("demo", &videos, dir.path()).expect("init project");
        let config = ConfigStore::update(&config_path, |c| {
            c.n_cluster = N_CLUSTER as i64;
            c.parametrization = parametrization;
            c.time_window = TIME_WINDOW;
            c.zdims = 3;
            c.num_features = 4;
            c.n_init_kmeans = 3;
            c.kmeans_max_iterations = 50;
            c.hmm_iterations = 5;
            c.num_points = 120;
            c.length_of_motif_video = 40;
        })
        .expect("configure project");

        let layout = ProjectLayout::new(&config).expect("layout");
        let mut sequences = Vec::new();
        for (seed, video) in videos.iter().enumerate() {
            let pose = pose_sequence(seed);
            write_npy(layout.pose_data(video), &pose).expect("write pose data");
            write_npy(layout.raw_pose_data(video), &raw_pose(seed)).expect("write raw pose");
            sequences.push((video.clone(), pose));
        }
        LinearPoseModel::fit(&sequences, TIME_WINDOW, 3)
            .expect("fit model")
            .save(&layout.model_path())
            .expect("save model");

        Self {
            dir,
            config_path,
            config,
        }
    }

    pub fn layout(&self) -> ProjectLayout {
        ProjectLayout::new(&self.config).expect("layout")
    }

    pub fn pipeline(&self) -> Pipeline {
        self.pipeline_with(Overwrite(true))
    }

    pub fn pipeline_with(&self, confirm: impl Confirm + 'static) -> Pipeline {
        Pipeline::builder(self.config.clone())
            .with_video_backend(Arc::new(SyntheticBackend::new(VIDEO_FRAMES, 64, 48)))
            .with_confirm(Arc::new(confirm))
            .build()
            .expect("pipeline")
    }

    pub fn update(&mut self, mutate: impl FnOnce(&mut ProjectConfig)) {
        self.config = ConfigStore::update(&self.config_path, mutate).expect("update config");
    }

    pub fn root(&self) -> PathBuf {
        self.config.project_path.clone()
    }
}

/// Four alternating regimes of 25 frames with distinct frequency and offset.
#[allow(clippy::cast_precision_loss)]
pub fn pose_sequence(seed: usize) -> Array2<f32> {
    Array2::from_shape_fn((4, FRAMES), |(feature, t)| {
        let regime = (t / 25 + seed) % 4;
        let freq = 0.2 + 0.3 * regime as f32;
        let offset = 3.0 * regime as f32;
        offset + (freq * t as f32 + feature as f32).sin()
    })
}

/// Keypoints circling inside a 64x48 frame, interleaved x/y rows.
#[allow(clippy::cast_precision_loss)]
pub fn raw_pose(seed: usize) -> Array2<f32> {
    Array2::from_shape_fn((2 * KEYPOINTS, FRAMES), |(row, t)| {
        let keypoint = (row / 2) as f32;
        let phase = t as f32 * 0.1 + keypoint + seed as f32;
        if row % 2 == 0 {
            32.0 + 10.0 * phase.cos()
        } else {
            24.0 + 8.0 * phase.sin()
        }
    })
}
