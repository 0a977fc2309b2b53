//! ステージ実行のオーケストレーション。
//!
//! [`Pipeline`] は検証済みの設定とレイアウト、および差し替え可能な外部協調者
//! (モデルローダー、動画バックエンド、上書き確認) を保持し、ステージごとに
//! 1 メソッドを公開する。各ステージは結果を計算し終えてから成果物をまとめて
//! コミットし、[`StageReport`] または [`Figure`] を返す。
use std::sync::Arc;

use ndarray::Array1;
use tracing::info;

use crate::config::ProjectConfig;
use crate::contract::StageReport;
use crate::error::{PipelineError, Result};
use crate::figure::Figure;
use crate::layout::{ProjectLayout, Stage};
use crate::media::{FfmpegBackend, VideoBackend};
use crate::model::{LinearModelLoader, ModelLoader, PoseModel};
use crate::observability::stage_log;

pub mod community;
pub mod generative;
pub mod gif;
pub mod segmentation;
pub mod videos;
pub mod visualization;

pub use community::CommunityOptions;
pub use generative::{GenerativeMode, GenerativeOptions};
pub use gif::GifOptions;
pub use videos::ClipOptions;
pub use visualization::{LabelKind, VisualizationOptions};

/// Answers the overwrite prompt of pose segmentation.
pub trait Confirm: Send + Sync {
    /// # Errors
    /// Implementations report failures to obtain an answer.
    fn confirm(&self, prompt: &str) -> Result<bool>;
}

/// Fixed answer, for non-interactive runs (`--yes`) and tests.
#[derive(Debug, Clone, Copy)]
pub struct Overwrite(pub bool);

impl Confirm for Overwrite {
    fn confirm(&self, _prompt: &str) -> Result<bool> {
        Ok(self.0)
    }
}

/// Asks on the terminal; anything but `y`/`yes` declines, as does a
/// non-interactive stderr.
#[derive(Debug, Default, Clone, Copy)]
pub struct TerminalConfirm;

impl Confirm for TerminalConfirm {
    fn confirm(&self, prompt: &str) -> Result<bool> {
        let term = console::Term::stderr();
        if !term.is_term() {
            return Ok(false);
        }
        term.write_line(prompt).map_err(PipelineError::Prompt)?;
        let answer = term.read_line().map_err(PipelineError::Prompt)?;
        Ok(matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes"))
    }
}

pub struct PipelineBuilder {
    config: ProjectConfig,
    models: Option<Arc<dyn ModelLoader>>,
    video: Option<Arc<dyn VideoBackend>>,
    confirm: Option<Arc<dyn Confirm>>,
}

impl PipelineBuilder {
    #[must_use]
    pub fn new(config: ProjectConfig) -> Self {
        Self {
            config,
            models: None,
            video: None,
            confirm: None,
        }
    }

    #[must_use]
    pub fn with_model_loader(mut self, loader: Arc<dyn ModelLoader>) -> Self {
        self.models = Some(loader);
        self
    }

    #[must_use]
    pub fn with_video_backend(mut self, backend: Arc<dyn VideoBackend>) -> Self {
        self.video = Some(backend);
        self
    }

    #[must_use]
    pub fn with_confirm(mut self, confirm: Arc<dyn Confirm>) -> Self {
        self.confirm = Some(confirm);
        self
    }

    /// Defaults: [`LinearModelLoader`], [`FfmpegBackend`] and [`TerminalConfirm`].
    ///
    /// # Errors
    /// Fails with `ConfigIncomplete` or `InvalidClusterCount` on an invalid config.
    pub fn build(self) -> Result<Pipeline> {
        let layout = ProjectLayout::new(&self.config)?;
        Ok(Pipeline {
            layout,
            config: self.config,
            models: self.models.unwrap_or_else(|| Arc::new(LinearModelLoader)),
            video: self
                .video
                .unwrap_or_else(|| Arc::new(FfmpegBackend::default())),
            confirm: self.confirm.unwrap_or_else(|| Arc::new(TerminalConfirm)),
        })
    }
}

pub struct Pipeline {
    pub(crate) config: ProjectConfig,
    pub(crate) layout: ProjectLayout,
    pub(crate) models: Arc<dyn ModelLoader>,
    pub(crate) video: Arc<dyn VideoBackend>,
    pub(crate) confirm: Arc<dyn Confirm>,
}

impl Pipeline {
    #[must_use]
    pub fn builder(config: ProjectConfig) -> PipelineBuilder {
        PipelineBuilder::new(config)
    }

    #[must_use]
    pub fn config(&self) -> &ProjectConfig {
        &self.config
    }

    #[must_use]
    pub fn layout(&self) -> &ProjectLayout {
        &self.layout
    }

    /// Embeds every video and assigns motif labels.
    ///
    /// # Errors
    /// `MissingModel`, `InsufficientFrames`, `MissingArtifact` for absent pose
    /// data, and codec or filesystem failures.
    pub fn pose_segmentation(&self) -> Result<StageReport> {
        self.run_stage(Stage::PoseSegmentation, false, || segmentation::run(self))
    }

    /// # Errors
    /// `InvalidTreeDepth`, `MissingArtifact` and codec or filesystem failures.
    pub fn community(&self, options: &CommunityOptions) -> Result<StageReport> {
        self.run_stage(Stage::Community, options.save_logs, || {
            community::run(self, options)
        })
    }

    /// # Errors
    /// `MissingArtifact` and media backend failures.
    pub fn motif_videos(&self, options: &ClipOptions) -> Result<StageReport> {
        self.run_stage(Stage::MotifVideos, options.save_logs, || {
            videos::run(self, Stage::MotifVideos, options)
        })
    }

    /// # Errors
    /// `MissingArtifact` and media backend failures.
    pub fn community_videos(&self, options: &ClipOptions) -> Result<StageReport> {
        self.run_stage(Stage::CommunityVideos, options.save_logs, || {
            videos::run(self, Stage::CommunityVideos, options)
        })
    }

    /// # Errors
    /// `MissingArtifact` when the latent vector or requested labels are absent.
    pub fn visualization(&self, options: &VisualizationOptions) -> Result<Figure> {
        self.run_stage(Stage::Visualization, options.save_logs, || {
            visualization::run(self, options)
        })
    }

    /// # Errors
    /// `MissingModel`, `UnsupportedMode` and `MissingArtifact`.
    pub fn generative_model(&self, options: &GenerativeOptions) -> Result<Figure> {
        self.run_stage(Stage::GenerativeModel, options.save_logs, || {
            generative::run(self, options)
        })
    }

    /// # Errors
    /// `InsufficientFrames`, `MissingArtifact` and media or codec failures.
    pub fn gif(&self, options: &GifOptions) -> Result<StageReport> {
        self.run_stage(Stage::Gif, options.save_logs, || gif::run(self, options))
    }

    fn run_stage<T>(&self, stage: Stage, save_logs: bool, run: impl FnOnce() -> Result<T>) -> Result<T> {
        stage_log::scoped(
            save_logs || self.config.save_logs,
            &self.layout.log_file(stage),
            stage,
            run,
        )
    }

    /// Loads the trained model, failing with `MissingModel` when absent.
    pub(crate) fn load_model(&self) -> Result<Box<dyn PoseModel>> {
        let path = self.layout.model_path();
        if !path.is_file() {
            return Err(PipelineError::MissingModel {
                model_name: self.config.model_name.clone(),
                path,
            });
        }
        let model = self.models.load(&path)?;
        info!(
            path = %path.display(),
            zdims = model.zdims(),
            time_window = model.time_window(),
            "model loaded"
        );
        Ok(model)
    }

    /// The requested video, or the first configured one.
    pub(crate) fn video_or_first(&self, video: Option<&str>) -> Result<String> {
        match video {
            Some(video) if self.config.video_sets.iter().any(|v| v == video) => {
                Ok(video.to_string())
            }
            Some(video) => Err(PipelineError::InvalidOption {
                name: "video",
                reason: format!("`{video}` is not listed in video_sets"),
            }),
            None => self
                .config
                .first_video()
                .map(str::to_string)
                .ok_or(PipelineError::ConfigIncomplete {
                    field: "video_sets",
                }),
        }
    }
}

/// Converts stored `i32` labels into indices below `bound`.
pub(crate) fn label_indices(labels: &Array1<i32>, bound: usize, what: &str) -> Result<Vec<usize>> {
    labels
        .iter()
        .map(|&label| {
            usize::try_from(label)
                .ok()
                .filter(|&index| index < bound)
                .ok_or_else(|| {
                    PipelineError::Shape(format!("{what} label {label} outside 0..{bound}"))
                })
        })
        .collect()
}

pub(crate) fn to_i32_labels(labels: &[usize]) -> Result<Array1<i32>> {
    labels
        .iter()
        .map(|&label| {
            i32::try_from(label)
                .map_err(|_| PipelineError::Shape(format!("label {label} does not fit in i32")))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn fixed_confirm_returns_its_answer() {
        assert!(Overwrite(true).confirm("overwrite?").unwrap());
        assert!(!Overwrite(false).confirm("overwrite?").unwrap());
    }

    #[test]
    fn builder_rejects_invalid_config() {
        let mut config = ProjectConfig::new("demo", "/tmp/demo".into(), vec!["v".into()]);
        config.n_cluster = 0;
        let err = Pipeline::builder(config).build().err().expect("invalid");
        assert!(matches!(err, PipelineError::InvalidClusterCount { value: 0 }));
    }

    #[test]
    fn label_indices_checks_bounds() {
        assert_eq!(label_indices(&array![0, 2, 1], 3, "motif").unwrap(), vec![0, 2, 1]);
        assert!(label_indices(&array![0, 3], 3, "motif").is_err());
        assert!(label_indices(&array![-1], 3, "motif").is_err());
    }

    #[test]
    fn unknown_video_is_rejected() {
        let config = ProjectConfig::new("demo", "/tmp/demo".into(), vec!["a".into()]);
        let pipeline = Pipeline::builder(config).build().expect("pipeline");
        assert_eq!(pipeline.video_or_first(None).unwrap(), "a");
        assert!(matches!(
            pipeline.video_or_first(Some("b")),
            Err(PipelineError::InvalidOption { name: "video", .. })
        ));
    }
}
