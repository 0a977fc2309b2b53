//! パイプライン全体で共有するエラー分類。
use std::path::PathBuf;

use thiserror::Error;

use crate::config::ConfigError;

/// ステージ実行中に発生するエラー。
///
/// いずれも決定的な前提条件違反なので、リトライせず呼び出し元へそのまま返す。
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("config field `{field}` is missing or empty")]
    ConfigIncomplete { field: &'static str },

    #[error("n_cluster must be a positive integer, got {value}")]
    InvalidClusterCount { value: i64 },

    #[error("no trained model `{model_name}` found at {}", path.display())]
    MissingModel { model_name: String, path: PathBuf },

    #[error("cut_tree={requested} exceeds the hierarchy depth {depth}")]
    InvalidTreeDepth { requested: usize, depth: usize },

    #[error("generative mode `{mode}` is not supported with parametrization `{parametrization}`")]
    UnsupportedMode {
        mode: String,
        parametrization: String,
    },

    #[error("video `{video}` has {available} frames, {required} required (start + length)")]
    InsufficientFrames {
        video: String,
        available: usize,
        required: usize,
    },

    #[error("upstream artifact missing: {} (run the producing stage first)", path.display())]
    MissingArtifact { path: PathBuf },

    #[error("invalid stage option `{name}`: {reason}")]
    InvalidOption { name: &'static str, reason: String },

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("io failure at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to read array {}: {source}", path.display())]
    NpyRead {
        path: PathBuf,
        #[source]
        source: ndarray_npy::ReadNpyError,
    },

    #[error("failed to write array {}: {source}", path.display())]
    NpyWrite {
        path: PathBuf,
        #[source]
        source: ndarray_npy::WriteNpyError,
    },

    #[error("pickle codec failure at {}: {source}", path.display())]
    Pickle {
        path: PathBuf,
        #[source]
        source: serde_pickle::Error,
    },

    #[error("image codec failure at {}: {source}", path.display())]
    Image {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error("confirmation prompt failed: {0}")]
    Prompt(#[source] std::io::Error),

    #[error("media backend failure: {0}")]
    Media(String),

    #[error("array shape mismatch: {0}")]
    Shape(String),
}

impl PipelineError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

pub type Result<T, E = PipelineError> = std::result::Result<T, E>;
