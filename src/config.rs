use std::{
    collections::BTreeMap,
    fmt, fs,
    path::{Path, PathBuf},
    str::FromStr,
};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::PipelineError;

/// Clustering method that turns latent vectors into motif labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Parametrization {
    Kmeans,
    Hmm,
}

impl Parametrization {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Kmeans => "kmeans",
            Self::Hmm => "hmm",
        }
    }

    /// Whether the method exposes cluster centroids that can be decoded.
    #[must_use]
    pub fn is_centroid_based(self) -> bool {
        matches!(self, Self::Kmeans)
    }
}

impl fmt::Display for Parametrization {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Parametrization {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "kmeans" => Ok(Self::Kmeans),
            "hmm" => Ok(Self::Hmm),
            other => Err(ConfigError::Invalid {
                name: "parametrization",
                reason: format!("unknown parametrization `{other}`"),
            }),
        }
    }
}

/// Per-project settings stored in `config.yaml`.
///
/// Keys this crate does not interpret (training hyperparameters and the like)
/// are kept in `extra` so a load/save cycle never drops them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectConfig {
    #[serde(rename = "Project")]
    pub project: String,
    pub project_path: PathBuf,
    #[serde(default)]
    pub video_sets: Vec<String>,
    pub model_name: String,
    pub n_cluster: i64,
    pub parametrization: Parametrization,
    #[serde(default)]
    pub individual_parametrization: bool,
    #[serde(default)]
    pub save_logs: bool,
    #[serde(default)]
    pub egocentric_data: bool,
    #[serde(default = "default_time_window")]
    pub time_window: usize,
    #[serde(default = "default_zdims")]
    pub zdims: usize,
    #[serde(default = "default_num_features")]
    pub num_features: usize,
    #[serde(default = "default_random_state")]
    pub random_state: u64,
    #[serde(default = "default_n_init_kmeans")]
    pub n_init_kmeans: usize,
    #[serde(default = "default_kmeans_max_iterations")]
    pub kmeans_max_iterations: usize,
    #[serde(default = "default_hmm_iterations")]
    pub hmm_iterations: usize,
    #[serde(default = "default_length_of_motif_video")]
    pub length_of_motif_video: usize,
    #[serde(default = "default_num_points")]
    pub num_points: usize,
    #[serde(default = "default_video_type")]
    pub video_type: String,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_yaml::Value>,
}

fn default_time_window() -> usize {
    30
}

fn default_zdims() -> usize {
    30
}

fn default_num_features() -> usize {
    12
}

fn default_random_state() -> u64 {
    42
}

fn default_n_init_kmeans() -> usize {
    15
}

fn default_kmeans_max_iterations() -> usize {
    100
}

fn default_hmm_iterations() -> usize {
    20
}

fn default_length_of_motif_video() -> usize {
    1000
}

fn default_num_points() -> usize {
    30_000
}

fn default_video_type() -> String {
    ".mp4".to_string()
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config at {path}: {source}")]
    Deserialize {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("failed to serialize config: {0}")]
    Serialize(#[source] serde_yaml::Error),
    #[error("invalid value for {name}: {reason}")]
    Invalid { name: &'static str, reason: String },
}

impl ProjectConfig {
    /// 新規プロジェクト用の既定値を持つ設定を作る。
    #[must_use]
    pub fn new(project: &str, project_path: PathBuf, video_sets: Vec<String>) -> Self {
        Self {
            project: project.to_string(),
            project_path,
            video_sets,
            model_name: "VAME".to_string(),
            n_cluster: 15,
            parametrization: Parametrization::Hmm,
            individual_parametrization: false,
            save_logs: false,
            egocentric_data: false,
            time_window: default_time_window(),
            zdims: default_zdims(),
            num_features: default_num_features(),
            random_state: default_random_state(),
            n_init_kmeans: default_n_init_kmeans(),
            kmeans_max_iterations: default_kmeans_max_iterations(),
            hmm_iterations: default_hmm_iterations(),
            length_of_motif_video: default_length_of_motif_video(),
            num_points: default_num_points(),
            video_type: default_video_type(),
            extra: BTreeMap::new(),
        }
    }

    /// YAML ファイルから設定を読み込む。
    ///
    /// # Errors
    /// ファイルが読めない、または YAML として不正な場合は [`ConfigError`] を返す。
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_yaml::from_str(&contents).map_err(|source| ConfigError::Deserialize {
            path: path.to_path_buf(),
            source,
        })
    }

    /// # Errors
    /// シリアライズまたは書き込みに失敗した場合は [`ConfigError`] を返す。
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let contents = serde_yaml::to_string(self).map_err(ConfigError::Serialize)?;
        fs::write(path, contents).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Checks every field the layout resolver depends on.
    ///
    /// # Errors
    /// Returns [`PipelineError::ConfigIncomplete`] naming the first empty field,
    /// or [`PipelineError::InvalidClusterCount`] when `n_cluster <= 0`.
    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.project.trim().is_empty() {
            return Err(PipelineError::ConfigIncomplete { field: "Project" });
        }
        if self.project_path.as_os_str().is_empty() {
            return Err(PipelineError::ConfigIncomplete {
                field: "project_path",
            });
        }
        if self.model_name.trim().is_empty() {
            return Err(PipelineError::ConfigIncomplete { field: "model_name" });
        }
        if self.video_sets.is_empty() {
            return Err(PipelineError::ConfigIncomplete { field: "video_sets" });
        }
        if self
            .video_sets
            .iter()
            .any(|video| video.trim().is_empty() || video.contains(['/', '\\']))
        {
            return Err(PipelineError::ConfigIncomplete { field: "video_sets" });
        }
        if self.time_window == 0 {
            return Err(PipelineError::ConfigIncomplete {
                field: "time_window",
            });
        }
        self.cluster_count().map(|_| ())
    }

    /// `n_cluster` as a validated count.
    ///
    /// # Errors
    /// Returns [`PipelineError::InvalidClusterCount`] when `n_cluster <= 0`.
    pub fn cluster_count(&self) -> Result<usize, PipelineError> {
        usize::try_from(self.n_cluster)
            .ok()
            .filter(|count| *count > 0)
            .ok_or(PipelineError::InvalidClusterCount {
                value: self.n_cluster,
            })
    }

    #[must_use]
    pub fn first_video(&self) -> Option<&str> {
        self.video_sets.first().map(String::as_str)
    }
}

/// File-backed config access: every mutation goes through load, mutate, save.
pub struct ConfigStore;

impl ConfigStore {
    /// Applies `mutate` to the stored config and writes it back.
    ///
    /// # Errors
    /// Propagates load and save failures.
    pub fn update<F>(path: &Path, mutate: F) -> Result<ProjectConfig, ConfigError>
    where
        F: FnOnce(&mut ProjectConfig),
    {
        let mut config = ProjectConfig::load(path)?;
        mutate(&mut config);
        config.save(path)?;
        tracing::info!(path = %path.display(), "config updated");
        Ok(config)
    }

    /// Rewrites the file so every key this version knows about is present.
    ///
    /// # Errors
    /// Propagates load and save failures.
    pub fn update_config(path: &Path) -> Result<ProjectConfig, ConfigError> {
        Self::update(path, |_| {})
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn sample() -> ProjectConfig {
        ProjectConfig::new(
            "demo",
            PathBuf::from("/tmp/demo"),
            vec!["video-1".to_string()],
        )
    }

    #[test]
    fn load_fills_defaults_and_keeps_unknown_keys() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("config.yaml");
        fs::write(
            &path,
            "Project: demo\nproject_path: /tmp/demo\nvideo_sets: [a, b]\nmodel_name: VAME\n\
             n_cluster: 10\nparametrization: kmeans\nbeta: 1.5\n",
        )
        .expect("write");

        let config = ProjectConfig::load(&path).expect("load");
        assert_eq!(config.video_sets, vec!["a", "b"]);
        assert_eq!(config.time_window, 30);
        assert_eq!(config.parametrization, Parametrization::Kmeans);
        assert!(config.extra.contains_key("beta"));

        config.save(&path).expect("save");
        let reloaded = ProjectConfig::load(&path).expect("reload");
        assert_eq!(reloaded, config);
    }

    #[rstest]
    #[case(0)]
    #[case(-3)]
    fn non_positive_cluster_count_is_rejected(#[case] n_cluster: i64) {
        let mut config = sample();
        config.n_cluster = n_cluster;
        match config.validate() {
            Err(PipelineError::InvalidClusterCount { value }) => assert_eq!(value, n_cluster),
            other => panic!("expected InvalidClusterCount, got {other:?}"),
        }
    }

    #[test]
    fn empty_model_name_is_incomplete() {
        let mut config = sample();
        config.model_name = "  ".to_string();
        assert!(matches!(
            config.validate(),
            Err(PipelineError::ConfigIncomplete {
                field: "model_name"
            })
        ));
    }

    #[test]
    fn video_ids_with_separators_are_rejected() {
        let mut config = sample();
        config.video_sets = vec!["nested/video".to_string()];
        assert!(matches!(
            config.validate(),
            Err(PipelineError::ConfigIncomplete {
                field: "video_sets"
            })
        ));
    }

    #[test]
    fn update_persists_mutation() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("config.yaml");
        sample().save(&path).expect("save");

        ConfigStore::update(&path, |config| config.n_cluster = 7).expect("update");
        assert_eq!(ProjectConfig::load(&path).expect("load").n_cluster, 7);
    }

    #[test]
    fn parametrization_parses_case_insensitively() {
        assert_eq!("KMeans".parse::<Parametrization>().unwrap(), Parametrization::Kmeans);
        assert!("spectral".parse::<Parametrization>().is_err());
    }
}
