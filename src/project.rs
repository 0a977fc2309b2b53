//! Project scaffolding.
use std::fs;
use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::config::ProjectConfig;
use crate::error::{PipelineError, Result};

pub const CONFIG_FILE: &str = "config.yaml";

const PROJECT_DIRS: [&str; 5] = ["data", "model/best_model", "results", "videos", "logs"];

/// Creates `{working_dir}/{name}` with its standard directories and a default
/// `config.yaml`, and returns the config path.
///
/// An existing project is left untouched and its config path returned.
///
/// # Errors
/// Fails with `ConfigIncomplete` for an empty name or video list, or with an
/// I/O error when the directories cannot be created.
pub fn init_new_project(name: &str, videos: &[String], working_dir: &Path) -> Result<PathBuf> {
    let project_path = working_dir.join(name);
    let config_path = project_path.join(CONFIG_FILE);
    if config_path.is_file() {
        warn!(project = %project_path.display(), "project already exists, keeping its config");
        return Ok(config_path);
    }

    let config = ProjectConfig::new(name, project_path.clone(), videos.to_vec());
    config.validate()?;

    for dir in PROJECT_DIRS {
        let path = project_path.join(dir);
        fs::create_dir_all(&path).map_err(|source| PipelineError::io(&path, source))?;
    }
    for video in videos {
        let path = project_path.join("data").join(video);
        fs::create_dir_all(&path).map_err(|source| PipelineError::io(&path, source))?;
    }
    config.save(&config_path)?;

    info!(
        project = %project_path.display(),
        videos = videos.len(),
        "project initialized"
    );
    Ok(config_path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn creates_layout_and_config() {
        let dir = tempfile::tempdir().expect("tempdir");
        let videos = vec!["a".to_string(), "b".to_string()];
        let config_path = init_new_project("demo", &videos, dir.path()).expect("init");

        let root = dir.path().join("demo");
        assert_eq!(config_path, root.join(CONFIG_FILE));
        assert!(root.join("model/best_model").is_dir());
        assert!(root.join("data/b").is_dir());
        let config = ProjectConfig::load(&config_path).expect("load");
        assert_eq!(config.video_sets, videos);
        assert_eq!(config.project_path, root);
    }

    #[test]
    fn empty_video_list_is_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let err = init_new_project("demo", &[], dir.path()).unwrap_err();
        assert!(matches!(
            err,
            PipelineError::ConfigIncomplete {
                field: "video_sets"
            }
        ));
        assert!(!dir.path().join("demo").exists());
    }

    #[test]
    fn existing_project_is_kept() {
        let dir = tempfile::tempdir().expect("tempdir");
        let videos = vec!["a".to_string()];
        let path = init_new_project("demo", &videos, dir.path()).expect("init");
        crate::config::ConfigStore::update(&path, |c| c.n_cluster = 3).expect("update");
        init_new_project("demo", &videos, dir.path()).expect("re-init");
        assert_eq!(ProjectConfig::load(&path).unwrap().n_cluster, 3);
    }
}
