//! Per-stage log files (`save_logs`).
use std::fs::OpenOptions;
use std::path::Path;
use std::sync::Mutex;

use tracing::{error, info};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt};

use crate::error::{PipelineError, Result};
use crate::layout::Stage;
use crate::store::ensure_parent;

/// Runs `run` inside a `stage` span.
///
/// With `save_logs` set, events are also appended as JSON lines to `path`
/// for the duration of the call; console output keeps going to stderr.
///
/// # Errors
/// Returns the error of `run`, or an I/O error when the log file cannot be opened.
pub fn scoped<T>(
    save_logs: bool,
    path: &Path,
    stage: Stage,
    run: impl FnOnce() -> Result<T>,
) -> Result<T> {
    if !save_logs {
        let span = tracing::info_span!("stage", stage = %stage);
        let _guard = span.enter();
        return run();
    }

    ensure_parent(path)?;
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|source| PipelineError::io(path, source))?;

    let subscriber = tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(
            fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr)
                .compact(),
        )
        .with(
            fmt::layer()
                .json()
                .with_ansi(false)
                .with_current_span(true)
                .with_writer(Mutex::new(file)),
        );

    tracing::subscriber::with_default(subscriber, || {
        let span = tracing::info_span!("stage", stage = %stage);
        let _guard = span.enter();
        info!(
            started_at = %chrono::Utc::now().to_rfc3339(),
            log_file = %path.display(),
            "stage started"
        );
        let result = run();
        match &result {
            Ok(_) => info!("stage finished"),
            Err(err) => error!(error = %err, "stage failed"),
        }
        result
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writes_json_lines_when_enabled() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("logs/community.log");
        let value = temp_env::with_var_unset("RUST_LOG", || {
            scoped(true, &path, Stage::Community, || {
                info!(answer = 42, "inside stage");
                Ok(7)
            })
        })
        .expect("run");

        assert_eq!(value, 7);
        let contents = std::fs::read_to_string(&path).expect("log file");
        assert!(contents.contains("inside stage"));
        assert!(contents.lines().all(|line| line.starts_with('{')));
    }

    #[test]
    fn leaves_no_file_when_disabled() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("logs/gif.log");
        scoped(false, &path, Stage::Gif, || Ok(())).expect("run");
        assert!(!path.exists());
    }

    #[test]
    fn failures_are_logged_and_returned() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("stage.log");
        let err = temp_env::with_var_unset("RUST_LOG", || {
            scoped::<()>(true, &path, Stage::Gif, || {
                Err(PipelineError::Media("boom".into()))
            })
        })
        .unwrap_err();
        assert!(matches!(err, PipelineError::Media(_)));
        assert!(std::fs::read_to_string(&path).unwrap().contains("stage failed"));
    }

    #[test]
    fn file_layer_honours_rust_log() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("gif.log");
        temp_env::with_var("RUST_LOG", Some("error"), || {
            let _ = scoped::<()>(true, &path, Stage::Gif, || {
                Err(PipelineError::Media("decoder exited".into()))
            });
        });
        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(contents.contains("stage failed"));
        assert!(!contents.contains("stage started"));
    }
}
