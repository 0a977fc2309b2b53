//! File-backed artifact store.
//!
//! Stages stage every output in an [`ArtifactBatch`] and commit at the end:
//! all files are first written as `*.partial` siblings and only renamed once
//! every write succeeded, so a failing stage leaves no new complete artifact.
use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};

use image::{ImageFormat, RgbImage};
use ndarray::{Array1, Array2};
use ndarray_npy::{read_npy, write_npy};
use serde::{Serialize, de::DeserializeOwned};
use tracing::debug;

use crate::error::{PipelineError, Result};

enum Payload {
    F32Matrix(Array2<f32>),
    I32Vector(Array1<i32>),
    I32Matrix(Array2<i32>),
    I64Vector(Array1<i64>),
    Bytes(Vec<u8>),
    Png(RgbImage),
    /// Already written to the partial path by an external encoder.
    External,
}

/// Pending writes of one stage run.
#[derive(Default)]
pub struct ArtifactBatch {
    pending: Vec<(PathBuf, Payload)>,
}

impl ArtifactBatch {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn f32_matrix(&mut self, path: PathBuf, array: Array2<f32>) {
        self.pending.push((path, Payload::F32Matrix(array)));
    }

    pub fn i32_vector(&mut self, path: PathBuf, array: Array1<i32>) {
        self.pending.push((path, Payload::I32Vector(array)));
    }

    pub fn i32_matrix(&mut self, path: PathBuf, array: Array2<i32>) {
        self.pending.push((path, Payload::I32Matrix(array)));
    }

    pub fn i64_vector(&mut self, path: PathBuf, array: Array1<i64>) {
        self.pending.push((path, Payload::I64Vector(array)));
    }

    /// Serializes `value` as a pickle right away so encoding errors surface
    /// before anything touches the disk.
    ///
    /// # Errors
    /// Returns [`PipelineError::Pickle`] when the value cannot be encoded.
    pub fn pickle<T: Serialize>(&mut self, path: PathBuf, value: &T) -> Result<()> {
        let bytes = serde_pickle::to_vec(value, serde_pickle::SerOptions::new()).map_err(
            |source| PipelineError::Pickle {
                path: path.clone(),
                source,
            },
        )?;
        self.pending.push((path, Payload::Bytes(bytes)));
        Ok(())
    }

    pub fn png(&mut self, path: PathBuf, image: RgbImage) {
        self.pending.push((path, Payload::Png(image)));
    }

    /// Registers an artifact produced by an external writer (e.g. a video
    /// encoder) and returns the partial path it must write to.
    ///
    /// The partial file is renamed on [`commit`](Self::commit) and removed if
    /// the batch is dropped uncommitted.
    pub fn external(&mut self, path: PathBuf) -> PathBuf {
        let partial = partial_path(&path);
        self.pending.push((path, Payload::External));
        partial
    }

    /// Writes every pending artifact and returns their final paths.
    ///
    /// # Errors
    /// On the first failed write all partial files are removed and the error
    /// is returned; no final path is touched in that case.
    pub fn commit(mut self) -> Result<Vec<PathBuf>> {
        let pending = std::mem::take(&mut self.pending);
        let mut staged = Vec::with_capacity(pending.len());
        let mut iter = pending.into_iter();
        while let Some((path, payload)) = iter.next() {
            let partial = partial_path(&path);
            if let Err(error) = write_payload(&partial, &payload) {
                discard(staged.iter().map(|(partial, _)| partial));
                let _ = fs::remove_file(&partial);
                discard_external(iter);
                return Err(error);
            }
            staged.push((partial, path));
        }

        let mut written = Vec::with_capacity(staged.len());
        for (partial, path) in staged {
            fs::rename(&partial, &path).map_err(|source| PipelineError::io(&path, source))?;
            debug!(path = %path.display(), "artifact written");
            written.push(path);
        }
        Ok(written)
    }
}

fn partial_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map_or_else(OsString::new, std::ffi::OsStr::to_os_string);
    name.push(".partial");
    path.with_file_name(name)
}

fn discard<'a>(paths: impl Iterator<Item = &'a PathBuf>) {
    for path in paths {
        let _ = fs::remove_file(path);
    }
}

fn discard_external(pending: impl Iterator<Item = (PathBuf, Payload)>) {
    for (path, payload) in pending {
        if matches!(payload, Payload::External) {
            let _ = fs::remove_file(partial_path(&path));
        }
    }
}

impl Drop for ArtifactBatch {
    fn drop(&mut self) {
        discard_external(std::mem::take(&mut self.pending).into_iter());
    }
}

fn write_payload(path: &Path, payload: &Payload) -> Result<()> {
    ensure_parent(path)?;
    let npy_error = |source| PipelineError::NpyWrite {
        path: path.to_path_buf(),
        source,
    };
    match payload {
        Payload::F32Matrix(array) => write_npy(path, array).map_err(npy_error),
        Payload::I32Vector(array) => write_npy(path, array).map_err(npy_error),
        Payload::I32Matrix(array) => write_npy(path, array).map_err(npy_error),
        Payload::I64Vector(array) => write_npy(path, array).map_err(npy_error),
        Payload::Bytes(bytes) => fs::write(path, bytes).map_err(|e| PipelineError::io(path, e)),
        Payload::Png(image) => image
            .save_with_format(path, ImageFormat::Png)
            .map_err(|source| PipelineError::Image {
                path: path.to_path_buf(),
                source,
            }),
        Payload::External => require(path),
    }
}

/// # Errors
/// Returns [`PipelineError::Io`] when the directory cannot be created.
pub fn ensure_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|source| PipelineError::io(parent, source))?;
    }
    Ok(())
}

/// Removes files in `dir` whose name ends with `suffix`; used before a stage
/// rewrites a directory of numbered outputs.
///
/// # Errors
/// Returns [`PipelineError::Io`] when listing or deleting fails.
pub fn clear_matching(dir: &Path, suffix: &str) -> Result<usize> {
    if !dir.is_dir() {
        return Ok(0);
    }
    let mut removed = 0;
    for entry in fs::read_dir(dir).map_err(|source| PipelineError::io(dir, source))? {
        let entry = entry.map_err(|source| PipelineError::io(dir, source))?;
        let path = entry.path();
        if path
            .file_name()
            .and_then(|name| name.to_str())
            .is_some_and(|name| name.ends_with(suffix))
        {
            fs::remove_file(&path).map_err(|source| PipelineError::io(&path, source))?;
            removed += 1;
        }
    }
    Ok(removed)
}

fn require(path: &Path) -> Result<()> {
    if path.is_file() {
        Ok(())
    } else {
        Err(PipelineError::MissingArtifact {
            path: path.to_path_buf(),
        })
    }
}

fn read_array<T: ndarray_npy::ReadNpyExt>(path: &Path) -> Result<T> {
    require(path)?;
    read_npy(path).map_err(|source| PipelineError::NpyRead {
        path: path.to_path_buf(),
        source,
    })
}

/// # Errors
/// `MissingArtifact` when absent, `NpyRead` on dtype/shape mismatch.
pub fn read_f32_matrix(path: &Path) -> Result<Array2<f32>> {
    read_array(path)
}

/// # Errors
/// `MissingArtifact` when absent, `NpyRead` on dtype/shape mismatch.
pub fn read_i32_vector(path: &Path) -> Result<Array1<i32>> {
    read_array(path)
}

/// # Errors
/// `MissingArtifact` when absent, `NpyRead` on dtype/shape mismatch.
pub fn read_i32_matrix(path: &Path) -> Result<Array2<i32>> {
    read_array(path)
}

/// # Errors
/// `MissingArtifact` when absent, `NpyRead` on dtype/shape mismatch.
pub fn read_i64_vector(path: &Path) -> Result<Array1<i64>> {
    read_array(path)
}

/// # Errors
/// `MissingArtifact` when absent, `Pickle` when the payload does not decode.
pub fn read_pickle<T: DeserializeOwned>(path: &Path) -> Result<T> {
    require(path)?;
    let bytes = fs::read(path).map_err(|source| PipelineError::io(path, source))?;
    serde_pickle::from_slice(&bytes, serde_pickle::DeOptions::new()).map_err(|source| {
        PipelineError::Pickle {
            path: path.to_path_buf(),
            source,
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn commit_writes_all_payloads_without_partials() {
        let dir = tempfile::tempdir().expect("tempdir");
        let matrix = dir.path().join("nested/matrix.npy");
        let labels = dir.path().join("labels.npy");

        let mut batch = ArtifactBatch::new();
        batch.f32_matrix(matrix.clone(), array![[1.0, 2.0], [3.0, 4.0]]);
        batch.i32_vector(labels.clone(), array![0, 1, 1]);
        let written = batch.commit().expect("commit");

        assert_eq!(written, vec![matrix.clone(), labels.clone()]);
        assert_eq!(read_f32_matrix(&matrix).unwrap()[[1, 0]], 3.0);
        assert_eq!(read_i32_vector(&labels).unwrap().len(), 3);
        assert!(!partial_path(&matrix).exists());
    }

    #[test]
    fn pickle_roundtrip_preserves_structure() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("value.pkl");
        let mut batch = ArtifactBatch::new();
        batch
            .pickle(path.clone(), &vec![vec![1_usize, 2], vec![3]])
            .expect("encode");
        batch.commit().expect("commit");

        let value: Vec<Vec<usize>> = read_pickle(&path).expect("decode");
        assert_eq!(value, vec![vec![1, 2], vec![3]]);
    }

    #[test]
    fn missing_input_is_reported_as_missing_artifact() {
        let dir = tempfile::tempdir().expect("tempdir");
        let err = read_f32_matrix(&dir.path().join("absent.npy")).unwrap_err();
        assert!(matches!(err, PipelineError::MissingArtifact { .. }));
    }

    #[test]
    fn clear_matching_only_touches_suffix() {
        let dir = tempfile::tempdir().expect("tempdir");
        fs::write(dir.path().join("a.png"), b"x").unwrap();
        fs::write(dir.path().join("b.txt"), b"x").unwrap();
        assert_eq!(clear_matching(dir.path(), ".png").unwrap(), 1);
        assert!(dir.path().join("b.txt").exists());
    }

    #[test]
    fn external_partials_are_renamed_or_removed() {
        let dir = tempfile::tempdir().expect("tempdir");
        let clip = dir.path().join("clip.mp4");

        let mut batch = ArtifactBatch::new();
        let partial = batch.external(clip.clone());
        fs::write(&partial, b"encoded").unwrap();
        batch.commit().expect("commit");
        assert!(clip.is_file());
        assert!(!partial.exists());

        let abandoned = dir.path().join("other.mp4");
        let mut batch = ArtifactBatch::new();
        let partial = batch.external(abandoned.clone());
        fs::write(&partial, b"encoded").unwrap();
        drop(batch);
        assert!(!partial.exists());
        assert!(!abandoned.exists());
    }
}
