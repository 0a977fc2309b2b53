//! Video input and clip output.
//!
//! Decoding and encoding are delegated to a [`VideoBackend`]. The ffmpeg
//! backend shells out to `ffprobe`/`ffmpeg` and streams raw RGB frames over
//! pipes; the synthetic backend renders frames procedurally and is used for
//! dry runs and tests.
use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};

use image::{Rgb, RgbImage};
use tracing::debug;

use crate::error::{PipelineError, Result};
use crate::store::ensure_parent;

pub trait VideoSource: Send {
    fn frame_count(&self) -> usize;
    fn fps(&self) -> f64;
    fn dimensions(&self) -> (u32, u32);

    /// # Errors
    /// Fails when `index` is out of range or decoding fails.
    fn frame(&mut self, index: usize) -> Result<RgbImage>;
}

pub trait ClipWriter: Send {
    /// # Errors
    /// Fails when the frame cannot be handed to the encoder.
    fn push(&mut self, frame: &RgbImage) -> Result<()>;

    /// # Errors
    /// Fails when the encoder reports an error while finalizing.
    fn finish(self: Box<Self>) -> Result<()>;
}

pub trait VideoBackend: Send + Sync {
    /// # Errors
    /// Fails when the video is missing or cannot be probed.
    fn open(&self, path: &Path) -> Result<Box<dyn VideoSource>>;

    /// # Errors
    /// Fails when the output cannot be created.
    fn create_clip(&self, path: &Path, fps: f64, dimensions: (u32, u32))
    -> Result<Box<dyn ClipWriter>>;
}

/// Backend driving the `ffmpeg` and `ffprobe` binaries.
#[derive(Debug, Clone)]
pub struct FfmpegBackend {
    ffmpeg: PathBuf,
    ffprobe: PathBuf,
    codec: String,
}

impl Default for FfmpegBackend {
    fn default() -> Self {
        Self {
            ffmpeg: PathBuf::from("ffmpeg"),
            ffprobe: PathBuf::from("ffprobe"),
            codec: "libx264".to_string(),
        }
    }
}

impl FfmpegBackend {
    #[must_use]
    pub fn with_binaries(ffmpeg: PathBuf, ffprobe: PathBuf) -> Self {
        Self {
            ffmpeg,
            ffprobe,
            ..Self::default()
        }
    }

    fn probe(&self, path: &Path) -> Result<Probe> {
        let output = Command::new(&self.ffprobe)
            .args([
                "-v",
                "error",
                "-select_streams",
                "v:0",
                "-count_packets",
                "-show_entries",
                "stream=width,height,r_frame_rate,nb_read_packets",
                "-of",
                "csv=p=0",
            ])
            .arg(path)
            .output()
            .map_err(|source| PipelineError::io(&self.ffprobe, source))?;
        if !output.status.success() {
            return Err(PipelineError::Media(format!(
                "ffprobe failed for {}: {}",
                path.display(),
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Probe::parse(&String::from_utf8_lossy(&output.stdout))
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct Probe {
    width: u32,
    height: u32,
    fps: f64,
    frames: usize,
}

impl Probe {
    fn parse(line: &str) -> Result<Self> {
        let fields: Vec<&str> = line.trim().split(',').map(str::trim).collect();
        let invalid = || PipelineError::Media(format!("unexpected ffprobe output `{}`", line.trim()));
        let [width, height, rate, frames] = fields.as_slice() else {
            return Err(invalid());
        };
        let fps = match rate.split_once('/') {
            Some((num, den)) => {
                let num: f64 = num.parse().map_err(|_| invalid())?;
                let den: f64 = den.parse().map_err(|_| invalid())?;
                if den == 0.0 { 0.0 } else { num / den }
            }
            None => rate.parse().map_err(|_| invalid())?,
        };
        Ok(Self {
            width: width.parse().map_err(|_| invalid())?,
            height: height.parse().map_err(|_| invalid())?,
            fps,
            frames: frames.parse().map_err(|_| invalid())?,
        })
    }
}

impl VideoBackend for FfmpegBackend {
    fn open(&self, path: &Path) -> Result<Box<dyn VideoSource>> {
        if !path.is_file() {
            return Err(PipelineError::MissingArtifact {
                path: path.to_path_buf(),
            });
        }
        let probe = self.probe(path)?;
        debug!(path = %path.display(), ?probe, "video probed");
        Ok(Box::new(FfmpegVideo {
            ffmpeg: self.ffmpeg.clone(),
            path: path.to_path_buf(),
            probe,
            stream: None,
            next_index: 0,
        }))
    }

    fn create_clip(
        &self,
        path: &Path,
        fps: f64,
        dimensions: (u32, u32),
    ) -> Result<Box<dyn ClipWriter>> {
        ensure_parent(path)?;
        let (width, height) = dimensions;
        let mut child = Command::new(&self.ffmpeg)
            .args(["-y", "-v", "error", "-f", "rawvideo", "-pix_fmt", "rgb24"])
            .arg("-s")
            .arg(format!("{width}x{height}"))
            .arg("-r")
            .arg(format!("{fps}"))
            .args(["-i", "-", "-c:v", &self.codec, "-pix_fmt", "yuv420p"])
            .args(["-f", muxer_for(path)])
            .arg(path)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| PipelineError::io(&self.ffmpeg, source))?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| PipelineError::Media("ffmpeg stdin unavailable".to_string()))?;
        Ok(Box::new(FfmpegClip {
            child: Some(child),
            stdin: Some(stdin),
            path: path.to_path_buf(),
        }))
    }
}

/// Muxer for an output path; staged `*.partial` names use the extension
/// before the suffix.
fn muxer_for(path: &Path) -> &'static str {
    let name = path
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or_default();
    let name = name.strip_suffix(".partial").unwrap_or(name);
    match Path::new(name).extension().and_then(|ext| ext.to_str()) {
        Some("avi") => "avi",
        Some("mov") => "mov",
        Some("mkv") => "matroska",
        Some("webm") => "webm",
        _ => "mp4",
    }
}

struct FfmpegVideo {
    ffmpeg: PathBuf,
    path: PathBuf,
    probe: Probe,
    stream: Option<(Child, ChildStdout)>,
    next_index: usize,
}

impl FfmpegVideo {
    fn restart(&mut self) -> Result<()> {
        if let Some((mut child, _)) = self.stream.take() {
            let _ = child.kill();
            let _ = child.wait();
        }
        let mut child = Command::new(&self.ffmpeg)
            .args(["-v", "error", "-i"])
            .arg(&self.path)
            .args(["-f", "rawvideo", "-pix_fmt", "rgb24", "-"])
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|source| PipelineError::io(&self.ffmpeg, source))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| PipelineError::Media("ffmpeg stdout unavailable".to_string()))?;
        self.stream = Some((child, stdout));
        self.next_index = 0;
        Ok(())
    }

    fn read_next(&mut self, buffer: &mut [u8]) -> Result<()> {
        let Some((_, stdout)) = self.stream.as_mut() else {
            return Err(PipelineError::Media("decoder not running".to_string()));
        };
        stdout
            .read_exact(buffer)
            .map_err(|source| PipelineError::io(&self.path, source))?;
        self.next_index += 1;
        Ok(())
    }
}

impl VideoSource for FfmpegVideo {
    fn frame_count(&self) -> usize {
        self.probe.frames
    }

    fn fps(&self) -> f64 {
        self.probe.fps
    }

    fn dimensions(&self) -> (u32, u32) {
        (self.probe.width, self.probe.height)
    }

    fn frame(&mut self, index: usize) -> Result<RgbImage> {
        if index >= self.probe.frames {
            return Err(PipelineError::InsufficientFrames {
                video: self.path.display().to_string(),
                available: self.probe.frames,
                required: index + 1,
            });
        }
        if self.stream.is_none() || index < self.next_index {
            self.restart()?;
        }
        let frame_len = self.probe.width as usize * self.probe.height as usize * 3;
        let mut buffer = vec![0_u8; frame_len];
        while self.next_index <= index {
            self.read_next(&mut buffer)?;
        }
        RgbImage::from_raw(self.probe.width, self.probe.height, buffer)
            .ok_or_else(|| PipelineError::Media("decoded frame has the wrong size".to_string()))
    }
}

impl Drop for FfmpegVideo {
    fn drop(&mut self) {
        if let Some((mut child, _)) = self.stream.take() {
            let _ = child.kill();
            let _ = child.wait();
        }
    }
}

/// Encoder process; an unfinished clip kills and reaps it on drop so nothing
/// writes to the output path afterwards.
struct FfmpegClip {
    child: Option<Child>,
    stdin: Option<ChildStdin>,
    path: PathBuf,
}

impl ClipWriter for FfmpegClip {
    fn push(&mut self, frame: &RgbImage) -> Result<()> {
        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| PipelineError::Media("clip already finished".to_string()))?;
        stdin
            .write_all(frame.as_raw())
            .map_err(|source| PipelineError::io(&self.path, source))
    }

    fn finish(mut self: Box<Self>) -> Result<()> {
        drop(self.stdin.take());
        let child = self
            .child
            .take()
            .ok_or_else(|| PipelineError::Media("clip already finished".to_string()))?;
        let output = child
            .wait_with_output()
            .map_err(|source| PipelineError::io(&self.path, source))?;
        if output.status.success() {
            Ok(())
        } else {
            Err(PipelineError::Media(format!(
                "ffmpeg failed writing {}: {}",
                self.path.display(),
                String::from_utf8_lossy(&output.stderr).trim()
            )))
        }
    }
}

impl Drop for FfmpegClip {
    fn drop(&mut self) {
        drop(self.stdin.take());
        if let Some(mut child) = self.child.take() {
            let _ = child.kill();
            let _ = child.wait();
        }
    }
}

/// Procedural backend: every path opens the same moving-blob video and clips
/// are written as a small text manifest instead of an encoded stream.
#[derive(Debug, Clone, Copy)]
pub struct SyntheticBackend {
    pub frames: usize,
    pub width: u32,
    pub height: u32,
    pub fps: f64,
}

impl SyntheticBackend {
    #[must_use]
    pub fn new(frames: usize, width: u32, height: u32) -> Self {
        Self {
            frames,
            width,
            height,
            fps: 30.0,
        }
    }
}

impl VideoBackend for SyntheticBackend {
    fn open(&self, _path: &Path) -> Result<Box<dyn VideoSource>> {
        Ok(Box::new(SyntheticVideo { backend: *self }))
    }

    fn create_clip(
        &self,
        path: &Path,
        fps: f64,
        dimensions: (u32, u32),
    ) -> Result<Box<dyn ClipWriter>> {
        ensure_parent(path)?;
        Ok(Box::new(ManifestClip {
            path: path.to_path_buf(),
            fps,
            dimensions,
            frames: 0,
        }))
    }
}

struct SyntheticVideo {
    backend: SyntheticBackend,
}

impl VideoSource for SyntheticVideo {
    fn frame_count(&self) -> usize {
        self.backend.frames
    }

    fn fps(&self) -> f64 {
        self.backend.fps
    }

    fn dimensions(&self) -> (u32, u32) {
        (self.backend.width, self.backend.height)
    }

    fn frame(&mut self, index: usize) -> Result<RgbImage> {
        if index >= self.backend.frames {
            return Err(PipelineError::InsufficientFrames {
                video: "synthetic".to_string(),
                available: self.backend.frames,
                required: index + 1,
            });
        }
        let (width, height) = (self.backend.width, self.backend.height);
        #[allow(clippy::cast_possible_truncation)]
        let cx = (index as u32).wrapping_mul(3) % width.max(1);
        let cy = height / 2;
        Ok(RgbImage::from_fn(width, height, |x, y| {
            if x.abs_diff(cx) < 4 && y.abs_diff(cy) < 4 {
                Rgb([230, 230, 230])
            } else {
                Rgb([20, 20, 40])
            }
        }))
    }
}

struct ManifestClip {
    path: PathBuf,
    fps: f64,
    dimensions: (u32, u32),
    frames: usize,
}

impl ClipWriter for ManifestClip {
    fn push(&mut self, frame: &RgbImage) -> Result<()> {
        if frame.dimensions() != self.dimensions {
            return Err(PipelineError::Media(format!(
                "frame {:?} does not match clip {:?}",
                frame.dimensions(),
                self.dimensions
            )));
        }
        self.frames += 1;
        Ok(())
    }

    fn finish(self: Box<Self>) -> Result<()> {
        let manifest = format!(
            "frames={}\nfps={}\nsize={}x{}\n",
            self.frames, self.fps, self.dimensions.0, self.dimensions.1
        );
        fs::write(&self.path, manifest).map_err(|source| PipelineError::io(&self.path, source))
    }
}
