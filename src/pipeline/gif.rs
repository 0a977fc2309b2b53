//! Annotated frame sequences (and optionally an animated GIF) of one video.
use std::fs::File;
use std::io::BufWriter;

use image::codecs::gif::{GifEncoder, Repeat};
use image::{Delay, DynamicImage, Frame, Rgb, RgbImage, imageops};
use ndarray::Array2;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, info};

use super::Pipeline;
use super::visualization::LabelKind;
use crate::contract::StageReport;
use crate::error::{PipelineError, Result};
use crate::figure::{draw_line, label_color};
use crate::layout::{Artifact, Stage};
use crate::media::VideoSource;
use crate::store::{ArtifactBatch, clear_matching, read_f32_matrix, read_i32_vector};

const TRAIL: Rgb<u8> = Rgb([255, 255, 255]);

#[derive(Debug, Clone)]
pub struct GifOptions {
    /// Keypoints whose midpoint is tracked and cropped around.
    pub pose_ref_index: [usize; 2],
    pub subtract_background: bool,
    /// Frames sampled for the background median; all frames when unset.
    pub background_frames: Option<usize>,
    /// First frame; chosen with the project seed when unset.
    pub start: Option<usize>,
    pub length: usize,
    pub max_lag: usize,
    pub label: LabelKind,
    /// Source video extension; defaults to `video_type`.
    pub file_format: Option<String>,
    pub crop_size: Option<(u32, u32)>,
    pub video: Option<String>,
    pub assemble_gif: bool,
    pub save_logs: bool,
}

impl Default for GifOptions {
    fn default() -> Self {
        Self {
            pose_ref_index: [0, 5],
            subtract_background: true,
            background_frames: None,
            start: None,
            length: 500,
            max_lag: 30,
            label: LabelKind::Community,
            file_format: None,
            crop_size: Some((300, 300)),
            video: None,
            assemble_gif: false,
            save_logs: false,
        }
    }
}

pub(crate) fn run(pipeline: &Pipeline, options: &GifOptions) -> Result<StageReport> {
    let config = &pipeline.config;
    let layout = &pipeline.layout;
    if options.length == 0 {
        return Err(PipelineError::InvalidOption {
            name: "length",
            reason: "at least one frame is required".to_string(),
        });
    }
    let video = pipeline.video_or_first(options.video.as_deref())?;
    let file_format = options.file_format.as_deref().unwrap_or(&config.video_type);
    let mut source = pipeline.video.open(&layout.video_file(&video, file_format))?;
    let available = source.frame_count();

    let start = match options.start {
        Some(start) => start,
        None if available >= options.length => {
            let mut rng = StdRng::seed_from_u64(config.random_state);
            rng.random_range(0..=available - options.length)
        }
        None => 0,
    };
    let required = start.checked_add(options.length).unwrap_or(usize::MAX);
    if available < required {
        return Err(PipelineError::InsufficientFrames {
            video,
            available,
            required,
        });
    }

    let track = Track::load(pipeline, &video, options.pose_ref_index)?;
    let labels = match options.label {
        LabelKind::None => None,
        LabelKind::Motif => Some(read_i32_vector(&layout.artifact(&video, &Artifact::MotifLabel))?),
        LabelKind::Community => {
            Some(read_i32_vector(&layout.artifact(&video, &Artifact::CommunityLabel))?)
        }
    };
    // Label t describes the window centred on video frame t + time_window / 2.
    let offset = config.time_window / 2;
    let label_at = |frame: usize| -> Option<i32> {
        let labels = labels.as_ref()?;
        Some(
            frame
                .checked_sub(offset)
                .and_then(|t| labels.get(t).copied())
                .unwrap_or(-1),
        )
    };

    let background = if options.subtract_background {
        let samples = options.background_frames.unwrap_or(available);
        Some(median_background(source.as_mut(), samples)?)
    } else {
        None
    };

    let mut frames = Vec::with_capacity(options.length);
    for frame_index in start..required {
        let mut image = source.frame(frame_index)?;
        if let Some(background) = &background {
            subtract(&mut image, background);
        }
        let first = frame_index.saturating_sub(options.max_lag);
        let trail: Vec<(i64, i64)> = (first..=frame_index)
            .filter_map(|f| track.point(f))
            .collect();
        for pair in trail.windows(2) {
            draw_line(&mut image, pair[0], pair[1], TRAIL);
        }
        if let Some((width, height)) = options.crop_size {
            let centre = track
                .point(frame_index)
                .unwrap_or((i64::from(image.width() / 2), i64::from(image.height() / 2)));
            image = crop_around(&image, centre, width, height);
        }
        if let Some(label) = label_at(frame_index) {
            draw_band(&mut image, label);
        }
        frames.push(image);
    }

    let mut batch = ArtifactBatch::new();
    if options.assemble_gif {
        let path = layout.artifact(&video, &Artifact::Gif(options.label.as_str().to_string()));
        let partial = batch.external(path);
        write_gif(&partial, &frames, source.fps())?;
    }
    for (i, image) in frames.into_iter().enumerate() {
        batch.png(layout.artifact(&video, &Artifact::GifFrame(i)), image);
    }

    let removed = clear_matching(&layout.stage_dir(&video, Stage::Gif), ".png")?;
    debug!(removed, "previous gif frames removed");
    let written = batch.commit()?;
    info!(
        video = %video,
        start,
        length = options.length,
        background = background.is_some(),
        "gif frames written"
    );
    Ok(StageReport::completed(Stage::Gif, written)
        .with_count("frames", options.length)
        .with_count("start", start))
}

/// Midpoint of two keypoints over time, from interleaved x/y rows.
struct Track {
    pose: Array2<f32>,
    rows: [usize; 4],
}

impl Track {
    fn load(pipeline: &Pipeline, video: &str, keypoints: [usize; 2]) -> Result<Self> {
        let pose = read_f32_matrix(&pipeline.layout.raw_pose_data(video))?;
        let count = pose.nrows() / 2;
        if let Some(&bad) = keypoints.iter().find(|&&k| k >= count) {
            return Err(PipelineError::InvalidOption {
                name: "pose_ref_index",
                reason: format!("keypoint {bad} out of range, pose data has {count}"),
            });
        }
        let [a, b] = keypoints;
        Ok(Self {
            pose,
            rows: [2 * a, 2 * a + 1, 2 * b, 2 * b + 1],
        })
    }

    #[allow(clippy::cast_possible_truncation)]
    fn point(&self, frame: usize) -> Option<(i64, i64)> {
        if frame >= self.pose.ncols() {
            return None;
        }
        let [ax, ay, bx, by] = self.rows.map(|row| self.pose[[row, frame]]);
        let (x, y) = ((ax + bx) / 2.0, (ay + by) / 2.0);
        (x.is_finite() && y.is_finite()).then(|| (x.round() as i64, y.round() as i64))
    }
}

/// Per-pixel, per-channel median over `samples` evenly spaced frames.
///
/// Frames are streamed twice: the first pass picks the high nibble of each
/// median from a 16-bin histogram, the second resolves the low nibble among
/// values sharing it. Memory stays at 16 counters per channel value whatever
/// the sample size. Sampling is capped at `u16::MAX` frames.
fn median_background(source: &mut dyn VideoSource, samples: usize) -> Result<RgbImage> {
    let available = source.frame_count();
    let samples = samples
        .clamp(1, available.max(1))
        .min(usize::from(u16::MAX));
    let (width, height) = source.dimensions();
    let len = width as usize * height as usize * 3;
    let indices: Vec<usize> = (0..samples).map(|i| i * available / samples).collect();
    let rank = samples / 2;

    let mut bins = vec![0_u16; len * 16];
    for &index in &indices {
        let frame = sampled_frame(source, index, len)?;
        for (k, &value) in frame.as_raw().iter().enumerate() {
            bins[k * 16 + usize::from(value >> 4)] += 1;
        }
    }
    let mut high = vec![0_u8; len];
    let mut residual = vec![0_usize; len];
    for k in 0..len {
        (high[k], residual[k]) = select_bin(&bins[k * 16..(k + 1) * 16], rank);
    }

    bins.fill(0);
    for &index in &indices {
        let frame = sampled_frame(source, index, len)?;
        for (k, &value) in frame.as_raw().iter().enumerate() {
            if value >> 4 == high[k] {
                bins[k * 16 + usize::from(value & 0x0f)] += 1;
            }
        }
    }
    let pixels: Vec<u8> = (0..len)
        .map(|k| {
            let (low, _) = select_bin(&bins[k * 16..(k + 1) * 16], residual[k]);
            (high[k] << 4) | low
        })
        .collect();
    debug!(samples, "background sampled");

    RgbImage::from_raw(width, height, pixels)
        .ok_or_else(|| PipelineError::Shape(format!("background buffer for {width}x{height}")))
}

fn sampled_frame(source: &mut dyn VideoSource, index: usize, len: usize) -> Result<RgbImage> {
    let frame = source.frame(index)?;
    if frame.as_raw().len() == len {
        Ok(frame)
    } else {
        Err(PipelineError::Shape(format!(
            "frame {index} is {}x{}, expected the video dimensions",
            frame.width(),
            frame.height()
        )))
    }
}

/// Bin holding the `rank`-th smallest value, and the rank within that bin.
fn select_bin(bins: &[u16], rank: usize) -> (u8, usize) {
    let mut before = 0;
    for (bin, &count) in bins.iter().enumerate() {
        let count = usize::from(count);
        if rank < before + count {
            return (u8::try_from(bin).unwrap_or(u8::MAX), rank - before);
        }
        before += count;
    }
    (0, 0)
}

fn subtract(image: &mut RgbImage, background: &RgbImage) {
    for (pixel, base) in image.pixels_mut().zip(background.pixels()) {
        for channel in 0..3 {
            pixel[channel] = pixel[channel].abs_diff(base[channel]);
        }
    }
}

/// Crops a `width x height` window centred on `centre`, shifted to stay
/// inside the frame and shrunk when the frame is smaller.
fn crop_around(image: &RgbImage, centre: (i64, i64), width: u32, height: u32) -> RgbImage {
    let width = width.min(image.width());
    let height = height.min(image.height());
    let origin = |c: i64, size: u32, limit: u32| -> u32 {
        let max = i64::from(limit - size);
        u32::try_from((c - i64::from(size / 2)).clamp(0, max)).unwrap_or(0)
    };
    let x = origin(centre.0, width, image.width());
    let y = origin(centre.1, height, image.height());
    imageops::crop_imm(image, x, y, width, height).to_image()
}

fn draw_band(image: &mut RgbImage, label: i32) {
    let color = label_color(label);
    let band = (image.height() / 20).max(4).min(image.height());
    for y in 0..band {
        for x in 0..image.width() {
            image.put_pixel(x, y, color);
        }
    }
}

fn write_gif(path: &std::path::Path, frames: &[RgbImage], fps: f64) -> Result<()> {
    let image_error = |source| PipelineError::Image {
        path: path.to_path_buf(),
        source,
    };
    crate::store::ensure_parent(path)?;
    let file = File::create(path).map_err(|source| PipelineError::io(path, source))?;
    let mut encoder = GifEncoder::new(BufWriter::new(file));
    encoder.set_repeat(Repeat::Infinite).map_err(image_error)?;
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let delay_ms = if fps > 0.0 { (1000.0 / fps).round() as u32 } else { 33 };
    let delay = Delay::from_numer_denom_ms(delay_ms, 1);
    encoder
        .encode_frames(frames.iter().map(|image| {
            Frame::from_parts(DynamicImage::ImageRgb8(image.clone()).to_rgba8(), 0, 0, delay)
        }))
        .map_err(image_error)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::{SyntheticBackend, VideoBackend};

    #[test]
    fn crop_is_clamped_to_the_frame() {
        let image = RgbImage::from_fn(100, 80, |x, y| Rgb([x as u8, y as u8, 0]));
        let cropped = crop_around(&image, (95, 5), 40, 30);
        assert_eq!(cropped.dimensions(), (40, 30));
        assert_eq!(cropped.get_pixel(0, 0), &Rgb([60, 0, 0]));

        let larger = crop_around(&image, (50, 40), 300, 300);
        assert_eq!(larger.dimensions(), (100, 80));
    }

    #[test]
    fn background_median_removes_the_moving_blob() {
        let backend = SyntheticBackend::new(40, 64, 16);
        let mut video = backend.open(std::path::Path::new("v.mp4")).expect("open");
        let background = median_background(video.as_mut(), 8).expect("median");
        assert!(background.pixels().all(|p| *p == Rgb([20, 20, 40])));

        let mut frame = video.frame(3).expect("frame");
        subtract(&mut frame, &background);
        assert!(frame.pixels().any(|p| p[0] > 0));
        assert_eq!(frame.get_pixel(63, 0), &Rgb([0, 0, 0]));
    }

    struct Frames(Vec<RgbImage>);

    impl VideoSource for Frames {
        fn frame_count(&self) -> usize {
            self.0.len()
        }

        fn fps(&self) -> f64 {
            30.0
        }

        fn dimensions(&self) -> (u32, u32) {
            self.0[0].dimensions()
        }

        fn frame(&mut self, index: usize) -> Result<RgbImage> {
            Ok(self.0[index].clone())
        }
    }

    #[test]
    fn streamed_median_matches_sorted_median() {
        let frames: Vec<RgbImage> = (0..7_u32)
            .map(|i| {
                RgbImage::from_fn(5, 3, |x, y| {
                    let v = (i * 97 + x * 31 + y * 53) % 256;
                    Rgb([v as u8, (255 - v) as u8, (v * 7 % 256) as u8])
                })
            })
            .collect();
        let mut expected = RgbImage::new(5, 3);
        for (x, y, pixel) in expected.enumerate_pixels_mut() {
            for channel in 0..3 {
                let mut values: Vec<u8> = frames.iter().map(|f| f.get_pixel(x, y)[channel]).collect();
                values.sort_unstable();
                pixel[channel] = values[values.len() / 2];
            }
        }

        let mut source = Frames(frames);
        let background = median_background(&mut source, 7).expect("median");
        assert_eq!(background, expected);
    }

    #[test]
    fn rank_is_resolved_inside_its_bin() {
        let mut bins = [0_u16; 16];
        bins[2] = 3;
        bins[9] = 4;
        assert_eq!(select_bin(&bins, 0), (2, 0));
        assert_eq!(select_bin(&bins, 4), (9, 1));
    }

    #[test]
    fn band_uses_label_color() {
        let mut image = RgbImage::new(20, 100);
        draw_band(&mut image, 3);
        assert_eq!(image.get_pixel(0, 0), &label_color(3));
        assert_eq!(image.get_pixel(0, 5), &Rgb([0, 0, 0]));
    }
}
