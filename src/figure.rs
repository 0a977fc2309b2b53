//! In-memory figures returned by the visualization and generative stages.
//!
//! A [`Figure`] is plain data; rasterizing it to PNG is an explicit, separate
//! step so stages stay free of disk side effects.
use std::path::{Path, PathBuf};

use image::{Rgb, RgbImage};
use serde::Serialize;

use crate::error::Result;
use crate::store::ArtifactBatch;

const BACKGROUND: Rgb<u8> = Rgb([255, 255, 255]);
const FRAME: Rgb<u8> = Rgb([200, 200, 200]);
const UNLABELED: Rgb<u8> = Rgb([90, 90, 90]);
const MARGIN: u32 = 8;

/// Tab20-like palette; labels wrap around.
const PALETTE: [[u8; 3]; 20] = [
    [31, 119, 180],
    [174, 199, 232],
    [255, 127, 14],
    [255, 187, 120],
    [44, 160, 44],
    [152, 223, 138],
    [214, 39, 40],
    [255, 152, 150],
    [148, 103, 189],
    [197, 176, 213],
    [140, 86, 75],
    [196, 156, 148],
    [227, 119, 194],
    [247, 182, 210],
    [127, 127, 127],
    [199, 199, 199],
    [188, 189, 34],
    [219, 219, 141],
    [23, 190, 207],
    [158, 218, 229],
];

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Panel {
    Scatter {
        title: String,
        points: Vec<[f32; 2]>,
        labels: Option<Vec<i32>>,
    },
    Lines {
        title: String,
        series: Vec<Vec<f32>>,
    },
}

impl Panel {
    #[must_use]
    pub fn title(&self) -> &str {
        match self {
            Self::Scatter { title, .. } | Self::Lines { title, .. } => title,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Figure {
    pub title: String,
    pub panels: Vec<Panel>,
}

impl Figure {
    #[must_use]
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            panels: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_panel(mut self, panel: Panel) -> Self {
        self.panels.push(panel);
        self
    }

    /// Rasterizes the panels on a near-square grid.
    #[must_use]
    pub fn render(&self, panel_width: u32, panel_height: u32) -> RgbImage {
        let count = u32::try_from(self.panels.len().max(1)).unwrap_or(u32::MAX);
        let columns = (1..=count).find(|c| c * c >= count).unwrap_or(1);
        let rows = count.div_ceil(columns);
        let mut canvas = RgbImage::from_pixel(panel_width * columns, panel_height * rows, BACKGROUND);

        for (index, panel) in (0_u32..).zip(&self.panels) {
            let origin = ((index % columns) * panel_width, (index / columns) * panel_height);
            let area = Area {
                x: origin.0 + MARGIN,
                y: origin.1 + MARGIN,
                width: panel_width.saturating_sub(2 * MARGIN).max(1),
                height: panel_height.saturating_sub(2 * MARGIN).max(1),
            };
            draw_frame(&mut canvas, &area);
            match panel {
                Panel::Scatter { points, labels, .. } => {
                    draw_scatter(&mut canvas, &area, points, labels.as_deref());
                }
                Panel::Lines { series, .. } => draw_lines(&mut canvas, &area, series),
            }
        }
        canvas
    }

    /// # Errors
    /// Propagates image encoding and filesystem failures.
    pub fn save_png(&self, path: &Path) -> Result<PathBuf> {
        let mut batch = ArtifactBatch::new();
        batch.png(path.to_path_buf(), self.render(320, 240));
        let mut written = batch.commit()?;
        Ok(written.pop().unwrap_or_else(|| path.to_path_buf()))
    }
}

/// Color assigned to a motif or community label.
#[must_use]
pub fn label_color(label: i32) -> Rgb<u8> {
    if label < 0 {
        return UNLABELED;
    }
    let index = usize::try_from(label).unwrap_or(0) % PALETTE.len();
    Rgb(PALETTE[index])
}

struct Area {
    x: u32,
    y: u32,
    width: u32,
    height: u32,
}

impl Area {
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_precision_loss)]
    fn map(&self, fx: f32, fy: f32) -> (i64, i64) {
        let x = self.x as f32 + fx.clamp(0.0, 1.0) * (self.width - 1) as f32;
        // y grows upwards in plot space
        let y = self.y as f32 + (1.0 - fy.clamp(0.0, 1.0)) * (self.height - 1) as f32;
        (x.round() as i64, y.round() as i64)
    }
}

fn bounds(values: impl Iterator<Item = f32>) -> (f32, f32) {
    let (min, max) = values
        .filter(|v| v.is_finite())
        .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), v| (lo.min(v), hi.max(v)));
    if min > max {
        (0.0, 1.0)
    } else if (max - min).abs() < f32::EPSILON {
        (min - 0.5, max + 0.5)
    } else {
        (min, max)
    }
}

fn put(canvas: &mut RgbImage, x: i64, y: i64, color: Rgb<u8>) {
    if let (Ok(x), Ok(y)) = (u32::try_from(x), u32::try_from(y)) {
        if x < canvas.width() && y < canvas.height() {
            canvas.put_pixel(x, y, color);
        }
    }
}

fn draw_frame(canvas: &mut RgbImage, area: &Area) {
    let (x0, y0) = (i64::from(area.x), i64::from(area.y));
    let (x1, y1) = (x0 + i64::from(area.width), y0 + i64::from(area.height));
    draw_line(canvas, (x0, y0), (x1, y0), FRAME);
    draw_line(canvas, (x0, y1), (x1, y1), FRAME);
    draw_line(canvas, (x0, y0), (x0, y1), FRAME);
    draw_line(canvas, (x1, y0), (x1, y1), FRAME);
}

fn draw_scatter(canvas: &mut RgbImage, area: &Area, points: &[[f32; 2]], labels: Option<&[i32]>) {
    let (xmin, xmax) = bounds(points.iter().map(|p| p[0]));
    let (ymin, ymax) = bounds(points.iter().map(|p| p[1]));
    for (i, point) in points.iter().enumerate() {
        let color = labels
            .and_then(|l| l.get(i).copied())
            .map_or(UNLABELED, label_color);
        let (x, y) = area.map(
            (point[0] - xmin) / (xmax - xmin),
            (point[1] - ymin) / (ymax - ymin),
        );
        for dx in -1..=1 {
            for dy in -1..=1 {
                put(canvas, x + dx, y + dy, color);
            }
        }
    }
}

#[allow(clippy::cast_precision_loss)]
fn draw_lines(canvas: &mut RgbImage, area: &Area, series: &[Vec<f32>]) {
    let (ymin, ymax) = bounds(series.iter().flatten().copied());
    for (index, values) in (0_i32..).zip(series) {
        let color = label_color(index);
        let steps = values.len().saturating_sub(1).max(1) as f32;
        let mapped: Vec<(i64, i64)> = values
            .iter()
            .enumerate()
            .map(|(t, &v)| area.map(t as f32 / steps, (v - ymin) / (ymax - ymin)))
            .collect();
        for pair in mapped.windows(2) {
            draw_line(canvas, pair[0], pair[1], color);
        }
    }
}

/// Bresenham line, clipped to the canvas.
pub(crate) fn draw_line(canvas: &mut RgbImage, from: (i64, i64), to: (i64, i64), color: Rgb<u8>) {
    let (mut x, mut y) = from;
    let dx = (to.0 - x).abs();
    let dy = -(to.1 - y).abs();
    let sx = if x < to.0 { 1 } else { -1 };
    let sy = if y < to.1 { 1 } else { -1 };
    let mut err = dx + dy;
    loop {
        put(canvas, x, y, color);
        if x == to.0 && y == to.1 {
            break;
        }
        let e2 = 2 * err;
        if e2 >= dy {
            err += dy;
            x += sx;
        }
        if e2 <= dx {
            err += dx;
            y += sy;
        }
    }
}
