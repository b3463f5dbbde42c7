//! Template matching by zero-mean normalized cross-correlation.
//!
//! Every translation of the template over the capture is scored in [-1, 1];
//! offsets at or above the threshold are returned as boxes covering the
//! template footprint. Window sums come from integral images so only the
//! cross term is computed per pixel pair.
//!
//! The cross term is the expensive part: up to capture area times template
//! area multiply-adds per scan. It is accumulated row by row and an offset is
//! dropped once its remaining rows cannot reach the threshold, which on busy
//! screens usually happens within the first row or two. Callers with a time
//! budget use `find_all_before`.

use std::time::Instant;

use image::GrayImage;
use log::trace;
use serde::Serialize;

use crate::bridge::ScreenPoint;

pub const DEFAULT_THRESHOLD: f32 = 0.9;
/// For markers that render with anti-aliasing differences between sessions.
pub const LOOSE_THRESHOLD: f32 = 0.8;

const FLAT_EPSILON: f64 = 1e-9;

/// Footprint of the template placed at a matching offset. `x_max`/`y_max` are exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MatchBox {
    pub x_min: u32,
    pub x_max: u32,
    pub y_min: u32,
    pub y_max: u32,
}

impl MatchBox {
    pub fn width(&self) -> u32 {
        self.x_max - self.x_min
    }

    pub fn height(&self) -> u32 {
        self.y_max - self.y_min
    }

    pub fn center(&self) -> ScreenPoint {
        ScreenPoint::new(
            ((self.x_min + self.x_max) / 2) as i32,
            ((self.y_min + self.y_max) / 2) as i32,
        )
    }

    pub fn contains(&self, other: &MatchBox) -> bool {
        self.x_min <= other.x_min
            && self.y_min <= other.y_min
            && self.x_max >= other.x_max
            && self.y_max >= other.y_max
    }

    /// Smaller of the horizontal gap to the left edge and the vertical gap to
    /// the top edge. A box in line with the reference on either axis is close.
    pub fn axis_distance(&self, reference: ScreenPoint) -> u64 {
        let dx = (i64::from(self.x_min) - i64::from(reference.x)).unsigned_abs();
        let dy = (i64::from(self.y_min) - i64::from(reference.y)).unsigned_abs();
        dx.min(dy)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Match {
    #[serde(flatten)]
    pub bbox: MatchBox,
    pub score: f32,
}

#[derive(Debug, Clone, Copy)]
pub struct TemplateMatcher {
    threshold: f32,
}

impl Default for TemplateMatcher {
    fn default() -> Self {
        Self::new(DEFAULT_THRESHOLD)
    }
}

impl TemplateMatcher {
    pub fn new(threshold: f32) -> Self {
        Self { threshold }
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    /// All qualifying offsets in row-major scan order.
    pub fn find_all(&self, template: &GrayImage, capture: &GrayImage) -> Vec<Match> {
        self.scan(template, capture, None)
    }

    /// Like `find_all`, but gives up once `deadline` passes and returns what
    /// qualified in the rows scanned so far.
    pub fn find_all_before(
        &self,
        template: &GrayImage,
        capture: &GrayImage,
        deadline: Instant,
    ) -> Vec<Match> {
        self.scan(template, capture, Some(deadline))
    }

    fn scan(
        &self,
        template: &GrayImage,
        capture: &GrayImage,
        deadline: Option<Instant>,
    ) -> Vec<Match> {
        let (tw, th) = template.dimensions();
        let (cw, ch) = capture.dimensions();
        if tw == 0 || th == 0 || tw > cw || th > ch {
            return Vec::new();
        }

        let stats = TemplateStats::new(template);
        let integral = Integral::new(capture);
        let threshold = f64::from(self.threshold);
        let n = stats.len as f64;
        let pixels = capture.as_raw().as_slice();
        let stride = cw as usize;

        let mut matches = Vec::new();
        for y in 0..=(ch - th) {
            if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
                trace!("scan cut at row {y} of {}", ch - th + 1);
                break;
            }
            for x in 0..=(cw - tw) {
                let (sum, sum_sq) = integral.window(x, y, tw, th);
                let window_var = (sum_sq - sum * sum / n).max(0.0);

                let score = if stats.sum_sq_dev < FLAT_EPSILON {
                    let same_level = (sum / n - stats.mean).abs() < 0.5;
                    if window_var < FLAT_EPSILON && same_level {
                        1.0
                    } else {
                        0.0
                    }
                } else if window_var < FLAT_EPSILON {
                    0.0
                } else {
                    let window = Window {
                        x: x as usize,
                        y: y as usize,
                        mean: sum / n,
                        var: window_var,
                    };
                    match stats.correlate(pixels, stride, &window, threshold) {
                        Some(score) => score,
                        None => continue,
                    }
                };

                if score >= threshold {
                    matches.push(Match {
                        bbox: MatchBox {
                            x_min: x,
                            x_max: x + tw,
                            y_min: y,
                            y_max: y + th,
                        },
                        score: score as f32,
                    });
                }
            }
        }

        matches
    }

    pub fn find_closest(
        &self,
        template: &GrayImage,
        capture: &GrayImage,
        reference: ScreenPoint,
    ) -> Option<Match> {
        closest(&self.find_all(template, capture), reference)
    }
}

/// Canonical match for a reference point; ties keep scan order.
pub fn closest(matches: &[Match], reference: ScreenPoint) -> Option<Match> {
    matches
        .iter()
        .min_by_key(|m| m.bbox.axis_distance(reference))
        .copied()
}

struct TemplateStats {
    deviations: Vec<f64>,
    /// `tail_norm[r]` is the L2 norm of the deviations in rows `r..`.
    tail_norm: Vec<f64>,
    width: usize,
    len: usize,
    mean: f64,
    sum_sq_dev: f64,
}

/// One placement of the template over the capture.
struct Window {
    x: usize,
    y: usize,
    mean: f64,
    var: f64,
}

impl TemplateStats {
    fn new(template: &GrayImage) -> Self {
        let width = template.width() as usize;
        let raw = template.as_raw();
        let len = raw.len();
        let mean = raw.iter().map(|&p| f64::from(p)).sum::<f64>() / len as f64;
        let deviations: Vec<f64> = raw.iter().map(|&p| f64::from(p) - mean).collect();
        let sum_sq_dev = deviations.iter().map(|d| d * d).sum();

        let mut tail_norm = vec![0.0; template.height() as usize + 1];
        let mut energy = 0.0;
        for (row, devs) in deviations.chunks(width).enumerate().rev() {
            energy += devs.iter().map(|d| d * d).sum::<f64>();
            tail_norm[row] = energy.sqrt();
        }

        Self {
            deviations,
            tail_norm,
            width,
            len,
            mean,
            sum_sq_dev,
        }
    }

    /// Correlation at one placement, or `None` as soon as the rows still to
    /// come cannot lift it to `threshold`. By Cauchy-Schwarz those rows add at
    /// most `tail_norm[r] * sqrt(window.var)` to the cross term.
    fn correlate(
        &self,
        pixels: &[u8],
        stride: usize,
        window: &Window,
        threshold: f64,
    ) -> Option<f64> {
        let window_norm = window.var.sqrt();
        let norm = self.sum_sq_dev.sqrt() * window_norm;
        let needed = threshold * norm - FLAT_EPSILON * norm;

        let mut acc = 0.0;
        for (row, devs) in self.deviations.chunks(self.width).enumerate() {
            let start = (window.y + row) * stride + window.x;
            let line = &pixels[start..start + self.width];
            acc += devs
                .iter()
                .zip(line)
                .map(|(dev, &px)| dev * (f64::from(px) - window.mean))
                .sum::<f64>();
            if acc + self.tail_norm[row + 1] * window_norm < needed {
                return None;
            }
        }
        Some(acc / norm)
    }
}

/// Summed-area tables of pixel values and squared pixel values.
struct Integral {
    stride: usize,
    sum: Vec<u64>,
    sum_sq: Vec<u64>,
}

impl Integral {
    fn new(image: &GrayImage) -> Self {
        let (width, height) = image.dimensions();
        let stride = width as usize + 1;
        let mut sum = vec![0u64; stride * (height as usize + 1)];
        let mut sum_sq = vec![0u64; stride * (height as usize + 1)];

        for (y, line) in image.as_raw().chunks(width as usize).enumerate() {
            let mut row_sum = 0u64;
            let mut row_sq = 0u64;
            for (x, &px) in line.iter().enumerate() {
                let v = u64::from(px);
                row_sum += v;
                row_sq += v * v;
                let idx = (y + 1) * stride + x + 1;
                sum[idx] = sum[idx - stride] + row_sum;
                sum_sq[idx] = sum_sq[idx - stride] + row_sq;
            }
        }

        Self {
            stride,
            sum,
            sum_sq,
        }
    }

    fn window(&self, x: u32, y: u32, w: u32, h: u32) -> (f64, f64) {
        let (x0, y0) = (x as usize, y as usize);
        let (x1, y1) = (x0 + w as usize, y0 + h as usize);
        let at = |table: &[u64], xx: usize, yy: usize| table[yy * self.stride + xx];
        let area = |table: &[u64]| {
            (at(table, x1, y1) + at(table, x0, y0)) - (at(table, x0, y1) + at(table, x1, y0))
        };
        (area(&self.sum) as f64, area(&self.sum_sq) as f64)
    }
}
