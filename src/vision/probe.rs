use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use image::{GrayImage, RgbaImage};
use log::{debug, trace};

use crate::bridge::Desktop;
use crate::error::{ClaimError, ClaimResult};

use super::matcher::{closest, MatchBox, TemplateMatcher};

pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_PROBE_INTERVAL: Duration = Duration::from_millis(100);

/// Context kept around a match when cropping evidence. Wider horizontally so
/// the item title next to the marker stays readable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct EvidencePadding {
    pub left: u32,
    pub top: u32,
    pub right: u32,
    pub bottom: u32,
}

impl Default for EvidencePadding {
    fn default() -> Self {
        Self {
            left: 80,
            top: 50,
            right: 100,
            bottom: 15,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ProbeConfig {
    pub timeout: Duration,
    pub interval: Duration,
    pub threshold: f32,
    pub padding: EvidencePadding,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_PROBE_TIMEOUT,
            interval: DEFAULT_PROBE_INTERVAL,
            threshold: super::matcher::DEFAULT_THRESHOLD,
            padding: EvidencePadding::default(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ProbeResult {
    pub present: bool,
    pub bbox: Option<MatchBox>,
    pub evidence: Option<RgbaImage>,
}

impl ProbeResult {
    pub fn absent() -> Self {
        Self {
            present: false,
            bbox: None,
            evidence: None,
        }
    }

    fn present(bbox: MatchBox, evidence: RgbaImage) -> Self {
        Self {
            present: true,
            bbox: Some(bbox),
            evidence: Some(evidence),
        }
    }
}

/// Answers "is this marker on screen right now", retrying until the
/// configured timeout before concluding it is absent.
#[derive(Clone)]
pub struct VisualProbe {
    desktop: Arc<dyn Desktop>,
    matcher: TemplateMatcher,
    config: ProbeConfig,
}

impl VisualProbe {
    pub fn new(desktop: Arc<dyn Desktop>, config: ProbeConfig) -> Self {
        Self {
            desktop,
            matcher: TemplateMatcher::new(config.threshold),
            config,
        }
    }

    pub fn config(&self) -> &ProbeConfig {
        &self.config
    }

    /// Always captures at least once, even with a zero timeout. Scans are cut
    /// at the deadline, so one call overruns its timeout by at most one
    /// capture plus one row of offsets.
    pub fn probe(&self, template: &GrayImage) -> ClaimResult<ProbeResult> {
        let started = Instant::now();
        let deadline = started + self.config.timeout;
        // a zero timeout still gets one complete scan
        let scan_deadline = (!self.config.timeout.is_zero()).then_some(deadline);
        let mut attempts = 0u32;

        loop {
            attempts += 1;
            let capture = self.desktop.capture_screen()?;
            let gray = image::imageops::grayscale(&capture);
            let reference = self.desktop.cursor_position()?;

            let matches = match scan_deadline {
                Some(deadline) => self.matcher.find_all_before(template, &gray, deadline),
                None => self.matcher.find_all(template, &gray),
            };
            if let Some(found) = closest(&matches, reference) {
                debug!(
                    "marker found at ({}, {}) score={:.3} after {} attempt(s), {}ms",
                    found.bbox.x_min,
                    found.bbox.y_min,
                    found.score,
                    attempts,
                    started.elapsed().as_millis()
                );
                let evidence = crop_evidence(&capture, &found.bbox, &self.config.padding);
                return Ok(ProbeResult::present(found.bbox, evidence));
            }

            let now = Instant::now();
            if now >= deadline {
                trace!("marker absent after {attempts} attempt(s)");
                return Ok(ProbeResult::absent());
            }
            thread::sleep(self.config.interval.min(deadline - now));
        }
    }

    /// Readiness gate: waits for the marker and fails with an element timeout
    /// when it never shows.
    pub fn wait_until_visible(&self, template: &GrayImage, what: &str) -> ClaimResult<MatchBox> {
        let result = self.probe(template)?;
        match result.bbox {
            Some(bbox) if result.present => Ok(bbox),
            _ => Err(ClaimError::ElementTimeout {
                what: what.to_string(),
                waited_ms: self.config.timeout.as_millis() as u64,
            }),
        }
    }
}

/// Crops the capture around `bbox`, clamped to the capture bounds.
pub fn crop_evidence(capture: &RgbaImage, bbox: &MatchBox, padding: &EvidencePadding) -> RgbaImage {
    let (width, height) = capture.dimensions();
    let x0 = bbox.x_min.saturating_sub(padding.left);
    let y0 = bbox.y_min.saturating_sub(padding.top);
    let x1 = bbox.x_max.saturating_add(padding.right).min(width);
    let y1 = bbox.y_max.saturating_add(padding.bottom).min(height);

    image::imageops::crop_imm(capture, x0, y0, x1.saturating_sub(x0), y1.saturating_sub(y0))
        .to_image()
}
