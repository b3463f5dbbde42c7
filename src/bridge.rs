//! Seams to the outside world.
//!
//! The board (a browser session against the shared work board), the desktop
//! (screen capture and pointer), and the notifier are all supplied by the
//! embedding application. Calls are blocking; the polling loop moves them
//! onto the blocking pool.

use std::path::Path;

use image::{GrayImage, RgbaImage};

use crate::error::{ClaimError, ClaimResult};
use crate::models::Item;

/// A point in screen coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ScreenPoint {
    pub x: i32,
    pub y: i32,
}

impl ScreenPoint {
    pub fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

pub trait Board: Send + Sync {
    /// Establish the authenticated session. Called once before the baseline read.
    fn connect(&self) -> ClaimResult<()>;

    /// Raw text of the unclaimed counter element, e.g. "共 12 条".
    fn read_count_text(&self) -> ClaimResult<String>;

    /// Reads the unclaimed counter.
    fn read_count(&self) -> ClaimResult<u64> {
        let text = self.read_count_text()?;
        parse_count(&text)
    }

    /// Labels of the unclaimed column in rendered order.
    fn list_open_items(&self) -> ClaimResult<Vec<Item>>;

    fn perform_claim_action(&self, item: &Item) -> ClaimResult<()>;

    /// Blocks until the element named by `selector` is present or `timeout_ms` passes.
    fn wait_for_element(&self, selector: &str, timeout_ms: u64) -> ClaimResult<()>;
}

pub trait Desktop: Send + Sync {
    fn capture_screen(&self) -> ClaimResult<RgbaImage>;

    /// Loads a reference image as grayscale. A missing or unreadable file is
    /// reported as `ClaimError::TemplateMissing`.
    fn load_template(&self, path: &Path) -> ClaimResult<GrayImage> {
        load_template_file(path)
    }

    fn cursor_position(&self) -> ClaimResult<ScreenPoint>;

    fn move_and_click(&self, point: ScreenPoint) -> ClaimResult<()>;
}

pub fn load_template_file(path: &Path) -> ClaimResult<GrayImage> {
    image::open(path)
        .map(|img| img.to_luma8())
        .map_err(|err| ClaimError::TemplateMissing {
            path: path.to_path_buf(),
            reason: err.to_string(),
        })
}

/// Extracts the first run of ASCII digits from the counter text.
pub fn parse_count(text: &str) -> ClaimResult<u64> {
    let digits: String = text
        .chars()
        .skip_while(|c| !c.is_ascii_digit())
        .take_while(|c| c.is_ascii_digit())
        .collect();

    if digits.is_empty() {
        return Err(ClaimError::TransientSource(format!(
            "counter text '{text}' has no number"
        )));
    }

    digits
        .parse()
        .map_err(|err| ClaimError::TransientSource(format!("counter '{digits}': {err}")))
}
