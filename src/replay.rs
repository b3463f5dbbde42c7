//! Scripted board and desktop.
//!
//! A `ReplayScript` describes what the board shows over time; `Replay` hands
//! out a `ReplayBoard` and a `ReplayDesktop` that share one state, so the
//! desktop can paint the conflict marker right after the board was asked to
//! claim an item a rival already took. Used by `claimwatch watch` for dry
//! runs and by the tests.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::{Context, Result};
use image::{GrayImage, Rgba, RgbaImage};
use serde::{Deserialize, Serialize};

use crate::bridge::{load_template_file, Board, Desktop, ScreenPoint};
use crate::error::{ClaimError, ClaimResult};
use crate::models::Item;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplayScript {
    /// One counter reading per poll. `null` is a transient read failure.
    /// The last entry repeats unless `end_with_fatal` is set.
    pub counts: Vec<Option<u64>>,
    /// One open-item listing per list read; the last entry repeats.
    pub listings: Vec<Vec<String>>,
    /// Labels a rival claims first.
    pub conflicts: Vec<String>,
    /// Labels whose claim action itself fails.
    pub failing: Vec<String>,
    /// Selectors that never show up.
    pub missing_selectors: Vec<String>,
    /// Reports the board as unreachable once `counts` is used up.
    pub end_with_fatal: bool,
    pub screen_width: u32,
    pub screen_height: u32,
    /// Top-left corner where the conflict marker is painted.
    pub marker_at: ScreenPoint,
    pub cursor: ScreenPoint,
}

impl Default for ReplayScript {
    fn default() -> Self {
        Self {
            counts: Vec::new(),
            listings: Vec::new(),
            conflicts: Vec::new(),
            failing: Vec::new(),
            missing_selectors: Vec::new(),
            end_with_fatal: false,
            screen_width: 320,
            screen_height: 240,
            marker_at: ScreenPoint::new(40, 40),
            cursor: ScreenPoint::new(0, 0),
        }
    }
}

impl ReplayScript {
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read replay script {}", path.display()))?;
        serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse replay script {}", path.display()))
    }
}

#[derive(Debug, Default)]
struct ReplayState {
    count_reads: usize,
    list_reads: usize,
    connected: bool,
    /// Label of the most recent claim action.
    active_claim: Option<String>,
    claims: Vec<String>,
    clicks: Vec<ScreenPoint>,
}

struct ReplayInner {
    script: ReplayScript,
    marker: GrayImage,
    templates: HashMap<PathBuf, GrayImage>,
    state: Mutex<ReplayState>,
}

impl ReplayInner {
    fn state(&self) -> MutexGuard<'_, ReplayState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Handle to a running replay; cheap to clone.
#[derive(Clone)]
pub struct Replay {
    inner: Arc<ReplayInner>,
}

impl Replay {
    /// `marker` is what the desktop paints when a conflicting claim was made.
    pub fn new(script: ReplayScript, marker: GrayImage) -> Self {
        Self {
            inner: Arc::new(ReplayInner {
                script,
                marker,
                templates: HashMap::new(),
                state: Mutex::new(ReplayState::default()),
            }),
        }
    }

    /// Serves `image` for `path` instead of reading the file.
    pub fn with_template(self, path: impl Into<PathBuf>, image: GrayImage) -> Self {
        let mut inner = match Arc::try_unwrap(self.inner) {
            Ok(inner) => inner,
            Err(shared) => ReplayInner {
                script: shared.script.clone(),
                marker: shared.marker.clone(),
                templates: shared.templates.clone(),
                state: Mutex::new(ReplayState::default()),
            },
        };
        inner.templates.insert(path.into(), image);
        Self {
            inner: Arc::new(inner),
        }
    }

    pub fn board(&self) -> ReplayBoard {
        ReplayBoard {
            inner: Arc::clone(&self.inner),
        }
    }

    pub fn desktop(&self) -> ReplayDesktop {
        ReplayDesktop {
            inner: Arc::clone(&self.inner),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.inner.state().connected
    }

    /// Labels passed to `perform_claim_action`, in call order.
    pub fn claims(&self) -> Vec<String> {
        self.inner.state().claims.clone()
    }

    pub fn clicks(&self) -> Vec<ScreenPoint> {
        self.inner.state().clicks.clone()
    }

    pub fn count_reads(&self) -> usize {
        self.inner.state().count_reads
    }

    pub fn list_reads(&self) -> usize {
        self.inner.state().list_reads
    }
}

pub struct ReplayBoard {
    inner: Arc<ReplayInner>,
}

impl Board for ReplayBoard {
    fn connect(&self) -> ClaimResult<()> {
        self.inner.state().connected = true;
        Ok(())
    }

    fn read_count_text(&self) -> ClaimResult<String> {
        let script = &self.inner.script;
        let mut state = self.inner.state();
        let idx = state.count_reads;
        state.count_reads += 1;

        let reading = match script.counts.get(idx) {
            Some(reading) => *reading,
            None if script.end_with_fatal => {
                return Err(ClaimError::FatalSource("replay script exhausted".into()))
            }
            None => match script.counts.last() {
                Some(last) => *last,
                None => return Err(ClaimError::TransientSource("no counter scripted".into())),
            },
        };

        match reading {
            Some(count) => Ok(format!("{count} unclaimed")),
            None => Err(ClaimError::TransientSource("counter element missing".into())),
        }
    }

    fn list_open_items(&self) -> ClaimResult<Vec<Item>> {
        let listings = &self.inner.script.listings;
        let mut state = self.inner.state();
        let idx = state.list_reads.min(listings.len().saturating_sub(1));
        state.list_reads += 1;

        Ok(listings
            .get(idx)
            .map(|labels| {
                labels
                    .iter()
                    .enumerate()
                    .map(|(position, label)| Item::new(label.clone(), position))
                    .collect()
            })
            .unwrap_or_default())
    }

    fn perform_claim_action(&self, item: &Item) -> ClaimResult<()> {
        let mut state = self.inner.state();
        state.claims.push(item.label.clone());
        state.active_claim = Some(item.label.clone());

        if self.inner.script.failing.contains(&item.label) {
            return Err(ClaimError::TransientSource(format!(
                "claim action for '{}' rejected",
                item.label
            )));
        }
        Ok(())
    }

    fn wait_for_element(&self, selector: &str, timeout_ms: u64) -> ClaimResult<()> {
        if self
            .inner
            .script
            .missing_selectors
            .iter()
            .any(|missing| missing == selector)
        {
            return Err(ClaimError::ElementTimeout {
                what: selector.to_string(),
                waited_ms: timeout_ms,
            });
        }
        Ok(())
    }
}

pub struct ReplayDesktop {
    inner: Arc<ReplayInner>,
}

impl Desktop for ReplayDesktop {
    fn capture_screen(&self) -> ClaimResult<RgbaImage> {
        let script = &self.inner.script;
        let mut screen = RgbaImage::from_pixel(
            script.screen_width,
            script.screen_height,
            Rgba([128, 128, 128, 255]),
        );

        let conflicted = self
            .inner
            .state()
            .active_claim
            .as_ref()
            .is_some_and(|label| script.conflicts.contains(label));
        if conflicted {
            let marker = image::DynamicImage::ImageLuma8(self.inner.marker.clone()).to_rgba8();
            image::imageops::replace(
                &mut screen,
                &marker,
                i64::from(script.marker_at.x),
                i64::from(script.marker_at.y),
            );
        }
        Ok(screen)
    }

    fn load_template(&self, path: &Path) -> ClaimResult<GrayImage> {
        match self.inner.templates.get(path) {
            Some(image) => Ok(image.clone()),
            None => load_template_file(path),
        }
    }

    fn cursor_position(&self) -> ClaimResult<ScreenPoint> {
        Ok(self.inner.script.cursor)
    }

    fn move_and_click(&self, point: ScreenPoint) -> ClaimResult<()> {
        self.inner.state().clicks.push(point);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vision::test_support::noise_template;
    use crate::vision::TemplateMatcher;

    fn script() -> ReplayScript {
        ReplayScript {
            counts: vec![Some(2), None, Some(4)],
            listings: vec![vec!["a".into()], vec!["a".into(), "b".into()]],
            conflicts: vec!["b".into()],
            ..ReplayScript::default()
        }
    }

    #[test]
    fn counts_step_through_and_repeat_the_last() {
        let replay = Replay::new(script(), noise_template(8, 8, 1));
        let board = replay.board();

        assert_eq!(board.read_count().unwrap(), 2);
        assert!(board.read_count().unwrap_err().is_transient());
        assert_eq!(board.read_count().unwrap(), 4);
        assert_eq!(board.read_count().unwrap(), 4);
        assert_eq!(replay.count_reads(), 4);
    }

    #[test]
    fn exhausted_script_can_end_fatally() {
        let script = ReplayScript {
            counts: vec![Some(1)],
            end_with_fatal: true,
            ..ReplayScript::default()
        };
        let board = Replay::new(script, noise_template(8, 8, 1)).board();
        assert_eq!(board.read_count().unwrap(), 1);
        assert!(board.read_count().unwrap_err().is_fatal());
    }

    #[test]
    fn listings_carry_positions() {
        let replay = Replay::new(script(), noise_template(8, 8, 1));
        let board = replay.board();
        assert_eq!(board.list_open_items().unwrap(), vec![Item::new("a", 0)]);
        let second = board.list_open_items().unwrap();
        assert_eq!(second[1], Item::new("b", 1));
        assert_eq!(board.list_open_items().unwrap().len(), 2);
    }

    #[test]
    fn marker_appears_only_after_conflicting_claim() {
        let marker = noise_template(12, 10, 3);
        let replay = Replay::new(script(), marker.clone());
        let board = replay.board();
        let desktop = replay.desktop();
        let matcher = TemplateMatcher::default();

        let find = |desktop: &ReplayDesktop| {
            let gray = image::imageops::grayscale(&desktop.capture_screen().unwrap());
            matcher.find_all(&marker, &gray)
        };

        assert!(find(&desktop).is_empty());

        board.perform_claim_action(&Item::new("a", 0)).unwrap();
        assert!(find(&desktop).is_empty());

        board.perform_claim_action(&Item::new("b", 1)).unwrap();
        let found = find(&desktop);
        assert_eq!(found.len(), 1);
        assert_eq!((found[0].bbox.x_min, found[0].bbox.y_min), (40, 40));

        assert_eq!(replay.claims(), vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn registered_templates_shadow_the_filesystem() {
        let marker = noise_template(6, 6, 9);
        let replay = Replay::new(ReplayScript::default(), marker.clone())
            .with_template("files/conflict.png", marker.clone());
        let desktop = replay.desktop();

        assert_eq!(
            desktop.load_template(Path::new("files/conflict.png")).unwrap(),
            marker
        );
        assert!(matches!(
            desktop.load_template(Path::new("files/absent.png")),
            Err(ClaimError::TemplateMissing { .. })
        ));
    }

    #[test]
    fn script_parses_from_json() {
        let script: ReplayScript = serde_json::from_str(
            r#"{"counts": [5, 5, 0, 3], "listings": [["x 1080"]], "marker_at": {"x": 10, "y": 12}}"#,
        )
        .unwrap();
        assert_eq!(script.counts, vec![Some(5), Some(5), Some(0), Some(3)]);
        assert_eq!(script.marker_at, ScreenPoint::new(10, 12));
        assert_eq!(script.screen_width, 320);
    }
}
