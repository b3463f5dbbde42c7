use std::sync::Arc;
use std::thread;

use chrono::Utc;
use image::{GrayImage, RgbaImage};
use tokio_util::sync::CancellationToken;

use crate::bridge::{Board, Desktop, ScreenPoint};
use crate::error::{ClaimError, ClaimResult};
use crate::models::{ClaimSession, Item, SessionStatus};
use crate::settings::{Settings, SettingsStore};
use crate::vision::VisualProbe;

use super::selector::select;
use super::state::{StatusHandle, WatchState};

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

use crate::{log_error, log_info, log_warn};

const CONFLICT_REASON: &str = "claimed by someone else first";

/// Templates resolved once per session.
struct SessionTemplates {
    conflict: GrayImage,
    ready: Option<GrayImage>,
}

enum Attempt {
    Claimed,
    Conflict(Option<RgbaImage>),
}

/// Clicks the dismiss point when dropped, so whatever the claim gesture
/// opened is closed on every path out of an attempt.
struct DismissGuard<'a> {
    desktop: &'a dyn Desktop,
    point: Option<ScreenPoint>,
}

impl<'a> DismissGuard<'a> {
    fn new(desktop: &'a dyn Desktop, point: Option<ScreenPoint>) -> Self {
        Self { desktop, point }
    }
}

impl Drop for DismissGuard<'_> {
    fn drop(&mut self) {
        if let Some(point) = self.point {
            if let Err(err) = self.desktop.move_and_click(point) {
                log_warn!("dismiss click at ({}, {}) failed: {err}", point.x, point.y);
            }
        }
    }
}

/// Runs one claim session: the `ClaimLoop` and `Stabilizing` part of the
/// watcher, from detected growth until a report is ready.
///
/// Everything here blocks; the polling loop calls it from the blocking pool.
#[derive(Clone)]
pub struct ClaimOrchestrator {
    board: Arc<dyn Board>,
    desktop: Arc<dyn Desktop>,
    settings: Arc<SettingsStore>,
    status: StatusHandle,
}

impl ClaimOrchestrator {
    pub fn new(
        board: Arc<dyn Board>,
        desktop: Arc<dyn Desktop>,
        settings: Arc<SettingsStore>,
        status: StatusHandle,
    ) -> Self {
        Self {
            board,
            desktop,
            settings,
            status,
        }
    }

    pub fn board(&self) -> &Arc<dyn Board> {
        &self.board
    }

    pub fn settings(&self) -> &Arc<SettingsStore> {
        &self.settings
    }

    pub fn status(&self) -> &StatusHandle {
        &self.status
    }

    /// Always returns a finished session, whatever went wrong along the way.
    /// Cancellation is honoured between passes, never inside an attempt.
    pub fn run_session(
        &self,
        baseline: u64,
        trigger: u64,
        cancel: &CancellationToken,
    ) -> ClaimSession {
        let mut session = ClaimSession::begin(baseline, trigger, Utc::now());
        log_info!(
            "claim session {} started: counter {} -> {}",
            session.id,
            baseline,
            trigger
        );

        let settings = self.settings.snapshot();
        let templates = match self.load_templates(&settings) {
            Ok(templates) => templates,
            Err(err) => {
                log_error!("claim session {} aborted: {err}", session.id);
                self.status.transition(WatchState::Reporting);
                session.fail(err.to_string(), Utc::now());
                return session;
            }
        };

        self.status.transition(WatchState::ClaimLoop);
        let mut previous_candidates = 0usize;

        loop {
            if cancel.is_cancelled() {
                log_info!(
                    "claim session {} cancelled after {} pass(es)",
                    session.id,
                    session.loop_count
                );
                self.status.transition(WatchState::Reporting);
                session.finish(SessionStatus::Cancelled, Utc::now());
                return session;
            }

            let settings = self.settings.snapshot();
            let open_items = match self.board.list_open_items() {
                Ok(items) => items,
                Err(err) if err.is_fatal() => {
                    log_error!("claim session {} aborted reading the list: {err}", session.id);
                    self.status.transition(WatchState::Reporting);
                    session.fail(err.to_string(), Utc::now());
                    return session;
                }
                Err(err) => {
                    log_warn!("open item list unavailable, retrying: {err}");
                    thread::sleep(settings.watch.poll_interval());
                    continue;
                }
            };

            let candidates = select(&open_items, &settings.keywords);
            let grew = candidates.len() > previous_candidates;
            previous_candidates = candidates.len();
            let pending: Vec<Item> = candidates
                .into_iter()
                .filter(|item| !session.is_resolved(&item.label))
                .collect();

            if pending.is_empty() {
                if grew {
                    // only already-resolved labels came back; confirm on the next read
                    thread::sleep(settings.watch.poll_interval());
                    continue;
                }
                self.status.transition(WatchState::Stabilizing);
                log_info!(
                    "claim session {} stable after {} pass(es): {} open, {} resolved",
                    session.id,
                    session.loop_count,
                    open_items.len(),
                    session.resolved_count()
                );
                self.status.transition(WatchState::Reporting);
                session.finish(SessionStatus::Completed, Utc::now());
                return session;
            }

            let probe = VisualProbe::new(Arc::clone(&self.desktop), settings.probe.to_config());
            for item in pending {
                let started = std::time::Instant::now();
                match self.attempt(&item, &settings, &templates, &probe) {
                    Ok(Attempt::Claimed) => {
                        log_info!(
                            "claimed '{}' in {}ms",
                            item.label,
                            started.elapsed().as_millis()
                        );
                        session.record_claimed(item, Utc::now());
                    }
                    Ok(Attempt::Conflict(evidence)) => {
                        log_info!(
                            "missed '{}': conflict marker visible after {}ms",
                            item.label,
                            started.elapsed().as_millis()
                        );
                        session.record_missed(item, evidence, CONFLICT_REASON, Utc::now());
                    }
                    Err(err) if err.is_fatal() => {
                        log_error!(
                            "claim session {} aborted at '{}': {err}",
                            session.id,
                            item.label
                        );
                        session.loop_count += 1;
                        self.status.transition(WatchState::Reporting);
                        session.fail(err.to_string(), Utc::now());
                        return session;
                    }
                    Err(err) => {
                        log_warn!("missed '{}': {err}", item.label);
                        session.record_missed(item, None, err.to_string(), Utc::now());
                    }
                }
            }

            session.loop_count += 1;
            self.status.transition(WatchState::ClaimLoop);
        }
    }

    fn load_templates(&self, settings: &Settings) -> ClaimResult<SessionTemplates> {
        let conflict = self.desktop.load_template(&settings.probe.conflict_template)?;
        let ready = settings
            .probe
            .ready_template
            .as_deref()
            .map(|path| self.desktop.load_template(path))
            .transpose()?;
        Ok(SessionTemplates { conflict, ready })
    }

    fn attempt(
        &self,
        item: &Item,
        settings: &Settings,
        templates: &SessionTemplates,
        probe: &VisualProbe,
    ) -> Result<Attempt, ClaimError> {
        let _dismiss = DismissGuard::new(self.desktop.as_ref(), settings.clicks.dismiss);

        self.board.perform_claim_action(item)?;

        if let Some(selector) = &settings.board.claim_selector {
            self.board
                .wait_for_element(selector, settings.probe.timeout_ms)?;
        }
        if let Some(ready) = &templates.ready {
            probe.wait_until_visible(ready, "claim dialog")?;
        }
        if let Some(point) = settings.clicks.claim {
            self.desktop.move_and_click(point)?;
        }

        let result = probe.probe(&templates.conflict)?;
        if result.present {
            Ok(Attempt::Conflict(result.evidence))
        } else {
            Ok(Attempt::Claimed)
        }
    }
}
