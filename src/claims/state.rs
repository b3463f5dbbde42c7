use std::sync::{Arc, Mutex, MutexGuard};

use log::{debug, warn};
use serde::Serialize;

use crate::metrics::LatencySnapshot;

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub enum WatchState {
    #[default]
    Idle,
    Polling,
    GrowthDetected,
    ClaimLoop,
    Stabilizing,
    Reporting,
}

impl WatchState {
    pub fn as_str(&self) -> &'static str {
        match self {
            WatchState::Idle => "Idle",
            WatchState::Polling => "Polling",
            WatchState::GrowthDetected => "GrowthDetected",
            WatchState::ClaimLoop => "ClaimLoop",
            WatchState::Stabilizing => "Stabilizing",
            WatchState::Reporting => "Reporting",
        }
    }

    pub fn can_transition_to(&self, next: WatchState) -> bool {
        use WatchState::*;
        matches!(
            (self, next),
            (Idle, Polling)
                | (Polling, Polling)
                | (Polling, GrowthDetected)
                | (Polling, Idle)
                | (GrowthDetected, ClaimLoop)
                // template missing: nothing to loop over, report straight away
                | (GrowthDetected, Reporting)
                | (ClaimLoop, ClaimLoop)
                | (ClaimLoop, Stabilizing)
                // cancelled or fatal mid-session
                | (ClaimLoop, Reporting)
                | (Stabilizing, Reporting)
                | (Reporting, Idle)
                | (Reporting, Polling)
        )
    }
}

/// Classification of one counter reading against the running baseline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollEvent {
    /// First reading; nothing to compare against yet.
    Baseline(u64),
    Unchanged(u64),
    Growth { baseline: u64, count: u64 },
    /// Counter dropped to zero: the board was cleared without new work.
    Drained { previous: u64 },
    Decreased { previous: u64, count: u64 },
}

/// Tracks the last-seen counter value.
///
/// Every event except `Unchanged` moves the baseline to the new reading, so
/// a drain followed by new work is detected as growth from zero.
#[derive(Debug, Clone, Default)]
pub struct CounterTracker {
    baseline: Option<u64>,
}

impl CounterTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_baseline(baseline: u64) -> Self {
        Self {
            baseline: Some(baseline),
        }
    }

    pub fn baseline(&self) -> Option<u64> {
        self.baseline
    }

    pub fn observe(&mut self, count: u64) -> PollEvent {
        let Some(previous) = self.baseline.replace(count) else {
            return PollEvent::Baseline(count);
        };

        if count == previous {
            PollEvent::Unchanged(count)
        } else if count > previous {
            PollEvent::Growth {
                baseline: previous,
                count,
            }
        } else if count == 0 {
            PollEvent::Drained { previous }
        } else {
            PollEvent::Decreased { previous, count }
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WatchStatus {
    pub state: WatchState,
    pub baseline: Option<u64>,
    pub last_count: Option<u64>,
    pub latency: LatencySnapshot,
    pub sessions_run: u32,
    pub last_error: Option<String>,
}

impl WatchStatus {
    /// Multi-line status block shown on every tick.
    pub fn render(&self, policy: &[String], recipients: &[String]) -> String {
        let mut out = String::new();
        if recipients.is_empty() {
            out.push_str("No target recipient!");
        } else {
            out.push_str(&format!("Recipients ready: {}", recipients.join(", ")));
        }
        match self.last_count {
            Some(count) => out.push_str(&format!("\nCurrent item count: {count}")),
            None => out.push_str("\nCurrent item count: unknown"),
        }
        out.push_str(&format!(
            "\nCurrent refresh delay: {:.2}s.",
            self.latency.last_secs
        ));
        out.push_str(&format!(
            "\nAverage refresh delay: {:.2}s.\n",
            self.latency.average_secs
        ));
        for line in policy {
            out.push('\n');
            out.push_str(line);
        }
        out
    }
}

/// Shared view of the watcher, written by the polling loop and the session
/// body, read by the controller.
#[derive(Debug, Clone, Default)]
pub struct StatusHandle {
    inner: Arc<Mutex<WatchStatus>>,
}

impl StatusHandle {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, WatchStatus> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn state(&self) -> WatchState {
        self.lock().state
    }

    pub fn snapshot(&self) -> WatchStatus {
        self.lock().clone()
    }

    pub fn transition(&self, next: WatchState) {
        let mut guard = self.lock();
        let current = guard.state;
        if !current.can_transition_to(next) {
            warn!(
                "unexpected watcher transition {} -> {}",
                current.as_str(),
                next.as_str()
            );
        } else if current != next {
            debug!("watcher {} -> {}", current.as_str(), next.as_str());
        }
        guard.state = next;
    }

    pub fn update<F>(&self, edit: F)
    where
        F: FnOnce(&mut WatchStatus),
    {
        edit(&mut self.lock());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn growth_after_drain_starts_from_zero() {
        let mut tracker = CounterTracker::new();
        let events: Vec<PollEvent> = [5, 5, 0, 3].into_iter().map(|c| tracker.observe(c)).collect();

        assert_eq!(
            events,
            vec![
                PollEvent::Baseline(5),
                PollEvent::Unchanged(5),
                PollEvent::Drained { previous: 5 },
                PollEvent::Growth {
                    baseline: 0,
                    count: 3
                },
            ]
        );
    }

    #[test]
    fn partial_decrease_lowers_baseline_quietly() {
        let mut tracker = CounterTracker::with_baseline(8);
        assert_eq!(
            tracker.observe(6),
            PollEvent::Decreased {
                previous: 8,
                count: 6
            }
        );
        assert_eq!(tracker.baseline(), Some(6));
        assert_eq!(
            tracker.observe(7),
            PollEvent::Growth {
                baseline: 6,
                count: 7
            }
        );
    }

    #[test]
    fn zero_to_zero_is_not_a_drain() {
        let mut tracker = CounterTracker::with_baseline(0);
        assert_eq!(tracker.observe(0), PollEvent::Unchanged(0));
    }

    #[test]
    fn state_cycle_is_allowed_and_shortcuts_are_not() {
        use WatchState::*;
        let cycle = [
            Idle,
            Polling,
            GrowthDetected,
            ClaimLoop,
            ClaimLoop,
            Stabilizing,
            Reporting,
            Idle,
        ];
        for pair in cycle.windows(2) {
            assert!(pair[0].can_transition_to(pair[1]), "{:?} -> {:?}", pair[0], pair[1]);
        }
        assert!(!Polling.can_transition_to(ClaimLoop));
        assert!(!Idle.can_transition_to(GrowthDetected));
        assert!(!Stabilizing.can_transition_to(Polling));
    }

    #[test]
    fn render_lists_policy_and_delays() {
        let status = WatchStatus {
            last_count: Some(4),
            latency: LatencySnapshot {
                last_secs: 1.234,
                average_secs: 1.5,
                samples: 3,
            },
            ..WatchStatus::default()
        };
        let text = status.render(&["Auto-claim off.".to_string()], &["ops".to_string()]);
        assert!(text.starts_with("Recipients ready: ops"));
        assert!(text.contains("Current item count: 4"));
        assert!(text.contains("Current refresh delay: 1.23s."));
        assert!(text.contains("Average refresh delay: 1.50s."));
        assert!(text.ends_with("Auto-claim off."));
    }

    #[test]
    fn status_handle_tracks_transitions() {
        let status = StatusHandle::new();
        assert_eq!(status.state(), WatchState::Idle);
        status.transition(WatchState::Polling);
        status.update(|s| s.last_count = Some(9));

        let snapshot = status.snapshot();
        assert_eq!(snapshot.state, WatchState::Polling);
        assert_eq!(snapshot.last_count, Some(9));
    }
}
