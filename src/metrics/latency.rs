use std::collections::VecDeque;
use std::time::Instant;

use serde::Serialize;

pub const LATENCY_WINDOW: usize = 10;

/// Rolling window of the time between consecutive counter reads.
#[derive(Debug, Clone)]
pub struct LatencyTracker {
    window: VecDeque<f64>,
    capacity: usize,
    last_sample: Option<Instant>,
}

#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LatencySnapshot {
    pub last_secs: f64,
    pub average_secs: f64,
    pub samples: usize,
}

impl Default for LatencyTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl LatencyTracker {
    pub fn new() -> Self {
        Self::with_capacity(LATENCY_WINDOW)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            window: VecDeque::with_capacity(capacity),
            capacity: capacity.max(1),
            last_sample: None,
        }
    }

    /// Records a poll at `at` and returns the rolling average in seconds.
    pub fn record(&mut self, at: Instant) -> f64 {
        if let Some(previous) = self.last_sample.replace(at) {
            let delta = at.saturating_duration_since(previous).as_secs_f64();
            self.window.push_back(delta);
            while self.window.len() > self.capacity {
                self.window.pop_front();
            }
        }
        self.average()
    }

    pub fn average(&self) -> f64 {
        if self.window.is_empty() {
            return 0.0;
        }
        self.window.iter().sum::<f64>() / self.window.len() as f64
    }

    pub fn last(&self) -> f64 {
        self.window.back().copied().unwrap_or(0.0)
    }

    pub fn len(&self) -> usize {
        self.window.len()
    }

    pub fn is_empty(&self) -> bool {
        self.window.is_empty()
    }

    pub fn snapshot(&self) -> LatencySnapshot {
        LatencySnapshot {
            last_secs: self.last(),
            average_secs: self.average(),
            samples: self.window.len(),
        }
    }

    pub fn reset(&mut self) {
        self.window.clear();
        self.last_sample = None;
    }
}
