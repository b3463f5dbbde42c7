mod latency;

pub use latency::{LatencySnapshot, LatencyTracker, LATENCY_WINDOW};
