//! Claim session records.
//!
//! A `ClaimSession` lives from the moment counter growth is detected until the
//! report is handed to the notifier and persisted.

use chrono::{DateTime, Duration, Utc};
use image::RgbaImage;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{Item, Outcome};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum SessionStatus {
    Running,
    Completed,
    Cancelled,
    Failed,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Running => "Running",
            SessionStatus::Completed => "Completed",
            SessionStatus::Cancelled => "Cancelled",
            SessionStatus::Failed => "Failed",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ClaimedItem {
    pub item: Item,
    pub resolved_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct MissedItem {
    pub item: Item,
    /// Crop of the screen around the conflict marker. `None` when the item was
    /// degraded for another reason (timeout, failed claim action).
    pub evidence: Option<RgbaImage>,
    pub reason: String,
    pub resolved_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct ClaimSession {
    pub id: String,
    pub baseline_count: u64,
    pub trigger_count: u64,
    pub status: SessionStatus,
    pub claimed: Vec<ClaimedItem>,
    pub missed: Vec<MissedItem>,
    pub loop_count: u32,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

impl ClaimSession {
    pub fn begin(baseline_count: u64, trigger_count: u64, started_at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            baseline_count,
            trigger_count,
            status: SessionStatus::Running,
            claimed: Vec::new(),
            missed: Vec::new(),
            loop_count: 0,
            started_at,
            ended_at: None,
            error: None,
        }
    }

    pub fn outcome_of(&self, label: &str) -> Outcome {
        if self.claimed.iter().any(|c| c.item.label == label) {
            Outcome::Claimed
        } else if self.missed.iter().any(|m| m.item.label == label) {
            Outcome::Missed
        } else {
            Outcome::Unresolved
        }
    }

    pub fn is_resolved(&self, label: &str) -> bool {
        self.outcome_of(label) != Outcome::Unresolved
    }

    pub fn resolved_count(&self) -> usize {
        self.claimed.len() + self.missed.len()
    }

    pub fn record_claimed(&mut self, item: Item, at: DateTime<Utc>) {
        self.claimed.push(ClaimedItem {
            item,
            resolved_at: at,
        });
    }

    pub fn record_missed(
        &mut self,
        item: Item,
        evidence: Option<RgbaImage>,
        reason: impl Into<String>,
        at: DateTime<Utc>,
    ) {
        self.missed.push(MissedItem {
            item,
            evidence,
            reason: reason.into(),
            resolved_at: at,
        });
    }

    pub fn finish(&mut self, status: SessionStatus, at: DateTime<Utc>) {
        self.status = status;
        self.ended_at = Some(at);
    }

    pub fn fail(&mut self, error: impl Into<String>, at: DateTime<Utc>) {
        self.error = Some(error.into());
        self.finish(SessionStatus::Failed, at);
    }

    pub fn is_finished(&self) -> bool {
        self.status != SessionStatus::Running
    }

    pub fn elapsed(&self) -> Duration {
        self.ended_at.unwrap_or_else(Utc::now) - self.started_at
    }

    pub fn claimed_labels(&self) -> Vec<&str> {
        self.claimed.iter().map(|c| c.item.label.as_str()).collect()
    }

    pub fn missed_labels(&self) -> Vec<&str> {
        self.missed.iter().map(|m| m.item.label.as_str()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outcomes_follow_recorded_partitions() {
        let now = Utc::now();
        let mut session = ClaimSession::begin(0, 3, now);
        session.record_claimed(Item::new("alpha", 0), now);
        session.record_missed(Item::new("beta", 1), None, "conflict", now);

        assert_eq!(session.outcome_of("alpha"), Outcome::Claimed);
        assert_eq!(session.outcome_of("beta"), Outcome::Missed);
        assert_eq!(session.outcome_of("gamma"), Outcome::Unresolved);
        assert_eq!(session.resolved_count(), 2);
        assert!(!session.is_finished());
    }

    #[test]
    fn fail_records_error_and_end_time() {
        let now = Utc::now();
        let mut session = ClaimSession::begin(2, 5, now);
        session.fail("board unreachable", now + Duration::seconds(4));

        assert_eq!(session.status, SessionStatus::Failed);
        assert_eq!(session.error.as_deref(), Some("board unreachable"));
        assert_eq!(session.elapsed(), Duration::seconds(4));
    }
}
