//! Stored shape of a claim session report.

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::db::helpers::encode_png;
use crate::models::{ClaimSession, Outcome, SessionStatus};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ClaimSessionRecord {
    pub id: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub status: SessionStatus,
    pub baseline_count: u64,
    pub trigger_count: u64,
    pub loop_count: u32,
    pub claimed_count: u32,
    pub missed_count: u32,
    pub error: Option<String>,
}

impl From<&ClaimSession> for ClaimSessionRecord {
    fn from(session: &ClaimSession) -> Self {
        Self {
            id: session.id.clone(),
            started_at: session.started_at,
            ended_at: session.ended_at,
            status: session.status,
            baseline_count: session.baseline_count,
            trigger_count: session.trigger_count,
            loop_count: session.loop_count,
            claimed_count: session.claimed.len() as u32,
            missed_count: session.missed.len() as u32,
            error: session.error.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ClaimOutcomeRecord {
    pub session_id: String,
    pub label: String,
    pub position: u64,
    pub outcome: Outcome,
    /// PNG-encoded crop around the conflict marker.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub evidence_png: Option<Vec<u8>>,
    pub detail: Option<String>,
    pub resolved_at: DateTime<Utc>,
}

impl ClaimOutcomeRecord {
    /// Claimed items first, then missed, each in resolution order.
    pub fn from_session(session: &ClaimSession) -> Result<Vec<Self>> {
        let mut records = Vec::with_capacity(session.resolved_count());
        for claimed in &session.claimed {
            records.push(Self {
                session_id: session.id.clone(),
                label: claimed.item.label.clone(),
                position: claimed.item.position as u64,
                outcome: Outcome::Claimed,
                evidence_png: None,
                detail: None,
                resolved_at: claimed.resolved_at,
            });
        }
        for missed in &session.missed {
            records.push(Self {
                session_id: session.id.clone(),
                label: missed.item.label.clone(),
                position: missed.item.position as u64,
                outcome: Outcome::Missed,
                evidence_png: missed.evidence.as_ref().map(encode_png).transpose()?,
                detail: Some(missed.reason.clone()),
                resolved_at: missed.resolved_at,
            });
        }
        Ok(records)
    }
}
