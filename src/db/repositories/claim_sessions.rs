use anyhow::{Context, Result};
use rusqlite::{params, Row};

use crate::db::{
    connection::Database,
    helpers::{
        parse_datetime, parse_optional_datetime, parse_outcome, parse_status, to_i64, to_u64,
    },
    models::{ClaimOutcomeRecord, ClaimSessionRecord},
};
use crate::models::ClaimSession;

fn row_to_session(row: &Row) -> Result<ClaimSessionRecord> {
    let started_at: String = row.get("started_at")?;
    let ended_at: Option<String> = row.get("ended_at")?;
    let status: String = row.get("status")?;
    let baseline_count: i64 = row.get("baseline_count")?;
    let trigger_count: i64 = row.get("trigger_count")?;

    Ok(ClaimSessionRecord {
        id: row.get("id")?,
        started_at: parse_datetime(&started_at, "started_at")?,
        ended_at: parse_optional_datetime(ended_at, "ended_at")?,
        status: parse_status(&status)?,
        baseline_count: to_u64(baseline_count, "baseline_count")?,
        trigger_count: to_u64(trigger_count, "trigger_count")?,
        loop_count: row.get("loop_count")?,
        claimed_count: row.get("claimed_count")?,
        missed_count: row.get("missed_count")?,
        error: row.get("error")?,
    })
}

fn row_to_outcome(row: &Row) -> Result<ClaimOutcomeRecord> {
    let position: i64 = row.get("position")?;
    let outcome: String = row.get("outcome")?;
    let resolved_at: String = row.get("resolved_at")?;

    Ok(ClaimOutcomeRecord {
        session_id: row.get("session_id")?,
        label: row.get("label")?,
        position: to_u64(position, "position")?,
        outcome: parse_outcome(&outcome)?,
        evidence_png: row.get("evidence")?,
        detail: row.get("detail")?,
        resolved_at: parse_datetime(&resolved_at, "resolved_at")?,
    })
}

impl Database {
    /// Stores the session and every resolved item in one transaction.
    pub async fn insert_claim_session(&self, session: &ClaimSession) -> Result<()> {
        let record = ClaimSessionRecord::from(session);
        let outcomes = ClaimOutcomeRecord::from_session(session)?;

        self.execute(move |conn| {
            let tx = conn.transaction()?;
            tx.execute(
                "INSERT INTO claim_sessions (
                    id, started_at, ended_at, status, baseline_count, trigger_count,
                    loop_count, claimed_count, missed_count, error
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                params![
                    record.id,
                    record.started_at.to_rfc3339(),
                    record.ended_at.as_ref().map(|dt| dt.to_rfc3339()),
                    record.status.as_str(),
                    to_i64(record.baseline_count)?,
                    to_i64(record.trigger_count)?,
                    record.loop_count,
                    record.claimed_count,
                    record.missed_count,
                    record.error,
                ],
            )
            .context("failed to insert claim session")?;

            {
                let mut stmt = tx.prepare(
                    "INSERT INTO claim_outcomes (
                        session_id, label, position, outcome, evidence, detail, resolved_at
                     ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                )?;
                for outcome in &outcomes {
                    stmt.execute(params![
                        outcome.session_id,
                        outcome.label,
                        to_i64(outcome.position)?,
                        outcome.outcome.as_str(),
                        outcome.evidence_png,
                        outcome.detail,
                        outcome.resolved_at.to_rfc3339(),
                    ])
                    .with_context(|| format!("failed to insert outcome for '{}'", outcome.label))?;
                }
            }

            tx.commit().context("failed to commit claim session")?;
            Ok(())
        })
        .await
    }

    /// Most recent sessions first.
    pub async fn list_claim_sessions(&self, limit: u32) -> Result<Vec<ClaimSessionRecord>> {
        self.execute(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, started_at, ended_at, status, baseline_count, trigger_count,
                        loop_count, claimed_count, missed_count, error
                 FROM claim_sessions
                 ORDER BY started_at DESC
                 LIMIT ?1",
            )?;

            let mut rows = stmt.query(params![limit])?;
            let mut sessions = Vec::new();
            while let Some(row) = rows.next()? {
                sessions.push(row_to_session(row)?);
            }
            Ok(sessions)
        })
        .await
    }

    pub async fn get_claim_outcomes(&self, session_id: &str) -> Result<Vec<ClaimOutcomeRecord>> {
        let session_id = session_id.to_string();
        self.execute(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT session_id, label, position, outcome, evidence, detail, resolved_at
                 FROM claim_outcomes
                 WHERE session_id = ?1
                 ORDER BY id ASC",
            )?;

            let mut rows = stmt.query(params![session_id])?;
            let mut outcomes = Vec::new();
            while let Some(row) = rows.next()? {
                outcomes.push(row_to_outcome(row)?);
            }
            Ok(outcomes)
        })
        .await
    }
}
