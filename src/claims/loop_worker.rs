use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio::time::{Duration, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::bridge::Board;
use crate::db::Database;
use crate::error::{ClaimError, ClaimResult};
use crate::metrics::LatencyTracker;
use crate::models::{ClaimSession, SessionStatus};
use crate::notify::{
    broadcast, drain_notice, fatal_notice, session_evidence, session_summary, update_notice,
    Message, Notifier,
};
use crate::settings::{Recipient, WatchMode};

use super::orchestrator::ClaimOrchestrator;
use super::state::{CounterTracker, PollEvent, StatusHandle, WatchState};

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

// Import the logging macros (exported at crate root)
use crate::{log_error, log_info, log_warn};

/// Everything one watcher run needs.
#[derive(Clone)]
pub struct WatchContext {
    pub orchestrator: ClaimOrchestrator,
    pub notifier: Arc<dyn Notifier>,
    pub db: Option<Database>,
}

/// What a watcher run did before it returned.
#[derive(Debug, Default)]
pub struct WatchReport {
    pub sessions: Vec<ClaimSession>,
    pub drains: u32,
    /// Set when the run ended on an unrecoverable error.
    pub error: Option<String>,
}

impl WatchReport {
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

/// Polls the board counter until cancelled, a fatal error occurs, or (in
/// single-shot mode) the first claim session has been reported.
pub async fn watch_loop(ctx: WatchContext, cancel_token: CancellationToken) -> WatchReport {
    let status = ctx.orchestrator.status().clone();
    let store = Arc::clone(ctx.orchestrator.settings());
    let board = Arc::clone(ctx.orchestrator.board());
    let mut report = WatchReport::default();

    if let Err(err) = connect(&board).await {
        log_error!("could not open the board session: {err}");
        status.update(|s| s.last_error = Some(err.to_string()));
        report.error = Some(err.to_string());
        return report;
    }

    let mut settings = store.snapshot();
    let mut cadence = settings.watch.poll_interval();
    let mut ticker = tokio::time::interval(cadence);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let mut counter = CounterTracker::new();
    let mut latency = LatencyTracker::new();
    let mut reader = CounterReader::new(Arc::clone(&board));

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = cancel_token.cancelled() => {
                log_info!("watch loop shutting down");
                go_idle(&status);
                return report;
            }
        }

        settings = store.snapshot();
        if settings.watch.poll_interval() != cadence {
            cadence = settings.watch.poll_interval();
            log_info!("poll interval changed to {}ms", cadence.as_millis());
            ticker = tokio::time::interval_at(Instant::now() + cadence, cadence);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        }
        let recipients = settings.active_recipients();

        let read_start = Instant::now();
        let count = match reader.read(settings.watch.read_timeout()).await {
            Ok(count) => count,
            Err(err) if err.is_fatal() => {
                log_error!("counter read failed fatally: {err}");
                status.update(|s| s.last_error = Some(err.to_string()));
                send(&ctx.notifier, &recipients, vec![fatal_notice(&err.to_string())]).await;
                go_idle(&status);
                report.error = Some(err.to_string());
                return report;
            }
            Err(err) => {
                log_warn!("counter read failed, retrying next tick: {err}");
                status.update(|s| s.last_error = Some(err.to_string()));
                continue;
            }
        };

        latency.record(read_start.into_std());
        let event = counter.observe(count);
        status.update(|s| {
            s.last_count = Some(count);
            s.baseline = counter.baseline();
            s.latency = latency.snapshot();
            s.last_error = None;
        });
        log_info!(
            "counter {} (read {}ms, avg delay {:.2}s)",
            count,
            read_start.elapsed().as_millis(),
            latency.average()
        );
        let names: Vec<String> = recipients.iter().map(|r| r.name.clone()).collect();
        log::debug!(
            "{}",
            status.snapshot().render(&settings.keywords.describe(), &names)
        );

        match event {
            PollEvent::Baseline(count) => {
                log_info!("baseline counter reading: {count}");
                status.transition(WatchState::Polling);
            }
            PollEvent::Unchanged(_) => status.transition(WatchState::Polling),
            PollEvent::Decreased { previous, count } => {
                log_info!("counter dropped {previous} -> {count}, baseline lowered");
                status.transition(WatchState::Polling);
            }
            PollEvent::Drained { previous } => {
                log_info!("counter drained from {previous} to 0");
                report.drains += 1;
                send(&ctx.notifier, &recipients, vec![drain_notice()]).await;
                status.transition(WatchState::Polling);
            }
            PollEvent::Growth { baseline, count } => {
                log_info!("counter grew {baseline} -> {count}, starting claim session");
                status.transition(WatchState::GrowthDetected);
                send(
                    &ctx.notifier,
                    &recipients,
                    vec![update_notice(&settings.board.url)],
                )
                .await;

                let session = match run_session(&ctx, baseline, count, &cancel_token).await {
                    Ok(session) => session,
                    Err(err) => {
                        log_error!("claim session did not finish: {err}");
                        go_idle(&status);
                        report.error = Some(err.to_string());
                        return report;
                    }
                };

                // recipients may have changed while the session ran
                let recipients = store.snapshot().active_recipients();
                deliver(&ctx, &recipients, &session).await;
                status.update(|s| {
                    s.sessions_run += 1;
                    s.last_error = session.error.clone();
                });

                let failed = session.status == SessionStatus::Failed;
                let error = session.error.clone();
                report.sessions.push(session);

                if failed {
                    go_idle(&status);
                    report.error = error;
                    return report;
                }
                if settings.watch.mode == WatchMode::SingleShot || cancel_token.is_cancelled() {
                    go_idle(&status);
                    return report;
                }
                status.transition(WatchState::Polling);
            }
        }
    }
}

fn go_idle(status: &StatusHandle) {
    if status.state() != WatchState::Idle {
        status.transition(WatchState::Idle);
    }
}

async fn connect(board: &Arc<dyn Board>) -> ClaimResult<()> {
    let board = Arc::clone(board);
    tokio::task::spawn_blocking(move || board.connect())
        .await
        .map_err(|err| ClaimError::FatalSource(format!("board connect worker failed: {err}")))?
}

/// Counter reads against the board, at most one in flight.
///
/// A read that outlives its timeout is not abandoned: its handle is kept and
/// later ticks skip the board until it returns, so a hung call never overlaps
/// another read or a claim session.
struct CounterReader {
    board: Arc<dyn Board>,
    pending: Option<JoinHandle<ClaimResult<u64>>>,
}

impl CounterReader {
    fn new(board: Arc<dyn Board>) -> Self {
        Self {
            board,
            pending: None,
        }
    }

    async fn read(&mut self, timeout: Duration) -> ClaimResult<u64> {
        if let Some(stale) = self.pending.take() {
            if !stale.is_finished() {
                self.pending = Some(stale);
                return Err(ClaimError::TransientSource(
                    "previous counter read still in flight".into(),
                ));
            }
            // its reading is out of date by now
            match stale.await {
                Ok(Ok(_)) => log_info!("late counter read returned, discarded"),
                Ok(Err(err)) => log_warn!("late counter read failed: {err}"),
                Err(err) => log_warn!("late counter read worker failed: {err}"),
            }
        }

        let board = Arc::clone(&self.board);
        let mut task = tokio::task::spawn_blocking(move || board.read_count());

        match tokio::time::timeout(timeout, &mut task).await {
            Ok(Ok(result)) => result,
            Ok(Err(err)) => Err(ClaimError::FatalSource(format!(
                "counter read worker failed: {err}"
            ))),
            Err(_) => {
                self.pending = Some(task);
                Err(ClaimError::TransientSource(format!(
                    "counter read timed out (> {}ms)",
                    timeout.as_millis()
                )))
            }
        }
    }
}

async fn run_session(
    ctx: &WatchContext,
    baseline: u64,
    count: u64,
    cancel_token: &CancellationToken,
) -> anyhow::Result<ClaimSession> {
    let orchestrator = ctx.orchestrator.clone();
    let token = cancel_token.clone();
    let session =
        tokio::task::spawn_blocking(move || orchestrator.run_session(baseline, count, &token))
            .await?;
    log_info!(
        "claim session {} {}: {} claimed, {} missed, {} pass(es) in {}ms",
        session.id,
        session.status.as_str(),
        session.claimed.len(),
        session.missed.len(),
        session.loop_count,
        session.elapsed().num_milliseconds()
    );
    Ok(session)
}

/// Summary plus evidence to recipients, then the history row.
async fn deliver(ctx: &WatchContext, recipients: &[Recipient], session: &ClaimSession) {
    let mut messages = vec![session_summary(session)];
    messages.extend(session_evidence(session));
    send(&ctx.notifier, recipients, messages).await;

    if let Some(db) = &ctx.db {
        if let Err(err) = db.insert_claim_session(session).await {
            log_error!("failed to persist claim session {}: {err:?}", session.id);
        }
    }
}

async fn send(notifier: &Arc<dyn Notifier>, recipients: &[Recipient], messages: Vec<Message>) {
    let notifier = Arc::clone(notifier);
    let recipients = recipients.to_vec();
    let result = tokio::task::spawn_blocking(move || {
        for message in &messages {
            broadcast(notifier.as_ref(), &recipients, message);
        }
    })
    .await;
    if let Err(err) = result {
        log_warn!("notification worker failed: {err}");
    }
}
