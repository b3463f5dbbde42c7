use anyhow::{bail, Context, Result};
use log::info;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::loop_worker::{watch_loop, WatchContext, WatchReport};
use super::state::{StatusHandle, WatchStatus};

/// Owns the single watcher task. At most one watcher runs against a board
/// at a time.
#[derive(Default)]
pub struct WatchController {
    handle: Option<JoinHandle<WatchReport>>,
    cancel_token: Option<CancellationToken>,
    status: Option<StatusHandle>,
}

impl WatchController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_running(&self) -> bool {
        self.handle
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    pub async fn start(&mut self, ctx: WatchContext) -> Result<()> {
        if self.is_running() {
            bail!("watcher already active");
        }
        if let Some(previous) = self.handle.take() {
            // finished on its own; collect it so its report is not silently lost
            let report = previous.await.context("previous watcher task failed to join")?;
            info!(
                "previous watcher ended with {} session(s)",
                report.sessions.len()
            );
        }

        let cancel_token = CancellationToken::new();
        let status = ctx.orchestrator.status().clone();
        let handle = tokio::spawn(watch_loop(ctx, cancel_token.clone()));

        info!("watcher started");
        self.handle = Some(handle);
        self.cancel_token = Some(cancel_token);
        self.status = Some(status);
        Ok(())
    }

    pub fn status(&self) -> WatchStatus {
        self.status
            .as_ref()
            .map(StatusHandle::snapshot)
            .unwrap_or_default()
    }

    /// Token that stops the running watcher when cancelled, for wiring up
    /// signal handlers.
    pub fn stop_signal(&self) -> Option<CancellationToken> {
        self.cancel_token.clone()
    }

    /// Requests a cooperative stop. A claim session in progress finishes its
    /// current attempt and reports before the task exits.
    pub async fn stop(&mut self) -> Result<Option<WatchReport>> {
        if let Some(token) = self.cancel_token.take() {
            token.cancel();
        }
        self.join().await
    }

    /// Waits for the watcher to end on its own.
    pub async fn wait(&mut self) -> Result<Option<WatchReport>> {
        let report = self.join().await;
        self.cancel_token = None;
        report
    }

    async fn join(&mut self) -> Result<Option<WatchReport>> {
        match self.handle.take() {
            Some(handle) => handle
                .await
                .context("watcher task failed to join")
                .map(Some),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::claims::{ClaimOrchestrator, WatchState};
    use crate::notify::LogNotifier;
    use crate::replay::{Replay, ReplayScript};
    use crate::settings::SettingsStore;
    use crate::vision::test_support::noise_template;
    use tempfile::tempdir;

    fn context(dir: &std::path::Path, counts: Vec<Option<u64>>) -> WatchContext {
        let store = SettingsStore::open_or_init(dir.join("settings.json")).unwrap();
        store
            .update(|s| {
                s.watch.poll_interval_ms = 10;
                Ok(())
            })
            .unwrap();
        let script = ReplayScript {
            counts,
            ..ReplayScript::default()
        };
        let replay = Replay::new(script, noise_template(8, 8, 2));
        WatchContext {
            orchestrator: ClaimOrchestrator::new(
                Arc::new(replay.board()),
                Arc::new(replay.desktop()),
                Arc::new(store),
                StatusHandle::new(),
            ),
            notifier: Arc::new(LogNotifier),
            db: None,
        }
    }

    #[tokio::test]
    async fn second_start_is_refused_while_running() {
        let dir = tempdir().unwrap();
        let mut controller = WatchController::new();
        controller
            .start(context(dir.path(), vec![Some(4)]))
            .await
            .unwrap();

        let err = controller
            .start(context(dir.path(), vec![Some(4)]))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("already active"));

        let report = controller.stop().await.unwrap().unwrap();
        assert!(report.is_ok());
        assert!(report.sessions.is_empty());
        assert!(!controller.is_running());
        assert_eq!(controller.status().state, WatchState::Idle);
    }

    #[tokio::test]
    async fn stop_without_start_is_a_no_op() {
        let mut controller = WatchController::new();
        assert!(controller.stop().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn fatal_source_ends_the_watcher() {
        let dir = tempdir().unwrap();
        let mut ctx = context(dir.path(), vec![]);
        let script = ReplayScript {
            counts: vec![Some(1)],
            end_with_fatal: true,
            ..ReplayScript::default()
        };
        let replay = Replay::new(script, noise_template(8, 8, 2));
        ctx.orchestrator = ClaimOrchestrator::new(
            Arc::new(replay.board()),
            Arc::new(replay.desktop()),
            Arc::clone(ctx.orchestrator.settings()),
            StatusHandle::new(),
        );

        let mut controller = WatchController::new();
        controller.start(ctx).await.unwrap();
        let report = controller.wait().await.unwrap().unwrap();

        assert!(report.error.unwrap().contains("exhausted"));
        assert!(replay.is_connected());
        assert_eq!(controller.status().last_count, Some(1));
    }
}
