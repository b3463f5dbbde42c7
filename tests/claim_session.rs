use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use claimwatch_lib::claims::{watch_loop, StatusHandle, WatchContext, WatchState};
use claimwatch_lib::models::SessionStatus;
use claimwatch_lib::notify::{Message, Notifier};
use claimwatch_lib::replay::{Replay, ReplayScript};
use claimwatch_lib::settings::{Recipient, WatchMode};
use claimwatch_lib::{ClaimOrchestrator, Database, Settings, SettingsStore};
use image::{GrayImage, Luma};
use tempfile::{tempdir, TempDir};
use tokio_util::sync::CancellationToken;

const CONFLICT: &str = "templates/conflict.png";

#[derive(Default)]
struct RecordingNotifier {
    sent: Mutex<Vec<(Vec<String>, Message)>>,
}

impl RecordingNotifier {
    fn texts(&self) -> Vec<(String, u32)> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter_map(|(_, message)| match message {
                Message::Text { body, repeat } => Some((body.clone(), *repeat)),
                Message::Images(_) => None,
            })
            .collect()
    }

    fn image_batches(&self) -> Vec<usize> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter_map(|(_, message)| match message {
                Message::Images(images) => Some(images.len()),
                Message::Text { .. } => None,
            })
            .collect()
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, recipients: &[Recipient], message: &Message) -> anyhow::Result<()> {
        let names = recipients.iter().map(|r| r.name.clone()).collect();
        self.sent.lock().unwrap().push((names, message.clone()));
        Ok(())
    }
}

fn marker() -> GrayImage {
    let mut state = 0x2545_f491_u32;
    GrayImage::from_fn(14, 10, |_, _| {
        state ^= state << 13;
        state ^= state >> 17;
        state ^= state << 5;
        Luma([if state & 1 == 0 { 15 } else { 240 }])
    })
}

struct Harness {
    _dir: TempDir,
    replay: Replay,
    notifier: Arc<RecordingNotifier>,
    db: Database,
    ctx: WatchContext,
}

fn harness<F>(script: ReplayScript, configure: F) -> Harness
where
    F: FnOnce(&mut Settings),
{
    let dir = tempdir().unwrap();
    let store = SettingsStore::open_or_init(dir.path().join("settings.json")).unwrap();
    store
        .update(|s| {
            s.board.url = "https://board.example/list".into();
            s.recipients = vec![
                Recipient {
                    name: "ops".into(),
                    x: 28,
                    y: 1200,
                    activated: true,
                },
                Recipient {
                    name: "muted".into(),
                    x: 28,
                    y: 1300,
                    activated: false,
                },
            ];
            s.keywords.add_include("1080")?;
            s.probe.conflict_template = PathBuf::from(CONFLICT);
            s.probe.timeout_ms = 20;
            s.probe.interval_ms = 10;
            s.watch.poll_interval_ms = 10;
            configure(s);
            Ok(())
        })
        .unwrap();

    let replay = Replay::new(script, marker()).with_template(CONFLICT, marker());
    let notifier = Arc::new(RecordingNotifier::default());
    let db = Database::new(dir.path().join("history.sqlite3")).unwrap();

    let ctx = WatchContext {
        orchestrator: ClaimOrchestrator::new(
            Arc::new(replay.board()),
            Arc::new(replay.desktop()),
            Arc::new(store),
            StatusHandle::new(),
        ),
        notifier: notifier.clone(),
        db: Some(db.clone()),
    };

    Harness {
        _dir: dir,
        replay,
        notifier,
        db,
        ctx,
    }
}

fn labels(values: &[&str]) -> Vec<String> {
    values.iter().map(|v| v.to_string()).collect()
}

#[tokio::test]
async fn drain_then_growth_runs_one_session_from_zero() {
    let script = ReplayScript {
        counts: vec![Some(5), Some(5), Some(0), Some(3)],
        listings: vec![labels(&["a 1080", "b 1080", "c 720"])],
        conflicts: labels(&["b 1080"]),
        ..ReplayScript::default()
    };
    let h = harness(script, |_| {});
    let status = h.ctx.orchestrator.status().clone();

    let report = watch_loop(h.ctx.clone(), CancellationToken::new()).await;

    assert!(report.is_ok(), "{:?}", report.error);
    assert_eq!(report.drains, 1);
    assert_eq!(report.sessions.len(), 1);
    let session = &report.sessions[0];
    assert_eq!((session.baseline_count, session.trigger_count), (0, 3));
    assert_eq!(session.status, SessionStatus::Completed);
    assert_eq!(session.claimed_labels(), vec!["a 1080"]);
    assert_eq!(session.missed_labels(), vec!["b 1080"]);
    assert!(session.missed[0].evidence.is_some());
    assert_eq!(session.loop_count, 1);
    assert_eq!(h.replay.claims(), labels(&["a 1080", "b 1080"]));

    let texts = h.notifier.texts();
    assert_eq!(texts.len(), 3);
    assert_eq!(
        texts[0],
        (
            "UNCLAIMED ITEMS HAVE BEEN CLEARED TO 0. STANDBY FOR UPDATE.".to_string(),
            3
        )
    );
    assert_eq!(
        texts[1],
        (
            "BOARD HAS BEEN UPDATED. https://board.example/list".to_string(),
            3
        )
    );
    assert!(texts[2].0.starts_with("Claimed 1 items:\na 1080"));
    assert!(texts[2].0.contains("Missed 1 items:"));
    assert_eq!(h.notifier.image_batches(), vec![1]);
    for (names, _) in h.notifier.sent.lock().unwrap().iter() {
        assert_eq!(names, &vec!["ops".to_string()]);
    }

    let history = h.db.list_claim_sessions(10).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].id, session.id);
    let outcomes = h.db.get_claim_outcomes(&session.id).await.unwrap();
    assert_eq!(outcomes.len(), 2);
    assert!(outcomes[1].evidence_png.is_some());

    let final_status = status.snapshot();
    assert_eq!(final_status.state, WatchState::Idle);
    assert_eq!(final_status.sessions_run, 1);
    assert_eq!(final_status.last_count, Some(3));
    assert_eq!(final_status.latency.samples, 3);
}

#[tokio::test]
async fn continuous_mode_keeps_watching_until_the_board_fails() {
    let script = ReplayScript {
        counts: vec![Some(2), Some(4), Some(4), Some(3), Some(6)],
        listings: vec![
            labels(&["a 1080", "b 1080"]),
            labels(&["a 1080", "b 1080"]),
            labels(&["c 1080"]),
        ],
        end_with_fatal: true,
        ..ReplayScript::default()
    };
    let h = harness(script, |s| s.watch.mode = WatchMode::Continuous);

    let report = watch_loop(h.ctx.clone(), CancellationToken::new()).await;

    assert!(report.error.as_deref().unwrap().contains("exhausted"));
    assert_eq!(report.sessions.len(), 2);
    assert_eq!(
        (report.sessions[1].baseline_count, report.sessions[1].trigger_count),
        (3, 6)
    );
    assert_eq!(report.sessions[0].claimed_labels(), vec!["a 1080", "b 1080"]);
    assert_eq!(report.sessions[1].claimed_labels(), vec!["c 1080"]);

    let texts = h.notifier.texts();
    assert!(texts
        .last()
        .unwrap()
        .0
        .starts_with("WATCHER STOPPED: board unreachable"));
    assert_eq!(h.db.list_claim_sessions(10).await.unwrap().len(), 2);
}

#[tokio::test]
async fn transient_read_failures_do_not_stop_the_watcher() {
    let script = ReplayScript {
        counts: vec![Some(1), None, None, Some(2)],
        listings: vec![labels(&["z 1080"])],
        ..ReplayScript::default()
    };
    let h = harness(script, |_| {});

    let report = watch_loop(h.ctx.clone(), CancellationToken::new()).await;

    assert!(report.is_ok());
    assert_eq!(report.sessions.len(), 1);
    assert_eq!((report.sessions[0].baseline_count, report.sessions[0].trigger_count), (1, 2));
    assert_eq!(h.replay.count_reads(), 4);
}

#[tokio::test]
async fn missing_template_aborts_with_a_report() {
    let script = ReplayScript {
        counts: vec![Some(0), Some(1)],
        listings: vec![labels(&["a 1080"])],
        ..ReplayScript::default()
    };
    let h = harness(script, |s| {
        s.probe.conflict_template = PathBuf::from("templates/missing.png")
    });

    let report = watch_loop(h.ctx.clone(), CancellationToken::new()).await;

    assert_eq!(report.sessions.len(), 1);
    assert_eq!(report.sessions[0].status, SessionStatus::Failed);
    assert!(report.error.unwrap().contains("missing.png"));
    let texts = h.notifier.texts();
    let summary = &texts.last().unwrap().0;
    assert!(summary.starts_with("Claimed 0 items:"));
    assert!(summary.contains("Session aborted"));
}
