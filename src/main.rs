use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use log::info;

use claimwatch_lib::bridge::{load_template_file, ScreenPoint};
use claimwatch_lib::claims::{StatusHandle, WatchContext, WatchController};
use claimwatch_lib::notify::{session_summary, LogNotifier, Message, Notifier, OutboxNotifier};
use claimwatch_lib::replay::{Replay, ReplayScript};
use claimwatch_lib::vision::{closest, TemplateMatcher, DEFAULT_THRESHOLD};
use claimwatch_lib::{init_logging, AppPaths, ClaimOrchestrator, Database, SettingsStore};

#[derive(Parser)]
#[command(name = "claimwatch")]
#[command(about = "Watches a shared work board and claims newly added items")]
struct Cli {
    /// Directory holding settings.json, the history database and the outbox
    #[arg(long, default_value = "claimwatch-data", global = true)]
    data_dir: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the watcher against a scripted board
    Watch(WatchArgs),

    /// Locate a template inside a capture
    Match(MatchArgs),

    /// Validate settings and templates
    CheckConfig,

    /// Edit the keyword policy
    Keywords(KeywordsArgs),

    /// Send a text to every activated recipient
    Send(SendArgs),

    /// Show past claim sessions
    History(HistoryArgs),
}

#[derive(Args)]
struct WatchArgs {
    /// Replay script (JSON)
    #[arg(long)]
    script: PathBuf,

    /// Image painted as the conflict marker (defaults to the conflict template)
    #[arg(long)]
    marker: Option<PathBuf>,

    /// Log notifications instead of writing them to the outbox
    #[arg(long)]
    dry_run: bool,

    /// Do not record sessions in the history database
    #[arg(long)]
    no_history: bool,
}

#[derive(Args)]
struct MatchArgs {
    /// Reference image to look for
    #[arg(long)]
    template: PathBuf,

    /// Screen capture to search
    #[arg(long)]
    capture: PathBuf,

    #[arg(long, default_value_t = DEFAULT_THRESHOLD)]
    threshold: f32,

    /// Reference point for the closest match, as x,y
    #[arg(long, value_parser = parse_point, default_value = "0,0")]
    cursor: ScreenPoint,

    /// Output JSON
    #[arg(long)]
    json: bool,
}

#[derive(Args)]
struct KeywordsArgs {
    #[command(subcommand)]
    command: KeywordsCommand,
}

#[derive(Subcommand)]
enum KeywordsCommand {
    /// Print the current policy
    Show,
    /// Claim items whose label contains the keyword
    Add { keyword: String },
    /// Never claim items whose label contains the keyword
    Exclude { keyword: String },
    /// Drop the keyword from either list
    Remove { keyword: String },
    /// Claim everything not excluded
    ClaimAll {
        #[arg(action = clap::ArgAction::Set, value_parser = clap::builder::BoolishValueParser::new())]
        enabled: bool,
    },
}

#[derive(Args)]
struct SendArgs {
    /// Message text
    #[arg(value_name = "text", num_args = 1..)]
    text: Vec<String>,

    /// How many times to send it
    #[arg(long, default_value_t = 1)]
    times: u32,

    /// Log instead of writing to the outbox
    #[arg(long)]
    dry_run: bool,
}

#[derive(Args)]
struct HistoryArgs {
    #[arg(long, default_value_t = 20)]
    limit: u32,

    /// Show the outcomes of one session
    #[arg(long)]
    session: Option<String>,
}

fn parse_point(value: &str) -> Result<ScreenPoint, String> {
    let (x, y) = value
        .split_once(',')
        .ok_or_else(|| format!("expected x,y but got '{value}'"))?;
    let x = x.trim().parse().map_err(|err| format!("bad x: {err}"))?;
    let y = y.trim().parse().map_err(|err| format!("bad y: {err}"))?;
    Ok(ScreenPoint::new(x, y))
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();
    let cli = Cli::parse();
    let paths = AppPaths::new(&cli.data_dir);

    match cli.command {
        Command::Watch(args) => watch(&paths, args).await,
        Command::Match(args) => run_match(args),
        Command::CheckConfig => check_config(&paths),
        Command::Keywords(args) => keywords(&paths, args.command),
        Command::Send(args) => send(&paths, args),
        Command::History(args) => history(&paths, args).await,
    }
}

async fn watch(paths: &AppPaths, args: WatchArgs) -> Result<()> {
    let store = Arc::new(SettingsStore::open_or_init(paths.settings())?);
    let settings = store.snapshot();
    for warning in settings.validate()? {
        log::warn!("{warning}");
    }

    let script = ReplayScript::load(&args.script)?;
    let marker_path = args
        .marker
        .unwrap_or_else(|| settings.probe.conflict_template.clone());
    let marker = load_template_file(&marker_path)?;
    let replay = Replay::new(script, marker);

    let notifier: Arc<dyn Notifier> = if args.dry_run {
        Arc::new(LogNotifier)
    } else {
        Arc::new(OutboxNotifier::new(paths.outbox()))
    };
    let db = if args.no_history {
        None
    } else {
        Some(Database::new(paths.database())?)
    };

    let ctx = WatchContext {
        orchestrator: ClaimOrchestrator::new(
            Arc::new(replay.board()),
            Arc::new(replay.desktop()),
            Arc::clone(&store),
            StatusHandle::new(),
        ),
        notifier,
        db,
    };

    let mut controller = WatchController::new();
    controller.start(ctx).await?;
    if let Some(token) = controller.stop_signal() {
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("interrupt received, stopping watcher");
                token.cancel();
            }
        });
    }

    let report = controller
        .wait()
        .await?
        .context("watcher was not running")?;

    for session in &report.sessions {
        if let Message::Text { body, .. } = session_summary(session) {
            println!("{body}\n");
        }
    }
    println!(
        "{} session(s), {} drain notice(s)",
        report.sessions.len(),
        report.drains
    );
    match report.error {
        Some(error) => bail!("watcher stopped: {error}"),
        None => Ok(()),
    }
}

fn run_match(args: MatchArgs) -> Result<()> {
    let template = load_template_file(&args.template)?;
    let capture = image::open(&args.capture)
        .with_context(|| format!("failed to open capture {}", args.capture.display()))?
        .to_luma8();

    let matcher = TemplateMatcher::new(args.threshold);
    let matches = matcher.find_all(&template, &capture);
    let best = closest(&matches, args.cursor);

    if args.json {
        let out = serde_json::json!({ "matches": matches, "closest": best });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    if matches.is_empty() {
        println!("no match at threshold {:.2}", args.threshold);
        return Ok(());
    }
    for m in &matches {
        println!(
            "({}, {})-({}, {}) score {:.3}",
            m.bbox.x_min, m.bbox.y_min, m.bbox.x_max, m.bbox.y_max, m.score
        );
    }
    if let Some(best) = best {
        println!(
            "closest to ({}, {}): ({}, {})",
            args.cursor.x, args.cursor.y, best.bbox.x_min, best.bbox.y_min
        );
    }
    Ok(())
}

fn check_config(paths: &AppPaths) -> Result<()> {
    let store = SettingsStore::new(paths.settings())?;
    let settings = store.current();
    let warnings = settings
        .validate()
        .with_context(|| format!("invalid settings in {}", store.path().display()))?;

    check_template("conflict template", &settings.probe.conflict_template)?;
    if let Some(ready) = &settings.probe.ready_template {
        check_template("readiness template", ready)?;
    }

    for warning in &warnings {
        println!("warning: {warning}");
    }
    for line in settings.keywords.describe() {
        println!("{line}");
    }
    println!("{} is valid", store.path().display());
    Ok(())
}

fn check_template(what: &str, path: &Path) -> Result<()> {
    let image = load_template_file(path)?;
    println!(
        "{what}: {} ({}x{})",
        path.display(),
        image.width(),
        image.height()
    );
    Ok(())
}

fn keywords(paths: &AppPaths, command: KeywordsCommand) -> Result<()> {
    let store = SettingsStore::open_or_init(paths.settings())?;
    let settings = match command {
        KeywordsCommand::Show => store.current(),
        KeywordsCommand::Add { keyword } => store.add_include(&keyword)?,
        KeywordsCommand::Exclude { keyword } => store.add_exclude(&keyword)?,
        KeywordsCommand::Remove { keyword } => store.remove_keyword(&keyword)?,
        KeywordsCommand::ClaimAll { enabled } => store.set_claim_all(enabled)?,
    };
    for line in settings.keywords.describe() {
        println!("{line}");
    }
    Ok(())
}

fn send(paths: &AppPaths, args: SendArgs) -> Result<()> {
    let store = SettingsStore::open_or_init(paths.settings())?;
    let recipients = store.current().active_recipients();
    if recipients.is_empty() {
        bail!("no activated recipient in {}", store.path().display());
    }

    let message = Message::repeated(args.text.join(" "), args.times.max(1));
    if args.dry_run {
        LogNotifier.notify(&recipients, &message)?;
    } else {
        let outbox = OutboxNotifier::new(paths.outbox());
        outbox.notify(&recipients, &message)?;
        println!(
            "sent to {} recipient(s) via {}",
            recipients.len(),
            outbox.root().display()
        );
    }
    Ok(())
}

async fn history(paths: &AppPaths, args: HistoryArgs) -> Result<()> {
    let db = Database::new(paths.database())?;

    if let Some(session_id) = args.session {
        let outcomes = db.get_claim_outcomes(&session_id).await?;
        if outcomes.is_empty() {
            println!("no outcomes recorded for {session_id}");
        }
        for outcome in outcomes {
            let evidence = if outcome.evidence_png.is_some() {
                " [evidence]"
            } else {
                ""
            };
            println!(
                "{} {:<7} {}{}{}",
                outcome.resolved_at.format("%H:%M:%S"),
                outcome.outcome.as_str(),
                outcome.label,
                outcome
                    .detail
                    .map(|d| format!(" ({d})"))
                    .unwrap_or_default(),
                evidence
            );
        }
        return Ok(());
    }

    let sessions = db.list_claim_sessions(args.limit).await?;
    if sessions.is_empty() {
        println!("no claim sessions recorded");
    }
    for session in sessions {
        println!(
            "{}  {}  {:<9} {} -> {}  claimed {}  missed {}  passes {}{}",
            session.id,
            session.started_at.format("%Y-%m-%d %H:%M:%S"),
            session.status.as_str(),
            session.baseline_count,
            session.trigger_count,
            session.claimed_count,
            session.missed_count,
            session.loop_count,
            session
                .error
                .map(|e| format!("  error: {e}"))
                .unwrap_or_default()
        );
    }
    Ok(())
}
