//! Human-readable summaries for downstream recipients.

mod outbox;

pub use outbox::OutboxNotifier;

use anyhow::Result;
use image::RgbaImage;
use log::{info, warn};

use crate::models::{ClaimSession, SessionStatus};
use crate::settings::Recipient;

/// Broadcast repetitions for update and drain notices.
pub const NOTICE_REPEAT: u32 = 3;

#[derive(Debug, Clone)]
pub enum Message {
    Text { body: String, repeat: u32 },
    Images(Vec<RgbaImage>),
}

impl Message {
    pub fn text(body: impl Into<String>) -> Self {
        Message::Text {
            body: body.into(),
            repeat: 1,
        }
    }

    pub fn repeated(body: impl Into<String>, repeat: u32) -> Self {
        Message::Text {
            body: body.into(),
            repeat,
        }
    }
}

pub trait Notifier: Send + Sync {
    fn notify(&self, recipients: &[Recipient], message: &Message) -> Result<()>;
}

/// Writes every message to the log. Used for dry runs.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, recipients: &[Recipient], message: &Message) -> Result<()> {
        let names: Vec<&str> = recipients.iter().map(|r| r.name.as_str()).collect();
        match message {
            Message::Text { body, repeat } => {
                info!("notify [{}] x{}: {}", names.join(", "), repeat, body)
            }
            Message::Images(images) => {
                info!("notify [{}]: {} image(s)", names.join(", "), images.len())
            }
        }
        Ok(())
    }
}

/// Sends to the given recipients, logging instead of failing. Notification
/// trouble never interrupts claiming.
pub fn broadcast(notifier: &dyn Notifier, recipients: &[Recipient], message: &Message) {
    if recipients.is_empty() {
        warn!("no activated recipient, dropping notification");
        return;
    }
    if let Err(err) = notifier.notify(recipients, message) {
        warn!("notification failed: {err:#}");
    }
}

pub fn update_notice(board_url: &str) -> Message {
    let body = if board_url.is_empty() {
        "BOARD HAS BEEN UPDATED.".to_string()
    } else {
        format!("BOARD HAS BEEN UPDATED. {board_url}")
    };
    Message::repeated(body, NOTICE_REPEAT)
}

pub fn drain_notice() -> Message {
    Message::repeated(
        "UNCLAIMED ITEMS HAVE BEEN CLEARED TO 0. STANDBY FOR UPDATE.",
        NOTICE_REPEAT,
    )
}

pub fn fatal_notice(error: &str) -> Message {
    Message::text(format!("WATCHER STOPPED: {error}"))
}

pub fn session_summary(session: &ClaimSession) -> Message {
    let mut body = format!("Claimed {} items:", session.claimed.len());
    for label in session.claimed_labels() {
        body.push('\n');
        body.push_str(label);
    }

    if !session.missed.is_empty() {
        body.push_str(&format!("\nMissed {} items:", session.missed.len()));
        for missed in &session.missed {
            body.push_str(&format!("\n{} ({})", missed.item.label, missed.reason));
        }
    }

    let elapsed_ms = session.elapsed().num_milliseconds().max(0);
    body.push_str(&format!(
        "\n{} pass(es) in {:.2}s.",
        session.loop_count,
        elapsed_ms as f64 / 1000.0
    ));

    match session.status {
        SessionStatus::Cancelled => body.push_str("\nSession cancelled before it settled."),
        SessionStatus::Failed => {
            let error = session.error.as_deref().unwrap_or("unknown error");
            body.push_str(&format!("\nSession aborted: {error}"));
        }
        SessionStatus::Running | SessionStatus::Completed => {}
    }

    Message::text(body)
}

/// Conflict crops from a session, if any were captured.
pub fn session_evidence(session: &ClaimSession) -> Option<Message> {
    let images: Vec<RgbaImage> = session
        .missed
        .iter()
        .filter_map(|m| m.evidence.clone())
        .collect();
    if images.is_empty() {
        None
    } else {
        Some(Message::Images(images))
    }
}
