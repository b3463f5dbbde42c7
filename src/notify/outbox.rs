use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::{Context, Result};
use chrono::Utc;

use crate::settings::Recipient;

use super::{Message, Notifier};

/// Drops each message into a per-recipient directory: text as `.txt`,
/// images as `.png`. A chat bridge picks the files up from there.
pub struct OutboxNotifier {
    root: PathBuf,
    sequence: AtomicU64,
}

impl OutboxNotifier {
    pub fn new(root: PathBuf) -> Self {
        Self {
            root,
            sequence: AtomicU64::new(0),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn next_stem(&self) -> String {
        let seq = self.sequence.fetch_add(1, Ordering::SeqCst);
        format!("{}-{seq:04}", Utc::now().format("%Y%m%dT%H%M%S%3f"))
    }

    fn recipient_dir(&self, recipient: &Recipient) -> Result<PathBuf> {
        let dir = self.root.join(sanitize(&recipient.name));
        fs::create_dir_all(&dir)
            .with_context(|| format!("failed to create outbox {}", dir.display()))?;
        Ok(dir)
    }
}

impl Notifier for OutboxNotifier {
    fn notify(&self, recipients: &[Recipient], message: &Message) -> Result<()> {
        let stem = self.next_stem();
        for recipient in recipients {
            let dir = self.recipient_dir(recipient)?;
            match message {
                Message::Text { body, repeat } => {
                    let path = dir.join(format!("{stem}.txt"));
                    let mut contents = String::new();
                    for _ in 0..(*repeat).max(1) {
                        contents.push_str(body);
                        contents.push('\n');
                    }
                    fs::write(&path, contents)
                        .with_context(|| format!("failed to write {}", path.display()))?;
                }
                Message::Images(images) => {
                    for (idx, image) in images.iter().enumerate() {
                        let path = dir.join(format!("{stem}-{idx}.png"));
                        image
                            .save(&path)
                            .with_context(|| format!("failed to save {}", path.display()))?;
                    }
                }
            }
        }
        Ok(())
    }
}

fn sanitize(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();
    let trimmed = cleaned.trim().trim_matches('.');
    if trimmed.is_empty() {
        "recipient".to_string()
    } else {
        trimmed.to_string()
    }
}
