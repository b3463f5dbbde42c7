pub mod bridge;
pub mod claims;
pub mod db;
pub mod error;
pub mod metrics;
pub mod models;
pub mod notify;
pub mod replay;
pub mod settings;
mod utils;
pub mod vision;

use std::path::{Path, PathBuf};

pub use bridge::{Board, Desktop, ScreenPoint};
pub use claims::{ClaimOrchestrator, WatchContext, WatchController, WatchReport};
pub use db::Database;
pub use error::{ClaimError, ClaimResult, ConfigError};
pub use settings::{Settings, SettingsStore};

/// Reads `RUST_LOG`, defaulting to `info`. Safe to call more than once.
pub fn init_logging() {
    let _ = env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .try_init();
}

/// On-disk layout under one data directory.
#[derive(Debug, Clone)]
pub struct AppPaths {
    root: PathBuf,
}

impl AppPaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn settings(&self) -> PathBuf {
        self.root.join("settings.json")
    }

    pub fn database(&self) -> PathBuf {
        self.root.join("claimwatch.sqlite3")
    }

    pub fn outbox(&self) -> PathBuf {
        self.root.join("outbox")
    }
}
