use anyhow::{Context, Result};
use log::warn;
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
    sync::RwLock,
    time::Duration,
};

use crate::bridge::ScreenPoint;
use crate::claims::KeywordFilter;
use crate::error::ConfigError;
use crate::vision::{EvidencePadding, ProbeConfig, DEFAULT_THRESHOLD};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BoardSettings {
    pub url: String,
    pub username: String,
    pub password: String,
    /// Element the board shows once a claim action has registered; waited
    /// for before the conflict probe when set.
    pub claim_selector: Option<String>,
}

/// A chat window that receives notifications; `x`/`y` locate its input box.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recipient {
    pub name: String,
    pub x: i32,
    pub y: i32,
    #[serde(default)]
    pub activated: bool,
}

impl Recipient {
    pub fn point(&self) -> ScreenPoint {
        ScreenPoint::new(self.x, self.y)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClickSettings {
    /// Clicked after the board claim action to confirm the claim.
    pub claim: Option<ScreenPoint>,
    /// Clicked after every attempt to close whatever the claim opened.
    pub dismiss: Option<ScreenPoint>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProbeSettings {
    pub conflict_template: PathBuf,
    pub ready_template: Option<PathBuf>,
    pub threshold: f32,
    pub timeout_ms: u64,
    pub interval_ms: u64,
    pub padding: EvidencePadding,
}

impl Default for ProbeSettings {
    fn default() -> Self {
        Self {
            conflict_template: PathBuf::from("files/conflict.png"),
            ready_template: None,
            threshold: DEFAULT_THRESHOLD,
            timeout_ms: 5000,
            interval_ms: 100,
            padding: EvidencePadding::default(),
        }
    }
}

impl ProbeSettings {
    pub fn to_config(&self) -> ProbeConfig {
        ProbeConfig {
            timeout: Duration::from_millis(self.timeout_ms),
            interval: Duration::from_millis(self.interval_ms),
            threshold: self.threshold,
            padding: self.padding,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum WatchMode {
    /// Stop after the first claim session.
    #[default]
    SingleShot,
    /// Return to polling after each session.
    Continuous,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchSettings {
    pub poll_interval_ms: u64,
    /// A counter read taking longer than this counts as a transient failure.
    pub read_timeout_ms: u64,
    pub mode: WatchMode,
}

impl Default for WatchSettings {
    fn default() -> Self {
        Self {
            poll_interval_ms: 1000,
            read_timeout_ms: 10_000,
            mode: WatchMode::SingleShot,
        }
    }
}

impl WatchSettings {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub board: BoardSettings,
    pub recipients: Vec<Recipient>,
    pub keywords: KeywordFilter,
    pub clicks: ClickSettings,
    pub probe: ProbeSettings,
    pub watch: WatchSettings,
}

impl Settings {
    /// Hard errors reject the settings; the returned strings are warnings.
    pub fn validate(&self) -> Result<Vec<String>, ConfigError> {
        self.keywords.validate()?;

        if !(self.probe.threshold > 0.0 && self.probe.threshold <= 1.0) {
            return Err(ConfigError::Invalid {
                field: "probe.threshold",
                reason: format!("{} is outside (0, 1]", self.probe.threshold),
            });
        }
        if self.probe.interval_ms == 0 {
            return Err(ConfigError::Invalid {
                field: "probe.interval_ms",
                reason: "must be greater than zero".into(),
            });
        }
        if self.probe.timeout_ms < self.probe.interval_ms {
            return Err(ConfigError::Invalid {
                field: "probe.timeout_ms",
                reason: format!(
                    "{}ms is shorter than the {}ms retry interval",
                    self.probe.timeout_ms, self.probe.interval_ms
                ),
            });
        }
        if self.watch.poll_interval_ms == 0 {
            return Err(ConfigError::Invalid {
                field: "watch.poll_interval_ms",
                reason: "must be greater than zero".into(),
            });
        }
        if self.watch.read_timeout_ms == 0 {
            return Err(ConfigError::Invalid {
                field: "watch.read_timeout_ms",
                reason: "must be greater than zero".into(),
            });
        }

        let mut warnings = Vec::new();
        if self.active_recipients().is_empty() {
            warnings.push("no activated recipient; notifications will be dropped".to_string());
        }
        if self.clicks.dismiss.is_none() {
            warnings.push("no dismiss click configured".to_string());
        }
        Ok(warnings)
    }

    pub fn active_recipients(&self) -> Vec<Recipient> {
        self.recipients
            .iter()
            .filter(|r| r.activated)
            .cloned()
            .collect()
    }
}

/// JSON-backed settings, re-read from disk on every `snapshot` so edits made
/// while the watcher runs take effect on the next tick.
pub struct SettingsStore {
    path: PathBuf,
    data: RwLock<Settings>,
}

impl SettingsStore {
    /// Fails when the file exists but does not hold valid settings, so the
    /// first snapshot is always usable.
    pub fn new(path: PathBuf) -> Result<Self> {
        let data = if path.exists() {
            let data = read_settings(&path)?;
            data.validate()
                .with_context(|| format!("invalid settings in {}", path.display()))?;
            data
        } else {
            Settings::default()
        };

        Ok(Self {
            path,
            data: RwLock::new(data),
        })
    }

    /// Writes defaults when the file does not exist yet.
    pub fn open_or_init(path: PathBuf) -> Result<Self> {
        let store = Self::new(path)?;
        if !store.path.exists() {
            store.persist(&store.current())?;
        }
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Last successfully loaded settings, without touching the disk.
    pub fn current(&self) -> Settings {
        self.data
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Reloads from disk and returns an immutable copy. An unreadable or
    /// invalid file keeps the previous settings.
    pub fn snapshot(&self) -> Settings {
        if let Err(err) = self.reload() {
            warn!(
                "keeping previous settings, reload of {} failed: {err:#}",
                self.path.display()
            );
        }
        self.current()
    }

    pub fn reload(&self) -> Result<()> {
        if !self.path.exists() {
            return Ok(());
        }
        let data = read_settings(&self.path)?;
        data.validate()
            .with_context(|| format!("invalid settings in {}", self.path.display()))?;
        let mut guard = self
            .data
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *guard = data;
        Ok(())
    }

    pub fn update<F>(&self, edit: F) -> Result<Settings>
    where
        F: FnOnce(&mut Settings) -> Result<(), ConfigError>,
    {
        let mut guard = self
            .data
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let mut next = guard.clone();
        edit(&mut next)?;
        next.validate()?;
        self.persist(&next)?;
        *guard = next.clone();
        Ok(next)
    }

    pub fn add_include(&self, keyword: &str) -> Result<Settings> {
        self.update(|s| s.keywords.add_include(keyword))
    }

    pub fn add_exclude(&self, keyword: &str) -> Result<Settings> {
        self.update(|s| s.keywords.add_exclude(keyword))
    }

    pub fn remove_keyword(&self, keyword: &str) -> Result<Settings> {
        self.update(|s| {
            s.keywords.remove(keyword);
            Ok(())
        })
    }

    pub fn set_claim_all(&self, claim_all: bool) -> Result<Settings> {
        self.update(|s| {
            s.keywords.set_claim_all(claim_all);
            Ok(())
        })
    }

    fn persist(&self, data: &Settings) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).with_context(|| {
                    format!("Failed to create settings directory {}", parent.display())
                })?;
            }
        }
        let serialized = serde_json::to_string_pretty(data)?;
        fs::write(&self.path, serialized)
            .with_context(|| format!("Failed to write settings to {}", self.path.display()))
    }
}

fn read_settings(path: &Path) -> Result<Settings> {
    let contents = fs::read_to_string(path)
        .with_context(|| format!("Failed to read settings from {}", path.display()))?;
    serde_json::from_str(&contents)
        .with_context(|| format!("Failed to parse settings in {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempdir().unwrap();
        let store = SettingsStore::new(dir.path().join("settings.json")).unwrap();
        let settings = store.snapshot();

        assert_eq!(settings, Settings::default());
        assert_eq!(settings.probe.timeout_ms, 5000);
        assert_eq!(settings.watch.mode, WatchMode::SingleShot);
    }

    #[test]
    fn snapshot_picks_up_external_edits() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("settings.json");
        let store = SettingsStore::open_or_init(path.clone()).unwrap();

        fs::write(
            &path,
            r#"{"keywords": {"include": ["1080"]}, "watch": {"mode": "continuous"}}"#,
        )
        .unwrap();

        let settings = store.snapshot();
        assert_eq!(settings.keywords.include(), &["1080".to_string()][..]);
        assert_eq!(settings.watch.mode, WatchMode::Continuous);
        assert_eq!(settings.watch.poll_interval_ms, 1000);
    }

    #[test]
    fn invalid_edit_on_disk_keeps_last_good() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("settings.json");
        let store = SettingsStore::open_or_init(path.clone()).unwrap();
        store.add_include("1080").unwrap();

        fs::write(
            &path,
            r#"{"keywords": {"include": ["720"], "exclude": ["720"]}}"#,
        )
        .unwrap();
        assert_eq!(store.snapshot().keywords.include(), &["1080".to_string()][..]);

        fs::write(&path, "{ not json").unwrap();
        assert_eq!(store.snapshot().keywords.include(), &["1080".to_string()][..]);
    }

    #[test]
    fn keyword_edits_persist_and_validate() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("settings.json");
        let store = SettingsStore::open_or_init(path.clone()).unwrap();

        store.add_include("英文内嵌").unwrap();
        store.add_exclude("720").unwrap();
        assert!(store.add_include("720").is_err());

        let reopened = SettingsStore::new(path).unwrap();
        let keywords = reopened.current().keywords;
        assert_eq!(keywords.include(), &["英文内嵌".to_string()][..]);
        assert_eq!(keywords.exclude(), &["720".to_string()][..]);
    }

    #[test]
    fn invalid_file_is_rejected_on_open() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("settings.json");
        fs::write(&path, r#"{"watch": {"poll_interval_ms": 0}}"#).unwrap();

        let err = SettingsStore::new(path.clone()).err().unwrap();
        assert!(format!("{err:#}").contains("watch.poll_interval_ms"));
        assert!(SettingsStore::open_or_init(path).is_err());
    }

    #[test]
    fn validate_rejects_bad_probe_timing() {
        let mut settings = Settings::default();
        settings.probe.timeout_ms = 50;
        settings.probe.interval_ms = 100;
        assert!(matches!(
            settings.validate(),
            Err(ConfigError::Invalid { field: "probe.timeout_ms", .. })
        ));
    }

    #[test]
    fn validate_warns_without_recipients() {
        let warnings = Settings::default().validate().unwrap();
        assert!(warnings.iter().any(|w| w.contains("recipient")));
    }
}
