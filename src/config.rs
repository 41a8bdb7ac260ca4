//! Configuration types and snapshot publishing.
//!
//! The config file is JSON with every field defaulted, so an empty or
//! missing file yields a working no-op configuration (no emoji rewrites,
//! no cleaner actions). The external configuration interface edits the file
//! and calls `ConfigHandle::reload`; workers read the snapshot current at
//! dequeue time and never observe a half-applied reconfiguration.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::emoji::EmojiMap;
use crate::pipeline::cleaner::CleanerRules;

/// Default pause between two events on the same channel.
const DEFAULT_QUEUE_DELAY_MS: u64 = 1_500;

/// Default per-channel pending-depth alarm threshold.
const DEFAULT_QUEUE_ALARM_DEPTH: usize = 1_000;

// ── Config file shape ───────────────────────────────────────────────

/// Root configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Monitored channels (`@username` or numeric chat id).
    pub channels: Vec<String>,
    /// Plain glyph → platform custom-emoji id.
    pub emoji_map: EmojiMap,
    /// Cleaner behavior.
    pub cleaner: CleanerConfig,
    /// Pause between events on one channel, in milliseconds.
    pub queue_delay_ms: u64,
    /// Warn when a channel's pending queue crosses this depth.
    pub queue_alarm_depth: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            channels: Vec::new(),
            emoji_map: EmojiMap::new(),
            cleaner: CleanerConfig::default(),
            queue_delay_ms: DEFAULT_QUEUE_DELAY_MS,
            queue_alarm_depth: DEFAULT_QUEUE_ALARM_DEPTH,
        }
    }
}

/// Cleaner configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CleanerConfig {
    /// Code-extraction keywords, in match-priority order.
    pub keywords: Vec<String>,
    /// Channels a duplicate is forwarded/copied to, in order, before
    /// deletion.
    pub forward_targets: Vec<String>,
    /// Forward preserves attribution; copy re-posts the text.
    pub forward_mode: ForwardMode,
    /// Whether a detected duplicate is deleted after forwarding.
    pub delete_duplicates: bool,
    /// Age/keyword deletion rule.
    pub delete_rule: DeleteRule,
    /// Treat every code as unseen when the index is unavailable. Loud:
    /// warns on every affected event.
    pub degraded_dedup: bool,
}

impl Default for CleanerConfig {
    fn default() -> Self {
        Self {
            keywords: Vec::new(),
            forward_targets: Vec::new(),
            forward_mode: ForwardMode::Forward,
            delete_duplicates: true,
            delete_rule: DeleteRule::default(),
            degraded_dedup: false,
        }
    }
}

/// How duplicates reach forward targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ForwardMode {
    Forward,
    Copy,
}

/// Age/keyword deletion rule. Satisfied when the message is older than
/// `max_age_days` or its text contains any keyword.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DeleteRule {
    pub max_age_days: Option<i64>,
    pub keywords: Vec<String>,
}

impl Config {
    /// Load from a JSON file. A missing file yields defaults; a malformed
    /// file degrades to defaults with a warning rather than halting.
    pub fn load(path: &Path) -> Self {
        let raw = match std::fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!(path = %path.display(), "No config file; using defaults");
                return Self::default();
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Failed to read config; using defaults");
                return Self::default();
            }
        };

        match serde_json::from_str(&raw) {
            Ok(config) => config,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Malformed config; using defaults");
                Self::default()
            }
        }
    }

    pub fn queue_delay(&self) -> Duration {
        Duration::from_millis(self.queue_delay_ms)
    }
}

// ── Snapshots ───────────────────────────────────────────────────────

/// One immutable, internally consistent view of the configuration,
/// with the cleaner rules pre-compiled.
pub struct Snapshot {
    pub config: Config,
    pub cleaner: CleanerRules,
}

impl Snapshot {
    fn build(config: Config) -> Self {
        let cleaner = CleanerRules::compile(&config.cleaner);
        Self { config, cleaner }
    }

    pub fn emoji_map(&self) -> &EmojiMap {
        &self.config.emoji_map
    }

    pub fn queue_delay(&self) -> Duration {
        self.config.queue_delay()
    }
}

/// Shared handle publishing config snapshots atomically.
///
/// Readers clone out an `Arc<Snapshot>` and hold it for a whole event;
/// writers swap in a freshly built snapshot.
#[derive(Clone)]
pub struct ConfigHandle {
    inner: Arc<RwLock<Arc<Snapshot>>>,
}

impl ConfigHandle {
    pub fn new(config: Config) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Arc::new(Snapshot::build(config)))),
        }
    }

    /// The snapshot current right now. Cheap (Arc clone).
    pub async fn snapshot(&self) -> Arc<Snapshot> {
        self.inner.read().await.clone()
    }

    /// Publish a new configuration.
    pub async fn replace(&self, config: Config) {
        let snapshot = Arc::new(Snapshot::build(config));
        *self.inner.write().await = snapshot;
        info!("Configuration snapshot replaced");
    }

    /// Re-read the config file and publish the result.
    pub async fn reload(&self, path: &Path) {
        self.replace(Config::load(path)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_noop_config() {
        let config = Config::default();
        assert!(config.channels.is_empty());
        assert!(config.emoji_map.is_empty());
        assert!(config.cleaner.keywords.is_empty());
        assert!(config.cleaner.delete_duplicates);
        assert_eq!(config.queue_delay(), Duration::from_millis(1_500));
        assert_eq!(config.queue_alarm_depth, 1_000);
    }

    #[test]
    fn parses_full_config() {
        let raw = r#"{
            "channels": ["@shop", "-1001234"],
            "emoji_map": {"🛒": "111"},
            "cleaner": {
                "keywords": ["SKU"],
                "forward_targets": ["@archive"],
                "forward_mode": "copy",
                "delete_duplicates": false,
                "delete_rule": {"max_age_days": 30, "keywords": ["expired"]}
            },
            "queue_delay_ms": 250
        }"#;
        let config: Config = serde_json::from_str(raw).unwrap();
        assert_eq!(config.channels, vec!["@shop", "-1001234"]);
        assert_eq!(config.emoji_map.get("🛒").map(String::as_str), Some("111"));
        assert_eq!(config.cleaner.forward_mode, ForwardMode::Copy);
        assert!(!config.cleaner.delete_duplicates);
        assert_eq!(config.cleaner.delete_rule.max_age_days, Some(30));
        assert_eq!(config.queue_delay(), Duration::from_millis(250));
        // Unspecified fields keep their defaults.
        assert_eq!(config.queue_alarm_depth, 1_000);
        assert!(!config.cleaner.degraded_dedup);
    }

    #[test]
    fn partial_config_fills_defaults() {
        let config: Config = serde_json::from_str(r#"{"channels": ["@shop"]}"#).unwrap();
        assert_eq!(config.channels, vec!["@shop"]);
        assert_eq!(config.queue_delay_ms, 1_500);
        assert_eq!(config.cleaner.forward_mode, ForwardMode::Forward);
    }

    #[test]
    fn missing_file_loads_defaults() {
        let config = Config::load(Path::new("/nonexistent/telkeep.json"));
        assert!(config.channels.is_empty());
    }

    #[test]
    fn malformed_file_degrades_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("telkeep.json");
        std::fs::write(&path, "{not json").unwrap();
        let config = Config::load(&path);
        assert!(config.channels.is_empty());
        assert_eq!(config.queue_delay_ms, 1_500);
    }

    #[tokio::test]
    async fn handle_publishes_snapshots_atomically() {
        let handle = ConfigHandle::new(Config::default());
        let before = handle.snapshot().await;
        assert!(before.emoji_map().is_empty());

        let mut updated = Config::default();
        updated.emoji_map.insert("🛒".into(), "111".into());
        handle.replace(updated).await;

        let after = handle.snapshot().await;
        assert_eq!(after.emoji_map().get("🛒").map(String::as_str), Some("111"));
        // The old snapshot is unaffected — readers holding it keep a
        // consistent view.
        assert!(before.emoji_map().is_empty());
    }
}
