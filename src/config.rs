//! Configuration for the sync core, read from `.runsync/runsync.toml`.
//!
//! Layered configuration (file → environment → CLI).
//!
//! # Configuration File Format
//!
//! ```toml
//! [polling]
//! success_delay_ms = 1000
//! retry_base_ms = 500
//! max_retry_ms = 8000
//!
//! [map]
//! success_delay_ms = 1000
//!
//! [battle]
//! frame_rate = 30
//! missing_snapshot_seconds = 10
//! combat_over_seconds = 5
//!
//! [automation]
//! enabled = true
//! reduced_motion = false
//!
//! [automation.delays]
//! next_room = [800, 1600]
//!
//! [transport]
//! base_url = "http://127.0.0.1:59002"
//!
//! [storage]
//! path = "/tmp/runsync/run.json"
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::automation::{AutomationDelays, DelayBounds};
use crate::polling::{BattlePollingConfig, PollingConfig};

pub const CONFIG_DIR: &str = ".runsync";
pub const CONFIG_FILE: &str = "runsync.toml";

/// Cadence of a generic poll loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollingSection {
    #[serde(default = "default_success_delay_ms")]
    pub success_delay_ms: u64,
    #[serde(default = "default_retry_base_ms")]
    pub retry_base_ms: u64,
    #[serde(default = "default_max_retry_ms")]
    pub max_retry_ms: u64,
}

fn default_success_delay_ms() -> u64 {
    1000
}

fn default_retry_base_ms() -> u64 {
    500
}

fn default_max_retry_ms() -> u64 {
    8000
}

impl Default for PollingSection {
    fn default() -> Self {
        Self {
            success_delay_ms: default_success_delay_ms(),
            retry_base_ms: default_retry_base_ms(),
            max_retry_ms: default_max_retry_ms(),
        }
    }
}

impl PollingSection {
    pub fn to_polling_config(&self) -> PollingConfig {
        PollingConfig::new(
            Duration::from_millis(self.success_delay_ms),
            Duration::from_millis(self.retry_base_ms),
            Duration::from_millis(self.max_retry_ms),
        )
    }
}

/// Battle poller settings. Tick cadence and stall limits derive from the
/// frame rate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BattleSection {
    #[serde(default = "default_frame_rate")]
    pub frame_rate: u32,
    #[serde(default = "default_missing_snapshot_seconds")]
    pub missing_snapshot_seconds: u32,
    #[serde(default = "default_combat_over_seconds")]
    pub combat_over_seconds: u32,
    #[serde(default = "default_battle_retry_base_ms")]
    pub retry_base_ms: u64,
    #[serde(default = "default_battle_max_retry_ms")]
    pub max_retry_ms: u64,
}

fn default_frame_rate() -> u32 {
    30
}

fn default_missing_snapshot_seconds() -> u32 {
    10
}

fn default_combat_over_seconds() -> u32 {
    5
}

fn default_battle_retry_base_ms() -> u64 {
    250
}

fn default_battle_max_retry_ms() -> u64 {
    4000
}

impl Default for BattleSection {
    fn default() -> Self {
        Self {
            frame_rate: default_frame_rate(),
            missing_snapshot_seconds: default_missing_snapshot_seconds(),
            combat_over_seconds: default_combat_over_seconds(),
            retry_base_ms: default_battle_retry_base_ms(),
            max_retry_ms: default_battle_max_retry_ms(),
        }
    }
}

impl BattleSection {
    pub fn to_battle_config(&self) -> BattlePollingConfig {
        BattlePollingConfig {
            frame_rate: self.frame_rate,
            missing_snapshot_seconds: self.missing_snapshot_seconds,
            combat_over_seconds: self.combat_over_seconds,
            retry_base: Duration::from_millis(self.retry_base_ms),
            max_retry: Duration::from_millis(self.max_retry_ms),
        }
    }
}

/// Per-action delay overrides as `[min_ms, max_ms]`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DelaysSection {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ack_loot: Option<[u64; 2]>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub select: Option<[u64; 2]>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confirm: Option<[u64; 2]>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub advance: Option<[u64; 2]>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_room: Option<[u64; 2]>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reduced_motion: Option<[u64; 2]>,
}

impl DelaysSection {
    fn entries(&self) -> [(&'static str, Option<[u64; 2]>); 6] {
        [
            ("ack_loot", self.ack_loot),
            ("select", self.select),
            ("confirm", self.confirm),
            ("advance", self.advance),
            ("next_room", self.next_room),
            ("reduced_motion", self.reduced_motion),
        ]
    }

    /// Defaults with the configured overrides applied.
    pub fn to_delays(&self) -> AutomationDelays {
        let mut delays = AutomationDelays::default();
        let apply = |slot: &mut DelayBounds, value: Option<[u64; 2]>| {
            if let Some([min, max]) = value {
                *slot = DelayBounds::from_millis(min, max);
            }
        };
        apply(&mut delays.ack_loot, self.ack_loot);
        apply(&mut delays.select, self.select);
        apply(&mut delays.confirm, self.confirm);
        apply(&mut delays.advance, self.advance);
        apply(&mut delays.next_room, self.next_room);
        apply(&mut delays.reduced_motion, self.reduced_motion);
        delays
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AutomationSection {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub reduced_motion: bool,
    #[serde(default)]
    pub delays: DelaysSection,
}

/// Backend endpoints. `{run_id}` in a path is replaced with the active run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransportSection {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_ui_path")]
    pub ui_path: String,
    #[serde(default = "default_battle_path")]
    pub battle_path: String,
    #[serde(default = "default_map_path")]
    pub map_path: String,
    /// Where automation actions are POSTed.
    #[serde(default = "default_action_path")]
    pub action_path: String,
}

fn default_base_url() -> String {
    "http://127.0.0.1:59002".to_string()
}

fn default_ui_path() -> String {
    "/ui".to_string()
}

fn default_battle_path() -> String {
    "/run/{run_id}/battle".to_string()
}

fn default_map_path() -> String {
    "/map/{run_id}".to_string()
}

fn default_action_path() -> String {
    "/run/{run_id}/action".to_string()
}

impl Default for TransportSection {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            ui_path: default_ui_path(),
            battle_path: default_battle_path(),
            map_path: default_map_path(),
            action_path: default_action_path(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageSection {
    /// File holding the persisted run id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

impl StorageSection {
    /// Configured path, or `<data_dir>/runsync/run.json`.
    pub fn run_id_path(&self) -> PathBuf {
        self.path.clone().unwrap_or_else(|| {
            dirs::data_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("runsync")
                .join("run.json")
        })
    }
}

/// The complete runsync.toml structure.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncToml {
    /// Root UI-state poller
    #[serde(default)]
    pub polling: PollingSection,
    /// Map poller
    #[serde(default)]
    pub map: PollingSection,
    #[serde(default)]
    pub battle: BattleSection,
    #[serde(default)]
    pub automation: AutomationSection,
    #[serde(default)]
    pub transport: TransportSection,
    #[serde(default)]
    pub storage: StorageSection,
}

impl SyncToml {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::parse(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse runsync.toml")
    }

    /// Load `runsync.toml` from `config_dir`, or defaults when it is missing.
    pub fn load_or_default(config_dir: &Path) -> Result<Self> {
        let config_path = config_dir.join(CONFIG_FILE);
        if config_path.exists() {
            Self::load(&config_path)
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to a TOML file.
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize runsync.toml")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;
        Ok(())
    }

    /// Apply `RUNSYNC_*` overrides read through `lookup`.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(url) = lookup("RUNSYNC_BASE_URL").filter(|v| !v.trim().is_empty()) {
            self.transport.base_url = url.trim().to_string();
        }
        if let Some(raw) = lookup("RUNSYNC_FRAME_RATE") {
            match raw.trim().parse::<u32>() {
                Ok(fps) => self.battle.frame_rate = fps,
                Err(_) => tracing::warn!(value = %raw, "ignoring invalid RUNSYNC_FRAME_RATE"),
            }
        }
        if let Some(enabled) = lookup("RUNSYNC_REDUCED_MOTION").and_then(|v| parse_bool(&v)) {
            self.automation.reduced_motion = enabled;
        }
        if let Some(enabled) = lookup("RUNSYNC_AUTOMATION").and_then(|v| parse_bool(&v)) {
            self.automation.enabled = enabled;
        }
    }

    /// Validate the configuration and return any warnings.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        if self.battle.frame_rate == 0 {
            warnings.push("battle.frame_rate is 0; treating it as 1 frame per second".to_string());
        }

        let loops = [
            ("polling", self.polling.retry_base_ms, self.polling.max_retry_ms),
            ("map", self.map.retry_base_ms, self.map.max_retry_ms),
            ("battle", self.battle.retry_base_ms, self.battle.max_retry_ms),
        ];
        for (section, base, max) in loops {
            if base > max {
                warnings.push(format!(
                    "{section}.retry_base_ms ({base}) exceeds {section}.max_retry_ms ({max})"
                ));
            }
        }

        for (name, bounds) in self.automation.delays.entries() {
            if let Some([min, max]) = bounds
                && min > max
            {
                warnings.push(format!(
                    "automation.delays.{name} is inverted: min {min}ms > max {max}ms"
                ));
            }
        }

        let url = &self.transport.base_url;
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            warnings.push(format!("transport.base_url '{url}' is not an http(s) URL"));
        }

        warnings
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Resolved runtime configuration.
///
/// It merges settings from:
/// 1. runsync.toml
/// 2. Environment variables
/// 3. CLI arguments
#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub project_dir: PathBuf,
    /// Path to the .runsync directory
    pub config_dir: PathBuf,
    pub toml: SyncToml,
}

impl SyncConfig {
    /// Load from a project directory, applying environment overrides.
    pub fn new(project_dir: PathBuf) -> Result<Self> {
        let project_dir = project_dir
            .canonicalize()
            .context("Failed to resolve project directory")?;
        let config_dir = project_dir.join(CONFIG_DIR);
        let mut toml = SyncToml::load_or_default(&config_dir)?;
        toml.apply_env(|key| std::env::var(key).ok());

        Ok(Self {
            project_dir,
            config_dir,
            toml,
        })
    }

    /// Create SyncConfig with CLI overrides. Flags only ever switch features
    /// on; leaving them off keeps the file/env value.
    pub fn with_cli_args(
        project_dir: PathBuf,
        base_url: Option<String>,
        automation: bool,
        reduced_motion: bool,
    ) -> Result<Self> {
        let mut config = Self::new(project_dir)?;
        if let Some(url) = base_url {
            config.toml.transport.base_url = url;
        }
        config.toml.automation.enabled |= automation;
        config.toml.automation.reduced_motion |= reduced_motion;
        Ok(config)
    }

    pub fn config_file(&self) -> PathBuf {
        self.config_dir.join(CONFIG_FILE)
    }

    pub fn root_polling(&self) -> PollingConfig {
        self.toml.polling.to_polling_config()
    }

    pub fn map_polling(&self) -> PollingConfig {
        self.toml.map.to_polling_config()
    }

    pub fn battle_polling(&self) -> BattlePollingConfig {
        self.toml.battle.to_battle_config()
    }

    pub fn automation_delays(&self) -> AutomationDelays {
        self.toml.automation.delays.to_delays()
    }

    pub fn run_id_path(&self) -> PathBuf {
        self.toml.storage.run_id_path()
    }

    pub fn validate(&self) -> Vec<String> {
        self.toml.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::tempdir;

    #[test]
    fn test_parse_empty_uses_defaults() {
        let toml = SyncToml::parse("").unwrap();
        assert_eq!(toml, SyncToml::default());
        assert_eq!(toml.polling.success_delay_ms, 1000);
        assert_eq!(toml.battle.frame_rate, 30);
        assert!(!toml.automation.enabled);
        assert_eq!(toml.transport.battle_path, "/run/{run_id}/battle");
    }

    #[test]
    fn test_parse_partial_sections() {
        let toml = SyncToml::parse(
            r#"
[map]
success_delay_ms = 2500

[battle]
frame_rate = 60

[automation]
enabled = true

[automation.delays]
next_room = [100, 200]
"#,
        )
        .unwrap();
        assert_eq!(toml.map.success_delay_ms, 2500);
        assert_eq!(toml.map.retry_base_ms, 500);
        assert_eq!(toml.battle.to_battle_config().tick_delay(), Duration::from_millis(16));
        assert!(toml.automation.enabled);

        let delays = toml.automation.delays.to_delays();
        assert_eq!(delays.next_room, DelayBounds::from_millis(100, 200));
        assert_eq!(delays.ack_loot, DelayBounds::from_millis(600, 1200));
    }

    #[test]
    fn test_parse_rejects_bad_types() {
        assert!(SyncToml::parse("[battle]\nframe_rate = \"fast\"").is_err());
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("RUNSYNC_BASE_URL", "https://game.example"),
            ("RUNSYNC_FRAME_RATE", "12"),
            ("RUNSYNC_REDUCED_MOTION", "yes"),
            ("RUNSYNC_AUTOMATION", "off"),
        ]);
        let mut toml = SyncToml::default();
        toml.automation.enabled = true;
        toml.apply_env(|key| env.get(key).map(|v| v.to_string()));

        assert_eq!(toml.transport.base_url, "https://game.example");
        assert_eq!(toml.battle.frame_rate, 12);
        assert!(toml.automation.reduced_motion);
        assert!(!toml.automation.enabled);
    }

    #[test]
    fn test_invalid_env_values_are_ignored() {
        let mut toml = SyncToml::default();
        toml.apply_env(|key| match key {
            "RUNSYNC_FRAME_RATE" => Some("fast".to_string()),
            "RUNSYNC_AUTOMATION" => Some("maybe".to_string()),
            _ => None,
        });
        assert_eq!(toml.battle.frame_rate, 30);
        assert!(!toml.automation.enabled);
    }

    #[test]
    fn test_validate_reports_problems() {
        assert!(SyncToml::default().validate().is_empty());

        let mut toml = SyncToml::default();
        toml.battle.frame_rate = 0;
        toml.map.retry_base_ms = 9000;
        toml.automation.delays.select = Some([900, 100]);
        toml.transport.base_url = "localhost".to_string();

        let warnings = toml.validate();
        assert_eq!(warnings.len(), 4);
        assert!(warnings.iter().any(|w| w.contains("frame_rate")));
        assert!(warnings.iter().any(|w| w.contains("map.retry_base_ms")));
        assert!(warnings.iter().any(|w| w.contains("automation.delays.select")));
        assert!(warnings.iter().any(|w| w.contains("base_url")));
    }

    #[test]
    fn test_load_and_save() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE);

        let mut toml = SyncToml::default();
        toml.battle.frame_rate = 24;
        toml.storage.path = Some(dir.path().join("run.json"));
        toml.save(&path).unwrap();

        let loaded = SyncToml::load(&path).unwrap();
        assert_eq!(loaded, toml);
    }

    #[test]
    fn test_load_or_default_missing_file() {
        let dir = tempdir().unwrap();
        let toml = SyncToml::load_or_default(dir.path()).unwrap();
        assert_eq!(toml, SyncToml::default());
    }

    #[test]
    fn test_cli_overrides() {
        let dir = tempdir().unwrap();
        let config_dir = dir.path().join(CONFIG_DIR);
        std::fs::create_dir_all(&config_dir).unwrap();
        std::fs::write(
            config_dir.join(CONFIG_FILE),
            "[storage]\npath = \"/tmp/runsync-test/run.json\"\n",
        )
        .unwrap();

        let config = SyncConfig::with_cli_args(
            dir.path().to_path_buf(),
            Some("http://10.0.0.2:8000".to_string()),
            true,
            true,
        )
        .unwrap();
        assert_eq!(config.toml.transport.base_url, "http://10.0.0.2:8000");
        assert!(config.toml.automation.enabled);
        assert!(config.toml.automation.reduced_motion);
        assert_eq!(config.run_id_path(), PathBuf::from("/tmp/runsync-test/run.json"));
        assert!(config.config_file().ends_with(".runsync/runsync.toml"));
    }

    #[test]
    fn test_default_storage_path() {
        let path = StorageSection::default().run_id_path();
        assert!(path.ends_with("runsync/run.json"));
    }
}
