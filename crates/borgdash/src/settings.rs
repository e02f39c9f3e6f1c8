//! CLI settings.
//!
//! Loading order (later sources override earlier):
//! 1. Built-in defaults
//! 2. `settings.json` in the borgdash config directory
//! 3. Environment variables
//! 4. Command-line flags (applied by the caller)

use anyhow::Context;
use borgdash_store::StoreConfig;
use borgdash_util::log::LogLevel;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default location of the shared borgmatic configuration.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/borgmatic/config.yaml";

/// Name of the settings file inside the borgdash config directory.
pub const SETTINGS_FILE_NAME: &str = "settings.json";

/// Effective CLI settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// The borgmatic configuration file to operate on.
    pub config_path: PathBuf,

    /// Log level name (`trace` .. `error`; `WARNING` style accepted).
    pub log_level: String,

    /// Log to this file instead of stderr.
    pub log_file: Option<PathBuf>,

    /// Store behavior.
    pub store: StoreConfig,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            config_path: PathBuf::from(DEFAULT_CONFIG_PATH),
            log_level: "warn".to_string(),
            log_file: None,
            store: StoreConfig::default(),
        }
    }
}

impl Settings {
    /// Load settings from the default settings file and the process
    /// environment. Returns the settings and the file they came from, if any.
    pub fn load() -> anyhow::Result<(Self, Option<PathBuf>)> {
        let file = borgdash_util::path::config_dir().map(|dir| dir.join(SETTINGS_FILE_NAME));
        let (mut settings, source) = match file {
            Some(path) if path.exists() => (Self::load_file(&path)?, Some(path)),
            _ => (Self::default(), None),
        };
        settings.apply_env(|key| std::env::var(key).ok())?;
        Ok((settings, source))
    }

    /// Load settings from a JSON file.
    pub fn load_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read settings file {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Invalid settings file {}", path.display()))
    }

    /// Apply environment overrides, looking variables up with `var`.
    pub fn apply_env<F>(&mut self, var: F) -> anyhow::Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(path) = var("BORGMATIC_CONFIG_PATH").filter(|v| !v.is_empty()) {
            self.config_path = PathBuf::from(path);
        }
        if let Some(dir) = var("BORGDASH_BACKUP_DIR").filter(|v| !v.is_empty()) {
            self.store.backup_dir = Some(PathBuf::from(dir));
        }
        if let Some(secs) = var("BORGDASH_LOCK_TIMEOUT_SECS") {
            let secs: u64 = secs
                .trim()
                .parse()
                .with_context(|| format!("BORGDASH_LOCK_TIMEOUT_SECS is not a number: {secs}"))?;
            self.store.lock_timeout = Duration::from_secs(secs);
        }
        if let Some(level) = var("LOG_LEVEL").filter(|v| !v.is_empty()) {
            self.log_level = level;
        }
        Ok(())
    }

    /// The configured log level, falling back to `warn` for unknown names.
    pub fn log_level(&self) -> LogLevel {
        LogLevel::parse(&self.log_level).unwrap_or(LogLevel::Warn)
    }
}
