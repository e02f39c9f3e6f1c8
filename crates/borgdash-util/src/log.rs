//! Logging setup using tracing.
//!
//! Only borgdash's own crates are raised to the configured level; everything
//! else (notify, tokio) stays at `warn`. `RUST_LOG` replaces the whole filter.

use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Mutex;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Crates whose events follow the configured level.
const OWN_CRATES: &[&str] = &["borgdash", "borgdash_store", "borgdash_util"];

/// Verbosity of borgdash's own log output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }

    /// Parse a level name, case-insensitively.
    ///
    /// The Python-style `WARNING` and `CRITICAL` spellings used by older
    /// dashboard deployments in `LOG_LEVEL` are accepted as well.
    pub fn parse(s: &str) -> Option<Self> {
        s.parse().ok()
    }

    /// `EnvFilter` directives for this level.
    pub fn directives(&self) -> String {
        let mut directives = vec!["warn".to_string()];
        directives.extend(
            OWN_CRATES
                .iter()
                .map(|krate| format!("{krate}={}", self.as_str())),
        );
        directives.join(",")
    }
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "trace" => Ok(Self::Trace),
            "debug" => Ok(Self::Debug),
            "info" => Ok(Self::Info),
            "warn" | "warning" => Ok(Self::Warn),
            "error" | "critical" => Ok(Self::Error),
            other => Err(format!("unknown log level '{other}'")),
        }
    }
}

/// Where log events go.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum LogTarget {
    /// Human-readable lines on stderr, keeping stdout for command output.
    #[default]
    Stderr,
    /// Appended to a file, without ANSI colors. Falls back to stderr if the
    /// file cannot be opened.
    File(PathBuf),
    /// Spans are still created; events go nowhere.
    Off,
}

/// Logging configuration.
#[derive(Debug, Clone, Default)]
pub struct LogConfig {
    pub target: LogTarget,
    pub level: LogLevel,
    /// Include source file and line in each event.
    pub include_location: bool,
}

/// Install the global subscriber. Call once at startup.
///
/// Returns the log file path when events are written to a file.
pub fn init(config: LogConfig) -> Option<PathBuf> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.level.directives()));
    let registry = tracing_subscriber::registry().with(filter);

    let target = match config.target {
        LogTarget::File(path) => match open_log_file(&path) {
            Ok(file) => {
                registry
                    .with(
                        fmt::layer()
                            .with_ansi(false)
                            .with_file(config.include_location)
                            .with_line_number(config.include_location)
                            .with_writer(Mutex::new(file)),
                    )
                    .init();
                return Some(path);
            }
            Err(e) => {
                eprintln!("Warning: Could not open log file {}: {e}", path.display());
                LogTarget::Stderr
            }
        },
        other => other,
    };

    match target {
        LogTarget::Off => registry.init(),
        _ => registry
            .with(
                fmt::layer()
                    .with_file(config.include_location)
                    .with_line_number(config.include_location)
                    .with_writer(std::io::stderr),
            )
            .init(),
    }
    None
}

fn open_log_file(path: &std::path::Path) -> std::io::Result<std::fs::File> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_accepts_python_spellings() {
        assert_eq!(LogLevel::parse("WARNING"), Some(LogLevel::Warn));
        assert_eq!(LogLevel::parse("critical"), Some(LogLevel::Error));
        assert_eq!(LogLevel::parse(" Debug "), Some(LogLevel::Debug));
        assert_eq!(LogLevel::parse("loud"), None);
        assert!("loud".parse::<LogLevel>().is_err());
    }

    #[test]
    fn test_levels_are_ordered() {
        assert!(LogLevel::Trace < LogLevel::Debug);
        assert!(LogLevel::Warn < LogLevel::Error);
    }

    #[test]
    fn test_directives_scope_own_crates() {
        let directives = LogLevel::Debug.directives();
        assert!(directives.starts_with("warn,"));
        assert!(directives.contains("borgdash_store=debug"));
        assert!(directives.contains("borgdash=debug"));
        assert!(EnvFilter::try_new(&directives).is_ok());
    }

    #[test]
    fn test_open_log_file_creates_parents() {
        let temp = tempfile::TempDir::new().unwrap();
        let path = temp.path().join("nested").join("borgdash.log");
        open_log_file(&path).unwrap();
        assert!(path.exists());
    }

    #[test]
    fn test_default_config_logs_to_stderr() {
        let config = LogConfig::default();
        assert_eq!(config.target, LogTarget::Stderr);
        assert_eq!(config.level, LogLevel::Info);
    }
}
