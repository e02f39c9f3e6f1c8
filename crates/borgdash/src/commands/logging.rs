//! Logging initialization for the CLI.
//!
//! Logs go to stderr so command output on stdout stays machine-readable.

use borgdash_util::log::{LogConfig, LogLevel, LogTarget};
use std::path::PathBuf;

/// Initialize logging. `verbose` raises the level to debug. Returns the log
/// file path if logging to a file.
pub fn init_logging(verbose: bool, level: LogLevel, file: Option<PathBuf>) -> Option<PathBuf> {
    let level = if verbose { LogLevel::Debug } else { level };

    borgdash_util::log::init(LogConfig {
        target: file.map_or(LogTarget::Stderr, LogTarget::File),
        level,
        include_location: verbose,
    })
}
