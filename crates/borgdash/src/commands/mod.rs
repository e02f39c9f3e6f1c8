//! Command handlers for the borgdash CLI.
//!
//! Handlers are split by what they touch: the live config file, its backup
//! snapshots, and change notifications.

pub mod backups;
pub mod config;
pub mod logging;
pub mod watch;

pub use backups::*;
pub use config::*;
pub use logging::*;
pub use watch::*;
