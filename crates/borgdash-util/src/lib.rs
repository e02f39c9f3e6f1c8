//! Shared utilities for borgdash.
//!
//! This crate provides common utilities used across the borgdash workspace:
//! - Logging setup with tracing
//! - Path normalization and application directories
//! - RAII-based timing for lock and I/O measurement
//! - ULID-based identifier generation

pub mod id;
pub mod log;
pub mod path;
pub mod timing;

pub use id::{IdPrefix, Identifier};
pub use timing::TimingGuard;
