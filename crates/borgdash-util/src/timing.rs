//! Drop-based timing of lock holds and store I/O.
//!
//! A guard is created when the measured section starts and reports when it
//! is dropped. Short sections are reported at `debug`, slow ones at `info`,
//! and sections long enough to stall other callers at `warn`.
//!
//! ```rust,ignore
//! let _timing = TimingGuard::new("store.write", path.display().to_string())
//!     .with_operation(&op);
//! ```

use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

const DEFAULT_SLOW: Duration = Duration::from_millis(250);
const DEFAULT_STALLED: Duration = Duration::from_secs(5);

/// Reports how long it lived when dropped.
#[must_use = "the section is measured until the guard is dropped"]
pub struct TimingGuard {
    kind: &'static str,
    target: String,
    operation: Option<String>,
    started: Instant,
    slow: Duration,
    stalled: Duration,
}

impl TimingGuard {
    /// Time a section of kind `kind` (e.g. `store.write`) acting on `target`.
    pub fn new(kind: &'static str, target: impl Into<String>) -> Self {
        Self {
            kind,
            target: target.into(),
            operation: None,
            started: Instant::now(),
            slow: DEFAULT_SLOW,
            stalled: DEFAULT_STALLED,
        }
    }

    /// Time how long a path lock is held. Holding a lock for up to a second
    /// is normal for a read-modify-write.
    pub fn lock(path: impl Into<String>) -> Self {
        Self::new("lock", path).with_thresholds(Duration::from_secs(1), DEFAULT_STALLED)
    }

    /// Tag the report with an operation id.
    pub fn with_operation(mut self, id: impl Into<String>) -> Self {
        self.operation = Some(id.into());
        self
    }

    /// Durations from which the report is raised to `info` and `warn`.
    pub fn with_thresholds(mut self, slow: Duration, stalled: Duration) -> Self {
        self.slow = slow;
        self.stalled = stalled.max(slow);
        self
    }

    /// Time since the guard was created.
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    fn level(&self, elapsed: Duration) -> tracing::Level {
        if elapsed >= self.stalled {
            tracing::Level::WARN
        } else if elapsed >= self.slow {
            tracing::Level::INFO
        } else {
            tracing::Level::DEBUG
        }
    }
}

impl Drop for TimingGuard {
    fn drop(&mut self) {
        let elapsed = self.started.elapsed();
        let elapsed_ms = elapsed.as_millis() as u64;
        let op = self.operation.as_deref().unwrap_or("-");

        let level = self.level(elapsed);
        if level == tracing::Level::WARN {
            warn!(
                kind = self.kind,
                target_name = %self.target,
                op,
                elapsed_ms,
                "Section held for a long time; other callers may have timed out"
            );
        } else if level == tracing::Level::INFO {
            info!(
                kind = self.kind,
                target_name = %self.target,
                op,
                elapsed_ms,
                "Slow section"
            );
        } else {
            debug!(
                kind = self.kind,
                target_name = %self.target,
                op,
                elapsed_ms,
                "Section finished"
            );
        }
    }
}
