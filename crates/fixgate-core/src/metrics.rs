//! Global atomic counters for gate runs.
//!
//! Counters are incremented silently at the call site. Call
//! [`Metrics::flush`] to emit current values as a single
//! `tracing::info!` event at the end of a batch.

use std::sync::atomic::{AtomicU64, Ordering};

/// Global metrics singleton.
pub static METRICS: Metrics = Metrics::new();

/// Lightweight atomic counters, no allocations, no locking.
pub struct Metrics {
    commits_evaluated: AtomicU64,
    workspaces_created: AtomicU64,
    workspaces_removed: AtomicU64,
    test_runs: AtomicU64,
    timeouts: AtomicU64,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub const fn new() -> Self {
        Self {
            commits_evaluated: AtomicU64::new(0),
            workspaces_created: AtomicU64::new(0),
            workspaces_removed: AtomicU64::new(0),
            test_runs: AtomicU64::new(0),
            timeouts: AtomicU64::new(0),
        }
    }

    pub fn inc_commits_evaluated(&self) {
        self.commits_evaluated.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "commits_evaluated", "counter incremented");
    }

    pub fn inc_workspaces_created(&self) {
        self.workspaces_created.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "workspaces_created", "counter incremented");
    }

    pub fn inc_workspaces_removed(&self) {
        self.workspaces_removed.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "workspaces_removed", "counter incremented");
    }

    pub fn inc_test_runs(&self) {
        self.test_runs.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "test_runs", "counter incremented");
    }

    pub fn inc_timeouts(&self) {
        self.timeouts.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "timeouts", "counter incremented");
    }

    /// Emit all current counter values as a single `info!` event.
    pub fn flush(&self) {
        tracing::info!(
            metric = "flush",
            commits_evaluated = self.commits_evaluated(),
            workspaces_created = self.workspaces_created(),
            workspaces_removed = self.workspaces_removed(),
            test_runs = self.test_runs(),
            timeouts = self.timeouts(),
        );
    }

    pub fn commits_evaluated(&self) -> u64 {
        self.commits_evaluated.load(Ordering::Relaxed)
    }

    pub fn workspaces_created(&self) -> u64 {
        self.workspaces_created.load(Ordering::Relaxed)
    }

    pub fn workspaces_removed(&self) -> u64 {
        self.workspaces_removed.load(Ordering::Relaxed)
    }

    pub fn test_runs(&self) -> u64 {
        self.test_runs.load(Ordering::Relaxed)
    }

    pub fn timeouts(&self) -> u64 {
        self.timeouts.load(Ordering::Relaxed)
    }

    /// Workspaces created but not yet removed.
    pub fn workspaces_live(&self) -> u64 {
        self.workspaces_created()
            .saturating_sub(self.workspaces_removed())
    }

    /// Reset all counters to zero (useful in tests).
    pub fn reset(&self) {
        self.commits_evaluated.store(0, Ordering::Relaxed);
        self.workspaces_created.store(0, Ordering::Relaxed);
        self.workspaces_removed.store(0, Ordering::Relaxed);
        self.test_runs.store(0, Ordering::Relaxed);
        self.timeouts.store(0, Ordering::Relaxed);
    }
}
