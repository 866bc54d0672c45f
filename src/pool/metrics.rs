// ABOUTME: Counters for the client registry
//
// Tracks:
// - Spawns: new clients created (cold or warm)
// - Reuses and joins: acquisitions served from an existing entry
// - Stale replacements and startup failures
// - Evictions: idle sweep, temp-dir cleanup, shutdown

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use serde::Serialize;

/// Registry-level metrics
#[derive(Debug, Default)]
pub struct RegistryMetrics {
    pub spawns: AtomicU64,
    pub reuses: AtomicU64,
    pub joins: AtomicU64,
    pub stale_replacements: AtomicU64,
    pub startup_failures: AtomicU64,
    pub evictions: AtomicU64,
    pub active_entries: AtomicU32,
}

impl RegistryMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_spawn(&self) {
        self.spawns.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_reuse(&self) {
        self.reuses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_join(&self) {
        self.joins.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_stale(&self) {
        self.stale_replacements.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_startup_failure(&self) {
        self.startup_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_evictions(&self, count: usize) {
        self.evictions.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn set_active_entries(&self, count: usize) {
        #[allow(clippy::cast_possible_truncation)]
        self.active_entries.store(count as u32, Ordering::Relaxed);
    }

    /// Copy all counters into a plain struct
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            spawns: self.spawns.load(Ordering::Relaxed),
            reuses: self.reuses.load(Ordering::Relaxed),
            joins: self.joins.load(Ordering::Relaxed),
            stale_replacements: self.stale_replacements.load(Ordering::Relaxed),
            startup_failures: self.startup_failures.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            active_entries: self.active_entries.load(Ordering::Relaxed),
        }
    }
}

/// Plain copy of `RegistryMetrics`, for logging and JSON output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct MetricsSnapshot {
    pub spawns: u64,
    pub reuses: u64,
    pub joins: u64,
    pub stale_replacements: u64,
    pub startup_failures: u64,
    pub evictions: u64,
    pub active_entries: u32,
}
