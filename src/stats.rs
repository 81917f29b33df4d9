//! Pipeline statistics: what was captured, spooled, delivered, and lost.
//!
//! Counters are process-wide atomics with optional JSON persistence, so
//! `telemetry-sensor status` can report cumulative numbers across runs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Counters for the current agent lifetime.
#[derive(Debug)]
pub struct PipelineStats {
    /// Events accepted into the in-memory batch
    events_accepted: AtomicU64,
    /// Events dropped at the sensor layer (channel unavailable)
    events_dropped: AtomicU64,
    /// Entries moved into the durable spool
    entries_spooled: AtomicU64,
    /// Flush attempts that made a network request
    flushes_attempted: AtomicU64,
    /// Flushes confirmed by the collector
    flushes_delivered: AtomicU64,
    /// Events included in confirmed deliveries
    events_delivered: AtomicU64,
    /// Delivery failures (non-2xx, transport error, timeout)
    delivery_failures: AtomicU64,
    /// Session start time
    session_start: DateTime<Utc>,
    /// Path for persisting stats
    persist_path: Option<PathBuf>,
}

impl PipelineStats {
    /// Create a new stats log.
    pub fn new() -> Self {
        Self {
            events_accepted: AtomicU64::new(0),
            events_dropped: AtomicU64::new(0),
            entries_spooled: AtomicU64::new(0),
            flushes_attempted: AtomicU64::new(0),
            flushes_delivered: AtomicU64::new(0),
            events_delivered: AtomicU64::new(0),
            delivery_failures: AtomicU64::new(0),
            session_start: Utc::now(),
            persist_path: None,
        }
    }

    /// Create a stats log with persistence.
    pub fn with_persistence(path: PathBuf) -> Self {
        let mut stats = Self::new();
        stats.persist_path = Some(path);

        if let Err(e) = stats.load() {
            log::debug!("no previous pipeline stats loaded: {e}");
        }

        stats
    }

    pub fn record_event_accepted(&self) {
        self.events_accepted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_events_dropped(&self, count: u64) {
        self.events_dropped.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_entries_spooled(&self, count: u64) {
        self.entries_spooled.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_flush_attempted(&self) {
        self.flushes_attempted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_flush_delivered(&self, event_count: u64) {
        self.flushes_delivered.fetch_add(1, Ordering::Relaxed);
        self.events_delivered.fetch_add(event_count, Ordering::Relaxed);
    }

    pub fn record_delivery_failure(&self) {
        self.delivery_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Get the current statistics.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            events_accepted: self.events_accepted.load(Ordering::Relaxed),
            events_dropped: self.events_dropped.load(Ordering::Relaxed),
            entries_spooled: self.entries_spooled.load(Ordering::Relaxed),
            flushes_attempted: self.flushes_attempted.load(Ordering::Relaxed),
            flushes_delivered: self.flushes_delivered.load(Ordering::Relaxed),
            events_delivered: self.events_delivered.load(Ordering::Relaxed),
            delivery_failures: self.delivery_failures.load(Ordering::Relaxed),
            session_start: self.session_start,
            session_duration_secs: (Utc::now() - self.session_start).num_seconds() as u64,
        }
    }

    /// Get a summary string for display.
    pub fn summary(&self) -> String {
        let stats = self.snapshot();
        format!(
            "Pipeline Statistics:\n\
             - Events accepted: {}\n\
             - Events dropped at sensor: {}\n\
             - Entries spooled: {}\n\
             - Flushes attempted: {}\n\
             - Flushes delivered: {}\n\
             - Events delivered: {}\n\
             - Delivery failures: {}\n\
             - Session duration: {} seconds",
            stats.events_accepted,
            stats.events_dropped,
            stats.entries_spooled,
            stats.flushes_attempted,
            stats.flushes_delivered,
            stats.events_delivered,
            stats.delivery_failures,
            stats.session_duration_secs
        )
    }

    /// Save stats to disk.
    pub fn save(&self) -> Result<(), std::io::Error> {
        if let Some(ref path) = self.persist_path {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }

            let stats = self.snapshot();
            let persisted = PersistedStats {
                events_accepted: stats.events_accepted,
                events_dropped: stats.events_dropped,
                entries_spooled: stats.entries_spooled,
                flushes_attempted: stats.flushes_attempted,
                flushes_delivered: stats.flushes_delivered,
                events_delivered: stats.events_delivered,
                delivery_failures: stats.delivery_failures,
                last_updated: Utc::now(),
            };

            let json = serde_json::to_string_pretty(&persisted).map_err(std::io::Error::other)?;
            std::fs::write(path, json)?;
        }
        Ok(())
    }

    /// Load stats from disk.
    fn load(&mut self) -> Result<(), std::io::Error> {
        if let Some(ref path) = self.persist_path {
            if path.exists() {
                let content = std::fs::read_to_string(path)?;
                let persisted: PersistedStats =
                    serde_json::from_str(&content).map_err(std::io::Error::other)?;

                self.events_accepted
                    .store(persisted.events_accepted, Ordering::Relaxed);
                self.events_dropped
                    .store(persisted.events_dropped, Ordering::Relaxed);
                self.entries_spooled
                    .store(persisted.entries_spooled, Ordering::Relaxed);
                self.flushes_attempted
                    .store(persisted.flushes_attempted, Ordering::Relaxed);
                self.flushes_delivered
                    .store(persisted.flushes_delivered, Ordering::Relaxed);
                self.events_delivered
                    .store(persisted.events_delivered, Ordering::Relaxed);
                self.delivery_failures
                    .store(persisted.delivery_failures, Ordering::Relaxed);
            }
        }
        Ok(())
    }

    /// Reset all counters.
    pub fn reset(&self) {
        self.events_accepted.store(0, Ordering::Relaxed);
        self.events_dropped.store(0, Ordering::Relaxed);
        self.entries_spooled.store(0, Ordering::Relaxed);
        self.flushes_attempted.store(0, Ordering::Relaxed);
        self.flushes_delivered.store(0, Ordering::Relaxed);
        self.events_delivered.store(0, Ordering::Relaxed);
        self.delivery_failures.store(0, Ordering::Relaxed);
    }
}

impl Default for PipelineStats {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of pipeline statistics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub events_accepted: u64,
    pub events_dropped: u64,
    pub entries_spooled: u64,
    pub flushes_attempted: u64,
    pub flushes_delivered: u64,
    pub events_delivered: u64,
    pub delivery_failures: u64,
    pub session_start: DateTime<Utc>,
    pub session_duration_secs: u64,
}

/// Stats format for persistence.
#[derive(Debug, Serialize, Deserialize)]
struct PersistedStats {
    events_accepted: u64,
    events_dropped: u64,
    entries_spooled: u64,
    flushes_attempted: u64,
    flushes_delivered: u64,
    events_delivered: u64,
    delivery_failures: u64,
    last_updated: DateTime<Utc>,
}

/// Thread-safe shared stats log.
pub type SharedPipelineStats = Arc<PipelineStats>;

/// Create a new shared stats log.
pub fn create_shared_stats() -> SharedPipelineStats {
    Arc::new(PipelineStats::new())
}

/// Create a new shared stats log with persistence.
pub fn create_shared_stats_with_persistence(path: PathBuf) -> SharedPipelineStats {
    Arc::new(PipelineStats::with_persistence(path))
}
