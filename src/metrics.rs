//! Process metrics.
//!
//! Replaces global mutable counters with an injected sink: the core takes
//! a `&dyn MetricsSink` (or the no-op default) and never owns a process
//! singleton. `LoggingMetrics` is an adapter, not a requirement of the
//! core — it flushes counters to `log` at most once per second, only when
//! something changed.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// The counters tracked by the pipeline, per §6 "Metrics".
#[derive(Debug, Default)]
pub struct Counters {
    /// Catalog rows inserted or refreshed.
    pub songs_upserted_total: AtomicU64,
    /// Rows found with a non-string `group_key`, deleted as invalid.
    pub invalid_group_key_total: AtomicU64,
    /// Retries performed after a duplicate-key error on upsert.
    pub duplicate_key_retries_total: AtomicU64,
    /// Chart-array synchronization operations performed.
    pub charts_synced_total: AtomicU64,
    /// Dojo charts parsed.
    pub tja_dojo_parsed_total: AtomicU64,
    /// Notes counted across all parsed charts.
    pub tja_notes_total: AtomicU64,
    /// Unknown directives encountered across all parsed files.
    pub tja_unknown_directives_total: AtomicU64,
}

/// A sink that counter increments are reported to.
///
/// Implementations must be cheap to call from the single-threaded scan
/// pass; the default [`NoopMetrics`] does nothing, and [`LoggingMetrics`]
/// aggregates under a lock and flushes to `log` on change.
pub trait MetricsSink: Send + Sync {
    /// Adds `delta` to the named counter.
    fn incr(&self, name: &'static str, delta: u64);
}

/// A [`MetricsSink`] that discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMetrics;

impl MetricsSink for NoopMetrics {
    fn incr(&self, _name: &'static str, _delta: u64) {}
}

/// A [`MetricsSink`] that aggregates counters under a single lock and
/// flushes a summary line to `log::info!` at most once per second, only
/// when at least one increment occurred since the last flush.
#[derive(Debug)]
pub struct LoggingMetrics {
    counters: Counters,
    last_flush: Mutex<Instant>,
    dirty_since_flush: AtomicU64,
}

impl Default for LoggingMetrics {
    fn default() -> Self {
        Self {
            counters: Counters::default(),
            last_flush: Mutex::new(Instant::now() - Duration::from_secs(2)),
            dirty_since_flush: AtomicU64::new(0),
        }
    }
}

impl LoggingMetrics {
    /// Creates a fresh, zeroed metrics aggregator.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a read-only view of the current counters.
    #[must_use]
    pub const fn counters(&self) -> &Counters {
        &self.counters
    }

    fn counter(&self, name: &str) -> Option<&AtomicU64> {
        Some(match name {
            "songs_upserted_total" => &self.counters.songs_upserted_total,
            "invalid_group_key_total" => &self.counters.invalid_group_key_total,
            "duplicate_key_retries_total" => &self.counters.duplicate_key_retries_total,
            "charts_synced_total" => &self.counters.charts_synced_total,
            "tja_dojo_parsed_total" => &self.counters.tja_dojo_parsed_total,
            "tja_notes_total" => &self.counters.tja_notes_total,
            "tja_unknown_directives_total" => &self.counters.tja_unknown_directives_total,
            _ => return None,
        })
    }

    fn maybe_flush(&self) {
        if self.dirty_since_flush.load(Ordering::Relaxed) == 0 {
            return;
        }
        let Ok(mut last_flush) = self.last_flush.try_lock() else {
            return;
        };
        if last_flush.elapsed() < Duration::from_secs(1) {
            return;
        }
        *last_flush = Instant::now();
        self.dirty_since_flush.store(0, Ordering::Relaxed);
        log::info!(
            "metrics: upserted={} invalid_key={} dup_retries={} charts_synced={} dojo_parsed={} notes={} unknown_directives={}",
            self.counters.songs_upserted_total.load(Ordering::Relaxed),
            self.counters.invalid_group_key_total.load(Ordering::Relaxed),
            self.counters.duplicate_key_retries_total.load(Ordering::Relaxed),
            self.counters.charts_synced_total.load(Ordering::Relaxed),
            self.counters.tja_dojo_parsed_total.load(Ordering::Relaxed),
            self.counters.tja_notes_total.load(Ordering::Relaxed),
            self.counters.tja_unknown_directives_total.load(Ordering::Relaxed),
        );
    }
}

impl MetricsSink for LoggingMetrics {
    fn incr(&self, name: &'static str, delta: u64) {
        if let Some(counter) = self.counter(name) {
            counter.fetch_add(delta, Ordering::Relaxed);
            self.dirty_since_flush.fetch_add(1, Ordering::Relaxed);
        }
        self.maybe_flush();
    }
}
