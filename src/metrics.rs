//! Refresh counters and a Prometheus-compatible text exporter.
//!
//! Endpoint: GET /metrics (on the web API port, default 8054)

use std::fmt::Write;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use crate::trends::engine::HotTrendsEngine;

/// Counters updated by the fetch coordinator and the scheduler
pub struct MetricsCounters {
    /// Refreshes accepted (loading flag acquired)
    pub refreshes_started: AtomicU64,
    pub refreshes_succeeded: AtomicU64,
    /// Provider errors, timeouts and panics
    pub refreshes_failed: AtomicU64,
    /// Requests dropped because the source was already loading
    pub refreshes_skipped: AtomicU64,
    /// Refresh-all passes, by trigger
    pub startup_runs: AtomicU64,
    pub periodic_runs: AtomicU64,
    pub background_runs: AtomicU64,
    pub background_expired: AtomicU64,
    pub reschedule_failures: AtomicU64,
    /// Provider latency sum (in microseconds, for computing average)
    pub fetch_latency_sum_us: AtomicU64,
    pub fetch_latency_count: AtomicU64,
    pub start_time: Instant,
}

impl MetricsCounters {
    pub fn new() -> Self {
        Self {
            refreshes_started: AtomicU64::new(0),
            refreshes_succeeded: AtomicU64::new(0),
            refreshes_failed: AtomicU64::new(0),
            refreshes_skipped: AtomicU64::new(0),
            startup_runs: AtomicU64::new(0),
            periodic_runs: AtomicU64::new(0),
            background_runs: AtomicU64::new(0),
            background_expired: AtomicU64::new(0),
            reschedule_failures: AtomicU64::new(0),
            fetch_latency_sum_us: AtomicU64::new(0),
            fetch_latency_count: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    pub fn record_fetch_latency(&self, latency_us: u64) {
        self.fetch_latency_sum_us.fetch_add(latency_us, Ordering::Relaxed);
        self.fetch_latency_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get_stats(&self) -> serde_json::Value {
        serde_json::json!({
            "uptime_secs": self.start_time.elapsed().as_secs(),
            "refreshes_started": self.refreshes_started.load(Ordering::Relaxed),
            "refreshes_succeeded": self.refreshes_succeeded.load(Ordering::Relaxed),
            "refreshes_failed": self.refreshes_failed.load(Ordering::Relaxed),
            "refreshes_skipped": self.refreshes_skipped.load(Ordering::Relaxed),
            "startup_runs": self.startup_runs.load(Ordering::Relaxed),
            "periodic_runs": self.periodic_runs.load(Ordering::Relaxed),
            "background_runs": self.background_runs.load(Ordering::Relaxed),
            "background_expired": self.background_expired.load(Ordering::Relaxed),
            "reschedule_failures": self.reschedule_failures.load(Ordering::Relaxed),
        })
    }
}

impl Default for MetricsCounters {
    fn default() -> Self {
        Self::new()
    }
}

/// Generate Prometheus-format metrics text
pub fn render_metrics(engine: &HotTrendsEngine) -> String {
    let mut out = String::with_capacity(4096);
    let c = engine.metrics();
    let cache = engine.cache();

    write_help_type(&mut out, "hot_trends_up", "Whether the engine is up.", "gauge");
    writeln!(out, "hot_trends_up 1").ok();

    write_help_type(&mut out, "hot_trends_uptime_seconds_total", "Uptime since engine start in seconds.", "counter");
    writeln!(out, "hot_trends_uptime_seconds_total {:.3}", c.start_time.elapsed().as_secs_f64()).ok();

    // ──────────────────────────────────────────────
    // Refresh outcomes
    // ──────────────────────────────────────────────
    write_help_type(&mut out, "hot_trends_refreshes_total", "Total refreshes by outcome.", "counter");
    writeln!(out, "hot_trends_refreshes_total{{outcome=\"started\"}} {}", c.refreshes_started.load(Ordering::Relaxed)).ok();
    writeln!(out, "hot_trends_refreshes_total{{outcome=\"succeeded\"}} {}", c.refreshes_succeeded.load(Ordering::Relaxed)).ok();
    writeln!(out, "hot_trends_refreshes_total{{outcome=\"failed\"}} {}", c.refreshes_failed.load(Ordering::Relaxed)).ok();
    writeln!(out, "hot_trends_refreshes_total{{outcome=\"skipped\"}} {}", c.refreshes_skipped.load(Ordering::Relaxed)).ok();

    // ──────────────────────────────────────────────
    // Scheduler triggers
    // ──────────────────────────────────────────────
    write_help_type(&mut out, "hot_trends_refresh_runs_total", "Total refresh-all passes by trigger.", "counter");
    writeln!(out, "hot_trends_refresh_runs_total{{trigger=\"startup\"}} {}", c.startup_runs.load(Ordering::Relaxed)).ok();
    writeln!(out, "hot_trends_refresh_runs_total{{trigger=\"periodic\"}} {}", c.periodic_runs.load(Ordering::Relaxed)).ok();
    writeln!(out, "hot_trends_refresh_runs_total{{trigger=\"background\"}} {}", c.background_runs.load(Ordering::Relaxed)).ok();

    write_help_type(&mut out, "hot_trends_background_expired_total", "Background runs cut short by their time budget.", "counter");
    writeln!(out, "hot_trends_background_expired_total {}", c.background_expired.load(Ordering::Relaxed)).ok();

    write_help_type(&mut out, "hot_trends_reschedule_failures_total", "Failed background re-registrations.", "counter");
    writeln!(out, "hot_trends_reschedule_failures_total {}", c.reschedule_failures.load(Ordering::Relaxed)).ok();

    let latency_count = c.fetch_latency_count.load(Ordering::Relaxed);
    let latency_sum = c.fetch_latency_sum_us.load(Ordering::Relaxed);
    let latency_avg = if latency_count > 0 {
        (latency_sum as f64 / latency_count as f64) / 1_000_000.0 // us → seconds
    } else {
        0.0
    };
    write_help_type(&mut out, "hot_trends_fetch_time_seconds_avg", "Average provider fetch time.", "gauge");
    writeln!(out, "hot_trends_fetch_time_seconds_avg {:.6}", latency_avg).ok();

    // ──────────────────────────────────────────────
    // Cache
    // ──────────────────────────────────────────────
    let hits = cache.hits();
    let misses = cache.misses();
    write_help_type(&mut out, "hot_trends_cache_hits_total", "Total reads answered from the cache.", "counter");
    writeln!(out, "hot_trends_cache_hits_total {}", hits).ok();
    write_help_type(&mut out, "hot_trends_cache_misses_total", "Total reads for never-fetched sources.", "counter");
    writeln!(out, "hot_trends_cache_misses_total {}", misses).ok();

    write_help_type(&mut out, "hot_trends_persist_failures_total", "Total failed cache persistence writes.", "counter");
    writeln!(out, "hot_trends_persist_failures_total {}", cache.persist_failures()).ok();

    // ──────────────────────────────────────────────
    // Per-source state
    // ──────────────────────────────────────────────
    write_help_type(&mut out, "hot_trends_source_items", "Items currently cached per source.", "gauge");
    write_help_type(&mut out, "hot_trends_source_loading", "Whether a refresh is in flight per source.", "gauge");
    for status in engine.source_statuses() {
        writeln!(out, "hot_trends_source_items{{source=\"{}\"}} {}", status.key, status.item_count).ok();
        writeln!(out, "hot_trends_source_loading{{source=\"{}\"}} {}", status.key, status.loading as u8).ok();
    }

    write_help_type(&mut out, "hot_trends_build_info", "hot-trends build information.", "gauge");
    writeln!(out, "hot_trends_build_info{{version=\"{}\"}} 1", env!("CARGO_PKG_VERSION")).ok();

    out
}

// ── helpers ─────────────────────────────────────────

fn write_help_type(out: &mut String, name: &str, help: &str, metric_type: &str) {
    writeln!(out, "# HELP {} {}", name, help).ok();
    writeln!(out, "# TYPE {} {}", name, metric_type).ok();
}
