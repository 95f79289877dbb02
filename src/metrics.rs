// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Metrics instrumentation for cafe-sync.
//!
//! Uses the `metrics` crate for backend-agnostic collection. The binary does
//! not install an exporter; embedders choose one (Prometheus, OTEL, etc.).
//!
//! # Metric Naming Convention
//! - `cafe_sync_` prefix for all metrics
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Labels
//! - `store`: remote, local
//! - `operation`: select, insert, update, upsert, delete, read label, write label
//! - `status`: success, network, validation, unknown

use metrics::{counter, gauge, histogram};
use std::time::{Duration, Instant};

/// Record a remote call outcome.
pub fn record_remote_call(operation: &str, status: &str) {
    counter!(
        "cafe_sync_remote_calls_total",
        "operation" => operation.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
}

/// Record operation latency
pub fn record_latency(store: &str, operation: &str, duration: Duration) {
    histogram!(
        "cafe_sync_operation_seconds",
        "store" => store.to_string(),
        "operation" => operation.to_string()
    )
    .record(duration.as_secs_f64());
}

// ═══════════════════════════════════════════════════════════════════════════
// REMOTE HEALTH
// ═══════════════════════════════════════════════════════════════════════════

/// Set remote health status (1 = healthy, 0 = unhealthy)
pub fn set_remote_healthy(healthy: bool) {
    gauge!("cafe_sync_remote_healthy").set(if healthy { 1.0 } else { 0.0 });
}

/// Record a network-classified remote failure with the running streak.
pub fn record_remote_failure(consecutive: u64) {
    counter!("cafe_sync_remote_failures_total").increment(1);
    gauge!("cafe_sync_remote_consecutive_failures").set(consecutive as f64);
}

/// Record a read served from the local mirror.
pub fn record_fallback_read(operation: &str) {
    counter!(
        "cafe_sync_fallback_reads_total",
        "operation" => operation.to_string()
    )
    .increment(1);
}

// ═══════════════════════════════════════════════════════════════════════════
// PENDING QUEUE
// ═══════════════════════════════════════════════════════════════════════════

/// Set the number of queued groups waiting for replay.
pub fn set_pending_groups(count: u64) {
    gauge!("cafe_sync_pending_groups").set(count as f64);
}

/// Record a group written to the queue.
pub fn record_enqueue(label: &str) {
    counter!(
        "cafe_sync_enqueued_groups_total",
        "label" => label.to_string()
    )
    .increment(1);
}

/// Record a flush pass.
pub fn record_flush(applied: usize, dead_lettered: usize, interrupted: bool, duration: Duration) {
    let status = if interrupted { "interrupted" } else { "complete" };
    counter!(
        "cafe_sync_flush_total",
        "status" => status
    )
    .increment(1);
    counter!("cafe_sync_flushed_groups_total").increment(applied as u64);
    if dead_lettered > 0 {
        counter!("cafe_sync_dead_lettered_groups_total").increment(dead_lettered as u64);
    }
    histogram!("cafe_sync_flush_seconds").record(duration.as_secs_f64());
}

/// Set the number of groups parked in the dead-letter table.
pub fn set_dead_letters(count: u64) {
    gauge!("cafe_sync_dead_letters").set(count as f64);
}

/// Record local mirror write-through failures (best effort, never surfaced).
pub fn record_mirror_error(operation: &str) {
    counter!(
        "cafe_sync_mirror_errors_total",
        "operation" => operation.to_string()
    )
    .increment(1);
}

// ═══════════════════════════════════════════════════════════════════════════
// STARTUP
// ═══════════════════════════════════════════════════════════════════════════

/// Record total startup time
pub fn record_startup_total(duration: Duration) {
    histogram!("cafe_sync_startup_total_seconds").record(duration.as_secs_f64());
}

/// A timing guard that records latency on drop
pub struct LatencyTimer {
    store: &'static str,
    operation: &'static str,
    start: Instant,
}

impl LatencyTimer {
    pub fn new(store: &'static str, operation: &'static str) -> Self {
        Self {
            store,
            operation,
            start: Instant::now(),
        }
    }
}

impl Drop for LatencyTimer {
    fn drop(&mut self) {
        record_latency(self.store, self.operation, self.start.elapsed());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // No recorder is installed here; these only check the calls don't panic.

    #[test]
    fn test_remote_metrics() {
        record_remote_call("select", "success");
        record_remote_call("upsert", "network");
        set_remote_healthy(false);
        record_remote_failure(3);
        record_fallback_read("list_orders");
    }

    #[test]
    fn test_queue_metrics() {
        set_pending_groups(4);
        record_enqueue("save_order");
        record_flush(3, 1, true, Duration::from_millis(12));
        set_dead_letters(1);
        record_mirror_error("mirror_order");
    }

    #[test]
    fn test_latency_timer() {
        {
            let _timer = LatencyTimer::new("remote", "select");
            std::thread::sleep(Duration::from_micros(10));
        }
        record_startup_total(Duration::from_millis(40));
    }
}
