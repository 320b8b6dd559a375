// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Metrics instrumentation for quiz-sync.
//!
//! Uses the `metrics` crate for backend-agnostic metrics collection.
//! The host application chooses the exporter (Prometheus, OTEL, etc.)
//!
//! # Metric Naming Convention
//! - `quiz_sync_` prefix for all metrics
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Labels
//! - `tier`: remote, durable, ephemeral
//! - `operation`: get, set, remove, list
//! - `status`: success, error, timeout

use metrics::{counter, gauge, histogram};
use std::time::{Duration, Instant};

use crate::storage::traits::TierKind;

/// Record a tier operation outcome
pub fn record_operation(tier: TierKind, operation: &str, status: &str) {
    counter!(
        "quiz_sync_tier_operations_total",
        "tier" => tier.as_str(),
        "operation" => operation.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
}

/// Record tier operation latency
pub fn record_latency(tier: TierKind, operation: &str, duration: Duration) {
    histogram!(
        "quiz_sync_tier_operation_seconds",
        "tier" => tier.as_str(),
        "operation" => operation.to_string()
    )
    .record(duration.as_secs_f64());
}

// ═══════════════════════════════════════════════════════════════════════════
// SYNC QUEUE
// ═══════════════════════════════════════════════════════════════════════════

/// Set queued entries awaiting the remote tier
pub fn set_queue_depth(count: usize) {
    gauge!("quiz_sync_queue_depth").set(count as f64);
}

/// Record entries pushed to the remote by a drain
pub fn record_queue_synced(count: usize) {
    counter!("quiz_sync_queue_synced_total").increment(count as u64);
}

/// Record an entry dropped after exhausting its retries
pub fn record_queue_drop() {
    counter!("quiz_sync_queue_dropped_total").increment(1);
}

/// Record a drain pass
pub fn record_drain(synced: usize, failed: usize) {
    let status = if failed == 0 { "clean" } else { "partial" };
    counter!("quiz_sync_drains_total", "status" => status).increment(1);
    if synced > 0 {
        record_queue_synced(synced);
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// DATA QUALITY
// ═══════════════════════════════════════════════════════════════════════════

/// Record a payload that needed sanitizing
pub fn record_corruption(tier: TierKind) {
    counter!("quiz_sync_corruption_detected_total", "tier" => tier.as_str()).increment(1);
}

/// Record a record purged for claiming the wrong quiz id
pub fn record_contamination(tier: TierKind) {
    counter!("quiz_sync_contamination_purged_total", "tier" => tier.as_str()).increment(1);
}

/// Record which tier's candidate won reconciliation
pub fn record_reconcile_winner(tier: TierKind, repaired: bool) {
    counter!(
        "quiz_sync_reconcile_total",
        "winner" => tier.as_str(),
        "repaired" => if repaired { "true" } else { "false" }
    )
    .increment(1);
}

/// Record a recovery scan
pub fn record_recovery(found: bool) {
    let outcome = if found { "recovered" } else { "empty" };
    counter!("quiz_sync_recoveries_total", "outcome" => outcome).increment(1);
}

/// Record a save that no tier accepted (memory-only)
pub fn record_degraded_save() {
    counter!("quiz_sync_degraded_saves_total").increment(1);
}

/// Record a save refused because it would move progress backwards
pub fn record_regression_blocked() {
    counter!("quiz_sync_regressions_blocked_total").increment(1);
}

/// Set service state (for monitoring lifecycle transitions)
pub fn set_service_state(state: &str) {
    counter!(
        "quiz_sync_state_transitions_total",
        "state" => state.to_string()
    )
    .increment(1);
}

/// A timing guard that records latency on drop
pub struct LatencyTimer {
    tier: TierKind,
    operation: &'static str,
    start: Instant,
}

impl LatencyTimer {
    pub fn new(tier: TierKind, operation: &'static str) -> Self {
        Self {
            tier,
            operation,
            start: Instant::now(),
        }
    }
}

impl Drop for LatencyTimer {
    fn drop(&mut self) {
        record_latency(self.tier, self.operation, self.start.elapsed());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use metrics_util::debugging::{DebugValue, DebuggingRecorder};

    #[test]
    fn test_api_does_not_panic_without_recorder() {
        record_operation(TierKind::Remote, "get", "success");
        record_latency(TierKind::Durable, "set", Duration::from_millis(3));
        set_queue_depth(4);
        record_drain(2, 1);
        record_queue_drop();
        record_corruption(TierKind::Ephemeral);
        record_contamination(TierKind::Durable);
        record_reconcile_winner(TierKind::Remote, false);
        record_recovery(true);
        record_degraded_save();
        record_regression_blocked();
        set_service_state("Running");
        let _timer = LatencyTimer::new(TierKind::Remote, "set");
    }

    #[test]
    fn test_counters_reach_recorder() {
        let recorder = DebuggingRecorder::new();
        let snapshotter = recorder.snapshotter();

        metrics::with_local_recorder(&recorder, || {
            record_queue_drop();
            record_queue_drop();
            set_queue_depth(7);
        });

        let snapshot = snapshotter.snapshot().into_vec();
        let dropped = snapshot
            .iter()
            .find(|(key, ..)| key.key().name() == "quiz_sync_queue_dropped_total")
            .map(|(.., value)| value);
        assert!(matches!(dropped, Some(DebugValue::Counter(2))));

        let depth = snapshot
            .iter()
            .find(|(key, ..)| key.key().name() == "quiz_sync_queue_depth")
            .map(|(.., value)| value);
        assert!(matches!(depth, Some(DebugValue::Gauge(v)) if v.into_inner() == 7.0));
    }
}
