// crates/adaptive-csp-core/src/metrics.rs
// ============================================================================
// Module: Sanitizer Metrics
// Description: Call counters and latency mean for header sanitization.
// Purpose: Expose sanitizer health without an external metrics backend.
// Dependencies: serde
// ============================================================================

//! ## Overview
//! Counters are plain values owned by the sanitizer and copied out as
//! snapshots. Every counted call lands in exactly one of the successful,
//! failed, or bypassed buckets, so the three always sum to `total_calls`.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::time::Duration;

use serde::Serialize;

// ============================================================================
// SECTION: Types
// ============================================================================

/// Snapshot of sanitizer counters.
///
/// # Invariants
/// - `successful_calls + failed_calls + bypassed_calls == total_calls`.
/// - `average_latency_ms` is the mean over successful calls only.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct SanitizerMetrics {
    /// Calls counted while the feature flag was enabled.
    pub total_calls: u64,
    /// Calls that produced a sanitized collection.
    pub successful_calls: u64,
    /// Calls that hit a structural failure.
    pub failed_calls: u64,
    /// Calls skipped while the circuit was open.
    pub bypassed_calls: u64,
    /// Running mean latency of successful calls, in milliseconds.
    pub average_latency_ms: f64,
}

impl SanitizerMetrics {
    /// Records a successful call and folds its latency into the mean.
    pub fn record_success(&mut self, latency: Duration) {
        self.total_calls = self.total_calls.saturating_add(1);
        self.successful_calls = self.successful_calls.saturating_add(1);
        #[allow(clippy::cast_precision_loss, reason = "Counts stay far below 2^52.")]
        let count = self.successful_calls as f64;
        let sample = latency.as_secs_f64() * 1_000.0;
        self.average_latency_ms += (sample - self.average_latency_ms) / count;
    }

    /// Records a structural failure.
    pub const fn record_failure(&mut self) {
        self.total_calls = self.total_calls.saturating_add(1);
        self.failed_calls = self.failed_calls.saturating_add(1);
    }

    /// Records a call bypassed by the open circuit.
    pub const fn record_bypass(&mut self) {
        self.total_calls = self.total_calls.saturating_add(1);
        self.bypassed_calls = self.bypassed_calls.saturating_add(1);
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests;
