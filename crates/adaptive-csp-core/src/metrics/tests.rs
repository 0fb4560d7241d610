// crates/adaptive-csp-core/src/metrics/tests.rs
// ============================================================================
// Module: Sanitizer Metrics Tests
// Description: Unit tests for counter bookkeeping.
// Purpose: Validate bucket totals and the latency mean.
// Dependencies: adaptive-csp-core
// ============================================================================

//! ## Overview
//! Unit tests for counter bookkeeping.

// ============================================================================
// SECTION: Lint Configuration
// ============================================================================

#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    reason = "Test-only assertions use unwrap/expect for clarity."
)]

// ============================================================================
// SECTION: Imports
// ============================================================================

use super::*;

// ============================================================================
// SECTION: Tests
// ============================================================================

#[test]
fn running_mean_tracks_successes_only() {
    let mut metrics = SanitizerMetrics::default();
    metrics.record_success(Duration::from_millis(2));
    metrics.record_failure();
    metrics.record_success(Duration::from_millis(4));
    metrics.record_bypass();
    assert_eq!(metrics.total_calls, 4);
    assert_eq!(metrics.successful_calls + metrics.failed_calls + metrics.bypassed_calls, 4);
    assert!((metrics.average_latency_ms - 3.0).abs() < 1e-9);
}
