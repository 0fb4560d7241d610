// crates/adaptive-csp-config/src/tests.rs
// ============================================================================
// Module: Config Test Lint Configuration
// Description: Shared test-only lint relaxations for config unit tests.
// Purpose: Allow panic-based assertions in tests.
// Dependencies: adaptive-csp-config
// ============================================================================

//! ## Overview
//! Provides test-only lint relaxations for config unit tests.

// ============================================================================
// SECTION: Lint Configuration
// ============================================================================

#![allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic_in_result_fn,
    clippy::unwrap_in_result,
    reason = "Test-only panic-based assertions are permitted."
)]
