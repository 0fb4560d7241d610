// crates/adaptive-csp-core/src/reporter/tests.rs
// ============================================================================
// Module: Violation Reporter Tests
// Description: Unit tests for report parsing and suggestions.
// Purpose: Validate kebab-case envelopes and directive classification.
// Dependencies: adaptive-csp-core
// ============================================================================

//! ## Overview
//! Unit tests for report parsing and suggestions.

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
fn report_parses_kebab_case_envelope() {
    let body = r#"{"csp-report":{"document-uri":"https://app.example.com/","violated-directive":"style-src 'self'","blocked-uri":"inline","line-number":12}}"#;
    let envelope: CspReportEnvelope = serde_json::from_str(body).unwrap();
    assert_eq!(envelope.csp_report.directive(), "style-src");
    assert_eq!(envelope.csp_report.line_number, Some(12));
    assert!(suggestion_for(envelope.csp_report.directive()).contains("nonce"));
}

#[test]
fn effective_directive_wins() {
    let report = ViolationReport {
        violated_directive: "default-src 'none'".to_string(),
        effective_directive: "img-src".to_string(),
        ..ViolationReport::default()
    };
    assert_eq!(report.directive(), "img-src");
}
