// crates/adaptive-csp-server/src/reports/tests.rs
// ============================================================================
// Module: Report Intake Unit Tests
// Description: Media type handling and body decoding.
// Purpose: Ensure both browser delivery shapes decode and bad input is rejected.
// Dependencies: adaptive-csp-server
// ============================================================================

//! ## Overview
//! Decodes legacy envelopes and Reporting API batches and checks rejection
//! of unknown media types, malformed JSON, and oversized batches.

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
fn legacy_envelope_decodes_with_parameters() {
    let body = br#"{"csp-report":{"violated-directive":"img-src 'self'","blocked-uri":"https://evil.example/x.png"}}"#;
    let reports = parse_report_body("Application/CSP-Report; charset=utf-8", body).unwrap();
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].directive(), "img-src");
}

#[test]
fn plain_json_is_accepted() {
    let reports = parse_report_body("application/json", br#"{"csp-report":{}}"#).unwrap();
    assert_eq!(reports, vec![ViolationReport::default()]);
}

#[test]
fn reporting_api_batch_keeps_csp_entries() {
    let body = br#"[
        {"type":"csp-violation","age":10,"url":"https://app.example.com/","body":{
            "documentURL":"https://app.example.com/","blockedURL":"inline",
            "effectiveDirective":"script-src-elem","originalPolicy":"default-src 'none'",
            "disposition":"enforce","statusCode":200,"lineNumber":4,"sample":"alert(1)"}},
        {"type":"deprecation","body":{"id":"x"}}
    ]"#;
    let reports = parse_report_body(REPORTS_MEDIA_TYPE, body).unwrap();
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].blocked_uri, "inline");
    assert_eq!(reports[0].directive(), "script-src-elem");
    assert_eq!(reports[0].line_number, Some(4));
    assert_eq!(reports[0].script_sample.as_deref(), Some("alert(1)"));
}

#[test]
fn unknown_media_type_is_rejected() {
    let err = parse_report_body("text/plain", b"{}").unwrap_err();
    assert_eq!(err, ReportBodyError::UnsupportedMediaType("text/plain".to_string()));
    assert!(matches!(parse_report_body("", b"{}"), Err(ReportBodyError::UnsupportedMediaType(_))));
}

#[test]
fn malformed_bodies_are_rejected() {
    assert!(matches!(parse_report_body(CSP_REPORT_MEDIA_TYPE, b"not json"), Err(ReportBodyError::Malformed(_))));
    assert!(matches!(parse_report_body(CSP_REPORT_MEDIA_TYPE, b"{}"), Err(ReportBodyError::Malformed(_))));
    assert!(matches!(parse_report_body(REPORTS_MEDIA_TYPE, b"{}"), Err(ReportBodyError::Malformed(_))));
}

#[test]
fn oversized_batch_is_rejected() {
    let entry = r#"{"type":"csp-violation","body":{}}"#;
    let body = format!("[{}]", vec![entry; MAX_BATCH_REPORTS + 1].join(","));
    assert_eq!(parse_report_body(REPORTS_MEDIA_TYPE, body.as_bytes()), Err(ReportBodyError::TooManyReports));
}
