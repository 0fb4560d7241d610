// crates/adaptive-csp-server/src/reports.rs
// ============================================================================
// Module: Report Intake Parsing
// Description: Decodes browser violation report bodies.
// Purpose: Accept legacy report-uri envelopes and Reporting API batches.
// Dependencies: adaptive-csp-core, serde, serde_json, thiserror
// ============================================================================

//! ## Overview
//! Browsers deliver CSP violations in two shapes: the legacy
//! `{"csp-report": {...}}` envelope posted to `report-uri`, and Reporting API
//! batches posted to the `Reporting-Endpoints` group. Both decode into
//! [`ViolationReport`] values for the reporter.
//! Security posture: bodies are untrusted; unknown media types and malformed
//! JSON are rejected without echoing content.

// ============================================================================
// SECTION: Imports
// ============================================================================

use adaptive_csp_core::CspReportEnvelope;
use adaptive_csp_core::ViolationReport;
use serde::Deserialize;
use thiserror::Error;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Media type used by `report-uri` delivery.
pub const CSP_REPORT_MEDIA_TYPE: &str = "application/csp-report";
/// Media type used by Reporting API delivery.
pub const REPORTS_MEDIA_TYPE: &str = "application/reports+json";
/// Maximum reports accepted from one Reporting API batch.
pub const MAX_BATCH_REPORTS: usize = 100;
/// Reporting API type tag for CSP violations.
const CSP_VIOLATION_TYPE: &str = "csp-violation";

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Report body decoding errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ReportBodyError {
    /// Content type is not a report media type.
    #[error("unsupported report media type: {0}")]
    UnsupportedMediaType(String),
    /// Body is not a valid report document.
    #[error("malformed report body: {0}")]
    Malformed(String),
    /// Batch carries more entries than accepted.
    #[error("report batch exceeds {MAX_BATCH_REPORTS} entries")]
    TooManyReports,
}

// ============================================================================
// SECTION: Reporting API Shape
// ============================================================================

/// One entry of a Reporting API batch.
#[derive(Debug, Deserialize)]
struct ReportingApiEntry {
    /// Report type tag.
    #[serde(rename = "type")]
    kind: String,
    /// Type-specific body.
    #[serde(default)]
    body: Option<ReportingApiBody>,
}

/// CSP violation body in Reporting API form.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct ReportingApiBody {
    /// Document where the violation occurred.
    #[serde(rename = "documentURL")]
    document_url: String,
    /// Referrer of the document.
    referrer: String,
    /// Resource that was blocked.
    #[serde(rename = "blockedURL")]
    blocked_url: String,
    /// Directive that was enforced.
    effective_directive: String,
    /// Full policy text.
    original_policy: String,
    /// `enforce` or `report`.
    disposition: String,
    /// HTTP status of the document.
    status_code: u16,
    /// Source file of the violation.
    source_file: Option<String>,
    /// Source line of the violation.
    line_number: Option<u32>,
    /// Source column of the violation.
    column_number: Option<u32>,
    /// Leading sample of the blocked content.
    sample: Option<String>,
}

impl From<ReportingApiBody> for ViolationReport {
    fn from(body: ReportingApiBody) -> Self {
        Self {
            document_uri: body.document_url,
            referrer: body.referrer,
            violated_directive: body.effective_directive.clone(),
            effective_directive: body.effective_directive,
            original_policy: body.original_policy,
            disposition: body.disposition,
            blocked_uri: body.blocked_url,
            status_code: body.status_code,
            source_file: body.source_file,
            line_number: body.line_number,
            column_number: body.column_number,
            script_sample: body.sample,
        }
    }
}

// ============================================================================
// SECTION: Decoding
// ============================================================================

/// Returns the lowercased media type without parameters.
fn media_type(content_type: &str) -> String {
    content_type.split(';').next().unwrap_or_default().trim().to_ascii_lowercase()
}

/// Decodes a report body according to its content type.
///
/// # Errors
///
/// Returns [`ReportBodyError`] when the media type is not accepted or the
/// body does not decode.
pub fn parse_report_body(content_type: &str, body: &[u8]) -> Result<Vec<ViolationReport>, ReportBodyError> {
    match media_type(content_type).as_str() {
        CSP_REPORT_MEDIA_TYPE | "application/json" => {
            let envelope: CspReportEnvelope =
                serde_json::from_slice(body).map_err(|err| ReportBodyError::Malformed(err.to_string()))?;
            Ok(vec![envelope.csp_report])
        }
        REPORTS_MEDIA_TYPE => {
            let entries: Vec<ReportingApiEntry> =
                serde_json::from_slice(body).map_err(|err| ReportBodyError::Malformed(err.to_string()))?;
            if entries.len() > MAX_BATCH_REPORTS {
                return Err(ReportBodyError::TooManyReports);
            }
            Ok(entries
                .into_iter()
                .filter(|entry| entry.kind == CSP_VIOLATION_TYPE)
                .filter_map(|entry| entry.body)
                .map(ViolationReport::from)
                .collect())
        }
        other => Err(ReportBodyError::UnsupportedMediaType(other.to_string())),
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests;
