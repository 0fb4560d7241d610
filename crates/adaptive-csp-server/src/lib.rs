// crates/adaptive-csp-server/src/lib.rs
// ============================================================================
// Module: Adaptive CSP Server Library
// Description: Axum integration for per-request policies and report intake.
// Purpose: Serve documents under a synthesized CSP and collect violations.
// Dependencies: adaptive-csp-config, adaptive-csp-core, axum, tokio
// ============================================================================

//! ## Overview
//! `adaptive-csp-server` connects the core synthesis pipeline to HTTP. It
//! provides the [`csp_layer`] middleware for embedding in any axum router,
//! the [`inject_policy`] HTML transform shared with the CLI, report body
//! decoding, and [`CspServer`] for running a standalone development server.
//!
//! Security posture: request inputs are untrusted and size-bounded.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod html;
pub mod reports;
pub mod server;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use html::inject_policy;
pub use reports::ReportBodyError;
pub use reports::parse_report_body;
pub use server::CspLayerState;
pub use server::CspNonce;
pub use server::CspServer;
pub use server::REPORT_PATH;
pub use server::ServerError;
pub use server::csp_layer;
