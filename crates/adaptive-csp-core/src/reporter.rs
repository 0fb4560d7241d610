// crates/adaptive-csp-core/src/reporter.rs
// ============================================================================
// Module: Violation Reporter
// Description: Single-listener handling of CSP violation reports.
// Purpose: Log violations in development and forward them in production.
// Dependencies: reqwest, serde, serde_json, thiserror
// ============================================================================

//! ## Overview
//! [`ViolationReporter`] holds at most one [`ViolationListener`]. Setup and
//! teardown are idempotent, and teardown drops the reporter's reference so
//! repeated cycles never accumulate listeners. Dispatch is synchronous and
//! handles reports in the order they are delivered.
//! - Development: a warning audit event with full detail and a suggestion.
//! - Production: a fire-and-forget JSON POST on a detached thread that
//!   outlives the caller; failures are logged at debug level and dropped.
//! - Test: reports are counted only.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::Weak;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::redirect::Policy;
use serde::Deserialize;
use serde::Serialize;
use serde_json::json;
use thiserror::Error;

use crate::audit::AuditEvent;
use crate::audit::AuditLevel;
use crate::audit::AuditSink;
use crate::environment::Environment;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Timeout for a forwarded report.
pub const FORWARD_TIMEOUT: Duration = Duration::from_secs(5);

// ============================================================================
// SECTION: Report Types
// ============================================================================

/// Browser CSP violation report body.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct ViolationReport {
    /// Document where the violation occurred.
    pub document_uri: String,
    /// Referrer of the document.
    pub referrer: String,
    /// Directive as written in the policy.
    pub violated_directive: String,
    /// Directive that was enforced.
    pub effective_directive: String,
    /// Full policy text.
    pub original_policy: String,
    /// `enforce` or `report`.
    pub disposition: String,
    /// Resource that was blocked.
    pub blocked_uri: String,
    /// HTTP status of the document.
    pub status_code: u16,
    /// Source file of the violation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_file: Option<String>,
    /// Source line of the violation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line_number: Option<u32>,
    /// Source column of the violation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub column_number: Option<u32>,
    /// Leading sample of the blocked inline content.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub script_sample: Option<String>,
}

impl ViolationReport {
    /// Directive used for classification: the effective directive when
    /// present, otherwise the name part of the violated directive.
    #[must_use]
    pub fn directive(&self) -> &str {
        if !self.effective_directive.is_empty() {
            return &self.effective_directive;
        }
        self.violated_directive.split_whitespace().next().unwrap_or_default()
    }
}

/// Wire envelope for forwarded and received reports.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CspReportEnvelope {
    /// Wrapped report.
    #[serde(rename = "csp-report")]
    pub csp_report: ViolationReport,
}

/// Returns a remediation hint for a violated directive.
#[must_use]
pub fn suggestion_for(directive: &str) -> &'static str {
    match directive {
        d if d.starts_with("script-src") => {
            "Attach the request nonce to the inline script or register its content as a trusted fragment."
        }
        d if d.starts_with("style-src") => {
            "Add the request nonce to the inline style or move the rules into a stylesheet."
        }
        "connect-src" => "Add the endpoint origin to custom_domains if it is trusted.",
        "img-src" | "font-src" | "media-src" => "Serve the resource from an allowed origin.",
        "frame-ancestors" => "The document was framed by an origin outside frame-ancestors.",
        "worker-src" | "child-src" => "Load workers from the document origin or a blob URL.",
        _ => "Review the violated directive against the active profile.",
    }
}

// ============================================================================
// SECTION: Forwarding
// ============================================================================

/// Errors raised while forwarding a report.
#[derive(Debug, Error)]
pub enum ForwardError {
    /// The HTTP client could not be built.
    #[error("forward client error: {0}")]
    Client(String),
    /// The request failed or returned a non-success status.
    #[error("forward failed: {0}")]
    Transport(String),
}

/// Delivers reports to a collection endpoint.
///
/// Implementations run on a detached thread and may block.
pub trait ViolationForwarder: Send + Sync + 'static {
    /// Posts one report envelope.
    ///
    /// # Errors
    ///
    /// Returns [`ForwardError`] when delivery fails.
    fn forward(&self, endpoint: &str, envelope: &CspReportEnvelope) -> Result<(), ForwardError>;
}

/// Forwarder posting JSON over blocking reqwest.
#[derive(Debug, Clone)]
pub struct HttpForwarder {
    /// Request timeout.
    timeout: Duration,
}

impl HttpForwarder {
    /// Creates a forwarder with [`FORWARD_TIMEOUT`].
    #[must_use]
    pub const fn new() -> Self {
        Self {
            timeout: FORWARD_TIMEOUT,
        }
    }

    /// Returns a copy with a different timeout.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

impl Default for HttpForwarder {
    fn default() -> Self {
        Self::new()
    }
}

impl ViolationForwarder for HttpForwarder {
    fn forward(&self, endpoint: &str, envelope: &CspReportEnvelope) -> Result<(), ForwardError> {
        let client = Client::builder()
            .timeout(self.timeout)
            .redirect(Policy::none())
            .build()
            .map_err(|err| ForwardError::Client(err.to_string()))?;
        let response = client
            .post(endpoint)
            .json(envelope)
            .send()
            .map_err(|err| ForwardError::Transport(err.to_string()))?;
        if !response.status().is_success() {
            return Err(ForwardError::Transport(format!("status {}", response.status().as_u16())));
        }
        Ok(())
    }
}

// ============================================================================
// SECTION: Reporter
// ============================================================================

/// Registered violation handler.
#[derive(Debug)]
pub struct ViolationListener {
    /// Profile deciding how reports are handled.
    environment: Environment,
    /// Collection endpoint for production forwarding.
    endpoint: Option<String>,
    /// Reports handled by this listener.
    handled: AtomicU64,
}

impl ViolationListener {
    /// Profile the listener was registered for.
    #[must_use]
    pub const fn environment(&self) -> Environment {
        self.environment
    }

    /// Reports handled so far.
    #[must_use]
    pub fn handled(&self) -> u64 {
        self.handled.load(Ordering::Relaxed)
    }
}

/// Owner of the single violation listener.
///
/// # Invariants
/// - At most one listener is registered at a time.
/// - After teardown the reporter holds no reference to the old listener.
pub struct ViolationReporter {
    /// Active listener, if any.
    listener: Mutex<Option<Arc<ViolationListener>>>,
    /// Transport for production forwarding.
    forwarder: Arc<dyn ViolationForwarder>,
    /// Sink for reporter events.
    audit: Arc<dyn AuditSink>,
}

impl ViolationReporter {
    /// Creates an inactive reporter.
    #[must_use]
    pub fn new(forwarder: Arc<dyn ViolationForwarder>, audit: Arc<dyn AuditSink>) -> Self {
        Self {
            listener: Mutex::new(None),
            forwarder,
            audit,
        }
    }

    /// Registers the listener; returns false when one is already active.
    pub fn setup(&self, environment: Environment, endpoint: Option<String>) -> bool {
        let Ok(mut slot) = self.listener.lock() else {
            return false;
        };
        if slot.is_some() {
            return false;
        }
        *slot = Some(Arc::new(ViolationListener {
            environment,
            endpoint: endpoint.clone(),
            handled: AtomicU64::new(0),
        }));
        drop(slot);
        self.audit.record(
            &AuditEvent::new(AuditLevel::Info, "reporting_enabled", "violation listener registered")
                .with_environment(environment)
                .with_detail(json!({ "endpoint": endpoint })),
        );
        true
    }

    /// Releases the listener; returns false when none was active.
    pub fn teardown(&self) -> bool {
        let removed = self.listener.lock().ok().and_then(|mut slot| slot.take());
        let Some(listener) = removed else {
            return false;
        };
        self.audit.record(
            &AuditEvent::new(AuditLevel::Info, "reporting_disabled", "violation listener released")
                .with_environment(listener.environment),
        );
        true
    }

    /// Returns true while a listener is registered.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.current().is_some()
    }

    /// Weak handle to the active listener, for lifecycle checks.
    #[must_use]
    pub fn listener(&self) -> Option<Weak<ViolationListener>> {
        self.current().map(|listener| Arc::downgrade(&listener))
    }

    /// Reports handled by the active listener.
    #[must_use]
    pub fn violation_count(&self) -> u64 {
        self.current().map_or(0, |listener| listener.handled())
    }

    /// Handles one report; returns false when no listener is active.
    pub fn dispatch(&self, report: ViolationReport) -> bool {
        let Some(listener) = self.current() else {
            return false;
        };
        listener.handled.fetch_add(1, Ordering::Relaxed);
        match listener.environment {
            Environment::Development => self.log_violation(&report),
            Environment::Production => {
                if let Some(endpoint) = listener.endpoint.clone() {
                    self.forward_detached(endpoint, report);
                }
            }
            Environment::Test => {}
        }
        true
    }

    /// Clones the active listener out of the lock.
    fn current(&self) -> Option<Arc<ViolationListener>> {
        self.listener.lock().ok().and_then(|slot| slot.clone())
    }

    /// Records a development warning with a remediation hint.
    fn log_violation(&self, report: &ViolationReport) {
        let directive = report.directive();
        self.audit.record(
            &AuditEvent::new(
                AuditLevel::Warn,
                "csp_violation",
                format!("{directive} blocked {}", report.blocked_uri),
            )
            .with_environment(Environment::Development)
            .with_detail(json!({
                "violated_directive": report.violated_directive,
                "effective_directive": report.effective_directive,
                "blocked_uri": report.blocked_uri,
                "document_uri": report.document_uri,
                "source_file": report.source_file,
                "line_number": report.line_number,
                "column_number": report.column_number,
                "suggestion": suggestion_for(directive),
            })),
        );
    }

    /// Posts a report on a detached thread; the caller never waits.
    fn forward_detached(&self, endpoint: String, report: ViolationReport) {
        let forwarder = Arc::clone(&self.forwarder);
        let audit = Arc::clone(&self.audit);
        let envelope = CspReportEnvelope {
            csp_report: report,
        };
        let spawned = std::thread::Builder::new().name("csp-report-forward".to_string()).spawn(move || {
            if let Err(err) = forwarder.forward(&endpoint, &envelope) {
                audit.record(
                    &AuditEvent::new(AuditLevel::Debug, "violation_forward_failed", err.to_string())
                        .with_environment(Environment::Production),
                );
            }
        });
        if let Err(err) = spawned {
            self.audit.record(
                &AuditEvent::new(AuditLevel::Debug, "violation_forward_failed", err.to_string())
                    .with_environment(Environment::Production),
            );
        }
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests;
