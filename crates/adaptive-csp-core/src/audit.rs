// crates/adaptive-csp-core/src/audit.rs
// ============================================================================
// Module: Security Audit Logging
// Description: Structured audit events for policy synthesis and sanitization.
// Purpose: Emit JSON-line security logs without hard logging dependencies.
// Dependencies: serde, serde_json
// ============================================================================

//! ## Overview
//! Every degradation in this crate (entropy fallback, rejected custom domain,
//! policy fallback, breaker trip, violation report) is surfaced as an
//! [`AuditEvent`] routed to an [`AuditSink`]. Sinks are intentionally simple
//! so hosts can forward the JSON lines into their own logging pipeline.
//! Security posture: messages must never include nonce values or raw header
//! values; only names, directives, and labels.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fs::OpenOptions;
use std::io;
use std::io::Write;
use std::path::Path;
use std::sync::Mutex;
use std::time::SystemTime;
use std::time::UNIX_EPOCH;

use serde::Serialize;
use serde_json::Value;

use crate::environment::Environment;

// ============================================================================
// SECTION: Types
// ============================================================================

/// Audit event severity.
///
/// # Invariants
/// - Variants are stable for log routing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditLevel {
    /// Diagnostic detail.
    Debug,
    /// Normal lifecycle event.
    Info,
    /// Degraded but safe behavior.
    Warn,
    /// Systemic failure requiring attention.
    Error,
}

/// Security audit event payload.
#[derive(Debug, Clone, Serialize)]
pub struct AuditEvent {
    /// Event identifier.
    pub event: &'static str,
    /// Event timestamp (milliseconds since epoch).
    pub timestamp_ms: u128,
    /// Severity level.
    pub level: AuditLevel,
    /// Stable event kind label.
    pub kind: &'static str,
    /// Human-readable message.
    pub message: String,
    /// Environment in effect when known.
    pub environment: Option<Environment>,
    /// Optional structured detail.
    pub detail: Option<Value>,
}

impl AuditEvent {
    /// Creates a new audit event with a consistent timestamp.
    #[must_use]
    pub fn new(level: AuditLevel, kind: &'static str, message: impl Into<String>) -> Self {
        let timestamp_ms =
            SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis();
        Self {
            event: "csp_security",
            timestamp_ms,
            level,
            kind,
            message: message.into(),
            environment: None,
            detail: None,
        }
    }

    /// Returns a copy tagged with the given environment.
    #[must_use]
    pub const fn with_environment(mut self, environment: Environment) -> Self {
        self.environment = Some(environment);
        self
    }

    /// Returns a copy carrying structured detail.
    #[must_use]
    pub fn with_detail(mut self, detail: Value) -> Self {
        self.detail = Some(detail);
        self
    }
}

// ============================================================================
// SECTION: Trait
// ============================================================================

/// Audit sink for security events.
pub trait AuditSink: Send + Sync {
    /// Record an audit event.
    fn record(&self, event: &AuditEvent);
}

/// Audit sink that logs JSON lines to stderr.
pub struct StderrAuditSink;

impl AuditSink for StderrAuditSink {
    fn record(&self, event: &AuditEvent) {
        if let Ok(payload) = serde_json::to_string(event) {
            let _ = writeln!(std::io::stderr(), "{payload}");
        }
    }
}

/// Audit sink that logs JSON lines to a file.
pub struct FileAuditSink {
    /// File handle used for append-only logging.
    file: Mutex<std::fs::File>,
}

impl FileAuditSink {
    /// Opens the audit log file in append mode.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened.
    pub fn new(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            file: Mutex::new(file),
        })
    }
}

impl AuditSink for FileAuditSink {
    fn record(&self, event: &AuditEvent) {
        if let Ok(payload) = serde_json::to_string(event)
            && let Ok(mut file) = self.file.lock()
        {
            let _ = writeln!(file, "{payload}");
            let _ = file.flush();
        }
    }
}

/// No-op audit sink.
pub struct NoopAuditSink;

impl AuditSink for NoopAuditSink {
    fn record(&self, _event: &AuditEvent) {}
}

/// Audit sink that retains events in memory.
///
/// Useful for embedding hosts that surface recent security events and for
/// asserting on emitted events.
#[derive(Default)]
pub struct MemoryAuditSink {
    /// Recorded events in emission order.
    events: Mutex<Vec<AuditEvent>>,
}

impl MemoryAuditSink {
    /// Creates an empty in-memory sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a snapshot of all recorded events.
    #[must_use]
    pub fn events(&self) -> Vec<AuditEvent> {
        self.events.lock().map(|events| events.clone()).unwrap_or_default()
    }

    /// Returns how many events of the given kind were recorded.
    #[must_use]
    pub fn count(&self, kind: &str) -> usize {
        self.events
            .lock()
            .map(|events| events.iter().filter(|event| event.kind == kind).count())
            .unwrap_or_default()
    }
}

impl AuditSink for MemoryAuditSink {
    fn record(&self, event: &AuditEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event.clone());
        }
    }
}
