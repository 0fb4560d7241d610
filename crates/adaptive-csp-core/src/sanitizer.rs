// crates/adaptive-csp-core/src/sanitizer.rs
// ============================================================================
// Module: Header Sanitizer
// Description: Validation and normalization of outbound HTTP headers.
// Purpose: Keep malformed or injection-prone headers off the wire.
// Dependencies: reqwest (http types), serde_json, thiserror
// ============================================================================

//! ## Overview
//! [`HeaderSanitizer`] accepts three collection shapes and returns the same
//! shape: a native [`HeaderMap`], ordered name/value pairs, or a record. The
//! same name and value rules apply to every shape; only duplicate handling
//! and structural failure differ per shape.
//! Invariants:
//! - Input collections are consumed and a new collection is returned; a
//!   structurally malformed input is handed back untouched.
//! - Structural failures feed the circuit breaker; individual header
//!   rejections do not.
//! - With the feature flag off, calls are pure passthrough and uncounted.
//! Security posture: header names and values are untrusted; rejected values
//! are never echoed into audit events.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::Mutex;

use reqwest::header::HeaderMap;
use reqwest::header::HeaderName;
use reqwest::header::HeaderValue;
use serde_json::Map;
use serde_json::Value;
use serde_json::json;
use thiserror::Error;

use crate::audit::AuditEvent;
use crate::audit::AuditLevel;
use crate::audit::AuditSink;
use crate::breaker::Admission;
use crate::breaker::BreakerConfig;
use crate::breaker::BreakerState;
use crate::breaker::Transition;
use crate::clock::Clock;
use crate::metrics::SanitizerMetrics;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Maximum header name length in characters.
pub const MAX_HEADER_NAME_CHARS: usize = 256;
/// Maximum header value length in characters.
pub const MAX_HEADER_VALUE_CHARS: usize = 8192;
/// Separator used when combining duplicate native headers.
const DUPLICATE_SEPARATOR: &str = ", ";

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Reason a single header was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderRejection {
    /// Name is empty.
    EmptyName,
    /// Name exceeds [`MAX_HEADER_NAME_CHARS`].
    NameTooLong,
    /// Name contains a non-token character.
    InvalidNameChar,
    /// Value is empty or whitespace only.
    EmptyValue,
    /// Value exceeds [`MAX_HEADER_VALUE_CHARS`].
    ValueTooLong,
    /// Value contains CR or LF.
    LineBreak,
    /// Value contains another control character.
    ControlChar,
    /// Value carries bytes outside visible ASCII.
    NotVisibleAscii,
}

impl HeaderRejection {
    /// Returns a stable label for audit events.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::EmptyName => "empty_name",
            Self::NameTooLong => "name_too_long",
            Self::InvalidNameChar => "invalid_name_char",
            Self::EmptyValue => "empty_value",
            Self::ValueTooLong => "value_too_long",
            Self::LineBreak => "line_break",
            Self::ControlChar => "control_char",
            Self::NotVisibleAscii => "not_visible_ascii",
        }
    }
}

/// Errors raised by strict sanitization.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum HeaderError {
    /// A header failed validation.
    #[error("header {name} rejected: {}", reason.as_str())]
    Rejected {
        /// Header name (truncated when oversized).
        name: String,
        /// Rejection reason.
        reason: HeaderRejection,
    },
    /// The collection itself is malformed.
    #[error("malformed header collection: {0}")]
    Malformed(String),
}

// ============================================================================
// SECTION: Validation
// ============================================================================

/// Returns true when the character is a valid HTTP token character.
const fn is_tchar(ch: char) -> bool {
    ch.is_ascii_alphanumeric()
        || matches!(
            ch,
            '!' | '#' | '$' | '%' | '&' | '\'' | '*' | '+' | '-' | '.' | '^' | '_' | '`' | '|' | '~'
        )
}

/// Validates a header name.
///
/// # Errors
///
/// Returns [`HeaderRejection`] when the name is empty, too long, or not a token.
pub fn validate_header_name(name: &str) -> Result<(), HeaderRejection> {
    if name.is_empty() {
        return Err(HeaderRejection::EmptyName);
    }
    if name.chars().count() > MAX_HEADER_NAME_CHARS {
        return Err(HeaderRejection::NameTooLong);
    }
    if !name.chars().all(is_tchar) {
        return Err(HeaderRejection::InvalidNameChar);
    }
    Ok(())
}

/// Validates a header value and returns its normalized form.
///
/// Leading and trailing whitespace is trimmed and internal whitespace runs
/// collapse to one space.
///
/// # Errors
///
/// Returns [`HeaderRejection`] when the value is empty, too long, carries
/// control characters, or leaves the ASCII range.
pub fn normalize_header_value(value: &str) -> Result<String, HeaderRejection> {
    if value.chars().count() > MAX_HEADER_VALUE_CHARS {
        return Err(HeaderRejection::ValueTooLong);
    }
    for ch in value.chars() {
        if ch == '\r' || ch == '\n' {
            return Err(HeaderRejection::LineBreak);
        }
        if ch.is_control() && ch != '\t' {
            return Err(HeaderRejection::ControlChar);
        }
        if !ch.is_ascii() {
            return Err(HeaderRejection::NotVisibleAscii);
        }
    }
    let normalized = value.split_whitespace().collect::<Vec<_>>().join(" ");
    if normalized.is_empty() {
        return Err(HeaderRejection::EmptyValue);
    }
    Ok(normalized)
}

/// Validates one header, returning the normalized value.
///
/// # Errors
///
/// Returns [`HeaderError::Rejected`] for the first failed rule.
pub fn validate_header(name: &str, value: &str) -> Result<String, HeaderError> {
    let reject = |reason| HeaderError::Rejected {
        name: name.chars().take(MAX_HEADER_NAME_CHARS).collect(),
        reason,
    };
    validate_header_name(name).map_err(reject)?;
    normalize_header_value(value).map_err(reject)
}

// ============================================================================
// SECTION: Collections
// ============================================================================

/// Header collection shapes accepted by the sanitizer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeaderCollection {
    /// Native header map; duplicates are combined.
    Native(HeaderMap),
    /// Ordered pairs; order and duplicates are preserved.
    Pairs(Vec<Vec<String>>),
    /// Name to value record.
    Record(BTreeMap<String, String>),
}

/// What a sanitize call did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SanitizeOutcome {
    /// Headers were validated; `dropped` entries were removed.
    Sanitized {
        /// Number of rejected entries.
        dropped: usize,
    },
    /// Structure was malformed; input returned unchanged.
    Malformed,
    /// Strict mode rejected an entry; input returned unchanged.
    Rejected,
    /// Circuit open; input returned unchanged.
    Bypassed,
    /// Feature flag off; input returned unchanged.
    Disabled,
}

/// Sanitizer feature flags.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SanitizerConfig {
    /// Global switch; `false` makes every call a passthrough.
    pub enabled: bool,
    /// Rollout version label, attached to rejection and breaker events.
    pub version: String,
    /// Raise on invalid headers instead of dropping them.
    pub strict_mode: bool,
    /// Breaker tuning.
    pub breaker: BreakerConfig,
}

impl Default for SanitizerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            version: "v1".to_string(),
            strict_mode: false,
            breaker: BreakerConfig::default(),
        }
    }
}

/// Validation posture for one call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    /// Drop invalid entries.
    Permissive,
    /// Fail on the first invalid entry.
    Strict,
}

/// Result of processing one collection.
enum Processed<T> {
    /// Sanitized output with the number of dropped entries.
    Clean(T, usize),
    /// Structurally malformed; original input handed back.
    Structural(T, &'static str),
    /// Strict mode rejected an entry; original input handed back.
    Rejected(HeaderError, T),
}

/// Output of a guarded call.
struct Guarded<T> {
    /// Returned collection.
    output: T,
    /// What happened.
    outcome: SanitizeOutcome,
    /// Strict-mode rejection, if any.
    rejection: Option<HeaderError>,
}

impl<T> Guarded<T> {
    /// Wraps an output without a rejection.
    const fn new(output: T, outcome: SanitizeOutcome) -> Self {
        Self {
            output,
            outcome,
            rejection: None,
        }
    }
}

// ============================================================================
// SECTION: Sanitizer
// ============================================================================

/// Breaker and metrics guarded together.
#[derive(Default)]
struct SanitizerState {
    /// Circuit state.
    breaker: BreakerState,
    /// Call counters.
    metrics: SanitizerMetrics,
}

/// Header sanitizer with circuit breaker and metrics.
///
/// # Invariants
/// - The state lock is never held while headers are processed.
/// - A poisoned state lock degrades to bypass rather than panicking.
pub struct HeaderSanitizer {
    /// Feature flags.
    config: SanitizerConfig,
    /// Breaker and metrics.
    state: Mutex<SanitizerState>,
    /// Time source for latency and cool-down.
    clock: Arc<dyn Clock>,
    /// Sink for rejection and breaker events.
    audit: Arc<dyn AuditSink>,
}

impl HeaderSanitizer {
    /// Creates a sanitizer.
    #[must_use]
    pub fn new(config: SanitizerConfig, clock: Arc<dyn Clock>, audit: Arc<dyn AuditSink>) -> Self {
        Self {
            config,
            state: Mutex::new(SanitizerState::default()),
            clock,
            audit,
        }
    }

    /// Returns the feature flags.
    #[must_use]
    pub const fn config(&self) -> &SanitizerConfig {
        &self.config
    }

    /// Returns true when strict mode is configured.
    #[must_use]
    pub const fn is_strict(&self) -> bool {
        self.config.strict_mode
    }

    /// Sanitizes a collection, dropping invalid entries.
    #[must_use]
    pub fn sanitize(&self, headers: HeaderCollection) -> HeaderCollection {
        self.sanitize_detailed(headers).0
    }

    /// Sanitizes a collection and reports what happened.
    #[must_use]
    pub fn sanitize_detailed(&self, headers: HeaderCollection) -> (HeaderCollection, SanitizeOutcome) {
        let guarded = self.run(headers, Mode::Permissive, process_collection);
        (guarded.output, guarded.outcome)
    }

    /// Sanitizes a collection, failing on the first invalid entry.
    ///
    /// Bypass and passthrough still return `Ok` with the input unchanged.
    ///
    /// # Errors
    ///
    /// Returns [`HeaderError`] for an invalid entry or a malformed structure.
    pub fn sanitize_strict(&self, headers: HeaderCollection) -> Result<HeaderCollection, HeaderError> {
        let guarded = self.run(headers, Mode::Strict, process_collection);
        if let Some(err) = guarded.rejection {
            return Err(err);
        }
        if guarded.outcome == SanitizeOutcome::Malformed {
            return Err(HeaderError::Malformed("pair entries must hold exactly a name and a value".to_string()));
        }
        Ok(guarded.output)
    }

    /// Sanitizes a JSON collection: objects are records, arrays are pairs.
    ///
    /// Any other value cannot be classified and is returned unchanged.
    #[must_use]
    pub fn sanitize_json(&self, headers: Value) -> Value {
        self.run(headers, Mode::Permissive, process_json).output
    }

    /// Validates one header under the configured mode.
    ///
    /// Returns `Ok(Some(normalized))` when valid and `Ok(None)` when dropped
    /// in permissive mode.
    ///
    /// # Errors
    ///
    /// Returns [`HeaderError`] in strict mode when the header is invalid.
    pub fn check_header(&self, name: &str, value: &str) -> Result<Option<String>, HeaderError> {
        if !self.config.enabled {
            return Ok(Some(value.to_string()));
        }
        match validate_header(name, value) {
            Ok(normalized) => Ok(Some(normalized)),
            Err(err) => {
                self.log_rejection(&err);
                if self.config.strict_mode { Err(err) } else { Ok(None) }
            }
        }
    }

    /// Returns a snapshot of the counters.
    #[must_use]
    pub fn metrics(&self) -> SanitizerMetrics {
        self.state.lock().map(|state| state.metrics).unwrap_or_default()
    }

    /// Returns the current breaker state, if readable.
    #[must_use]
    pub fn breaker_state(&self) -> Option<BreakerState> {
        self.state.lock().ok().map(|state| state.breaker)
    }

    /// Runs one guarded call through breaker and metrics.
    fn run<T>(
        &self,
        input: T,
        mode: Mode,
        process: fn(T, Mode, &dyn Fn(&HeaderError)) -> Processed<T>,
    ) -> Guarded<T> {
        if !self.config.enabled {
            return Guarded::new(input, SanitizeOutcome::Disabled);
        }
        let admission = {
            let Ok(mut state) = self.state.lock() else {
                return Guarded::new(input, SanitizeOutcome::Bypassed);
            };
            let (next, admission) = state.breaker.admit(self.clock.now(), &self.config.breaker);
            state.breaker = next;
            if admission == Admission::Bypass {
                state.metrics.record_bypass();
            }
            admission
        };
        if admission == Admission::Bypass {
            return Guarded::new(input, SanitizeOutcome::Bypassed);
        }

        let started = self.clock.now();
        let log = |err: &HeaderError| self.log_rejection(err);
        let processed = process(input, mode, &log);
        let finished = self.clock.now();
        let elapsed = finished.saturating_duration_since(started);

        let Ok(mut state) = self.state.lock() else {
            return into_guarded(processed);
        };
        let transition = match &processed {
            Processed::Clean(..) => {
                state.metrics.record_success(elapsed);
                let (next, transition) = state.breaker.on_success();
                state.breaker = next;
                transition
            }
            Processed::Structural(..) => {
                state.metrics.record_failure();
                let (next, transition) = state.breaker.on_failure(finished, &self.config.breaker);
                state.breaker = next;
                transition
            }
            Processed::Rejected(..) => {
                // Individual rejections do not count against the breaker.
                state.metrics.record_failure();
                let (next, transition) = state.breaker.on_success();
                state.breaker = next;
                transition
            }
        };
        drop(state);
        let reason = match &processed {
            Processed::Structural(_, reason) => Some(*reason),
            Processed::Clean(..) | Processed::Rejected(..) => None,
        };
        self.log_transition(transition, reason);
        into_guarded(processed)
    }

    /// Records a header rejection without the offending value.
    fn log_rejection(&self, err: &HeaderError) {
        let detail = match err {
            HeaderError::Rejected {
                name,
                reason,
            } => json!({ "header": name, "reason": reason.as_str(), "version": self.config.version }),
            HeaderError::Malformed(reason) => json!({ "reason": reason, "version": self.config.version }),
        };
        self.audit.record(
            &AuditEvent::new(AuditLevel::Warn, "header_rejected", "invalid header rejected")
                .with_detail(detail),
        );
    }

    /// Records breaker transitions.
    fn log_transition(&self, transition: Transition, reason: Option<&'static str>) {
        let event = match transition {
            Transition::Unchanged => return,
            Transition::Opened | Transition::Reopened => AuditEvent::new(
                AuditLevel::Error,
                "circuit_opened",
                "header sanitization bypassed after repeated structural failures",
            )
            .with_detail(json!({
                "reopened": transition == Transition::Reopened,
                "reason": reason,
                "version": self.config.version,
                "cooldown_ms": u64::try_from(self.config.breaker.cooldown.as_millis()).unwrap_or(u64::MAX),
            })),
            Transition::Closed => {
                AuditEvent::new(AuditLevel::Info, "circuit_closed", "header sanitization resumed")
            }
        };
        self.audit.record(&event);
    }
}

/// Maps processing output to the caller-facing result.
fn into_guarded<T>(processed: Processed<T>) -> Guarded<T> {
    match processed {
        Processed::Clean(output, dropped) => Guarded::new(output, SanitizeOutcome::Sanitized { dropped }),
        Processed::Structural(original, _) => Guarded::new(original, SanitizeOutcome::Malformed),
        Processed::Rejected(err, original) => Guarded {
            output: original,
            outcome: SanitizeOutcome::Rejected,
            rejection: Some(err),
        },
    }
}

// ============================================================================
// SECTION: Shape Processing
// ============================================================================

/// Applies one validation result under a mode.
fn admit_entry(
    name: &str,
    value: &str,
    mode: Mode,
    log: &dyn Fn(&HeaderError),
    dropped: &mut usize,
) -> Result<Option<String>, HeaderError> {
    match validate_header(name, value) {
        Ok(normalized) => Ok(Some(normalized)),
        Err(err) => {
            log(&err);
            if mode == Mode::Strict {
                return Err(err);
            }
            *dropped += 1;
            Ok(None)
        }
    }
}

/// Dispatches on collection shape.
fn process_collection(
    headers: HeaderCollection,
    mode: Mode,
    log: &dyn Fn(&HeaderError),
) -> Processed<HeaderCollection> {
    match headers {
        HeaderCollection::Native(map) => match process_native(&map, mode, log) {
            Ok((output, dropped)) => Processed::Clean(HeaderCollection::Native(output), dropped),
            Err(err) => Processed::Rejected(err, HeaderCollection::Native(map)),
        },
        HeaderCollection::Pairs(pairs) => {
            if pairs.iter().any(|pair| pair.len() != 2) {
                return Processed::Structural(HeaderCollection::Pairs(pairs), "pair arity");
            }
            match process_pairs(&pairs, mode, log) {
                Ok((output, dropped)) => Processed::Clean(HeaderCollection::Pairs(output), dropped),
                Err(err) => Processed::Rejected(err, HeaderCollection::Pairs(pairs)),
            }
        }
        HeaderCollection::Record(record) => match process_record(&record, mode, log) {
            Ok((output, dropped)) => Processed::Clean(HeaderCollection::Record(output), dropped),
            Err(err) => Processed::Rejected(err, HeaderCollection::Record(record)),
        },
    }
}

/// Validates pairs independently, preserving order and duplicates.
fn process_pairs(
    pairs: &[Vec<String>],
    mode: Mode,
    log: &dyn Fn(&HeaderError),
) -> Result<(Vec<Vec<String>>, usize), HeaderError> {
    let mut dropped = 0;
    let mut output = Vec::with_capacity(pairs.len());
    for pair in pairs {
        if let [name, value] = pair.as_slice()
            && let Some(normalized) = admit_entry(name, value, mode, log, &mut dropped)?
        {
            output.push(vec![name.clone(), normalized]);
        }
    }
    Ok((output, dropped))
}

/// Validates record entries, omitting invalid ones.
fn process_record(
    record: &BTreeMap<String, String>,
    mode: Mode,
    log: &dyn Fn(&HeaderError),
) -> Result<(BTreeMap<String, String>, usize), HeaderError> {
    let mut dropped = 0;
    let mut output = BTreeMap::new();
    for (name, value) in record {
        if let Some(normalized) = admit_entry(name, value, mode, log, &mut dropped)? {
            output.insert(name.clone(), normalized);
        }
    }
    Ok((output, dropped))
}

/// Combines duplicates and validates a native map.
fn process_native(
    map: &HeaderMap,
    mode: Mode,
    log: &dyn Fn(&HeaderError),
) -> Result<(HeaderMap, usize), HeaderError> {
    let mut dropped = 0;
    let mut output = HeaderMap::with_capacity(map.keys_len());
    for name in map.keys() {
        let mut parts = Vec::new();
        let mut visible = true;
        for value in map.get_all(name) {
            match value.to_str() {
                Ok(text) => parts.push(text),
                Err(_) => visible = false,
            }
        }
        if !visible {
            let err = HeaderError::Rejected {
                name: name.as_str().to_string(),
                reason: HeaderRejection::NotVisibleAscii,
            };
            log(&err);
            if mode == Mode::Strict {
                return Err(err);
            }
            dropped += 1;
            continue;
        }
        let combined = parts.join(DUPLICATE_SEPARATOR);
        let Some(normalized) = admit_entry(name.as_str(), &combined, mode, log, &mut dropped)? else {
            continue;
        };
        match HeaderValue::from_str(&normalized) {
            Ok(value) => {
                output.insert(HeaderName::clone(name), value);
            }
            Err(_) => dropped += 1,
        }
    }
    Ok((output, dropped))
}

/// Processes a JSON collection.
fn process_json(headers: Value, mode: Mode, log: &dyn Fn(&HeaderError)) -> Processed<Value> {
    match headers {
        Value::Object(record) => {
            let mut dropped = 0;
            let mut output = Map::new();
            for (name, value) in &record {
                let Some(text) = value.as_str() else {
                    dropped += 1;
                    continue;
                };
                if let Ok(Some(normalized)) = admit_entry(name, text, mode, log, &mut dropped) {
                    output.insert(name.clone(), Value::String(normalized));
                }
            }
            Processed::Clean(Value::Object(output), dropped)
        }
        Value::Array(entries) => {
            let structural = entries.iter().any(|entry| {
                entry.as_array().is_none_or(|pair| pair.len() != 2 || !pair.iter().all(Value::is_string))
            });
            if structural {
                return Processed::Structural(Value::Array(entries), "pair shape");
            }
            let mut dropped = 0;
            let mut output = Vec::with_capacity(entries.len());
            for entry in &entries {
                let (Some(name), Some(value)) = (entry[0].as_str(), entry[1].as_str()) else {
                    continue;
                };
                if let Ok(Some(normalized)) = admit_entry(name, value, mode, log, &mut dropped) {
                    output.push(json!([name, normalized]));
                }
            }
            Processed::Clean(Value::Array(output), dropped)
        }
        other => Processed::Structural(other, "undeterminable shape"),
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================
