// crates/adaptive-csp-core/src/policy.rs
// ============================================================================
// Module: Policy Synthesis
// Description: Table-driven Content-Security-Policy construction per profile.
// Purpose: Compose a CSP header value from environment, nonce, and hashes.
// Dependencies: serde, thiserror, url
// ============================================================================

//! ## Overview
//! Each [`Environment`] maps to a static profile table of directive rules.
//! One generic routine walks the table, appends nonce/hash/origin tokens as
//! each rule requests, adds reporting directives, and serializes the result.
//! Invariants:
//! - Synthesis never fails; offending fragments are omitted and a directive
//!   set that fails validation is replaced by [`FALLBACK_POLICY`].
//! - Production never carries `'unsafe-inline'` or `'unsafe-eval'` and never
//!   trusts development-tooling hashes.
//! - Directive order is the table order and is stable across calls.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::fmt;

use serde::Deserialize;
use serde::Serialize;
use serde_json::json;
use thiserror::Error;
use url::Url;

use crate::audit::AuditEvent;
use crate::audit::AuditLevel;
use crate::audit::AuditSink;
use crate::crypto::is_hash_source;
use crate::crypto::is_nonce;
use crate::environment::Environment;
use crate::hash_cache::HashValue;
use crate::hash_cache::TrustedHashes;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Minimal policy emitted when a synthesized policy fails validation.
pub const FALLBACK_POLICY: &str = "default-src 'self'; script-src 'self'; style-src 'self'; object-src 'none'; base-uri 'self'; frame-ancestors 'none'";
/// Reporting group name referenced by `report-to`.
pub const REPORT_GROUP: &str = "csp-endpoint";
/// Hosted backend origins allowed in `connect-src` by default.
pub const DEFAULT_BACKEND_ORIGINS: &[&str] = &["https://*.supabase.co", "wss://*.supabase.co"];

/// Stylesheet origin of the web font CDN.
const FONT_STYLESHEET_ORIGIN: &str = "https://fonts.googleapis.com";
/// Font file origin of the web font CDN.
const FONT_FILE_ORIGIN: &str = "https://fonts.gstatic.com";
/// Loopback sources used by dev servers and hot-reload sockets.
const DEV_LOOPBACK_SOURCES: &[&str] = &[
    "http://localhost:*",
    "ws://localhost:*",
    "http://127.0.0.1:*",
    "ws://127.0.0.1:*",
    "http://[::1]:*",
    "ws://[::1]:*",
];
/// Scheme-wide sources for test harness traffic.
const WILDCARD_SOURCES: &[&str] = &["ws:", "wss:", "http:", "https:"];

// ============================================================================
// SECTION: Configuration
// ============================================================================

/// Informational development posture label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DevelopmentMode {
    /// Development policy without extra allowances.
    #[default]
    Secure,
    /// Development policy tolerated as permissive.
    Permissive,
}

/// Caller-supplied policy options.
///
/// # Invariants
/// - `report_violations = None` resolves per profile: on for development and
///   production, off for test.
/// - `report_uri` is validated on every synthesis; an invalid value disables
///   reporting directives rather than failing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyConfig {
    /// Explicit profile override for adaptive synthesis.
    pub environment: Option<Environment>,
    /// Allow dev-server loopback origins in development and test.
    pub enable_dev_tools: bool,
    /// Emit per-request nonce sources.
    pub enable_nonces: bool,
    /// Emit trusted hash sources.
    pub enable_hashes: bool,
    /// Emit reporting directives; `None` uses the profile default.
    pub report_violations: Option<bool>,
    /// Violation report endpoint.
    pub report_uri: Option<String>,
    /// Extra trusted hashes layered over the cached mapping.
    pub trusted_hashes: Option<BTreeMap<String, HashValue>>,
    /// Additional origins allowed in `connect-src`.
    pub custom_domains: Vec<String>,
    /// Hosted backend origins allowed in `connect-src`.
    pub backend_origins: Vec<String>,
    /// Informational development posture.
    pub development_mode: DevelopmentMode,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            environment: None,
            enable_dev_tools: true,
            enable_nonces: true,
            enable_hashes: true,
            report_violations: None,
            report_uri: None,
            trusted_hashes: None,
            custom_domains: Vec::new(),
            backend_origins: DEFAULT_BACKEND_ORIGINS.iter().map(ToString::to_string).collect(),
            development_mode: DevelopmentMode::default(),
        }
    }
}

impl PolicyConfig {
    /// Returns defaults pinned to an explicit environment.
    #[must_use]
    pub fn for_environment(environment: Environment) -> Self {
        Self {
            environment: Some(environment),
            ..Self::default()
        }
    }

    /// Returns whether reporting directives are wanted for `profile`.
    #[must_use]
    pub fn reporting_requested(&self, profile: Environment) -> bool {
        self.report_violations.unwrap_or(profile != Environment::Test)
    }
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Errors raised while building a policy.
///
/// These never escape [`synthesize`]; they drive omission or fallback.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PolicyError {
    /// A source expression would break the header grammar.
    #[error("invalid source token in {directive}: {token}")]
    InvalidToken {
        /// Directive holding the token.
        directive: String,
        /// Offending token.
        token: String,
    },
    /// A directive name is malformed.
    #[error("invalid directive name: {0}")]
    InvalidDirectiveName(String),
    /// No directives were produced.
    #[error("policy has no directives")]
    Empty,
    /// An origin failed validation.
    #[error("invalid origin {origin}: {reason}")]
    InvalidOrigin {
        /// Origin as supplied.
        origin: String,
        /// Rejection reason.
        reason: &'static str,
    },
    /// The report endpoint failed validation.
    #[error("invalid report uri: {0}")]
    InvalidReportUri(String),
}

// ============================================================================
// SECTION: Directive Set
// ============================================================================

/// Insertion-ordered CSP directives.
///
/// # Invariants
/// - Directive names are unique; tokens within a directive are unique.
/// - A directive with no tokens renders as its bare name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DirectiveSet {
    /// Directives in construction order.
    directives: Vec<(String, Vec<String>)>,
}

impl DirectiveSet {
    /// Creates an empty directive set.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            directives: Vec::new(),
        }
    }

    /// Inserts a directive, replacing tokens if the name already exists.
    pub fn insert(&mut self, name: impl Into<String>, tokens: Vec<String>) {
        let name = name.into();
        let mut unique: Vec<String> = Vec::with_capacity(tokens.len());
        for token in tokens {
            if !unique.contains(&token) {
                unique.push(token);
            }
        }
        if let Some(existing) = self.directives.iter_mut().find(|(existing, _)| *existing == name) {
            existing.1 = unique;
        } else {
            self.directives.push((name, unique));
        }
    }

    /// Returns the tokens of a directive.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&[String]> {
        self.directives
            .iter()
            .find(|(existing, _)| existing == name)
            .map(|(_, tokens)| tokens.as_slice())
    }

    /// Returns true when the directive is present.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Directive names in order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.directives.iter().map(|(name, _)| name.as_str())
    }

    /// Number of directives.
    #[must_use]
    pub fn len(&self) -> usize {
        self.directives.len()
    }

    /// Returns true when no directives are present.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.directives.is_empty()
    }

    /// Checks that every name and token is safe to serialize.
    ///
    /// # Errors
    ///
    /// Returns [`PolicyError`] for the first offending entry.
    pub fn validate(&self) -> Result<(), PolicyError> {
        if self.directives.is_empty() {
            return Err(PolicyError::Empty);
        }
        for (name, tokens) in &self.directives {
            if name.is_empty() || !name.bytes().all(|byte| byte.is_ascii_lowercase() || byte == b'-') {
                return Err(PolicyError::InvalidDirectiveName(name.clone()));
            }
            for token in tokens {
                if !is_safe_token(token) {
                    return Err(PolicyError::InvalidToken {
                        directive: name.clone(),
                        token: token.clone(),
                    });
                }
            }
        }
        Ok(())
    }
}

impl fmt::Display for DirectiveSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (index, (name, tokens)) in self.directives.iter().enumerate() {
            if index > 0 {
                f.write_str("; ")?;
            }
            f.write_str(name)?;
            for token in tokens {
                write!(f, " {token}")?;
            }
        }
        Ok(())
    }
}

/// Returns true when a token cannot terminate or split a directive.
fn is_safe_token(token: &str) -> bool {
    !token.is_empty()
        && token.chars().all(|ch| !ch.is_whitespace() && !ch.is_control() && ch != ';' && ch != ',')
}

// ============================================================================
// SECTION: Profile Tables
// ============================================================================

/// Which trusted hashes a directive receives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HashSelection {
    /// No hashes.
    Omit,
    /// Every hash, including development tooling.
    All,
    /// Hashes outside development tooling.
    Curated,
}

/// One row of a profile table.
#[derive(Debug, Clone, Copy)]
struct DirectiveRule {
    /// Directive name.
    name: &'static str,
    /// Fixed leading tokens.
    base: &'static [&'static str],
    /// Append the request nonce.
    nonce: bool,
    /// Hash selection.
    hashes: HashSelection,
    /// Append dev-server loopback sources (gated by `enable_dev_tools`).
    dev_loopback: bool,
    /// Append configured backend origins.
    backend: bool,
    /// Append scheme-wide wildcard sources.
    wildcard: bool,
    /// Append caller custom domains.
    custom_domains: bool,
    /// Fixed trailing tokens.
    trailing: &'static [&'static str],
}

impl DirectiveRule {
    /// Rule with only fixed tokens (empty `base` yields a bare keyword).
    const fn fixed(name: &'static str, base: &'static [&'static str]) -> Self {
        Self {
            name,
            base,
            nonce: false,
            hashes: HashSelection::Omit,
            dev_loopback: false,
            backend: false,
            wildcard: false,
            custom_domains: false,
            trailing: &[],
        }
    }

    /// Adds the nonce and a hash selection.
    const fn inline(mut self, hashes: HashSelection) -> Self {
        self.nonce = true;
        self.hashes = hashes;
        self
    }

    /// Adds fixed trailing tokens.
    const fn then(mut self, trailing: &'static [&'static str]) -> Self {
        self.trailing = trailing;
        self
    }

    /// Adds origin groups.
    const fn origins(mut self, dev_loopback: bool, backend: bool, wildcard: bool) -> Self {
        self.dev_loopback = dev_loopback;
        self.backend = backend;
        self.wildcard = wildcard;
        self
    }

    /// Adds caller custom domains.
    const fn with_custom_domains(mut self) -> Self {
        self.custom_domains = true;
        self
    }
}

/// Development profile: permissive but scoped, hot-reload capable.
const DEVELOPMENT_RULES: &[DirectiveRule] = &[
    DirectiveRule::fixed("default-src", &["'self'"]),
    DirectiveRule::fixed("script-src", &["'self'"]).inline(HashSelection::All).then(&["'unsafe-eval'"]),
    DirectiveRule::fixed("style-src", &["'self'", FONT_STYLESHEET_ORIGIN])
        .inline(HashSelection::All)
        .then(&["'unsafe-inline'"]),
    DirectiveRule::fixed("connect-src", &["'self'"]).origins(true, true, false).with_custom_domains(),
    DirectiveRule::fixed("img-src", &["'self'", "data:", "blob:", "https:"]),
    DirectiveRule::fixed("font-src", &["'self'", FONT_FILE_ORIGIN, "data:"]),
    DirectiveRule::fixed("media-src", &["'self'", "data:", "blob:"]),
    DirectiveRule::fixed("object-src", &["'none'"]),
    DirectiveRule::fixed("child-src", &["'self'", "blob:"]),
    DirectiveRule::fixed("frame-src", &["'self'", "https:"]),
    DirectiveRule::fixed("worker-src", &["'self'", "blob:"]),
    DirectiveRule::fixed("frame-ancestors", &["'self'"]),
    DirectiveRule::fixed("form-action", &["'self'"]),
    DirectiveRule::fixed("base-uri", &["'self'"]),
    DirectiveRule::fixed("manifest-src", &["'self'"]),
];

/// Production profile: deny by default, curated hashes only.
const PRODUCTION_RULES: &[DirectiveRule] = &[
    DirectiveRule::fixed("default-src", &["'none'"]),
    DirectiveRule::fixed("script-src", &["'self'"]).inline(HashSelection::Curated),
    DirectiveRule::fixed("style-src", &["'self'", FONT_STYLESHEET_ORIGIN]).inline(HashSelection::Curated),
    DirectiveRule::fixed("connect-src", &["'self'"]).origins(false, true, false).with_custom_domains(),
    DirectiveRule::fixed("img-src", &["'self'", "data:", "https:"]),
    DirectiveRule::fixed("font-src", &["'self'", FONT_FILE_ORIGIN]),
    DirectiveRule::fixed("media-src", &["'self'"]),
    DirectiveRule::fixed("object-src", &["'none'"]),
    DirectiveRule::fixed("child-src", &["'none'"]),
    DirectiveRule::fixed("frame-src", &["'none'"]),
    DirectiveRule::fixed("worker-src", &["'self'"]),
    DirectiveRule::fixed("frame-ancestors", &["'none'"]),
    DirectiveRule::fixed("form-action", &["'self'"]),
    DirectiveRule::fixed("base-uri", &["'self'"]),
    DirectiveRule::fixed("manifest-src", &["'self'"]),
    DirectiveRule::fixed("upgrade-insecure-requests", &[]),
    DirectiveRule::fixed("block-all-mixed-content", &[]),
];

/// Test profile: development shape with wide-open harness connectivity.
const TEST_RULES: &[DirectiveRule] = &[
    DirectiveRule::fixed("default-src", &["'self'"]),
    DirectiveRule::fixed("script-src", &["'self'"]).inline(HashSelection::All).then(&["'unsafe-eval'"]),
    DirectiveRule::fixed("style-src", &["'self'", FONT_STYLESHEET_ORIGIN])
        .inline(HashSelection::All)
        .then(&["'unsafe-inline'"]),
    DirectiveRule::fixed("connect-src", &["'self'"]).origins(false, false, true),
    DirectiveRule::fixed("img-src", &["'self'", "data:", "blob:"]),
    DirectiveRule::fixed("font-src", &["'self'", FONT_FILE_ORIGIN, "data:"]),
    DirectiveRule::fixed("media-src", &["'self'", "blob:"]),
    DirectiveRule::fixed("object-src", &["'none'"]),
    DirectiveRule::fixed("child-src", &["'self'", "blob:"]),
    DirectiveRule::fixed("frame-src", &["'self'"]),
    DirectiveRule::fixed("worker-src", &["'self'", "blob:"]),
    DirectiveRule::fixed("frame-ancestors", &["'self'"]),
    DirectiveRule::fixed("form-action", &["'self'"]),
    DirectiveRule::fixed("base-uri", &["'self'"]),
    DirectiveRule::fixed("manifest-src", &["'self'"]),
];

/// Returns the rule table for a profile.
const fn profile_rules(profile: Environment) -> &'static [DirectiveRule] {
    match profile {
        Environment::Development => DEVELOPMENT_RULES,
        Environment::Production => PRODUCTION_RULES,
        Environment::Test => TEST_RULES,
    }
}

// ============================================================================
// SECTION: Synthesis
// ============================================================================

/// Builds the directive set for a profile.
///
/// Rejected origins, hashes, nonces, and report endpoints are logged to
/// `audit` and omitted.
#[must_use]
pub fn build_directives(
    profile: Environment,
    config: &PolicyConfig,
    hashes: Option<&TrustedHashes>,
    nonce: Option<&str>,
    audit: &dyn AuditSink,
) -> DirectiveSet {
    let nonce_token = nonce_source(config, nonce, profile, audit);
    let backend = validated_origins(&config.backend_origins, profile, audit);
    let custom = validated_origins(&config.custom_domains, profile, audit);
    let merged;
    let hashes = match (&config.trusted_hashes, hashes) {
        (Some(overrides), Some(cached)) => {
            merged = cached.merged_with(overrides);
            Some(&merged)
        }
        (Some(overrides), None) => {
            merged = TrustedHashes::new().merged_with(overrides);
            Some(&merged)
        }
        (None, cached) => cached,
    };

    let mut directives = DirectiveSet::new();
    for rule in profile_rules(profile) {
        let mut tokens: Vec<String> = rule.base.iter().map(ToString::to_string).collect();
        if rule.nonce
            && let Some(token) = &nonce_token
        {
            tokens.push(token.clone());
        }
        if config.enable_hashes
            && let Some(hashes) = hashes
        {
            match rule.hashes {
                HashSelection::Omit => {}
                HashSelection::All => push_hashes(&mut tokens, hashes.all_hashes(), profile, audit),
                HashSelection::Curated => {
                    push_hashes(&mut tokens, hashes.curated_hashes(), profile, audit);
                }
            }
        }
        if rule.dev_loopback && config.enable_dev_tools {
            tokens.extend(DEV_LOOPBACK_SOURCES.iter().map(ToString::to_string));
        }
        if rule.backend {
            tokens.extend(backend.iter().cloned());
        }
        if rule.wildcard {
            tokens.extend(WILDCARD_SOURCES.iter().map(ToString::to_string));
        }
        if rule.custom_domains {
            tokens.extend(custom.iter().cloned());
        }
        tokens.extend(rule.trailing.iter().map(ToString::to_string));
        directives.insert(rule.name, tokens);
    }

    if config.reporting_requested(profile) {
        match validated_report_uri(config) {
            Ok(Some(uri)) => {
                directives.insert("report-uri", vec![uri.to_string()]);
                directives.insert("report-to", vec![REPORT_GROUP.to_string()]);
            }
            Ok(None) => {}
            Err(err) => audit.record(
                &AuditEvent::new(AuditLevel::Warn, "report_uri_rejected", err.to_string())
                    .with_environment(profile),
            ),
        }
    }
    directives
}

/// Synthesizes a serialized policy, falling back on validation failure.
#[must_use]
pub fn synthesize(
    profile: Environment,
    config: &PolicyConfig,
    hashes: Option<&TrustedHashes>,
    nonce: Option<&str>,
    audit: &dyn AuditSink,
) -> String {
    let directives = build_directives(profile, config, hashes, nonce, audit);
    match directives.validate() {
        Ok(()) => directives.to_string(),
        Err(err) => {
            audit.record(
                &AuditEvent::new(AuditLevel::Error, "policy_fallback", err.to_string())
                    .with_environment(profile),
            );
            FALLBACK_POLICY.to_string()
        }
    }
}

/// Returns the `Reporting-Endpoints` header value when reporting is active.
#[must_use]
pub fn reporting_endpoints_header(profile: Environment, config: &PolicyConfig) -> Option<String> {
    if !config.reporting_requested(profile) {
        return None;
    }
    validated_report_uri(config).ok().flatten().map(|uri| format!("{REPORT_GROUP}=\"{uri}\""))
}

/// Validates the configured report endpoint.
///
/// # Errors
///
/// Returns [`PolicyError::InvalidReportUri`] when the endpoint is not an
/// absolute `http`/`https` URL.
pub fn validated_report_uri(config: &PolicyConfig) -> Result<Option<Url>, PolicyError> {
    let Some(raw) = config.report_uri.as_deref() else {
        return Ok(None);
    };
    let url = Url::parse(raw.trim()).map_err(|err| PolicyError::InvalidReportUri(err.to_string()))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(PolicyError::InvalidReportUri("scheme must be http or https".to_string()));
    }
    if url.host_str().is_none() {
        return Err(PolicyError::InvalidReportUri("host required".to_string()));
    }
    if !is_safe_token(url.as_str()) || url.as_str().contains('"') {
        return Err(PolicyError::InvalidReportUri("contains reserved characters".to_string()));
    }
    Ok(Some(url))
}

/// Validates a source origin (`scheme://host[:port]`, wildcard hosts allowed).
///
/// # Errors
///
/// Returns [`PolicyError::InvalidOrigin`] describing the first failed check.
pub fn normalize_origin(raw: &str) -> Result<String, PolicyError> {
    let trimmed = raw.trim();
    let reject = |reason: &'static str| PolicyError::InvalidOrigin {
        origin: raw.to_string(),
        reason,
    };
    if trimmed.is_empty() {
        return Err(reject("empty"));
    }
    if !is_safe_token(trimmed) || trimmed.contains('\'') {
        return Err(reject("reserved characters"));
    }
    let url = Url::parse(trimmed).map_err(|_| reject("not a url"))?;
    if !matches!(url.scheme(), "http" | "https" | "ws" | "wss") {
        return Err(reject("unsupported scheme"));
    }
    if url.host_str().is_none_or(str::is_empty) {
        return Err(reject("host required"));
    }
    if !url.username().is_empty() || url.password().is_some() {
        return Err(reject("credentials not allowed"));
    }
    if url.path() != "/" || url.query().is_some() || url.fragment().is_some() {
        return Err(reject("path, query, or fragment not allowed"));
    }
    Ok(trimmed.trim_end_matches('/').to_string())
}

/// Validates a list of origins, logging and dropping rejects.
fn validated_origins(origins: &[String], profile: Environment, audit: &dyn AuditSink) -> Vec<String> {
    origins
        .iter()
        .filter_map(|origin| match normalize_origin(origin) {
            Ok(origin) => Some(origin),
            Err(err) => {
                audit.record(
                    &AuditEvent::new(AuditLevel::Warn, "custom_domain_rejected", err.to_string())
                        .with_environment(profile),
                );
                None
            }
        })
        .collect()
}

/// Renders the nonce source when enabled and well-formed.
fn nonce_source(
    config: &PolicyConfig,
    nonce: Option<&str>,
    profile: Environment,
    audit: &dyn AuditSink,
) -> Option<String> {
    if !config.enable_nonces {
        return None;
    }
    let nonce = nonce?;
    if is_nonce(nonce) {
        return Some(format!("'nonce-{nonce}'"));
    }
    audit.record(
        &AuditEvent::new(AuditLevel::Warn, "nonce_rejected", "nonce is not 32 lowercase hex characters")
            .with_environment(profile),
    );
    None
}

/// Appends quoted hash sources, skipping empty placeholders silently.
fn push_hashes<'a>(
    tokens: &mut Vec<String>,
    hashes: impl Iterator<Item = &'a str>,
    profile: Environment,
    audit: &dyn AuditSink,
) {
    for hash in hashes {
        if hash.is_empty() {
            continue;
        }
        if is_hash_source(hash) {
            tokens.push(format!("'{hash}'"));
        } else {
            audit.record(
                &AuditEvent::new(AuditLevel::Warn, "trusted_hash_rejected", "malformed hash source")
                    .with_environment(profile)
                    .with_detail(json!({ "length": hash.len() })),
            );
        }
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================
