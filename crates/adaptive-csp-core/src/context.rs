// crates/adaptive-csp-core/src/context.rs
// ============================================================================
// Module: Security Context
// Description: Owner of all process-wide CSP and header-protection state.
// Purpose: Replace ambient singletons with one injected state object.
// Dependencies: tokio (via hash cache)
// ============================================================================

//! ## Overview
//! [`SecurityContext`] is built once at startup and shared by reference or
//! `Arc`. It owns the clock, audit sink, nonce generator, trusted-hash cache,
//! violation reporter, and header sanitizer, and exposes the synthesis entry
//! points that tie them together. No operation here returns an error; each
//! degrades to a safe value and records an audit event instead.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;

use crate::audit::AuditSink;
use crate::audit::StderrAuditSink;
use crate::clock::Clock;
use crate::clock::SystemClock;
use crate::crypto::NonceGenerator;
use crate::environment::Environment;
use crate::environment::ProcessSignals;
use crate::environment::SignalSource;
use crate::environment::detect_environment;
use crate::fetch::Fetch;
use crate::fetch::GuardedHeaders;
use crate::fetch::SanitizingFetch;
use crate::fragments::InlineFragment;
use crate::hash_cache::CACHE_TTL;
use crate::hash_cache::TrustedHashCache;
use crate::hash_cache::TrustedHashes;
use crate::policy::PolicyConfig;
use crate::policy::reporting_endpoints_header;
use crate::policy::synthesize;
use crate::policy::validated_report_uri;
use crate::reporter::HttpForwarder;
use crate::reporter::ViolationForwarder;
use crate::reporter::ViolationReport;
use crate::reporter::ViolationReporter;
use crate::sanitizer::HeaderCollection;
use crate::sanitizer::HeaderSanitizer;
use crate::sanitizer::SanitizerConfig;

// ============================================================================
// SECTION: Types
// ============================================================================

/// Policy and nonce produced for one document or process start.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PolicyBundle {
    /// Profile the policy was synthesized for.
    pub environment: Environment,
    /// Nonce embedded in the policy.
    pub nonce: String,
    /// Serialized policy.
    pub policy: String,
    /// `Reporting-Endpoints` header value when reporting is active.
    pub report_to: Option<String>,
}

/// Process-wide CSP and header-protection state.
pub struct SecurityContext {
    /// Time source.
    clock: Arc<dyn Clock>,
    /// Audit event sink.
    audit: Arc<dyn AuditSink>,
    /// Environment signals for adaptive synthesis.
    signals: Arc<dyn SignalSource>,
    /// Nonce generator.
    nonces: NonceGenerator,
    /// Trusted-hash cache.
    hash_cache: TrustedHashCache,
    /// Violation reporter.
    reporter: ViolationReporter,
    /// Header sanitizer.
    sanitizer: Arc<HeaderSanitizer>,
}

impl SecurityContext {
    /// Returns a builder with production defaults.
    #[must_use]
    pub fn builder() -> SecurityContextBuilder {
        SecurityContextBuilder::default()
    }

    /// Audit sink shared by every component.
    #[must_use]
    pub const fn audit(&self) -> &Arc<dyn AuditSink> {
        &self.audit
    }

    /// Time source shared by every component.
    #[must_use]
    pub const fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Trusted-hash cache.
    #[must_use]
    pub const fn hash_cache(&self) -> &TrustedHashCache {
        &self.hash_cache
    }

    /// Violation reporter.
    #[must_use]
    pub const fn reporter(&self) -> &ViolationReporter {
        &self.reporter
    }

    /// Header sanitizer.
    #[must_use]
    pub const fn sanitizer(&self) -> &Arc<HeaderSanitizer> {
        &self.sanitizer
    }

    // ------------------------------------------------------------------------
    // Environment and nonces
    // ------------------------------------------------------------------------

    /// Generates a per-request nonce.
    #[must_use]
    pub fn generate_nonce(&self) -> String {
        self.nonces.generate(self.audit.as_ref())
    }

    /// Detects the environment from the context's signals.
    #[must_use]
    pub fn detect_environment(&self) -> Environment {
        detect_environment(self.signals.as_ref())
    }

    /// Returns the configured override or the detected environment.
    #[must_use]
    pub fn resolve_environment(&self, config: &PolicyConfig) -> Environment {
        config.environment.unwrap_or_else(|| self.detect_environment())
    }

    // ------------------------------------------------------------------------
    // Synthesis
    // ------------------------------------------------------------------------

    /// Synthesizes a policy for `profile` with a fresh nonce and current hashes.
    pub async fn synthesize(&self, profile: Environment, config: &PolicyConfig) -> String {
        let nonce = self.generate_nonce();
        self.synthesize_with_nonce(profile, config, Some(&nonce)).await
    }

    /// Synthesizes a policy embedding a caller-held nonce.
    pub async fn synthesize_with_nonce(
        &self,
        profile: Environment,
        config: &PolicyConfig,
        nonce: Option<&str>,
    ) -> String {
        let hashes = if config.enable_hashes { Some(self.hash_cache.get_trusted_hashes().await) } else { None };
        synthesize(profile, config, hashes.as_deref(), nonce, self.audit.as_ref())
    }

    /// Synthesizes for the configured or detected environment.
    pub async fn synthesize_adaptive(&self, config: &PolicyConfig) -> String {
        let profile = self.resolve_environment(config);
        self.synthesize(profile, config).await
    }

    /// Synthesizes without awaiting the cache; uses cached hashes or none.
    #[must_use]
    pub fn synthesize_sync(&self, profile: Environment, config: &PolicyConfig) -> String {
        let nonce = self.generate_nonce();
        self.synthesize_sync_with_nonce(profile, config, Some(&nonce))
    }

    /// Synchronous synthesis embedding a caller-held nonce.
    #[must_use]
    pub fn synthesize_sync_with_nonce(
        &self,
        profile: Environment,
        config: &PolicyConfig,
        nonce: Option<&str>,
    ) -> String {
        let hashes: Option<Arc<TrustedHashes>> =
            if config.enable_hashes { self.hash_cache.cached() } else { None };
        synthesize(profile, config, hashes.as_deref(), nonce, self.audit.as_ref())
    }

    /// Process-start entry point: resolves the environment, synthesizes a
    /// policy, and registers violation reporting when requested.
    pub async fn initialize(&self, config: &PolicyConfig) -> PolicyBundle {
        let environment = self.resolve_environment(config);
        let nonce = self.generate_nonce();
        let nonce_ref = config.enable_nonces.then_some(nonce.as_str());
        let policy = self.synthesize_with_nonce(environment, config, nonce_ref).await;
        let report_to = reporting_endpoints_header(environment, config);
        self.setup_reporting(environment, config);
        PolicyBundle {
            environment,
            nonce,
            policy,
            report_to,
        }
    }

    // ------------------------------------------------------------------------
    // Violation reporting
    // ------------------------------------------------------------------------

    /// Registers the violation listener when reporting is requested.
    ///
    /// Returns true when a listener was newly registered.
    pub fn setup_reporting(&self, environment: Environment, config: &PolicyConfig) -> bool {
        if !config.reporting_requested(environment) {
            return false;
        }
        let endpoint = validated_report_uri(config).ok().flatten().map(|uri| uri.to_string());
        self.reporter.setup(environment, endpoint)
    }

    /// Releases the violation listener.
    pub fn teardown_reporting(&self) -> bool {
        self.reporter.teardown()
    }

    /// Delivers a violation report to the active listener.
    pub fn dispatch_violation(&self, report: ViolationReport) -> bool {
        self.reporter.dispatch(report)
    }

    // ------------------------------------------------------------------------
    // Header protection
    // ------------------------------------------------------------------------

    /// Sanitizes a header collection permissively.
    #[must_use]
    pub fn sanitize_headers(&self, headers: HeaderCollection) -> HeaderCollection {
        self.sanitizer.sanitize(headers)
    }

    /// Creates an empty guarded header map.
    #[must_use]
    pub fn guarded_headers(&self) -> GuardedHeaders {
        GuardedHeaders::new(Arc::clone(&self.sanitizer))
    }

    /// Wraps a fetch implementation with header sanitization.
    #[must_use]
    pub fn sanitizing_fetch<F: Fetch>(&self, inner: F) -> SanitizingFetch<F> {
        SanitizingFetch::new(inner, Arc::clone(&self.sanitizer))
    }
}

// ============================================================================
// SECTION: Builder
// ============================================================================

/// Builder for [`SecurityContext`].
pub struct SecurityContextBuilder {
    /// Time source.
    clock: Arc<dyn Clock>,
    /// Audit sink.
    audit: Arc<dyn AuditSink>,
    /// Environment signals.
    signals: Arc<dyn SignalSource>,
    /// Nonce generator.
    nonces: NonceGenerator,
    /// Fragments hashed by the cache.
    fragments: Option<Vec<InlineFragment>>,
    /// Cache TTL.
    cache_ttl: Duration,
    /// Report forwarder.
    forwarder: Arc<dyn ViolationForwarder>,
    /// Sanitizer feature flags.
    sanitizer: SanitizerConfig,
}

impl Default for SecurityContextBuilder {
    fn default() -> Self {
        Self {
            clock: Arc::new(SystemClock),
            audit: Arc::new(StderrAuditSink),
            signals: Arc::new(ProcessSignals::new()),
            nonces: NonceGenerator::default(),
            fragments: None,
            cache_ttl: CACHE_TTL,
            forwarder: Arc::new(HttpForwarder::new()),
            sanitizer: SanitizerConfig::default(),
        }
    }
}

impl SecurityContextBuilder {
    /// Sets the time source.
    #[must_use]
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Sets the audit sink.
    #[must_use]
    pub fn audit(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = audit;
        self
    }

    /// Sets the environment signals.
    #[must_use]
    pub fn signals(mut self, signals: Arc<dyn SignalSource>) -> Self {
        self.signals = signals;
        self
    }

    /// Sets the nonce generator.
    #[must_use]
    pub fn nonce_generator(mut self, nonces: NonceGenerator) -> Self {
        self.nonces = nonces;
        self
    }

    /// Replaces the inline fragment registry.
    #[must_use]
    pub fn fragments(mut self, fragments: Vec<InlineFragment>) -> Self {
        self.fragments = Some(fragments);
        self
    }

    /// Sets the trusted-hash TTL.
    #[must_use]
    pub const fn cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = ttl;
        self
    }

    /// Sets the report forwarder.
    #[must_use]
    pub fn forwarder(mut self, forwarder: Arc<dyn ViolationForwarder>) -> Self {
        self.forwarder = forwarder;
        self
    }

    /// Sets the sanitizer feature flags.
    #[must_use]
    pub fn sanitizer_config(mut self, config: SanitizerConfig) -> Self {
        self.sanitizer = config;
        self
    }

    /// Builds the context.
    #[must_use]
    pub fn build(self) -> SecurityContext {
        let mut hash_cache =
            TrustedHashCache::new(Arc::clone(&self.clock), Arc::clone(&self.audit)).with_ttl(self.cache_ttl);
        if let Some(fragments) = self.fragments {
            hash_cache = hash_cache.with_fragments(fragments);
        }
        let sanitizer = Arc::new(HeaderSanitizer::new(
            self.sanitizer,
            Arc::clone(&self.clock),
            Arc::clone(&self.audit),
        ));
        SecurityContext {
            reporter: ViolationReporter::new(self.forwarder, Arc::clone(&self.audit)),
            clock: self.clock,
            audit: self.audit,
            signals: self.signals,
            nonces: self.nonces,
            hash_cache,
            sanitizer,
        }
    }
}
