// crates/adaptive-csp-core/src/lib.rs
// ============================================================================
// Module: Adaptive CSP Core
// Description: Environment-aware CSP synthesis and outbound header sanitization.
// Purpose: Provide the policy, reporting, and header-protection primitives.
// Dependencies: base64, rand, reqwest, serde, sha2, thiserror, tokio, url
// ============================================================================

//! ## Overview
//! This crate synthesizes Content-Security-Policy header values tailored to
//! the detected deployment environment, memoizes trusted inline-content
//! hashes, handles violation reports, and sanitizes outbound HTTP headers
//! behind a circuit breaker. All process-wide state lives in an injected
//! [`SecurityContext`].
//! Invariants:
//! - Policy synthesis never fails; it degrades to [`FALLBACK_POLICY`].
//! - Unknown environments resolve to [`Environment::Production`].
//! - Header sanitization never crashes the caller; malformed input is
//!   returned unchanged.
//!
//! Security posture: header collections and violation reports are untrusted.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod audit;
pub mod breaker;
pub mod clock;
pub mod context;
pub mod crypto;
pub mod environment;
pub mod fetch;
pub mod fragments;
pub mod hash_cache;
pub mod metrics;
pub mod policy;
pub mod reporter;
pub mod sanitizer;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use audit::AuditEvent;
pub use audit::AuditLevel;
pub use audit::AuditSink;
pub use audit::FileAuditSink;
pub use audit::MemoryAuditSink;
pub use audit::NoopAuditSink;
pub use audit::StderrAuditSink;
pub use breaker::BreakerConfig;
pub use breaker::BreakerState;
pub use clock::Clock;
pub use clock::ManualClock;
pub use clock::SystemClock;
pub use context::PolicyBundle;
pub use context::SecurityContext;
pub use context::SecurityContextBuilder;
pub use crypto::HashError;
pub use crypto::NonceGenerator;
pub use crypto::compute_content_hash;
pub use crypto::generate_nonce;
pub use environment::Environment;
pub use environment::ProcessSignals;
pub use environment::SignalSource;
pub use environment::StaticSignals;
pub use environment::detect_environment;
pub use fetch::Fetch;
pub use fetch::FetchError;
pub use fetch::FetchRequest;
pub use fetch::FetchResponse;
pub use fetch::GuardedHeaders;
pub use fetch::ReqwestFetch;
pub use fetch::SanitizingFetch;
pub use hash_cache::HashValue;
pub use hash_cache::TrustedHashCache;
pub use hash_cache::TrustedHashes;
pub use metrics::SanitizerMetrics;
pub use policy::DevelopmentMode;
pub use policy::DirectiveSet;
pub use policy::FALLBACK_POLICY;
pub use policy::PolicyConfig;
pub use policy::synthesize;
pub use reporter::CspReportEnvelope;
pub use reporter::HttpForwarder;
pub use reporter::ViolationForwarder;
pub use reporter::ViolationReport;
pub use reporter::ViolationReporter;
pub use sanitizer::HeaderCollection;
pub use sanitizer::HeaderError;
pub use sanitizer::HeaderSanitizer;
pub use sanitizer::SanitizeOutcome;
pub use sanitizer::SanitizerConfig;
