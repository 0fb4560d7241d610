// crates/adaptive-csp-core/tests/primitives.rs
// ============================================================================
// Module: Primitive Tests
// Description: Nonce generation, content hashing, and environment detection.
// Purpose: Validate uniqueness, determinism, degradation, and detection tiers.
// Dependencies: adaptive-csp-core, proptest
// ============================================================================

//! ## Overview
//! Covers the low-level building blocks:
//! - Nonces are unique 32-character lowercase hex strings, even when entropy
//!   tiers fail.
//! - Content hashes are deterministic and collision-free in practice.
//! - Environment detection follows its precedence cascade and defaults to
//!   production.

#![allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic_in_result_fn,
    clippy::unwrap_in_result,
    reason = "Test-only assertions use unwrap for clarity."
)]

use std::collections::HashSet;

use adaptive_csp_core::AuditLevel;
use adaptive_csp_core::Environment;
use adaptive_csp_core::MemoryAuditSink;
use adaptive_csp_core::NoopAuditSink;
use adaptive_csp_core::NonceGenerator;
use adaptive_csp_core::StaticSignals;
use adaptive_csp_core::compute_content_hash;
use adaptive_csp_core::crypto::EntropyError;
use adaptive_csp_core::crypto::EntropySource;
use adaptive_csp_core::crypto::ThreadEntropy;
use adaptive_csp_core::crypto::is_nonce;
use adaptive_csp_core::detect_environment;
use adaptive_csp_core::environment::BuildFlags;
use adaptive_csp_core::environment::NODE_ENV_VAR;
use adaptive_csp_core::environment::SignalError;
use adaptive_csp_core::environment::SignalSource;
use adaptive_csp_core::generate_nonce;
use proptest::prelude::*;

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Entropy tier that always fails.
struct FailingEntropy;

impl EntropySource for FailingEntropy {
    fn label(&self) -> &'static str {
        "failing"
    }

    fn fill(&self, _dest: &mut [u8]) -> Result<(), EntropyError> {
        Err(EntropyError {
            source_label: "failing",
            message: "device unavailable".to_string(),
        })
    }
}

/// Signal source whose every accessor fails.
struct BrokenSignals;

impl SignalSource for BrokenSignals {
    fn build_flags(&self) -> Result<Option<BuildFlags>, SignalError> {
        Err(SignalError::Unavailable("build flags".to_string()))
    }

    fn process_env(&self, _key: &str) -> Result<Option<String>, SignalError> {
        Err(SignalError::Unavailable("process env".to_string()))
    }

    fn host(&self) -> Result<Option<String>, SignalError> {
        Err(SignalError::Unavailable("host".to_string()))
    }

    fn url(&self) -> Result<Option<String>, SignalError> {
        Err(SignalError::Unavailable("url".to_string()))
    }
}

// ============================================================================
// SECTION: Nonces
// ============================================================================

#[test]
fn thousand_nonces_are_distinct_hex() {
    let nonces: HashSet<String> = (0..1000).map(|_| generate_nonce()).collect();
    assert_eq!(nonces.len(), 1000);
    assert!(nonces.iter().all(|nonce| is_nonce(nonce)));
}

#[test]
fn failing_tier_degrades_with_warning() {
    let audit = MemoryAuditSink::new();
    let generator = NonceGenerator::with_tiers(vec![Box::new(FailingEntropy), Box::new(ThreadEntropy)]);
    let nonce = generator.generate(&audit);
    assert!(is_nonce(&nonce));
    let events = audit.events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].kind, "entropy_degraded");
    assert_eq!(events[0].level, AuditLevel::Warn);
}

#[test]
fn exhausted_tiers_still_produce_distinct_nonces() {
    let audit = MemoryAuditSink::new();
    let generator = NonceGenerator::with_tiers(vec![Box::new(FailingEntropy)]);
    let first = generator.generate(&audit);
    let second = generator.generate(&audit);
    assert!(is_nonce(&first));
    assert!(is_nonce(&second));
    assert_ne!(first, second);
    assert_eq!(audit.count("entropy_degraded"), 2);
}

#[test]
fn default_generator_records_nothing_when_healthy() {
    let audit = MemoryAuditSink::new();
    let nonce = NonceGenerator::default().generate(&audit);
    assert!(is_nonce(&nonce));
    assert!(audit.events().is_empty());
}

// ============================================================================
// SECTION: Environment Detection
// ============================================================================

#[test]
fn build_flags_take_precedence_over_node_env() {
    let signals = StaticSignals {
        build_flags: Some(BuildFlags {
            prod: Some(true),
            ..BuildFlags::default()
        }),
        node_env: Some("development".to_string()),
        host: Some("localhost".to_string()),
        url: None,
    };
    assert_eq!(detect_environment(&signals), Environment::Production);
}

#[test]
fn build_mode_test_is_recognized() {
    let signals = StaticSignals {
        build_flags: Some(BuildFlags {
            mode: Some("test".to_string()),
            ..BuildFlags::default()
        }),
        ..StaticSignals::default()
    };
    assert_eq!(detect_environment(&signals), Environment::Test);
}

#[test]
fn node_env_precedes_host_heuristics() {
    let signals = StaticSignals {
        node_env: Some("test".to_string()),
        host: Some("localhost:3000".to_string()),
        ..StaticSignals::default()
    };
    assert_eq!(detect_environment(&signals), Environment::Test);
}

#[test]
fn development_hosts_and_urls_select_development() {
    assert_eq!(detect_environment(&StaticSignals::for_host("127.0.0.1:5173")), Environment::Development);
    let signals = StaticSignals {
        url: Some("https://preview.localhost/app".to_string()),
        ..StaticSignals::default()
    };
    assert_eq!(detect_environment(&signals), Environment::Development);
}

#[test]
fn unknown_signals_default_to_production() {
    assert_eq!(detect_environment(&StaticSignals::default()), Environment::Production);
    assert_eq!(detect_environment(&StaticSignals::for_host("app.example.com")), Environment::Production);
    assert_eq!(detect_environment(&BrokenSignals), Environment::Production);
}

#[test]
fn static_signals_only_answer_node_env() {
    let signals = StaticSignals {
        node_env: Some("production".to_string()),
        ..StaticSignals::default()
    };
    assert_eq!(signals.process_env(NODE_ENV_VAR).unwrap().as_deref(), Some("production"));
    assert_eq!(signals.process_env("HOME").unwrap(), None);
}

// ============================================================================
// SECTION: Properties
// ============================================================================

proptest! {
    #[test]
    fn content_hash_is_deterministic(content in ".{1,256}") {
        let first = compute_content_hash(&content).unwrap();
        let second = compute_content_hash(&content).unwrap();
        prop_assert!(first.starts_with("sha256-"));
        prop_assert_eq!(first, second);
    }

    #[test]
    fn distinct_content_hashes_differ(left in ".{1,64}", right in ".{1,64}") {
        prop_assume!(left != right);
        prop_assert_ne!(compute_content_hash(&left).unwrap(), compute_content_hash(&right).unwrap());
    }

    #[test]
    fn detection_always_classifies(
        node_env in proptest::option::of(".{0,16}"),
        host in proptest::option::of(".{0,32}"),
        url in proptest::option::of(".{0,64}"),
    ) {
        let signals = StaticSignals {
            build_flags: None,
            node_env,
            host,
            url,
        };
        let environment = detect_environment(&signals);
        prop_assert!(matches!(
            environment,
            Environment::Development | Environment::Production | Environment::Test
        ));
    }
}

#[test]
fn noop_sink_accepts_degradation_events() {
    let generator = NonceGenerator::with_tiers(vec![Box::new(FailingEntropy)]);
    assert!(is_nonce(&generator.generate(&NoopAuditSink)));
}
