// crates/adaptive-csp-core/tests/policy_synthesis.rs
// ============================================================================
// Module: Policy Synthesis Tests
// Description: Profile table behavior of the CSP synthesizer.
// Purpose: Pin production hardening, development allowances, and omission rules.
// Dependencies: adaptive-csp-core, proptest
// ============================================================================

//! ## Overview
//! Exercises the pure synthesis routine across all three profiles:
//! - Production never carries unsafe tokens and always carries the hardening
//!   directives.
//! - Development and test allowances are scoped to their profiles.
//! - Invalid report endpoints, origins, and hashes are omitted and logged.
//! - Output is deterministic for identical inputs.

#![allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic_in_result_fn,
    clippy::unwrap_in_result,
    reason = "Test-only assertions use unwrap for clarity."
)]

use std::collections::BTreeMap;

use adaptive_csp_core::Environment;
use adaptive_csp_core::HashValue;
use adaptive_csp_core::MemoryAuditSink;
use adaptive_csp_core::NoopAuditSink;
use adaptive_csp_core::PolicyConfig;
use adaptive_csp_core::TrustedHashes;
use adaptive_csp_core::compute_content_hash;
use adaptive_csp_core::fragments::BUILTIN_FRAGMENTS;
use adaptive_csp_core::hash_cache::compute_trusted_hashes;
use adaptive_csp_core::policy::build_directives;
use adaptive_csp_core::policy::reporting_endpoints_header;
use adaptive_csp_core::synthesize;
use proptest::prelude::*;

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Fixed nonce for deterministic assertions.
const NONCE: &str = "0123456789abcdef0123456789abcdef";

/// Hashes of the built-in fragment registry.
fn builtin_hashes() -> TrustedHashes {
    compute_trusted_hashes(BUILTIN_FRAGMENTS, &NoopAuditSink)
}

/// Synthesizes with built-in hashes and the fixed nonce.
fn policy_for(profile: Environment, config: &PolicyConfig) -> String {
    synthesize(profile, config, Some(&builtin_hashes()), Some(NONCE), &NoopAuditSink)
}

/// Hashes registered under a key.
fn hashes_for(key: &str) -> Vec<String> {
    builtin_hashes().get(key).unwrap().as_slice().to_vec()
}

/// Any of the three profiles.
fn profile_strategy() -> impl Strategy<Value = Environment> {
    prop_oneof![
        Just(Environment::Development),
        Just(Environment::Production),
        Just(Environment::Test),
    ]
}

// ============================================================================
// SECTION: Production
// ============================================================================

#[test]
fn production_policy_has_hardening_directives_and_no_unsafe_tokens() {
    let policy = policy_for(Environment::Production, &PolicyConfig::default());
    assert!(!policy.contains("'unsafe-inline'"), "{policy}");
    assert!(!policy.contains("'unsafe-eval'"), "{policy}");
    for required in [
        "default-src 'none'",
        "frame-ancestors 'none'",
        "object-src 'none'",
        "base-uri 'self'",
        "form-action 'self'",
        "upgrade-insecure-requests",
        "block-all-mixed-content",
    ] {
        assert!(policy.contains(required), "missing {required}: {policy}");
    }
}

#[test]
fn production_trusts_only_curated_hashes() {
    let production = policy_for(Environment::Production, &PolicyConfig::default());
    let development = policy_for(Environment::Development, &PolicyConfig::default());
    for hash in hashes_for("dev-tooling") {
        assert!(!production.contains(&hash), "production trusts dev tooling hash {hash}");
        assert!(development.contains(&hash));
    }
    for hash in hashes_for("theme-init").into_iter().chain(hashes_for("runtime-init")) {
        assert!(production.contains(&format!("'{hash}'")));
    }
}

#[test]
fn production_connect_src_allows_backend_and_custom_domains_only() {
    let config = PolicyConfig {
        custom_domains: vec!["https://api.example.com".to_string()],
        ..PolicyConfig::for_environment(Environment::Production)
    };
    let directives =
        build_directives(Environment::Production, &config, None, Some(NONCE), &NoopAuditSink);
    let connect = directives.get("connect-src").unwrap();
    assert_eq!(
        connect,
        &["'self'", "https://*.supabase.co", "wss://*.supabase.co", "https://api.example.com"]
            .map(ToString::to_string)[..]
    );
}

// ============================================================================
// SECTION: Development and Test
// ============================================================================

#[test]
fn development_script_src_allows_eval_and_carries_nonce() {
    let directives = build_directives(
        Environment::Development,
        &PolicyConfig::default(),
        Some(&builtin_hashes()),
        Some(NONCE),
        &NoopAuditSink,
    );
    let nonce_token = format!("'nonce-{NONCE}'");
    let script = directives.get("script-src").unwrap();
    assert!(script.contains(&"'unsafe-eval'".to_string()));
    assert!(script.contains(&nonce_token));
    let style = directives.get("style-src").unwrap();
    assert!(style.contains(&nonce_token));
    assert!(style.contains(&"'unsafe-inline'".to_string()));
    assert!(style.contains(&"https://fonts.googleapis.com".to_string()));
}

#[test]
fn development_loopback_sources_follow_dev_tools_flag() {
    let enabled = policy_for(Environment::Development, &PolicyConfig::default());
    assert!(enabled.contains("ws://localhost:*"));
    let config = PolicyConfig {
        enable_dev_tools: false,
        ..PolicyConfig::default()
    };
    let disabled = policy_for(Environment::Development, &config);
    assert!(!disabled.contains("ws://localhost:*"));
    assert!(disabled.contains("https://*.supabase.co"));
}

#[test]
fn test_profile_opens_connectivity_and_skips_reporting_by_default() {
    let config = PolicyConfig {
        report_uri: Some("https://reports.example.com/csp".to_string()),
        ..PolicyConfig::default()
    };
    let directives = build_directives(Environment::Test, &config, None, Some(NONCE), &NoopAuditSink);
    let connect = directives.get("connect-src").unwrap();
    for scheme in ["ws:", "wss:", "http:", "https:"] {
        assert!(connect.contains(&scheme.to_string()));
    }
    assert!(!directives.contains("report-uri"));
    assert!(directives.get("script-src").unwrap().contains(&"'unsafe-eval'".to_string()));
}

// ============================================================================
// SECTION: Reporting
// ============================================================================

#[test]
fn configured_endpoint_adds_reporting_directives() {
    let config = PolicyConfig {
        report_uri: Some("https://reports.example.com/csp".to_string()),
        ..PolicyConfig::default()
    };
    let policy = policy_for(Environment::Production, &config);
    assert!(policy.ends_with("report-uri https://reports.example.com/csp; report-to csp-endpoint"), "{policy}");
    assert_eq!(
        reporting_endpoints_header(Environment::Production, &config).as_deref(),
        Some("csp-endpoint=\"https://reports.example.com/csp\"")
    );
}

#[test]
fn reporting_can_be_disabled_explicitly() {
    let config = PolicyConfig {
        report_uri: Some("https://reports.example.com/csp".to_string()),
        report_violations: Some(false),
        ..PolicyConfig::default()
    };
    let policy = policy_for(Environment::Production, &config);
    assert!(!policy.contains("report-uri"));
    assert!(reporting_endpoints_header(Environment::Production, &config).is_none());
}

#[test]
fn malformed_report_uri_omits_both_reporting_directives() {
    for endpoint in ["not a url", "ftp://reports.example.com/csp", "/relative/path"] {
        let audit = MemoryAuditSink::new();
        let config = PolicyConfig {
            report_uri: Some(endpoint.to_string()),
            ..PolicyConfig::default()
        };
        let policy = synthesize(Environment::Production, &config, None, Some(NONCE), &audit);
        assert!(!policy.contains("report-uri"), "{endpoint}");
        assert!(!policy.contains("report-to"), "{endpoint}");
        assert!(policy.contains("default-src 'none'"));
        assert_eq!(audit.count("report_uri_rejected"), 1, "{endpoint}");
        assert!(reporting_endpoints_header(Environment::Production, &config).is_none());
    }
}

// ============================================================================
// SECTION: Caller Input Validation
// ============================================================================

#[test]
fn invalid_custom_domains_are_logged_and_omitted() {
    let audit = MemoryAuditSink::new();
    let config = PolicyConfig {
        custom_domains: vec![
            "https://api.example.com".to_string(),
            "javascript:alert(1)".to_string(),
            "https://evil.example.com; script-src *".to_string(),
        ],
        ..PolicyConfig::default()
    };
    let policy = synthesize(Environment::Production, &config, None, None, &audit);
    assert!(policy.contains("https://api.example.com"));
    assert!(!policy.contains("javascript"));
    assert!(!policy.contains("evil.example.com"));
    assert_eq!(audit.count("custom_domain_rejected"), 2);
}

#[test]
fn caller_hashes_are_validated_and_treated_as_curated() {
    let audit = MemoryAuditSink::new();
    let valid = compute_content_hash("console.log('analytics')").unwrap();
    let mut overrides = BTreeMap::new();
    overrides.insert("analytics".to_string(), HashValue::Single(valid.clone()));
    overrides.insert("bogus".to_string(), HashValue::Single("sha256-not-base64".to_string()));
    let config = PolicyConfig {
        trusted_hashes: Some(overrides),
        ..PolicyConfig::default()
    };
    let policy = synthesize(Environment::Production, &config, Some(&builtin_hashes()), None, &audit);
    assert!(policy.contains(&format!("'{valid}'")));
    assert!(!policy.contains("not-base64"));
    assert!(audit.count("trusted_hash_rejected") >= 1);
}

#[test]
fn disabled_nonces_and_hashes_are_omitted() {
    let config = PolicyConfig {
        enable_nonces: false,
        enable_hashes: false,
        ..PolicyConfig::default()
    };
    let policy = policy_for(Environment::Development, &config);
    assert!(!policy.contains("'nonce-"));
    assert!(!policy.contains("'sha256-"));
}

#[test]
fn malformed_nonce_is_dropped() {
    let audit = MemoryAuditSink::new();
    let policy = synthesize(
        Environment::Production,
        &PolicyConfig::default(),
        None,
        Some("abc' 'unsafe-inline"),
        &audit,
    );
    assert!(!policy.contains("'nonce-"));
    assert!(!policy.contains("unsafe-inline"));
    assert_eq!(audit.count("nonce_rejected"), 1);
}

#[test]
fn empty_hash_placeholders_are_skipped_silently() {
    let audit = MemoryAuditSink::new();
    let mut hashes = TrustedHashes::new();
    hashes.insert(
        "broken",
        HashValue::Single(String::new()),
        adaptive_csp_core::fragments::FragmentScope::Shared,
    );
    let policy = synthesize(Environment::Production, &PolicyConfig::default(), Some(&hashes), None, &audit);
    assert!(!policy.contains("''"));
    assert_eq!(audit.count("trusted_hash_rejected"), 0);
}

// ============================================================================
// SECTION: Properties
// ============================================================================

proptest! {
    #[test]
    fn synthesis_is_deterministic(
        profile in profile_strategy(),
        enable_nonces in any::<bool>(),
        enable_hashes in any::<bool>(),
        enable_dev_tools in any::<bool>(),
    ) {
        let config = PolicyConfig {
            enable_nonces,
            enable_hashes,
            enable_dev_tools,
            ..PolicyConfig::default()
        };
        prop_assert_eq!(policy_for(profile, &config), policy_for(profile, &config));
    }

    #[test]
    fn production_never_contains_unsafe_tokens(
        enable_nonces in any::<bool>(),
        enable_hashes in any::<bool>(),
        enable_dev_tools in any::<bool>(),
        report_violations in proptest::option::of(any::<bool>()),
        domain in "[a-z]{1,12}",
    ) {
        let config = PolicyConfig {
            enable_nonces,
            enable_hashes,
            enable_dev_tools,
            report_violations,
            report_uri: Some(format!("https://{domain}.example.com/csp")),
            custom_domains: vec![format!("https://{domain}.example.org")],
            ..PolicyConfig::default()
        };
        let policy = policy_for(Environment::Production, &config);
        prop_assert!(!policy.contains("'unsafe-inline'"));
        prop_assert!(!policy.contains("'unsafe-eval'"));
        prop_assert!(policy.contains("frame-ancestors 'none'"));
    }
}
