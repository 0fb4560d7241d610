// crates/adaptive-csp-core/src/environment/tests.rs
// ============================================================================
// Module: Environment Detection Tests
// Description: Unit tests for host classification and signal parsing.
// Purpose: Validate detection tiers and host heuristics.
// Dependencies: adaptive-csp-core
// ============================================================================

//! ## Overview
//! Unit tests for host classification and signal parsing.

// ============================================================================
// SECTION: Lint Configuration
// ============================================================================

#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    reason = "Test-only assertions use unwrap/expect for clarity."
)]

// ============================================================================
// SECTION: Imports
// ============================================================================

use super::*;

// ============================================================================
// SECTION: Tests
// ============================================================================

#[test]
fn host_classification_strips_ports_and_brackets() {
    assert!(is_development_host("localhost:5173"));
    assert!(is_development_host("[::1]:8080"));
    assert!(is_development_host("::1"));
    assert!(is_development_host("192.168.1.20:3000"));
    assert!(is_development_host("10.0.0.7"));
    assert!(is_development_host("172.20.4.1"));
    assert!(is_development_host("studio.dev"));
    assert!(is_development_host("printer.local."));
    assert!(!is_development_host("app.example.com"));
    assert!(!is_development_host("8.8.8.8"));
    assert!(!is_development_host("172.32.0.1"));
    assert!(!is_development_host(""));
}

#[test]
fn environment_parses_aliases() {
    assert_eq!("prod".parse::<Environment>().ok(), Some(Environment::Production));
    assert_eq!("Development".parse::<Environment>().ok(), Some(Environment::Development));
    assert!("staging".parse::<Environment>().is_err());
}

#[test]
fn node_env_requires_exact_spelling() {
    let signals = StaticSignals {
        node_env: Some("develop".to_string()),
        ..StaticSignals::default()
    };
    assert_eq!(detect_environment(&signals), Environment::Production);
}
