// crates/adaptive-csp-core/src/crypto/tests.rs
// ============================================================================
// Module: Nonce and Hash Tests
// Description: Unit tests for content hashing and hash source validation.
// Purpose: Validate known vectors and malformed hash rejection.
// Dependencies: adaptive-csp-core
// ============================================================================

//! ## Overview
//! Unit tests for content hashing and hash source validation.

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
fn known_vector_hash() {
    assert_eq!(
        compute_content_hash("abc"),
        Ok("sha256-ungWv48Bz+pBQUDeXa4iI7ADYaOWF3qctBD/YfIAFa0=".to_string())
    );
}

#[test]
fn empty_content_is_rejected() {
    assert_eq!(compute_content_hash(""), Err(HashError::EmptyContent));
}

#[test]
fn hash_source_validation() {
    assert!(is_hash_source("sha256-ungWv48Bz+pBQUDeXa4iI7ADYaOWF3qctBD/YfIAFa0="));
    assert!(!is_hash_source("sha256-abc"));
    assert!(!is_hash_source("md5-ungWv48Bz+pBQUDeXa4iI7ADYaOWF3qctBD/YfIAFa0="));
    assert!(!is_hash_source("ungWv48Bz"));
}
