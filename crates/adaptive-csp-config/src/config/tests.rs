// crates/adaptive-csp-config/src/config/tests.rs
// ============================================================================
// Module: Config Unit Tests
// Description: Unit tests for flag parsing, path limits, and section defaults.
// Purpose: Validate private helpers and default values.
// Dependencies: adaptive-csp-config
// ============================================================================

//! ## Overview
//! Unit tests for private config helpers.

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
fn flag_parsing_accepts_common_spellings() {
    for value in ["1", "true", "TRUE", " yes ", "on"] {
        assert!(parse_flag("FLAG", value).unwrap());
    }
    for value in ["0", "false", "No", "off"] {
        assert!(!parse_flag("FLAG", value).unwrap());
    }
    let err = parse_flag("FLAG", "maybe").unwrap_err();
    assert!(err.to_string().contains("FLAG must be a boolean"));
}

#[test]
fn explicit_path_is_never_implicit() {
    let (path, implicit) = resolve_path(Some(Path::new("custom.toml"))).unwrap();
    assert_eq!(path, PathBuf::from("custom.toml"));
    assert!(!implicit);
}

#[test]
fn path_limits_are_enforced() {
    let long_component = "a".repeat(MAX_PATH_COMPONENT_LENGTH + 1);
    assert!(validate_path(Path::new(&long_component)).is_err());
    let long_path = "a/".repeat(MAX_TOTAL_PATH_LENGTH);
    assert!(validate_path(Path::new(&long_path)).is_err());
    assert!(validate_path(Path::new("conf/adaptive-csp.toml")).is_ok());
}

#[test]
fn defaults_match_core_defaults() {
    let config = AdaptiveCspConfig::default();
    assert_eq!(config.policy_config(), PolicyConfig::default());
    assert_eq!(config.sanitizer_config(), SanitizerConfig::default());
    assert!(config.validate().is_ok());
}

#[test]
fn origin_list_cap_is_enforced() {
    let origins: Vec<String> = (0..=MAX_BACKEND_ORIGINS).map(|index| format!("https://api{index}.example.com")).collect();
    let err = validate_origins("csp.backend_origins", &origins, MAX_BACKEND_ORIGINS).unwrap_err();
    assert!(err.to_string().contains("exceeds"));
}
