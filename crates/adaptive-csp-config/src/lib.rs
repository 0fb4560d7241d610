// crates/adaptive-csp-config/src/lib.rs
// ============================================================================
// Module: Adaptive CSP Config Library
// Description: Canonical config model, environment flags, and validation.
// Purpose: Single source of truth for adaptive-csp.toml semantics.
// Dependencies: adaptive-csp-core, serde, toml
// ============================================================================

//! ## Overview
//! `adaptive-csp-config` defines the configuration model shared by the server
//! and CLI. It loads `adaptive-csp.toml`, layers the `API_PROTECTION_*`
//! feature flags, validates fail-closed, and converts sections into the core
//! crate's [`adaptive_csp_core::PolicyConfig`] and
//! [`adaptive_csp_core::SanitizerConfig`].
//!
//! Security posture: config inputs are untrusted.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod config;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use config::*;

#[cfg(test)]
mod tests;
