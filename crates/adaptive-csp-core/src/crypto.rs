// crates/adaptive-csp-core/src/crypto.rs
// ============================================================================
// Module: Nonce and Hash Primitives
// Description: Per-request nonces and CSP content hashes.
// Purpose: Provide entropy with graceful degradation and deterministic hashes.
// Dependencies: rand, sha2, base64, thiserror
// ============================================================================

//! ## Overview
//! Nonces are 128-bit values rendered as 32 lowercase hex characters. The
//! [`NonceGenerator`] walks an ordered list of entropy tiers and records a
//! warning for each tier that fails; it never errors, because policy
//! synthesis must not block on entropy. Content hashes use the CSP source
//! expression form `sha256-<base64>` and are the one primitive that returns
//! an error to its caller.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::time::SystemTime;
use std::time::UNIX_EPOCH;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use rand::RngCore;
use rand::SeedableRng;
use rand::rngs::OsRng;
use rand::rngs::StdRng;
use serde_json::json;
use sha2::Digest;
use sha2::Sha256;
use thiserror::Error;

use crate::audit::AuditEvent;
use crate::audit::AuditLevel;
use crate::audit::AuditSink;
use crate::audit::StderrAuditSink;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Nonce entropy in bytes (128 bits).
pub const NONCE_BYTES: usize = 16;
/// Rendered nonce length in hex characters.
pub const NONCE_HEX_LEN: usize = NONCE_BYTES * 2;
/// Prefix of hashes produced by [`compute_content_hash`].
pub const SHA256_PREFIX: &str = "sha256-";

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Errors raised when computing content hashes.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum HashError {
    /// Input content was empty.
    #[error("content to hash must not be empty")]
    EmptyContent,
}

/// Failure of a single entropy tier.
#[derive(Debug, Error)]
#[error("entropy source {source_label} failed: {message}")]
pub struct EntropyError {
    /// Label of the failing tier.
    pub source_label: &'static str,
    /// Underlying failure description.
    pub message: String,
}

// ============================================================================
// SECTION: Entropy Sources
// ============================================================================

/// A source of random bytes.
pub trait EntropySource: Send + Sync {
    /// Stable label for audit events.
    fn label(&self) -> &'static str;

    /// Fills `dest` with random bytes.
    ///
    /// # Errors
    ///
    /// Returns [`EntropyError`] when the source is unavailable.
    fn fill(&self, dest: &mut [u8]) -> Result<(), EntropyError>;
}

/// Operating-system CSPRNG.
pub struct OsEntropy;

impl EntropySource for OsEntropy {
    fn label(&self) -> &'static str {
        "os"
    }

    fn fill(&self, dest: &mut [u8]) -> Result<(), EntropyError> {
        OsRng.try_fill_bytes(dest).map_err(|err| EntropyError {
            source_label: self.label(),
            message: err.to_string(),
        })
    }
}

/// Thread-local userspace CSPRNG seeded from the OS.
pub struct ThreadEntropy;

impl EntropySource for ThreadEntropy {
    fn label(&self) -> &'static str {
        "thread"
    }

    fn fill(&self, dest: &mut [u8]) -> Result<(), EntropyError> {
        rand::thread_rng().try_fill_bytes(dest).map_err(|err| EntropyError {
            source_label: self.label(),
            message: err.to_string(),
        })
    }
}

/// Last-resort generator seeded from wall-clock time and a counter.
///
/// Not cryptographically secure; only reached when both secure tiers fail.
#[derive(Default)]
pub struct SeededEntropy {
    /// Per-process counter mixed into each seed.
    counter: AtomicU64,
}

impl EntropySource for SeededEntropy {
    fn label(&self) -> &'static str {
        "seeded"
    }

    fn fill(&self, dest: &mut [u8]) -> Result<(), EntropyError> {
        let nanos = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_nanos();
        let seq = self.counter.fetch_add(1, Ordering::Relaxed);
        #[allow(clippy::cast_possible_truncation, reason = "Seed mixing keeps the low 64 bits.")]
        let seed = (nanos as u64) ^ seq.wrapping_mul(0x9E37_79B9_7F4A_7C15);
        StdRng::seed_from_u64(seed).fill_bytes(dest);
        Ok(())
    }
}

// ============================================================================
// SECTION: Nonce Generator
// ============================================================================

/// Tiered nonce generator.
///
/// # Invariants
/// - `generate` always returns [`NONCE_HEX_LEN`] lowercase hex characters.
pub struct NonceGenerator {
    /// Entropy tiers in preference order.
    tiers: Vec<Box<dyn EntropySource>>,
    /// Source used when every tier fails.
    last_resort: SeededEntropy,
}

impl NonceGenerator {
    /// Creates a generator over explicit tiers.
    #[must_use]
    pub fn with_tiers(tiers: Vec<Box<dyn EntropySource>>) -> Self {
        Self {
            tiers,
            last_resort: SeededEntropy::default(),
        }
    }

    /// Generates a nonce, recording a warning for each degraded tier.
    #[must_use]
    pub fn generate(&self, audit: &dyn AuditSink) -> String {
        let mut bytes = [0u8; NONCE_BYTES];
        for tier in &self.tiers {
            match tier.fill(&mut bytes) {
                Ok(()) => return hex_encode(&bytes),
                Err(err) => audit.record(
                    &AuditEvent::new(AuditLevel::Warn, "entropy_degraded", err.to_string())
                        .with_detail(json!({ "tier": tier.label() })),
                ),
            }
        }
        let _ = self.last_resort.fill(&mut bytes);
        hex_encode(&bytes)
    }
}

impl Default for NonceGenerator {
    fn default() -> Self {
        Self::with_tiers(vec![
            Box::new(OsEntropy),
            Box::new(ThreadEntropy),
            Box::new(SeededEntropy::default()),
        ])
    }
}

/// Generates a nonce with the default tiers, logging degradations to stderr.
#[must_use]
pub fn generate_nonce() -> String {
    NonceGenerator::default().generate(&StderrAuditSink)
}

// ============================================================================
// SECTION: Content Hashing
// ============================================================================

/// Computes the CSP hash source expression for inline content.
///
/// # Errors
///
/// Returns [`HashError::EmptyContent`] when `content` is empty.
pub fn compute_content_hash(content: &str) -> Result<String, HashError> {
    if content.is_empty() {
        return Err(HashError::EmptyContent);
    }
    let digest = Sha256::digest(content.as_bytes());
    Ok(format!("{SHA256_PREFIX}{}", BASE64.encode(digest)))
}

/// Returns true when `token` is a well-formed CSP hash source (unquoted).
#[must_use]
pub fn is_hash_source(token: &str) -> bool {
    let Some((algorithm, encoded)) = token.split_once('-') else {
        return false;
    };
    let expected_len = match algorithm {
        "sha256" => 32,
        "sha384" => 48,
        "sha512" => 64,
        _ => return false,
    };
    BASE64.decode(encoded).is_ok_and(|bytes| bytes.len() == expected_len)
}

/// Returns true when `token` is a rendered nonce.
#[must_use]
pub fn is_nonce(token: &str) -> bool {
    token.len() == NONCE_HEX_LEN && token.bytes().all(|byte| matches!(byte, b'0'..=b'9' | b'a'..=b'f'))
}

/// Encodes bytes as a lowercase hex string.
fn hex_encode(bytes: &[u8]) -> String {
    const HEX: &[u8; 16] = b"0123456789abcdef";
    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        out.push(HEX[(byte >> 4) as usize] as char);
        out.push(HEX[(byte & 0x0f) as usize] as char);
    }
    out
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests;
