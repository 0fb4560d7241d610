// crates/adaptive-csp-core/src/hash_cache.rs
// ============================================================================
// Module: Trusted-Hash Cache
// Description: Memoized CSP hashes for registered inline fragments.
// Purpose: Avoid rehashing inline content on every synthesis, with TTL expiry.
// Dependencies: tokio, serde
// ============================================================================

//! ## Overview
//! The cache hashes every registered [`InlineFragment`] once and serves the
//! resulting [`TrustedHashes`] until the TTL elapses. Expiry clears the whole
//! mapping; it is never partially invalidated. Concurrent refreshes are
//! serialized behind an async gate so overlapping callers share a single
//! computation instead of each rehashing.
//! Invariants:
//! - A fragment whose hash cannot be computed keeps its key with an empty
//!   placeholder value.
//! - Reads never fail; an empty mapping is a valid result.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;
use std::time::Instant;

use serde::Deserialize;
use serde::Serialize;
use serde_json::json;

use crate::audit::AuditEvent;
use crate::audit::AuditLevel;
use crate::audit::AuditSink;
use crate::clock::Clock;
use crate::crypto::compute_content_hash;
use crate::fragments::BUILTIN_FRAGMENTS;
use crate::fragments::FragmentScope;
use crate::fragments::InlineFragment;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Lifetime of a computed hash mapping.
pub const CACHE_TTL: Duration = Duration::from_secs(5 * 60);

// ============================================================================
// SECTION: Hash Mapping
// ============================================================================

/// One hash or an aggregate list of hashes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum HashValue {
    /// Hash of a single fragment.
    Single(String),
    /// Hashes of a fragment group.
    Group(Vec<String>),
}

impl HashValue {
    /// Returns the contained hashes as a slice.
    #[must_use]
    pub fn as_slice(&self) -> &[String] {
        match self {
            Self::Single(hash) => std::slice::from_ref(hash),
            Self::Group(hashes) => hashes,
        }
    }
}

/// Trusted hash mapping keyed by logical fragment name.
///
/// # Invariants
/// - Keys listed in `development_only` also exist in `entries`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrustedHashes {
    /// Hashes keyed by fragment or group name.
    entries: BTreeMap<String, HashValue>,
    /// Keys excluded from the curated production subset.
    development_only: BTreeSet<String>,
}

impl TrustedHashes {
    /// Creates an empty mapping.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces an entry.
    pub fn insert(&mut self, key: impl Into<String>, value: HashValue, scope: FragmentScope) {
        let key = key.into();
        match scope {
            FragmentScope::Shared => {
                self.development_only.remove(&key);
            }
            FragmentScope::DevelopmentTooling => {
                self.development_only.insert(key.clone());
            }
        }
        self.entries.insert(key, value);
    }

    /// Returns the entry for `key`.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&HashValue> {
        self.entries.get(key)
    }

    /// Returns true when `key` holds development tooling hashes.
    #[must_use]
    pub fn is_development_only(&self, key: &str) -> bool {
        self.development_only.contains(key)
    }

    /// Number of keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true when no keys are present.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterates keys and values in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &HashValue)> {
        self.entries.iter().map(|(key, value)| (key.as_str(), value))
    }

    /// Every hash, including development tooling, in key order.
    pub fn all_hashes(&self) -> impl Iterator<Item = &str> {
        self.entries.values().flat_map(HashValue::as_slice).map(String::as_str)
    }

    /// Hashes safe for production (development tooling excluded).
    pub fn curated_hashes(&self) -> impl Iterator<Item = &str> {
        self.entries
            .iter()
            .filter(|(key, _)| !self.development_only.contains(key.as_str()))
            .flat_map(|(_, value)| value.as_slice())
            .map(String::as_str)
    }

    /// Returns a copy with caller-supplied entries layered on top.
    ///
    /// Overrides are treated as deliberately curated and shared.
    #[must_use]
    pub fn merged_with(&self, overrides: &BTreeMap<String, HashValue>) -> Self {
        let mut merged = self.clone();
        for (key, value) in overrides {
            merged.insert(key.clone(), value.clone(), FragmentScope::Shared);
        }
        merged
    }
}

/// Hashes every fragment, grouping related fragments under their group key.
#[must_use]
pub fn compute_trusted_hashes(fragments: &[InlineFragment], audit: &dyn AuditSink) -> TrustedHashes {
    let mut singles: Vec<(&str, String, FragmentScope)> = Vec::new();
    let mut groups: BTreeMap<&str, (Vec<String>, FragmentScope)> = BTreeMap::new();
    for fragment in fragments {
        let hash = compute_content_hash(fragment.content).unwrap_or_else(|err| {
            audit.record(
                &AuditEvent::new(AuditLevel::Warn, "hash_fragment_failed", err.to_string())
                    .with_detail(json!({ "fragment": fragment.key })),
            );
            String::new()
        });
        match fragment.group {
            None => singles.push((fragment.key, hash, fragment.scope)),
            Some(group) => {
                let entry = groups.entry(group).or_insert_with(|| (Vec::new(), fragment.scope));
                entry.0.push(hash);
                if fragment.scope == FragmentScope::Shared {
                    entry.1 = FragmentScope::Shared;
                }
            }
        }
    }
    let mut hashes = TrustedHashes::new();
    for (key, hash, scope) in singles {
        hashes.insert(key, HashValue::Single(hash), scope);
    }
    for (key, (members, scope)) in groups {
        hashes.insert(key, HashValue::Group(members), scope);
    }
    hashes
}

// ============================================================================
// SECTION: Cache
// ============================================================================

/// Cached mapping and the instant it was computed.
#[derive(Default)]
struct CacheState {
    /// Current mapping, if populated.
    hashes: Option<Arc<TrustedHashes>>,
    /// Instant the mapping was computed.
    computed_at: Option<Instant>,
}

/// TTL cache over the trusted hash mapping.
pub struct TrustedHashCache {
    /// Cached state; held only for short synchronous sections.
    state: Mutex<CacheState>,
    /// Serializes refreshes so concurrent callers share one computation.
    refresh_gate: tokio::sync::Mutex<()>,
    /// Fragments hashed on refresh.
    fragments: Vec<InlineFragment>,
    /// Mapping lifetime.
    ttl: Duration,
    /// Time source for expiry.
    clock: Arc<dyn Clock>,
    /// Sink for refresh and failure events.
    audit: Arc<dyn AuditSink>,
}

impl TrustedHashCache {
    /// Creates a cache over the built-in fragments with the default TTL.
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>, audit: Arc<dyn AuditSink>) -> Self {
        Self {
            state: Mutex::new(CacheState::default()),
            refresh_gate: tokio::sync::Mutex::new(()),
            fragments: BUILTIN_FRAGMENTS.to_vec(),
            ttl: CACHE_TTL,
            clock,
            audit,
        }
    }

    /// Returns a copy using a different TTL.
    #[must_use]
    pub const fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Returns a copy hashing a different fragment registry.
    #[must_use]
    pub fn with_fragments(mut self, fragments: Vec<InlineFragment>) -> Self {
        self.fragments = fragments;
        self
    }

    /// Returns the trusted mapping, recomputing it when stale.
    pub async fn get_trusted_hashes(&self) -> Arc<TrustedHashes> {
        if let Some(hashes) = self.cached() {
            return hashes;
        }
        let _gate = self.refresh_gate.lock().await;
        if let Some(hashes) = self.cached() {
            return hashes;
        }
        let hashes = Arc::new(compute_trusted_hashes(&self.fragments, self.audit.as_ref()));
        if let Ok(mut state) = self.state.lock() {
            state.hashes = Some(Arc::clone(&hashes));
            state.computed_at = Some(self.clock.now());
        }
        self.audit.record(
            &AuditEvent::new(AuditLevel::Debug, "hash_cache_refreshed", "trusted hashes recomputed")
                .with_detail(json!({ "keys": hashes.len() })),
        );
        hashes
    }

    /// Returns the cached mapping when still valid, without recomputing.
    ///
    /// A stale mapping is cleared as a side effect.
    #[must_use]
    pub fn cached(&self) -> Option<Arc<TrustedHashes>> {
        let now = self.clock.now();
        let mut state = self.state.lock().ok()?;
        let fresh = state.computed_at.is_some_and(|at| now.duration_since(at) < self.ttl);
        if !fresh {
            *state = CacheState::default();
            return None;
        }
        state.hashes.clone()
    }

    /// Drops the cached mapping.
    pub fn clear_cache(&self) {
        if let Ok(mut state) = self.state.lock() {
            *state = CacheState::default();
        }
    }

    /// Returns true while a mapping is cached and younger than the TTL.
    #[must_use]
    pub fn is_cache_valid(&self) -> bool {
        self.cached().is_some()
    }

    /// Age of the cached mapping, if any.
    #[must_use]
    pub fn cache_age(&self) -> Option<Duration> {
        let now = self.clock.now();
        let state = self.state.lock().ok()?;
        state.computed_at.map(|at| now.duration_since(at))
    }

    /// Age of the cached mapping in milliseconds, if any.
    #[must_use]
    pub fn cache_age_ms(&self) -> Option<u64> {
        self.cache_age().map(|age| u64::try_from(age.as_millis()).unwrap_or(u64::MAX))
    }
}
