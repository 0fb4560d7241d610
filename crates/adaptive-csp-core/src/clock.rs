// crates/adaptive-csp-core/src/clock.rs
// ============================================================================
// Module: Clock
// Description: Injectable monotonic time source for TTL and cool-down checks.
// Purpose: Keep cache expiry and breaker windows deterministic under test.
// Dependencies: std
// ============================================================================

//! ## Overview
//! Cache staleness and circuit-breaker cool-downs are measured against a
//! [`Clock`] supplied by the host. Production code uses [`SystemClock`]; tests
//! advance a [`ManualClock`] explicitly instead of sleeping.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::sync::Mutex;
use std::time::Duration;
use std::time::Instant;

// ============================================================================
// SECTION: Trait
// ============================================================================

/// Monotonic time source.
pub trait Clock: Send + Sync {
    /// Returns the current monotonic instant.
    fn now(&self) -> Instant;
}

/// Clock backed by [`Instant::now`].
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

// ============================================================================
// SECTION: Manual Clock
// ============================================================================

/// Clock that only moves when advanced.
///
/// # Invariants
/// - `now()` never decreases.
#[derive(Debug)]
pub struct ManualClock {
    /// Instant captured at construction.
    base: Instant,
    /// Total time advanced since construction.
    offset: Mutex<Duration>,
}

impl ManualClock {
    /// Creates a manual clock anchored at the current instant.
    #[must_use]
    pub fn new() -> Self {
        Self {
            base: Instant::now(),
            offset: Mutex::new(Duration::ZERO),
        }
    }

    /// Moves the clock forward by `delta`.
    pub fn advance(&self, delta: Duration) {
        if let Ok(mut offset) = self.offset.lock() {
            *offset += delta;
        }
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        let offset = self.offset.lock().map_or(Duration::ZERO, |offset| *offset);
        self.base + offset
    }
}
