// crates/adaptive-csp-core/src/breaker.rs
// ============================================================================
// Module: Circuit Breaker
// Description: Pure state machine guarding header sanitization.
// Purpose: Fail open after repeated structural failures, then probe recovery.
// Dependencies: none
// ============================================================================

//! ## Overview
//! The breaker is a plain value with transition functions that return the
//! next state plus what happened. Owners keep it behind their own lock and
//! decide how to log transitions.
//! Invariants:
//! - `Closed` counts only consecutive failures; any success resets the count.
//! - `HalfOpen` admits exactly one trial call at a time.
//! - A failed trial reopens the circuit with a fresh cool-down.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::time::Duration;
use std::time::Instant;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Consecutive failures that open the circuit.
pub const DEFAULT_FAILURE_THRESHOLD: u32 = 5;
/// Time the circuit stays open before a trial call.
pub const DEFAULT_COOLDOWN: Duration = Duration::from_secs(30);

// ============================================================================
// SECTION: Types
// ============================================================================

/// Breaker tuning.
///
/// # Invariants
/// - `failure_threshold >= 1`; zero is treated as one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BreakerConfig {
    /// Consecutive failures that open the circuit.
    pub failure_threshold: u32,
    /// Open duration before a half-open trial.
    pub cooldown: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: DEFAULT_FAILURE_THRESHOLD,
            cooldown: DEFAULT_COOLDOWN,
        }
    }
}

/// Circuit state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    /// Calls are processed normally.
    Closed {
        /// Failures since the last success.
        consecutive_failures: u32,
    },
    /// Calls bypass processing until the cool-down elapses.
    Open {
        /// Instant the circuit opened.
        since: Instant,
    },
    /// One trial call decides whether to close or reopen.
    HalfOpen {
        /// True while the trial call is running.
        trial_in_flight: bool,
    },
}

/// Decision for an incoming call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Process normally.
    Allow,
    /// Process as the half-open trial.
    Trial,
    /// Skip processing.
    Bypass,
}

/// Notable state change produced by a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Nothing notable.
    Unchanged,
    /// Closed circuit opened after reaching the threshold.
    Opened,
    /// Failed trial reopened the circuit.
    Reopened,
    /// Successful trial closed the circuit.
    Closed,
}

// ============================================================================
// SECTION: Transitions
// ============================================================================

impl Default for BreakerState {
    fn default() -> Self {
        Self::closed()
    }
}

impl BreakerState {
    /// Closed state with no recorded failures.
    #[must_use]
    pub const fn closed() -> Self {
        Self::Closed {
            consecutive_failures: 0,
        }
    }

    /// Returns true when calls are currently bypassed.
    #[must_use]
    pub const fn is_open(&self) -> bool {
        matches!(self, Self::Open { .. })
    }

    /// Decides how to treat a call arriving at `now`.
    #[must_use]
    pub fn admit(self, now: Instant, config: &BreakerConfig) -> (Self, Admission) {
        match self {
            Self::Closed { .. } => (self, Admission::Allow),
            Self::Open { since } => {
                if now.saturating_duration_since(since) >= config.cooldown {
                    (
                        Self::HalfOpen {
                            trial_in_flight: true,
                        },
                        Admission::Trial,
                    )
                } else {
                    (self, Admission::Bypass)
                }
            }
            Self::HalfOpen {
                trial_in_flight: true,
            } => (self, Admission::Bypass),
            Self::HalfOpen {
                trial_in_flight: false,
            } => (
                Self::HalfOpen {
                    trial_in_flight: true,
                },
                Admission::Trial,
            ),
        }
    }

    /// Records a successful call.
    #[must_use]
    pub const fn on_success(self) -> (Self, Transition) {
        match self {
            Self::Closed { .. } => (Self::closed(), Transition::Unchanged),
            Self::HalfOpen { .. } => (Self::closed(), Transition::Closed),
            Self::Open { .. } => (self, Transition::Unchanged),
        }
    }

    /// Records a structural failure at `now`.
    #[must_use]
    pub fn on_failure(self, now: Instant, config: &BreakerConfig) -> (Self, Transition) {
        match self {
            Self::Closed {
                consecutive_failures,
            } => {
                let failures = consecutive_failures.saturating_add(1);
                if failures >= config.failure_threshold.max(1) {
                    (Self::Open { since: now }, Transition::Opened)
                } else {
                    (
                        Self::Closed {
                            consecutive_failures: failures,
                        },
                        Transition::Unchanged,
                    )
                }
            }
            Self::HalfOpen { .. } => (Self::Open { since: now }, Transition::Reopened),
            Self::Open { .. } => (self, Transition::Unchanged),
        }
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================
