// crates/adaptive-csp-core/src/environment.rs
// ============================================================================
// Module: Environment Detection
// Description: Deployment environment classification from runtime signals.
// Purpose: Select the policy profile without ever failing open to development.
// Dependencies: serde, thiserror
// ============================================================================

//! ## Overview
//! Detection walks a fixed precedence cascade of signals (build flags, the
//! `NODE_ENV` process variable, the serving host, the full URL) and returns
//! the first match. Any signal that cannot be read is treated as absent.
//! When nothing matches the result is [`Environment::Production`], the most
//! restrictive profile.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::env::VarError;
use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;

use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Process environment variable consulted at precedence tier 4.
pub const NODE_ENV_VAR: &str = "NODE_ENV";

/// Build-time mode baked in at compile time, if any.
const BUILD_MODE: Option<&str> = option_env!("ADAPTIVE_CSP_BUILD_MODE");

// ============================================================================
// SECTION: Environment
// ============================================================================

/// Deployment environment and policy profile selector.
///
/// # Invariants
/// - Variants are stable for configuration and audit labeling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Environment {
    /// Local development with hot-reload tooling.
    Development,
    /// Deployed production (most restrictive).
    Production,
    /// Automated test harness.
    Test,
}

impl Environment {
    /// Returns a stable label for the environment.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Development => "development",
            Self::Production => "production",
            Self::Test => "test",
        }
    }

    /// Parses the exact `NODE_ENV` spellings.
    fn from_node_env(value: &str) -> Option<Self> {
        match value.trim() {
            "development" => Some(Self::Development),
            "production" => Some(Self::Production),
            "test" => Some(Self::Test),
            _ => None,
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Environment {
    type Err = SignalError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "development" | "dev" => Ok(Self::Development),
            "production" | "prod" => Ok(Self::Production),
            "test" => Ok(Self::Test),
            other => Err(SignalError::Unrecognized(other.to_string())),
        }
    }
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Errors raised while reading a detection signal.
#[derive(Debug, Error)]
pub enum SignalError {
    /// The signal exists but cannot be read.
    #[error("signal unavailable: {0}")]
    Unavailable(String),
    /// The signal value is not a known environment.
    #[error("unrecognized environment: {0}")]
    Unrecognized(String),
}

// ============================================================================
// SECTION: Signal Sources
// ============================================================================

/// Build-time environment flags.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildFlags {
    /// Explicit development flag.
    pub dev: Option<bool>,
    /// Explicit production flag.
    pub prod: Option<bool>,
    /// Free-form build mode label.
    pub mode: Option<String>,
}

/// Read-only access to ambient runtime signals.
///
/// Accessors return `Err` when inspection itself fails; detection treats that
/// the same as an absent signal.
pub trait SignalSource: Send + Sync {
    /// Returns build-time flags when available.
    ///
    /// # Errors
    ///
    /// Returns [`SignalError`] when the flags cannot be inspected.
    fn build_flags(&self) -> Result<Option<BuildFlags>, SignalError>;

    /// Returns a process environment variable.
    ///
    /// # Errors
    ///
    /// Returns [`SignalError`] when the variable cannot be read.
    fn process_env(&self, key: &str) -> Result<Option<String>, SignalError>;

    /// Returns the host serving the document (may include a port).
    ///
    /// # Errors
    ///
    /// Returns [`SignalError`] when the host cannot be inspected.
    fn host(&self) -> Result<Option<String>, SignalError>;

    /// Returns the full document URL.
    ///
    /// # Errors
    ///
    /// Returns [`SignalError`] when the URL cannot be inspected.
    fn url(&self) -> Result<Option<String>, SignalError>;
}

/// Signals read from the running process.
#[derive(Debug, Clone, Default)]
pub struct ProcessSignals {
    /// Host supplied by the embedding application.
    host: Option<String>,
    /// URL supplied by the embedding application.
    url: Option<String>,
}

impl ProcessSignals {
    /// Creates process signals with no host or URL.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            host: None,
            url: None,
        }
    }

    /// Returns a copy with the serving host set.
    #[must_use]
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    /// Returns a copy with the document URL set.
    #[must_use]
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }
}

impl SignalSource for ProcessSignals {
    fn build_flags(&self) -> Result<Option<BuildFlags>, SignalError> {
        Ok(BUILD_MODE.map(|mode| match mode {
            "development" => BuildFlags {
                dev: Some(true),
                ..BuildFlags::default()
            },
            "production" => BuildFlags {
                prod: Some(true),
                ..BuildFlags::default()
            },
            other => BuildFlags {
                mode: Some(other.to_string()),
                ..BuildFlags::default()
            },
        }))
    }

    fn process_env(&self, key: &str) -> Result<Option<String>, SignalError> {
        match std::env::var(key) {
            Ok(value) => Ok(Some(value)),
            Err(VarError::NotPresent) => Ok(None),
            Err(VarError::NotUnicode(_)) => {
                Err(SignalError::Unavailable(format!("{key} is not valid unicode")))
            }
        }
    }

    fn host(&self) -> Result<Option<String>, SignalError> {
        Ok(self.host.clone())
    }

    fn url(&self) -> Result<Option<String>, SignalError> {
        Ok(self.url.clone())
    }
}

/// Fixed signal values.
#[derive(Debug, Clone, Default)]
pub struct StaticSignals {
    /// Build-time flags.
    pub build_flags: Option<BuildFlags>,
    /// Value reported for `NODE_ENV`.
    pub node_env: Option<String>,
    /// Serving host.
    pub host: Option<String>,
    /// Document URL.
    pub url: Option<String>,
}

impl StaticSignals {
    /// Creates signals carrying only a serving host.
    #[must_use]
    pub fn for_host(host: impl Into<String>) -> Self {
        Self {
            host: Some(host.into()),
            ..Self::default()
        }
    }
}

impl SignalSource for StaticSignals {
    fn build_flags(&self) -> Result<Option<BuildFlags>, SignalError> {
        Ok(self.build_flags.clone())
    }

    fn process_env(&self, key: &str) -> Result<Option<String>, SignalError> {
        if key == NODE_ENV_VAR {
            return Ok(self.node_env.clone());
        }
        Ok(None)
    }

    fn host(&self) -> Result<Option<String>, SignalError> {
        Ok(self.host.clone())
    }

    fn url(&self) -> Result<Option<String>, SignalError> {
        Ok(self.url.clone())
    }
}

// ============================================================================
// SECTION: Detection
// ============================================================================

/// Classifies the runtime environment; first matching tier wins.
#[must_use]
pub fn detect_environment(signals: &dyn SignalSource) -> Environment {
    if let Ok(Some(flags)) = signals.build_flags() {
        if flags.dev == Some(true) {
            return Environment::Development;
        }
        if flags.prod == Some(true) {
            return Environment::Production;
        }
        if flags.mode.as_deref() == Some("test") {
            return Environment::Test;
        }
    }
    if let Ok(Some(value)) = signals.process_env(NODE_ENV_VAR)
        && let Some(environment) = Environment::from_node_env(&value)
    {
        return environment;
    }
    if let Ok(Some(host)) = signals.host()
        && is_development_host(&host)
    {
        return Environment::Development;
    }
    if let Ok(Some(url)) = signals.url()
        && url_indicates_development(&url)
    {
        return Environment::Development;
    }
    Environment::Production
}

/// Returns true for localhost, loopback, private LAN, `.dev`, and `.local` hosts.
#[must_use]
pub fn is_development_host(host: &str) -> bool {
    let host = strip_port(host.trim()).trim_end_matches('.').to_ascii_lowercase();
    if host.is_empty() {
        return false;
    }
    if host == "localhost" || host.ends_with(".localhost") {
        return true;
    }
    if let Ok(ip) = host.parse::<IpAddr>() {
        return is_local_address(&ip);
    }
    host.ends_with(".dev") || host.ends_with(".local")
}

/// Removes a trailing port and IPv6 brackets from a host label.
fn strip_port(host: &str) -> &str {
    if let Some(rest) = host.strip_prefix('[') {
        return rest.split(']').next().unwrap_or(rest);
    }
    match host.split_once(':') {
        Some((name, port)) if !port.contains(':') => name,
        _ => host,
    }
}

/// Returns true for loopback and private-range addresses.
const fn is_local_address(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(addr) => addr.is_loopback() || addr.is_private() || addr.is_link_local(),
        IpAddr::V6(addr) => match addr.to_ipv4_mapped() {
            Some(mapped) => mapped.is_loopback() || mapped.is_private(),
            None => addr.is_loopback() || addr.is_unique_local(),
        },
    }
}

/// Substring heuristic applied to the full document URL.
fn url_indicates_development(url: &str) -> bool {
    let url = url.to_ascii_lowercase();
    url.contains("localhost") || url.contains("127.0.0.1") || url.contains(".dev")
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests;
