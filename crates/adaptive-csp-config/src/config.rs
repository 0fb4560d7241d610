// crates/adaptive-csp-config/src/config.rs
// ============================================================================
// Module: Adaptive CSP Configuration
// Description: Configuration loading, environment flags, and validation.
// Purpose: Provide strict, fail-closed config parsing with hard limits.
// Dependencies: adaptive-csp-core, serde, toml
// ============================================================================

//! ## Overview
//! Configuration is loaded from a TOML file with strict size and path limits,
//! layered with the `API_PROTECTION_*` environment flags, and validated as a
//! whole. Validated sections convert into the core crate's option types.
//! Security posture: config inputs are untrusted; invalid values fail the load
//! rather than silently weakening the policy.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::net::SocketAddr;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use adaptive_csp_core::AuditSink;
use adaptive_csp_core::BreakerConfig;
use adaptive_csp_core::DevelopmentMode;
use adaptive_csp_core::Environment;
use adaptive_csp_core::FileAuditSink;
use adaptive_csp_core::HashValue;
use adaptive_csp_core::NoopAuditSink;
use adaptive_csp_core::PolicyConfig;
use adaptive_csp_core::SanitizerConfig;
use adaptive_csp_core::StderrAuditSink;
use adaptive_csp_core::crypto::is_hash_source;
use adaptive_csp_core::policy::DEFAULT_BACKEND_ORIGINS;
use adaptive_csp_core::policy::normalize_origin;
use adaptive_csp_core::policy::validated_report_uri;
use serde::Deserialize;
use thiserror::Error;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Default configuration filename when no path is specified.
pub const DEFAULT_CONFIG_NAME: &str = "adaptive-csp.toml";
/// Environment variable overriding the config path.
pub const CONFIG_ENV_VAR: &str = "ADAPTIVE_CSP_CONFIG";
/// Environment flag toggling header sanitization.
pub const ENV_PROTECTION_ENABLED: &str = "API_PROTECTION_ENABLED";
/// Environment flag setting the rollout version label.
pub const ENV_PROTECTION_VERSION: &str = "API_PROTECTION_VERSION";
/// Environment flag toggling strict header validation.
pub const ENV_PROTECTION_STRICT_MODE: &str = "API_PROTECTION_STRICT_MODE";
/// Maximum config file size in bytes.
pub(crate) const MAX_CONFIG_FILE_SIZE: usize = 1024 * 1024;
/// Maximum length of a single path component.
pub(crate) const MAX_PATH_COMPONENT_LENGTH: usize = 255;
/// Maximum total path length.
pub(crate) const MAX_TOTAL_PATH_LENGTH: usize = 4096;
/// Maximum number of custom `connect-src` domains.
pub(crate) const MAX_CUSTOM_DOMAINS: usize = 64;
/// Maximum number of backend origins.
pub(crate) const MAX_BACKEND_ORIGINS: usize = 16;
/// Maximum number of caller-supplied trusted hash entries.
pub(crate) const MAX_TRUSTED_HASHES: usize = 128;
/// Maximum rollout version label length.
pub(crate) const MAX_VERSION_LENGTH: usize = 32;
/// Upper bound on the breaker failure threshold.
pub(crate) const MAX_FAILURE_THRESHOLD: u32 = 1_000;
/// Lower bound on the breaker cool-down.
pub(crate) const MIN_COOLDOWN_MS: u64 = 1_000;
/// Upper bound on the breaker cool-down.
pub(crate) const MAX_COOLDOWN_MS: u64 = 600_000;
/// Default maximum request body size for the report endpoint.
pub(crate) const DEFAULT_MAX_BODY_BYTES: usize = 64 * 1024;
/// Upper bound on the report endpoint body size.
pub(crate) const MAX_BODY_BYTES_LIMIT: usize = 1024 * 1024;
/// Default bind address for the reference server.
pub(crate) const DEFAULT_BIND: &str = "127.0.0.1:8080";

// ============================================================================
// SECTION: Configuration Types
// ============================================================================

/// Adaptive CSP configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AdaptiveCspConfig {
    /// Policy synthesis options.
    #[serde(default)]
    pub csp: CspSection,
    /// Outbound header protection flags.
    #[serde(default)]
    pub api_protection: ApiProtectionSection,
    /// Reference server settings.
    #[serde(default)]
    pub server: ServerSection,
    /// Audit sink selection.
    #[serde(default)]
    pub audit: AuditSection,
}

/// `[csp]` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CspSection {
    /// Explicit profile override; detection is used when absent.
    #[serde(default)]
    pub environment: Option<Environment>,
    /// Allow dev-server loopback origins.
    #[serde(default = "default_true")]
    pub enable_dev_tools: bool,
    /// Emit nonce sources.
    #[serde(default = "default_true")]
    pub enable_nonces: bool,
    /// Emit trusted hash sources.
    #[serde(default = "default_true")]
    pub enable_hashes: bool,
    /// Emit reporting directives; profile default when absent.
    #[serde(default)]
    pub report_violations: Option<bool>,
    /// Violation report endpoint.
    #[serde(default)]
    pub report_uri: Option<String>,
    /// Additional `connect-src` origins.
    #[serde(default)]
    pub custom_domains: Vec<String>,
    /// Hosted backend origins.
    #[serde(default = "default_backend_origins")]
    pub backend_origins: Vec<String>,
    /// Extra trusted hashes keyed by fragment name.
    #[serde(default)]
    pub trusted_hashes: BTreeMap<String, HashValue>,
    /// Informational development posture.
    #[serde(default)]
    pub development_mode: DevelopmentMode,
    /// Send `Content-Security-Policy-Report-Only` instead of enforcing.
    #[serde(default)]
    pub report_only: bool,
}

impl Default for CspSection {
    fn default() -> Self {
        Self {
            environment: None,
            enable_dev_tools: true,
            enable_nonces: true,
            enable_hashes: true,
            report_violations: None,
            report_uri: None,
            custom_domains: Vec::new(),
            backend_origins: default_backend_origins(),
            trusted_hashes: BTreeMap::new(),
            development_mode: DevelopmentMode::default(),
            report_only: false,
        }
    }
}

impl CspSection {
    /// Validates origins, the report endpoint, and trusted hashes.
    fn validate(&self) -> Result<(), ConfigError> {
        validate_origins("csp.custom_domains", &self.custom_domains, MAX_CUSTOM_DOMAINS)?;
        validate_origins("csp.backend_origins", &self.backend_origins, MAX_BACKEND_ORIGINS)?;
        if let Some(uri) = &self.report_uri {
            let probe = PolicyConfig {
                report_uri: Some(uri.clone()),
                ..PolicyConfig::default()
            };
            validated_report_uri(&probe).map_err(|err| ConfigError::Invalid(format!("csp.report_uri: {err}")))?;
        }
        if self.trusted_hashes.len() > MAX_TRUSTED_HASHES {
            return Err(ConfigError::Invalid(format!(
                "csp.trusted_hashes exceeds {MAX_TRUSTED_HASHES} entries"
            )));
        }
        for (key, value) in &self.trusted_hashes {
            if value.as_slice().iter().any(|hash| !is_hash_source(hash)) {
                return Err(ConfigError::Invalid(format!("csp.trusted_hashes.{key} is not a hash source")));
            }
        }
        Ok(())
    }
}

/// `[api_protection]` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ApiProtectionSection {
    /// Global switch for header sanitization.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Informational rollout version label.
    #[serde(default = "default_version")]
    pub version: String,
    /// Raise on invalid headers instead of dropping them.
    #[serde(default)]
    pub strict_mode: bool,
    /// Consecutive structural failures that open the breaker.
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    /// Breaker cool-down in milliseconds.
    #[serde(default = "default_cooldown_ms")]
    pub cooldown_ms: u64,
}

impl Default for ApiProtectionSection {
    fn default() -> Self {
        Self {
            enabled: true,
            version: default_version(),
            strict_mode: false,
            failure_threshold: default_failure_threshold(),
            cooldown_ms: default_cooldown_ms(),
        }
    }
}

impl ApiProtectionSection {
    /// Validates breaker bounds and the version label.
    fn validate(&self) -> Result<(), ConfigError> {
        let version = self.version.trim();
        if version.is_empty() || version.len() > MAX_VERSION_LENGTH {
            return Err(ConfigError::Invalid(format!(
                "api_protection.version must be 1..={MAX_VERSION_LENGTH} characters"
            )));
        }
        if !(1..=MAX_FAILURE_THRESHOLD).contains(&self.failure_threshold) {
            return Err(ConfigError::Invalid(format!(
                "api_protection.failure_threshold must be between 1 and {MAX_FAILURE_THRESHOLD}"
            )));
        }
        if !(MIN_COOLDOWN_MS..=MAX_COOLDOWN_MS).contains(&self.cooldown_ms) {
            return Err(ConfigError::Invalid(format!(
                "api_protection.cooldown_ms must be between {MIN_COOLDOWN_MS} and {MAX_COOLDOWN_MS}"
            )));
        }
        Ok(())
    }
}

/// `[server]` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerSection {
    /// Bind address.
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Maximum violation report body size in bytes.
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
    /// HTML document served at `/` with the policy injected.
    #[serde(default)]
    pub index_html: Option<PathBuf>,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            max_body_bytes: default_max_body_bytes(),
            index_html: None,
        }
    }
}

impl ServerSection {
    /// Validates the bind address and body limit.
    fn validate(&self) -> Result<(), ConfigError> {
        self.bind_addr()?;
        if self.max_body_bytes == 0 || self.max_body_bytes > MAX_BODY_BYTES_LIMIT {
            return Err(ConfigError::Invalid(format!(
                "server.max_body_bytes must be between 1 and {MAX_BODY_BYTES_LIMIT}"
            )));
        }
        if let Some(path) = &self.index_html {
            validate_path(path).map_err(|err| ConfigError::Invalid(format!("server.index_html: {err}")))?;
        }
        Ok(())
    }

    /// Parses the bind address.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] when the address does not parse.
    pub fn bind_addr(&self) -> Result<SocketAddr, ConfigError> {
        self.bind
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid(format!("server.bind is not a socket address: {}", self.bind)))
    }
}

/// Audit sink selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditSinkKind {
    /// JSON lines on stderr.
    #[default]
    Stderr,
    /// JSON lines appended to `audit.path`.
    File,
    /// Discard events.
    None,
}

/// `[audit]` section.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AuditSection {
    /// Sink kind.
    #[serde(default)]
    pub sink: AuditSinkKind,
    /// Log path for the file sink.
    #[serde(default)]
    pub path: Option<PathBuf>,
}

impl AuditSection {
    /// Validates that the file sink has a usable path.
    fn validate(&self) -> Result<(), ConfigError> {
        match (self.sink, &self.path) {
            (AuditSinkKind::File, None) => Err(ConfigError::Invalid("audit.path is required for the file sink".to_string())),
            (_, Some(path)) => validate_path(path).map_err(|err| ConfigError::Invalid(format!("audit.path: {err}"))),
            (_, None) => Ok(()),
        }
    }
}

// ============================================================================
// SECTION: Loading
// ============================================================================

impl AdaptiveCspConfig {
    /// Loads configuration using the default resolution rules.
    ///
    /// Resolution order: explicit `path`, then `ADAPTIVE_CSP_CONFIG`, then
    /// `adaptive-csp.toml` in the working directory. Only the implicit default
    /// file may be absent, in which case defaults are used. Environment flags
    /// are applied before validation.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when loading, flag parsing, or validation fails.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let (resolved, implicit) = resolve_path(path)?;
        let mut config = if implicit && !resolved.exists() {
            Self::default()
        } else {
            Self::from_file(&resolved)?
        };
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Reads and parses one file without environment flags or validation.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when the file is unreadable, oversized, not
    /// UTF-8, or not valid TOML for this schema.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        validate_path(path)?;
        let bytes = fs::read(path).map_err(|err| ConfigError::Io(err.to_string()))?;
        if bytes.len() > MAX_CONFIG_FILE_SIZE {
            return Err(ConfigError::Invalid("config file exceeds size limit".to_string()));
        }
        let content =
            std::str::from_utf8(&bytes).map_err(|_| ConfigError::Invalid("config file must be utf-8".to_string()))?;
        Self::from_toml(content)
    }

    /// Parses TOML text without environment flags or validation.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the text does not match the schema.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Validates every section.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] naming the first failing field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.csp.validate()?;
        self.api_protection.validate()?;
        self.server.validate()?;
        self.audit.validate()?;
        Ok(())
    }

    /// Applies `API_PROTECTION_*` flags from the process environment.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] when a flag value cannot be parsed.
    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        self.apply_overrides_from(|key| env::var(key).ok())
    }

    /// Applies `API_PROTECTION_*` flags from an arbitrary lookup.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] when a flag value cannot be parsed.
    pub fn apply_overrides_from(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<(), ConfigError> {
        if let Some(value) = lookup(ENV_PROTECTION_ENABLED) {
            self.api_protection.enabled = parse_flag(ENV_PROTECTION_ENABLED, &value)?;
        }
        if let Some(value) = lookup(ENV_PROTECTION_VERSION) {
            self.api_protection.version = value.trim().to_string();
        }
        if let Some(value) = lookup(ENV_PROTECTION_STRICT_MODE) {
            self.api_protection.strict_mode = parse_flag(ENV_PROTECTION_STRICT_MODE, &value)?;
        }
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Conversions
    // ------------------------------------------------------------------------

    /// Policy options for the core synthesizer.
    #[must_use]
    pub fn policy_config(&self) -> PolicyConfig {
        let csp = &self.csp;
        PolicyConfig {
            environment: csp.environment,
            enable_dev_tools: csp.enable_dev_tools,
            enable_nonces: csp.enable_nonces,
            enable_hashes: csp.enable_hashes,
            report_violations: csp.report_violations,
            report_uri: csp.report_uri.clone(),
            trusted_hashes: (!csp.trusted_hashes.is_empty()).then(|| csp.trusted_hashes.clone()),
            custom_domains: csp.custom_domains.clone(),
            backend_origins: csp.backend_origins.clone(),
            development_mode: csp.development_mode,
        }
    }

    /// Sanitizer flags for the core header sanitizer.
    #[must_use]
    pub fn sanitizer_config(&self) -> SanitizerConfig {
        let protection = &self.api_protection;
        SanitizerConfig {
            enabled: protection.enabled,
            version: protection.version.clone(),
            strict_mode: protection.strict_mode,
            breaker: BreakerConfig {
                failure_threshold: protection.failure_threshold,
                cooldown: Duration::from_millis(protection.cooldown_ms),
            },
        }
    }

    /// Opens the configured audit sink.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] when the audit file cannot be opened.
    pub fn build_audit_sink(&self) -> Result<Arc<dyn AuditSink>, ConfigError> {
        match (self.audit.sink, &self.audit.path) {
            (AuditSinkKind::Stderr, _) => Ok(Arc::new(StderrAuditSink)),
            (AuditSinkKind::None, _) => Ok(Arc::new(NoopAuditSink)),
            (AuditSinkKind::File, Some(path)) => {
                let sink = FileAuditSink::new(path).map_err(|err| ConfigError::Io(err.to_string()))?;
                Ok(Arc::new(sink))
            }
            (AuditSinkKind::File, None) => {
                Err(ConfigError::Invalid("audit.path is required for the file sink".to_string()))
            }
        }
    }
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Configuration loading or validation errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// I/O failure while reading configuration.
    #[error("config io error: {0}")]
    Io(String),
    /// TOML parsing error.
    #[error("config parse error: {0}")]
    Parse(String),
    /// Invalid configuration data.
    #[error("invalid config: {0}")]
    Invalid(String),
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Resolves the config path; the flag is true for the implicit default.
fn resolve_path(path: Option<&Path>) -> Result<(PathBuf, bool), ConfigError> {
    if let Some(path) = path {
        return Ok((path.to_path_buf(), false));
    }
    if let Ok(env_path) = env::var(CONFIG_ENV_VAR) {
        if env_path.len() > MAX_TOTAL_PATH_LENGTH {
            return Err(ConfigError::Invalid("config path exceeds max length".to_string()));
        }
        return Ok((PathBuf::from(env_path), false));
    }
    Ok((PathBuf::from(DEFAULT_CONFIG_NAME), true))
}

/// Validates a path against length limits.
fn validate_path(path: &Path) -> Result<(), ConfigError> {
    let text = path.to_string_lossy();
    if text.len() > MAX_TOTAL_PATH_LENGTH {
        return Err(ConfigError::Invalid("config path exceeds max length".to_string()));
    }
    for component in path.components() {
        let value = component.as_os_str().to_string_lossy();
        if value.len() > MAX_PATH_COMPONENT_LENGTH {
            return Err(ConfigError::Invalid("config path component too long".to_string()));
        }
    }
    Ok(())
}

/// Validates an origin list against a size cap and origin syntax.
fn validate_origins(field: &str, origins: &[String], max: usize) -> Result<(), ConfigError> {
    if origins.len() > max {
        return Err(ConfigError::Invalid(format!("{field} exceeds {max} entries")));
    }
    for origin in origins {
        normalize_origin(origin).map_err(|err| ConfigError::Invalid(format!("{field}: {err}")))?;
    }
    Ok(())
}

/// Parses a boolean environment flag.
fn parse_flag(key: &str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::Invalid(format!("{key} must be a boolean"))),
    }
}

/// Serde default for opt-out flags.
const fn default_true() -> bool {
    true
}

/// Default rollout version label.
fn default_version() -> String {
    "v1".to_string()
}

/// Default breaker threshold.
const fn default_failure_threshold() -> u32 {
    adaptive_csp_core::breaker::DEFAULT_FAILURE_THRESHOLD
}

/// Default breaker cool-down in milliseconds.
const fn default_cooldown_ms() -> u64 {
    30_000
}

/// Default backend origins.
fn default_backend_origins() -> Vec<String> {
    DEFAULT_BACKEND_ORIGINS.iter().map(ToString::to_string).collect()
}

/// Default bind address.
fn default_bind() -> String {
    DEFAULT_BIND.to_string()
}

/// Default report body limit.
const fn default_max_body_bytes() -> usize {
    DEFAULT_MAX_BODY_BYTES
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests;
