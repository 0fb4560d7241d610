// crates/adaptive-csp-server/src/server.rs
// ============================================================================
// Module: CSP Server
// Description: Axum middleware, report intake route, and the standalone server.
// Purpose: Deliver a per-request policy and collect browser violation reports.
// Dependencies: adaptive-csp-config, adaptive-csp-core, axum, tokio
// ============================================================================

//! ## Overview
//! [`csp_layer`] is an axum middleware that generates a nonce per request,
//! resolves the environment from configuration or the request `Host`,
//! synthesizes the policy, and stamps it on the response. HTML responses
//! also receive the policy meta tag and nonce attributes. [`CspServer`] wires
//! the middleware, the report route, and an optional static index into a
//! router bound from configuration.
//! Security posture: request headers and report bodies are untrusted; bodies
//! are size-bounded and reports are only forwarded through the reporter.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fs;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use adaptive_csp_config::AdaptiveCspConfig;
use adaptive_csp_core::AuditEvent;
use adaptive_csp_core::AuditLevel;
use adaptive_csp_core::Environment;
use adaptive_csp_core::FALLBACK_POLICY;
use adaptive_csp_core::PolicyConfig;
use adaptive_csp_core::ProcessSignals;
use adaptive_csp_core::SecurityContext;
use adaptive_csp_core::detect_environment;
use adaptive_csp_core::policy::reporting_endpoints_header;
use axum::Router;
use axum::body::Body;
use axum::body::Bytes;
use axum::body::HttpBody;
use axum::extract::DefaultBodyLimit;
use axum::extract::Request;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::http::HeaderName;
use axum::http::HeaderValue;
use axum::http::StatusCode;
use axum::http::header::CONTENT_LENGTH;
use axum::http::header::CONTENT_SECURITY_POLICY;
use axum::http::header::CONTENT_SECURITY_POLICY_REPORT_ONLY;
use axum::http::header::CONTENT_TYPE;
use axum::http::header::HOST;
use axum::middleware;
use axum::middleware::Next;
use axum::response::Html;
use axum::response::IntoResponse;
use axum::response::Response;
use axum::routing::get;
use axum::routing::post;
use thiserror::Error;

use crate::html::MAX_INJECT_BYTES;
use crate::html::inject_policy;
use crate::reports::ReportBodyError;
use crate::reports::parse_report_body;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Path of the violation report intake route.
pub const REPORT_PATH: &str = "/csp-report";
/// Reporting API endpoint header name.
pub const REPORTING_ENDPOINTS: &str = "reporting-endpoints";

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Server construction and transport errors.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Configuration errors.
    #[error("config error: {0}")]
    Config(String),
    /// Listener bind errors.
    #[error("bind error: {0}")]
    Bind(String),
    /// Errors while serving connections.
    #[error("serve error: {0}")]
    Serve(String),
}

// ============================================================================
// SECTION: Middleware
// ============================================================================

/// Request extension carrying the nonce embedded in the response policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CspNonce(pub String);

/// Shared state for [`csp_layer`].
pub struct CspLayerState {
    /// Process-wide security context.
    context: Arc<SecurityContext>,
    /// Policy options applied to every response.
    policy: PolicyConfig,
    /// Deliver the policy in report-only mode.
    report_only: bool,
    /// Profile resolved once from configuration and process signals.
    baseline: Environment,
}

impl CspLayerState {
    /// Creates middleware state, resolving the baseline profile once.
    #[must_use]
    pub fn new(context: Arc<SecurityContext>, policy: PolicyConfig, report_only: bool) -> Self {
        let baseline = context.resolve_environment(&policy);
        Self {
            context,
            policy,
            report_only,
            baseline,
        }
    }

    /// Returns the security context.
    #[must_use]
    pub const fn context(&self) -> &Arc<SecurityContext> {
        &self.context
    }

    /// Resolves the profile for a request host.
    ///
    /// The `Host` header is client-controlled, so it may only tighten a
    /// development baseline; a production or test baseline is never relaxed.
    fn environment_for(&self, host: Option<&str>) -> Environment {
        if self.policy.environment.is_some() || self.baseline != Environment::Development {
            return self.baseline;
        }
        match host {
            Some(host) => detect_environment(&ProcessSignals::new().with_host(host)),
            None => self.baseline,
        }
    }
}

/// Axum middleware stamping a per-request policy on responses.
pub async fn csp_layer(State(state): State<Arc<CspLayerState>>, mut request: Request, next: Next) -> Response {
    let host = request
        .headers()
        .get(HOST)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
        .or_else(|| request.uri().host().map(str::to_string));
    let environment = state.environment_for(host.as_deref());
    let nonce = state.policy.enable_nonces.then(|| state.context.generate_nonce());
    if let Some(nonce) = &nonce {
        request.extensions_mut().insert(CspNonce(nonce.clone()));
    }
    let policy = state.context.synthesize_with_nonce(environment, &state.policy, nonce.as_deref()).await;

    let response = next.run(request).await;
    let mut response = if is_html(response.headers()) {
        inject_into_body(response, &policy, nonce.as_deref()).await
    } else {
        response
    };

    let header_value =
        HeaderValue::from_str(&policy).unwrap_or_else(|_| HeaderValue::from_static(FALLBACK_POLICY));
    let header_name =
        if state.report_only { CONTENT_SECURITY_POLICY_REPORT_ONLY } else { CONTENT_SECURITY_POLICY };
    let headers = response.headers_mut();
    headers.insert(header_name, header_value);
    if let Some(endpoints) = reporting_endpoints_header(environment, &state.policy)
        && let Ok(value) = HeaderValue::from_str(&endpoints)
    {
        headers.insert(HeaderName::from_static(REPORTING_ENDPOINTS), value);
    }
    response
}

/// Returns true when the response declares an HTML body.
fn is_html(headers: &HeaderMap) -> bool {
    headers
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.trim_start().to_ascii_lowercase().starts_with("text/html"))
}

/// Rewrites a bounded HTML body; larger or unsized bodies pass through.
async fn inject_into_body(response: Response, policy: &str, nonce: Option<&str>) -> Response {
    let bounded = response
        .body()
        .size_hint()
        .upper()
        .is_some_and(|upper| usize::try_from(upper).is_ok_and(|upper| upper <= MAX_INJECT_BYTES));
    if !bounded {
        return response;
    }
    let (mut parts, body) = response.into_parts();
    let Ok(bytes) = axum::body::to_bytes(body, MAX_INJECT_BYTES).await else {
        return (StatusCode::INTERNAL_SERVER_ERROR, "response body unavailable").into_response();
    };
    let Ok(html) = std::str::from_utf8(&bytes) else {
        return Response::from_parts(parts, Body::from(bytes));
    };
    let injected = inject_policy(html, policy, nonce);
    parts.headers.remove(CONTENT_LENGTH);
    Response::from_parts(parts, Body::from(injected))
}

// ============================================================================
// SECTION: Routes
// ============================================================================

/// Shared state for server routes.
struct ServerState {
    /// Security context receiving reports.
    context: Arc<SecurityContext>,
    /// Static document served at `/`.
    index_html: Option<Arc<str>>,
}

/// Accepts browser violation reports.
async fn receive_report(State(state): State<Arc<ServerState>>, headers: HeaderMap, body: Bytes) -> StatusCode {
    let content_type = headers.get(CONTENT_TYPE).and_then(|value| value.to_str().ok()).unwrap_or_default();
    match parse_report_body(content_type, &body) {
        Ok(reports) => {
            for report in reports {
                state.context.dispatch_violation(report);
            }
            StatusCode::NO_CONTENT
        }
        Err(ReportBodyError::UnsupportedMediaType(_)) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
        Err(ReportBodyError::TooManyReports) => StatusCode::PAYLOAD_TOO_LARGE,
        Err(ReportBodyError::Malformed(_)) => StatusCode::BAD_REQUEST,
    }
}

/// Serves the configured static document.
async fn serve_index(State(state): State<Arc<ServerState>>) -> Response {
    match &state.index_html {
        Some(document) => Html(document.to_string()).into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

// ============================================================================
// SECTION: Server
// ============================================================================

/// Standalone CSP server.
pub struct CspServer {
    /// Validated configuration.
    config: AdaptiveCspConfig,
    /// Middleware state shared with the router.
    layer: Arc<CspLayerState>,
    /// Static document served at `/`.
    index_html: Option<Arc<str>>,
}

impl CspServer {
    /// Builds a server from validated configuration.
    ///
    /// Reporting is registered for the environment resolved against the
    /// bind host, so loopback binds report as development.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Config`] when configuration is invalid, the
    /// audit sink cannot be opened, or the index document cannot be read.
    pub fn from_config(config: AdaptiveCspConfig) -> Result<Self, ServerError> {
        config.validate().map_err(|err| ServerError::Config(err.to_string()))?;
        let addr = config.server.bind_addr().map_err(|err| ServerError::Config(err.to_string()))?;
        let audit = config.build_audit_sink().map_err(|err| ServerError::Config(err.to_string()))?;
        let context = SecurityContext::builder()
            .audit(audit)
            .signals(Arc::new(ProcessSignals::new().with_host(addr.ip().to_string())))
            .sanitizer_config(config.sanitizer_config())
            .build();
        Self::with_context(config, Arc::new(context))
    }

    /// Builds a server around an existing context.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Config`] when the index document cannot be read.
    pub fn with_context(config: AdaptiveCspConfig, context: Arc<SecurityContext>) -> Result<Self, ServerError> {
        let index_html = match &config.server.index_html {
            Some(path) => Some(read_index(path)?),
            None => None,
        };
        let policy = config.policy_config();
        let environment = context.resolve_environment(&policy);
        context.setup_reporting(environment, &policy);
        let layer = Arc::new(CspLayerState::new(context, policy, config.csp.report_only));
        Ok(Self {
            config,
            layer,
            index_html,
        })
    }

    /// Returns the security context.
    #[must_use]
    pub fn context(&self) -> &Arc<SecurityContext> {
        self.layer.context()
    }

    /// Builds the router with the report route, index, and CSP middleware.
    #[must_use]
    pub fn router(&self) -> Router {
        let state = Arc::new(ServerState {
            context: Arc::clone(self.layer.context()),
            index_html: self.index_html.clone(),
        });
        Router::new()
            .route("/", get(serve_index))
            .route(REPORT_PATH, post(receive_report))
            .layer(DefaultBodyLimit::max(self.config.server.max_body_bytes))
            .with_state(state)
            .layer(middleware::from_fn_with_state(Arc::clone(&self.layer), csp_layer))
    }

    /// Binds the configured address and serves until shutdown.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError`] when binding or serving fails.
    pub async fn serve(self) -> Result<(), ServerError> {
        let addr = self.config.server.bind_addr().map_err(|err| ServerError::Config(err.to_string()))?;
        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .map_err(|err| ServerError::Bind(format!("{addr}: {err}")))?;
        self.serve_listener(listener).await
    }

    /// Serves on an already bound listener.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Serve`] when serving fails.
    pub async fn serve_listener(self, listener: tokio::net::TcpListener) -> Result<(), ServerError> {
        let local = listener.local_addr().map_err(|err| ServerError::Bind(err.to_string()))?;
        self.context().audit().record(&AuditEvent::new(
            AuditLevel::Info,
            "server_listening",
            format!("csp server listening on {local}"),
        ));
        let app = self.router();
        axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
            .await
            .map_err(|err| ServerError::Serve(err.to_string()))
    }
}

/// Reads the index document within the injection bound.
fn read_index(path: &Path) -> Result<Arc<str>, ServerError> {
    let bytes = fs::read(path).map_err(|err| ServerError::Config(format!("server.index_html: {err}")))?;
    if bytes.len() > MAX_INJECT_BYTES {
        return Err(ServerError::Config("server.index_html exceeds size limit".to_string()));
    }
    let document =
        String::from_utf8(bytes).map_err(|_| ServerError::Config("server.index_html must be utf-8".to_string()))?;
    Ok(Arc::from(document))
}
