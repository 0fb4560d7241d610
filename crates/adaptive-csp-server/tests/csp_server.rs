// crates/adaptive-csp-server/tests/csp_server.rs
// ============================================================================
// Module: CSP Server Tests
// Description: Middleware headers, HTML injection, and report intake over HTTP.
// Purpose: Ensure served responses carry a fresh policy and reports reach the reporter.
// Dependencies: adaptive-csp-server, adaptive-csp-config, adaptive-csp-core, reqwest, tokio
// ============================================================================

//! ## Overview
//! Binds [`CspServer`] on an ephemeral loopback port and drives it with an
//! HTTP client: nonces must match between header and body and change per
//! request, report bodies must be accepted or rejected by media type and
//! shape, and the middleware must be reusable in a caller-owned router.

#![allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic_in_result_fn,
    clippy::unwrap_in_result,
    reason = "Test-only assertions use unwrap for clarity."
)]

use std::io::Write;
use std::net::SocketAddr;
use std::sync::Arc;

use adaptive_csp_config::AdaptiveCspConfig;
use adaptive_csp_core::Environment;
use adaptive_csp_core::MemoryAuditSink;
use adaptive_csp_core::PolicyConfig;
use adaptive_csp_core::SecurityContext;
use adaptive_csp_core::StaticSignals;
use adaptive_csp_server::CspLayerState;
use adaptive_csp_server::CspNonce;
use adaptive_csp_server::CspServer;
use adaptive_csp_server::REPORT_PATH;
use adaptive_csp_server::csp_layer;
use axum::Extension;
use axum::Router;
use axum::middleware;
use axum::routing::get;
use tempfile::NamedTempFile;
use tokio::net::TcpListener;

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Document served at `/` by tests needing HTML injection.
const INDEX: &str = "<!doctype html><html><head><title>app</title></head><body><script>boot()</script></body></html>";

/// Context with loopback signals and an in-memory sink.
fn context() -> (Arc<SecurityContext>, Arc<MemoryAuditSink>) {
    let audit = Arc::new(MemoryAuditSink::new());
    let context = SecurityContext::builder()
        .audit(audit.clone())
        .signals(Arc::new(StaticSignals::for_host("127.0.0.1")))
        .build();
    (Arc::new(context), audit)
}

/// Serves `router` on an ephemeral port.
async fn spawn_router(router: Router) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let _ = axum::serve(listener, router).await;
    });
    addr
}

/// Serves a [`CspServer`] built from `config`.
async fn spawn_server(config: AdaptiveCspConfig) -> (SocketAddr, Arc<SecurityContext>, Arc<MemoryAuditSink>) {
    let (context, audit) = context();
    let server = CspServer::with_context(config, Arc::clone(&context)).unwrap();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let _ = server.serve_listener(listener).await;
    });
    (addr, context, audit)
}

/// Writes the index document to a temporary file.
fn index_file() -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(INDEX.as_bytes()).unwrap();
    file
}

/// Extracts the nonce value from a serialized policy.
fn policy_nonce(policy: &str) -> String {
    let start = policy.find("'nonce-").unwrap() + "'nonce-".len();
    let end = policy[start ..].find('\'').unwrap();
    policy[start .. start + end].to_string()
}

/// Returns a response header as a string.
fn header(response: &reqwest::Response, name: &str) -> Option<String> {
    response.headers().get(name).map(|value| value.to_str().unwrap().to_string())
}

// ============================================================================
// SECTION: Middleware
// ============================================================================

#[tokio::test]
async fn html_response_nonce_matches_header() {
    let index = index_file();
    let mut config = AdaptiveCspConfig::default();
    config.csp.environment = Some(Environment::Production);
    config.server.index_html = Some(index.path().to_path_buf());
    let (addr, _context, _audit) = spawn_server(config).await;
    let client = reqwest::Client::new();

    let first = client.get(format!("http://{addr}/")).send().await.unwrap();
    assert_eq!(first.status(), 200);
    let policy = header(&first, "content-security-policy").unwrap();
    assert!(policy.starts_with("default-src 'none'"));
    let nonce = policy_nonce(&policy);
    let body = first.text().await.unwrap();
    assert!(body.contains(&format!("<script nonce=\"{nonce}\">boot()</script>")));
    assert!(body.contains("<head><meta http-equiv=\"Content-Security-Policy\""));
    assert_eq!(body.matches("http-equiv").count(), 1);

    let second = client.get(format!("http://{addr}/")).send().await.unwrap();
    let second_nonce = policy_nonce(&header(&second, "content-security-policy").unwrap());
    assert_ne!(nonce, second_nonce);
}

#[tokio::test]
async fn report_only_mode_uses_report_only_header() {
    let mut config = AdaptiveCspConfig::default();
    config.csp.environment = Some(Environment::Production);
    config.csp.report_only = true;
    let (addr, _context, _audit) = spawn_server(config).await;
    let response = reqwest::get(format!("http://{addr}/")).await.unwrap();
    assert_eq!(response.status(), 404);
    assert!(header(&response, "content-security-policy").is_none());
    assert!(header(&response, "content-security-policy-report-only").unwrap().contains("'nonce-"));
}

#[tokio::test]
async fn reporting_endpoints_header_follows_report_uri() {
    let mut config = AdaptiveCspConfig::default();
    config.csp.environment = Some(Environment::Production);
    config.csp.report_uri = Some("https://reports.example.com/csp".to_string());
    let (addr, _context, _audit) = spawn_server(config).await;
    let response = reqwest::get(format!("http://{addr}/")).await.unwrap();
    assert_eq!(
        header(&response, "reporting-endpoints").as_deref(),
        Some("csp-endpoint=\"https://reports.example.com/csp\"")
    );
    assert!(header(&response, "content-security-policy").unwrap().contains("report-to csp-endpoint"));
}

#[tokio::test]
async fn host_header_selects_profile() {
    let (addr, _context, _audit) = spawn_server(AdaptiveCspConfig::default()).await;
    let client = reqwest::Client::new();

    let local = client.get(format!("http://{addr}/")).send().await.unwrap();
    assert!(header(&local, "content-security-policy").unwrap().contains("'unsafe-eval'"));

    let public = client
        .get(format!("http://{addr}/"))
        .header(reqwest::header::HOST, "app.example.com")
        .send()
        .await
        .unwrap();
    let policy = header(&public, "content-security-policy").unwrap();
    assert!(policy.starts_with("default-src 'none'"));
    assert!(!policy.contains("'unsafe-eval'"));
}

#[tokio::test]
async fn loopback_host_cannot_relax_public_bind() {
    let audit = Arc::new(MemoryAuditSink::new());
    let context = SecurityContext::builder()
        .audit(audit)
        .signals(Arc::new(StaticSignals::for_host("203.0.113.10")))
        .build();
    let server = CspServer::with_context(AdaptiveCspConfig::default(), Arc::new(context)).unwrap();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let _ = server.serve_listener(listener).await;
    });

    let response = reqwest::Client::new()
        .get(format!("http://{addr}/"))
        .header(reqwest::header::HOST, "127.0.0.1:8080")
        .send()
        .await
        .unwrap();
    let policy = header(&response, "content-security-policy").unwrap();
    assert!(policy.starts_with("default-src 'none'"));
    assert!(!policy.contains("'unsafe-eval'"));
}

#[tokio::test]
async fn middleware_exposes_nonce_to_handlers() {
    let (context, _audit) = context();
    let state = Arc::new(CspLayerState::new(context, PolicyConfig::for_environment(Environment::Production), false));
    let router = Router::new()
        .route("/", get(|Extension(nonce): Extension<CspNonce>| async move { nonce.0 }))
        .layer(middleware::from_fn_with_state(state, csp_layer));
    let addr = spawn_router(router).await;

    let response = reqwest::get(format!("http://{addr}/")).await.unwrap();
    let policy = header(&response, "content-security-policy").unwrap();
    let body = response.text().await.unwrap();
    assert_eq!(policy_nonce(&policy), body);
}

#[tokio::test]
async fn disabled_nonces_leave_html_unnonced() {
    let index = index_file();
    let mut config = AdaptiveCspConfig::default();
    config.csp.environment = Some(Environment::Production);
    config.csp.enable_nonces = false;
    config.server.index_html = Some(index.path().to_path_buf());
    let (addr, _context, _audit) = spawn_server(config).await;
    let response = reqwest::get(format!("http://{addr}/")).await.unwrap();
    assert!(!header(&response, "content-security-policy").unwrap().contains("'nonce-"));
    let body = response.text().await.unwrap();
    assert!(body.contains("<script>boot()</script>"));
    assert!(body.contains("http-equiv=\"Content-Security-Policy\""));
}

// ============================================================================
// SECTION: Report Intake
// ============================================================================

/// Development config with a small body limit.
fn report_config() -> AdaptiveCspConfig {
    let mut config = AdaptiveCspConfig::default();
    config.csp.environment = Some(Environment::Development);
    config.server.max_body_bytes = 1024;
    config
}

#[tokio::test]
async fn valid_report_is_dispatched() {
    let (addr, context, audit) = spawn_server(report_config()).await;
    let body = r#"{"csp-report":{"violated-directive":"script-src-elem","blocked-uri":"inline","line-number":3}}"#;
    let response = reqwest::Client::new()
        .post(format!("http://{addr}{REPORT_PATH}"))
        .header(reqwest::header::CONTENT_TYPE, "application/csp-report")
        .body(body)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 204);
    assert_eq!(context.reporter().violation_count(), 1);
    assert_eq!(audit.count("csp_violation"), 1);
}

#[tokio::test]
async fn reporting_api_batch_is_dispatched() {
    let (addr, context, _audit) = spawn_server(report_config()).await;
    let body = r#"[{"type":"csp-violation","body":{"effectiveDirective":"img-src","blockedURL":"https://evil.example/x.png"}}]"#;
    let response = reqwest::Client::new()
        .post(format!("http://{addr}{REPORT_PATH}"))
        .header(reqwest::header::CONTENT_TYPE, "application/reports+json")
        .body(body)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 204);
    assert_eq!(context.reporter().violation_count(), 1);
}

#[tokio::test]
async fn bad_reports_are_rejected() {
    let (addr, context, _audit) = spawn_server(report_config()).await;
    let client = reqwest::Client::new();
    let url = format!("http://{addr}{REPORT_PATH}");

    let malformed = client
        .post(&url)
        .header(reqwest::header::CONTENT_TYPE, "application/csp-report")
        .body("not json")
        .send()
        .await
        .unwrap();
    assert_eq!(malformed.status(), 400);

    let wrong_type =
        client.post(&url).header(reqwest::header::CONTENT_TYPE, "text/plain").body("{}").send().await.unwrap();
    assert_eq!(wrong_type.status(), 415);

    let oversized = client
        .post(&url)
        .header(reqwest::header::CONTENT_TYPE, "application/json")
        .body(format!("{{\"csp-report\":{{\"blocked-uri\":\"{}\"}}}}", "a".repeat(2048)))
        .send()
        .await
        .unwrap();
    assert_eq!(oversized.status(), 413);
    assert_eq!(context.reporter().violation_count(), 0);
}

// ============================================================================
// SECTION: Construction
// ============================================================================

#[test]
fn from_config_rejects_invalid_config() {
    let mut config = AdaptiveCspConfig::default();
    config.server.bind = "not-an-address".to_string();
    let err = CspServer::from_config(config).err().unwrap();
    assert!(err.to_string().contains("server.bind"));
}

#[test]
fn missing_index_document_is_a_config_error() {
    let mut config = AdaptiveCspConfig::default();
    config.server.index_html = Some(std::path::PathBuf::from("/nonexistent/adaptive-csp/index.html"));
    let err = CspServer::from_config(config).err().unwrap();
    assert!(err.to_string().contains("server.index_html"));
}
