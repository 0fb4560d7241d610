// crates/adaptive-csp-server/src/html/tests.rs
// ============================================================================
// Module: HTML Injection Unit Tests
// Description: Meta placement, nonce attributes, and escaping.
// Purpose: Ensure document rewriting is stable and never duplicates policy tags.
// Dependencies: adaptive-csp-server
// ============================================================================

//! ## Overview
//! Exercises the tag scanner against small documents covering head
//! placement, existing meta tags, pre-nonced elements, and attribute escaping.

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
fn meta_goes_after_head_open_tag() {
    let html = "<html><head lang=\"en\"><title>x</title></head><body></body></html>";
    let out = inject_policy(html, "default-src 'self'", None);
    assert_eq!(
        out,
        "<html><head lang=\"en\"><meta http-equiv=\"Content-Security-Policy\" content=\"default-src 'self'\"><title>x</title></head><body></body></html>"
    );
}

#[test]
fn header_element_is_not_head() {
    let html = "<header>nav</header><p>body</p>";
    let out = inject_policy(html, "default-src 'self'", None);
    assert!(out.starts_with("<meta http-equiv=\"Content-Security-Policy\""));
    assert!(out.ends_with("<header>nav</header><p>body</p>"));
}

#[test]
fn existing_policy_meta_is_replaced() {
    let html = "<head><META HTTP-EQUIV=\"content-security-policy\" content=\"script-src *\"><meta charset=\"utf-8\"></head>";
    let out = inject_policy(html, "default-src 'none'", None);
    assert_eq!(out.matches("http-equiv").count(), 1);
    assert!(!out.contains("script-src *"));
    assert!(out.contains("<meta charset=\"utf-8\">"));
}

#[test]
fn injection_is_stable_when_repeated() {
    let html = "<head></head><script>run()</script>";
    let once = inject_policy(html, "default-src 'self'", Some("abc123"));
    let twice = inject_policy(&once, "default-src 'self'", Some("abc123"));
    assert_eq!(once, twice);
}

#[test]
fn nonce_added_to_script_and_style_only() {
    let html = "<head><style>p{}</style></head><body><script src=\"/app.js\"></script><scripts></scripts><link rel=\"stylesheet\"></body>";
    let out = inject_policy(html, "default-src 'self'", Some("n0nce"));
    assert!(out.contains("<style nonce=\"n0nce\">"));
    assert!(out.contains("<script nonce=\"n0nce\" src=\"/app.js\">"));
    assert!(out.contains("<scripts>"));
    assert!(out.contains("<link rel=\"stylesheet\">"));
}

#[test]
fn existing_nonce_attribute_is_kept() {
    let html = "<script nonce=\"server\">a()</script><script data-nonced=\"1\">b()</script>";
    let out = inject_policy(html, "default-src 'self'", Some("fresh"));
    assert!(out.contains("<script nonce=\"server\">"));
    assert!(out.contains("<script nonce=\"fresh\" data-nonced=\"1\">"));
}

#[test]
fn content_attribute_is_escaped() {
    let out = inject_policy("<head></head>", "script-src 'self' \"x\" <y> &z", None);
    assert!(out.contains("content=\"script-src 'self' &quot;x&quot; &lt;y&gt; &amp;z\""));
}

#[test]
fn meta_policy_drops_header_only_directives() {
    let policy = "default-src 'none'; frame-ancestors 'none'; report-uri https://r.example/csp; report-to csp-endpoint; img-src 'self'";
    assert_eq!(meta_policy(policy), "default-src 'none'; img-src 'self'");
}

#[test]
fn unterminated_tag_is_left_alone() {
    let html = "<p>text</p><script";
    let out = inject_policy(html, "default-src 'self'", Some("n"));
    assert!(out.ends_with("<p>text</p><script"));
}
