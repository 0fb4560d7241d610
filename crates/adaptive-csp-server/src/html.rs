// crates/adaptive-csp-server/src/html.rs
// ============================================================================
// Module: HTML Policy Injection
// Description: Pure transform adding the CSP meta tag and nonce attributes.
// Purpose: Embed the synthesized policy into built or served documents.
// Dependencies: std
// ============================================================================

//! ## Overview
//! [`inject_policy`] rewrites an HTML document so it carries the policy as a
//! `<meta http-equiv="Content-Security-Policy">` tag and every inline
//! `<script>`/`<style>` element carries the request nonce. The transform is
//! a tag-level scan, not a full HTML parser.
//! Invariants:
//! - Existing CSP meta tags are replaced, never duplicated.
//! - Tags that already carry a `nonce` attribute are left untouched.
//! - Directives that browsers ignore in meta policies are stripped from the
//!   meta copy only.

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Upper bound on documents rewritten by the middleware.
pub const MAX_INJECT_BYTES: usize = 2 * 1024 * 1024;
/// Directives not honored when delivered through a meta tag.
const HEADER_ONLY_DIRECTIVES: &[&str] = &["frame-ancestors", "report-uri", "report-to", "sandbox"];
/// Elements receiving nonce attributes.
const NONCE_ELEMENTS: &[&str] = &["script", "style"];

// ============================================================================
// SECTION: Injection
// ============================================================================

/// Injects `policy` and `nonce` into an HTML document.
#[must_use]
pub fn inject_policy(html: &str, policy: &str, nonce: Option<&str>) -> String {
    let without_meta = strip_csp_meta(html);
    let meta = format!(
        "<meta http-equiv=\"Content-Security-Policy\" content=\"{}\">",
        escape_attribute(&meta_policy(policy))
    );
    let with_meta = match head_insertion_point(&without_meta) {
        Some(index) => {
            let mut out = String::with_capacity(without_meta.len() + meta.len());
            out.push_str(&without_meta[.. index]);
            out.push_str(&meta);
            out.push_str(&without_meta[index ..]);
            out
        }
        None => format!("{meta}{without_meta}"),
    };
    match nonce {
        Some(nonce) => add_nonce_attributes(&with_meta, nonce),
        None => with_meta,
    }
}

/// Returns the policy without directives ignored in meta delivery.
#[must_use]
pub fn meta_policy(policy: &str) -> String {
    policy
        .split(';')
        .map(str::trim)
        .filter(|directive| !directive.is_empty())
        .filter(|directive| {
            let name = directive.split_whitespace().next().unwrap_or_default();
            !HEADER_ONLY_DIRECTIVES.iter().any(|skip| name.eq_ignore_ascii_case(skip))
        })
        .collect::<Vec<_>>()
        .join("; ")
}

// ============================================================================
// SECTION: Tag Scanning
// ============================================================================

/// Finds the byte range of every tag opening with `<name`.
///
/// Matches require a delimiter after the name so `<header>` is not `<head>`.
fn find_tags(html: &str, name: &str) -> Vec<(usize, usize)> {
    let lower = html.to_ascii_lowercase();
    let needle = format!("<{name}");
    let mut tags = Vec::new();
    let mut cursor = 0;
    while let Some(offset) = lower[cursor ..].find(&needle) {
        let start = cursor + offset;
        let after = start + needle.len();
        let delimited = lower[after ..].chars().next().is_some_and(|ch| ch == '>' || ch == '/' || ch.is_ascii_whitespace());
        let Some(close) = lower[after ..].find('>') else {
            break;
        };
        let end = after + close + 1;
        if delimited {
            tags.push((start, end));
        }
        cursor = end;
    }
    tags
}

/// Removes existing CSP meta tags.
fn strip_csp_meta(html: &str) -> String {
    let mut out = String::with_capacity(html.len());
    let mut cursor = 0;
    for (start, end) in find_tags(html, "meta") {
        let tag = html[start .. end].to_ascii_lowercase();
        let is_csp = tag.contains("content-security-policy") && tag.contains("http-equiv");
        if is_csp {
            out.push_str(&html[cursor .. start]);
            cursor = end;
        }
    }
    out.push_str(&html[cursor ..]);
    out
}

/// Byte offset just after the opening `<head>` tag.
fn head_insertion_point(html: &str) -> Option<usize> {
    find_tags(html, "head").first().map(|(_, end)| *end)
}

/// Adds `nonce` to script and style tags lacking one.
fn add_nonce_attributes(html: &str, nonce: &str) -> String {
    let mut insertions: Vec<usize> = Vec::new();
    for element in NONCE_ELEMENTS {
        for (start, end) in find_tags(html, element) {
            if !has_nonce_attribute(&html[start .. end]) {
                insertions.push(start + 1 + element.len());
            }
        }
    }
    insertions.sort_unstable();
    let attribute = format!(" nonce=\"{}\"", escape_attribute(nonce));
    let mut out = String::with_capacity(html.len() + insertions.len() * attribute.len());
    let mut cursor = 0;
    for index in insertions {
        out.push_str(&html[cursor .. index]);
        out.push_str(&attribute);
        cursor = index;
    }
    out.push_str(&html[cursor ..]);
    out
}

/// Returns true when the tag text already declares a nonce attribute.
fn has_nonce_attribute(tag: &str) -> bool {
    let lower = tag.to_ascii_lowercase();
    lower.match_indices("nonce").any(|(index, _)| {
        let before = lower[.. index].chars().next_back();
        let after = lower[index + "nonce".len() ..].trim_start().chars().next();
        before.is_some_and(|ch| ch.is_ascii_whitespace()) && matches!(after, Some('=' | '>' | '/') | None)
    })
}

/// Escapes text for a double-quoted attribute value.
fn escape_attribute(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '"' => out.push_str("&quot;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            other => out.push(other),
        }
    }
    out
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests;
