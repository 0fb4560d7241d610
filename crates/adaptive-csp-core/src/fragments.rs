// crates/adaptive-csp-core/src/fragments.rs
// ============================================================================
// Module: Inline Fragment Registry
// Description: Known inline script/style bodies whose hashes are trusted.
// Purpose: Give the hash cache a fixed, reviewable set of inline content.
// Dependencies: none
// ============================================================================

//! ## Overview
//! Documents served by the application embed a small number of inline
//! scripts and styles. Each is registered here under a logical key; related
//! fragments share a `group` and are aggregated into one list of hashes.
//! Fragments scoped to [`FragmentScope::DevelopmentTooling`] are never part
//! of the curated production subset.

// ============================================================================
// SECTION: Types
// ============================================================================

/// Where a trusted inline fragment may be allowed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FragmentScope {
    /// Allowed in every profile.
    Shared,
    /// Hot-reload and dev-server tooling; excluded from production.
    DevelopmentTooling,
}

/// A known inline content fragment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InlineFragment {
    /// Logical key (used directly when `group` is `None`).
    pub key: &'static str,
    /// Aggregate key when the fragment belongs to a group.
    pub group: Option<&'static str>,
    /// Exact inline body as emitted in the document.
    pub content: &'static str,
    /// Profile scope.
    pub scope: FragmentScope,
}

// ============================================================================
// SECTION: Registry
// ============================================================================

/// Inline fragments emitted by the application shell.
pub const BUILTIN_FRAGMENTS: &[InlineFragment] = &[
    InlineFragment {
        key: "theme-init",
        group: None,
        content: "(function(){try{var t=localStorage.getItem('theme');if(t==='dark'||(!t&&window.matchMedia('(prefers-color-scheme: dark)').matches)){document.documentElement.classList.add('dark')}}catch(e){}})();",
        scope: FragmentScope::Shared,
    },
    InlineFragment {
        key: "runtime-bootstrap",
        group: Some("runtime-init"),
        content: "window.__APP_RUNTIME__={booted:Date.now(),queue:[]};",
        scope: FragmentScope::Shared,
    },
    InlineFragment {
        key: "runtime-error-buffer",
        group: Some("runtime-init"),
        content: "window.addEventListener('error',function(e){(window.__APP_RUNTIME__||{queue:[]}).queue.push(e.message)});",
        scope: FragmentScope::Shared,
    },
    InlineFragment {
        key: "critical-css",
        group: None,
        content: "html,body{margin:0;min-height:100%}#root{min-height:100vh}",
        scope: FragmentScope::Shared,
    },
    InlineFragment {
        key: "refresh-preamble",
        group: Some("dev-tooling"),
        content: "import RefreshRuntime from '/@react-refresh';RefreshRuntime.injectIntoGlobalHook(window);window.$RefreshReg$=()=>{};window.$RefreshSig$=()=>(type)=>type;window.__vite_plugin_react_preamble_installed__=true;",
        scope: FragmentScope::DevelopmentTooling,
    },
    InlineFragment {
        key: "dev-client",
        group: Some("dev-tooling"),
        content: "import '/@vite/client';",
        scope: FragmentScope::DevelopmentTooling,
    },
];
