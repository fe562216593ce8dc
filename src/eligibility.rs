// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! The eligibility gate, session-key derivation, and namespace derivation.

use http::{HeaderMap, Method};
use serde_json::Value;
use sha2::{Digest, Sha256};

const AGENTIC_USER_AGENTS: &[&str] = &["openai codex", "factory-cli", "warp", "droid", "claude-cli"];

pub const SESSION_HEADER: &str = "x-cliproxyapi-session";
pub const SESSION_ID_HEADER: &str = "x-session-id";
pub const TODO_HEADER: &str = "x-cliproxyapi-todo";
pub const INTERNAL_HEADER: &str = "x-cliproxyapi-internal";
pub const REPO_HEADER: &str = "x-cliproxyapi-repo";
pub const REPO_PATH_HEADER: &str = "x-repo-path";
pub const WORKSPACE_ROOT_HEADER: &str = "x-workspace-root";
pub const PROJECT_ROOT_HEADER: &str = "x-project-root";
pub const SPEC_MODE_HEADER: &str = "x-cliproxyapi-spec-mode";

/// Headers that must never reach the upstream request.
pub const CLIENT_ONLY_HEADERS: &[&str] = &[
    SESSION_HEADER,
    SESSION_ID_HEADER,
    TODO_HEADER,
    INTERNAL_HEADER,
    REPO_HEADER,
    REPO_PATH_HEADER,
    WORKSPACE_ROOT_HEADER,
    PROJECT_ROOT_HEADER,
    SPEC_MODE_HEADER,
];

/// A request enters the pipeline iff it is a JSON POST from a recognized
/// agentic CLI (or any Stainless SDK) and does not carry the internal
/// bypass header. Everything else passes through untouched.
pub fn is_eligible(method: &Method, headers: &HeaderMap) -> bool {
    if method != Method::POST {
        return false;
    }
    if headers.contains_key(INTERNAL_HEADER) {
        return false;
    }
    let content_type_ok = match headers.get(http::header::CONTENT_TYPE) {
        None => true,
        Some(value) => value.to_str().unwrap_or("").contains("application/json"),
    };
    if !content_type_ok {
        return false;
    }
    let ua = headers
        .get(http::header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_ascii_lowercase();
    let ua_matches = AGENTIC_USER_AGENTS.iter().any(|needle| ua.contains(needle));
    let stainless_header = headers
        .keys()
        .any(|name| name.as_str().to_ascii_lowercase().starts_with("x-stainless-"));
    ua_matches || stainless_header
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok()).filter(|s| !s.is_empty())
}

/// Derive the session key: session headers first, then body fields, then a
/// deterministic hash of (Authorization, User-Agent) prefixed `ua_`.
pub fn derive_session_key(headers: &HeaderMap, body: &Value) -> String {
    if let Some(v) = header_str(headers, SESSION_HEADER) {
        return v.to_string();
    }
    if let Some(v) = header_str(headers, SESSION_ID_HEADER) {
        return v.to_string();
    }
    if let Some(v) = body.get("prompt_cache_key").and_then(Value::as_str) {
        return v.to_string();
    }
    if let Some(v) = body.pointer("/metadata/session_id").and_then(Value::as_str) {
        return v.to_string();
    }
    if let Some(v) = body.get("session_id").and_then(Value::as_str) {
        return v.to_string();
    }

    let auth = headers.get(http::header::AUTHORIZATION).and_then(|v| v.to_str().ok()).unwrap_or("");
    let ua = headers.get(http::header::USER_AGENT).and_then(|v| v.to_str().ok()).unwrap_or("");
    let mut hasher = Sha256::new();
    hasher.update(auth.as_bytes());
    hasher.update(b"|");
    hasher.update(ua.as_bytes());
    let digest = hasher.finalize();
    format!("ua_{}", hex::encode(&digest[..8]))
}

/// Derive the semantic namespace: repo/workspace headers first, then body
/// fields, then the session key.
pub fn derive_namespace(headers: &HeaderMap, body: &Value, session: &str) -> String {
    for header in [REPO_HEADER, REPO_PATH_HEADER, WORKSPACE_ROOT_HEADER, PROJECT_ROOT_HEADER] {
        if let Some(v) = header_str(headers, header) {
            return v.to_string();
        }
    }
    if let Some(v) = body.pointer("/metadata/repo").and_then(Value::as_str) {
        return v.to_string();
    }
    if let Some(v) = body.pointer("/metadata/repository").and_then(Value::as_str) {
        return v.to_string();
    }
    if let Some(v) = body.get("workspace_root").and_then(Value::as_str) {
        return v.to_string();
    }
    session.to_string()
}
