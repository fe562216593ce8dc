// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Header stripping and diagnostic/trimming-indicator header emission:
//! client-only control headers never reach upstream.

use std::net::IpAddr;

use http::{HeaderMap, HeaderName, HeaderValue};

use crate::eligibility::CLIENT_ONLY_HEADERS;
use crate::pipeline::PipelineOutcome;

const TRIMMED: &str = "x-cliproxyapi-trimmed";
const ORIGINAL_BYTES: &str = "x-cliproxyapi-original-bytes";
const TRIMMED_BYTES: &str = "x-cliproxyapi-trimmed-bytes";

const DIAG_MODEL: &str = "x-proxypilot-model";
const DIAG_CONTEXT_WINDOW: &str = "x-proxypilot-context-window";
const DIAG_CURRENT_TOKENS: &str = "x-proxypilot-current-tokens";
const DIAG_TARGET_TOKENS: &str = "x-proxypilot-target-tokens";
const DIAG_TOKEN_TRIGGERED: &str = "x-proxypilot-token-triggered";
const DIAG_SESSION: &str = "x-proxypilot-session";
const DIAG_REQUEST_SHAPE: &str = "x-proxypilot-request-shape";
const DIAG_MEMORY_STORED: &str = "x-proxypilot-memory-stored";
const DIAG_MEMORY_RETRIEVED: &str = "x-proxypilot-memory-retrieved";
const DIAG_MEMORY_LIMITED: &str = "x-proxypilot-memory-limited";
const DIAG_SEMANTIC_LIMITED: &str = "x-proxypilot-semantic-limited";

/// Remove every header a client uses to talk to proxypilot itself before the
/// request is forwarded upstream.
pub fn strip_client_only_headers(headers: &mut HeaderMap) {
    for name in CLIENT_ONLY_HEADERS {
        headers.remove(*name);
    }
}

/// 127.0.0.1 / ::1 only — the diagnostic headers are a developer-facing
/// surface, never exposed to a real upstream or a non-local caller.
pub fn is_loopback(addr: IpAddr) -> bool {
    addr.is_loopback()
}

/// Trimming-indicator headers, set on the outgoing (upstream) request
/// whenever the body was trimmed, regardless of caller.
pub fn apply_trimming_headers(headers: &mut HeaderMap, outcome: &PipelineOutcome) {
    if !outcome.trimmed {
        return;
    }
    insert(headers, TRIMMED, "true");
    insert(headers, ORIGINAL_BYTES, &outcome.original_bytes.to_string());
    insert(headers, TRIMMED_BYTES, &outcome.trimmed_bytes.to_string());
}

/// Diagnostic headers, set only when the caller is loopback.
pub fn apply_diagnostic_headers(headers: &mut HeaderMap, outcome: &PipelineOutcome, caller: IpAddr) {
    if !is_loopback(caller) {
        return;
    }
    insert(headers, DIAG_MODEL, &outcome.model);
    insert(headers, DIAG_CONTEXT_WINDOW, &outcome.context_window.to_string());
    insert(headers, DIAG_CURRENT_TOKENS, &outcome.current_tokens.to_string());
    insert(headers, DIAG_TARGET_TOKENS, &outcome.target_tokens.to_string());
    insert(headers, DIAG_TOKEN_TRIGGERED, &outcome.trimmed.to_string());
    insert(headers, DIAG_SESSION, &outcome.session);
    insert(headers, DIAG_REQUEST_SHAPE, outcome.shape.as_str());
    insert(headers, DIAG_MEMORY_STORED, &outcome.memory_stored.to_string());
    insert(headers, DIAG_MEMORY_RETRIEVED, &outcome.memory_retrieved.to_string());
    insert(headers, DIAG_MEMORY_LIMITED, &outcome.memory_limited.to_string());
    insert(headers, DIAG_SEMANTIC_LIMITED, &outcome.semantic_limited.to_string());
}

fn insert(headers: &mut HeaderMap, name: &str, value: &str) {
    if let (Ok(name), Ok(value)) = (HeaderName::from_bytes(name.as_bytes()), HeaderValue::from_str(value)) {
        headers.insert(name, value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proxypilot_model::Shape;
    use std::net::Ipv4Addr;

    fn header_map(pairs: &[(&str, &str)]) -> HeaderMap {
        let mut h = HeaderMap::new();
        for (k, v) in pairs {
            h.insert(HeaderName::from_bytes(k.as_bytes()).unwrap(), v.parse().unwrap());
        }
        h
    }

    #[test]
    fn strips_all_client_only_headers() {
        let mut headers = header_map(&[
            ("x-cliproxyapi-session", "s1"),
            ("x-cliproxyapi-todo", "1"),
            ("authorization", "Bearer x"),
        ]);
        strip_client_only_headers(&mut headers);
        assert!(!headers.contains_key("x-cliproxyapi-session"));
        assert!(!headers.contains_key("x-cliproxyapi-todo"));
        assert!(headers.contains_key("authorization"));
    }

    #[test]
    fn trimming_headers_set_only_when_trimmed() {
        let mut headers = HeaderMap::new();
        let outcome = PipelineOutcome {
            trimmed: true,
            original_bytes: 1000,
            trimmed_bytes: 400,
            ..Default::default()
        };
        apply_trimming_headers(&mut headers, &outcome);
        assert_eq!(headers.get(TRIMMED).unwrap(), "true");
        assert_eq!(headers.get(ORIGINAL_BYTES).unwrap(), "1000");
        assert_eq!(headers.get(TRIMMED_BYTES).unwrap(), "400");
    }

    #[test]
    fn trimming_headers_absent_when_untrimmed() {
        let mut headers = HeaderMap::new();
        apply_trimming_headers(&mut headers, &PipelineOutcome::default());
        assert!(!headers.contains_key(TRIMMED));
    }

    #[test]
    fn diagnostics_set_for_loopback_caller() {
        let mut headers = HeaderMap::new();
        let outcome = PipelineOutcome {
            model: "gpt-4o".to_string(),
            session: "s1".to_string(),
            shape: Shape::Chat,
            ..Default::default()
        };
        apply_diagnostic_headers(&mut headers, &outcome, IpAddr::V4(Ipv4Addr::LOCALHOST));
        assert_eq!(headers.get(DIAG_MODEL).unwrap(), "gpt-4o");
        assert_eq!(headers.get(DIAG_REQUEST_SHAPE).unwrap(), "chat");
    }

    #[test]
    fn diagnostics_absent_for_non_loopback_caller() {
        let mut headers = HeaderMap::new();
        let remote: IpAddr = "203.0.113.5".parse().unwrap();
        apply_diagnostic_headers(&mut headers, &PipelineOutcome::default(), remote);
        assert!(!headers.contains_key(DIAG_MODEL));
    }
}
