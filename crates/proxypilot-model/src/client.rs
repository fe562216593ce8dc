// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Classifies which agentic CLI product sent a request, from its
//! `User-Agent` string and header set. Used by the eligibility gate and by
//! the trimmers to decide whether tool definitions may be dropped under
//! budget pressure.

/// A recognised agentic CLI client, or `Other` for anything that matched the
/// eligibility gate (e.g. via an `X-Stainless-*` header) without a known
/// `User-Agent` marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientKind {
    OpenAiCodex,
    FactoryCli,
    Warp,
    Droid,
    ClaudeCli,
    /// Identified only by an `X-Stainless-*` header (the Stainless-generated
    /// SDK family used by several vendors).
    Stainless,
    Other,
}

impl ClientKind {
    /// Tool-mandatory clients keep `tools`/`tool_choice` in the outgoing
    /// body even when the trim loop would otherwise drop them under budget
    /// pressure: these products hard-fail if a tool call they already
    /// emitted can no longer be described.
    pub fn is_tool_mandatory(&self) -> bool {
        matches!(
            self,
            ClientKind::FactoryCli | ClientKind::Droid | ClientKind::ClaudeCli | ClientKind::Stainless
        )
    }
}

/// Detect the client kind from a lower-cased `User-Agent` value and whether
/// any `X-Stainless-*` header is present. Order matters only in that the
/// first matching marker wins; the markers are disjoint in practice.
pub fn detect_client_kind(user_agent: &str, has_stainless_header: bool) -> ClientKind {
    let ua = user_agent.to_ascii_lowercase();
    if ua.contains("openai codex") {
        ClientKind::OpenAiCodex
    } else if ua.contains("factory-cli") {
        ClientKind::FactoryCli
    } else if ua.contains("warp") {
        ClientKind::Warp
    } else if ua.contains("droid") {
        ClientKind::Droid
    } else if ua.contains("claude-cli") {
        ClientKind::ClaudeCli
    } else if has_stainless_header {
        ClientKind::Stainless
    } else {
        ClientKind::Other
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_openai_codex() {
        assert_eq!(
            detect_client_kind("OpenAI Codex/1.0", false),
            ClientKind::OpenAiCodex
        );
    }

    #[test]
    fn detects_case_insensitively() {
        assert_eq!(
            detect_client_kind("FACTORY-CLI/2.3", false),
            ClientKind::FactoryCli
        );
    }

    #[test]
    fn detects_stainless_header_without_ua_marker() {
        assert_eq!(
            detect_client_kind("some-random-http-client/1.0", true),
            ClientKind::Stainless
        );
    }

    #[test]
    fn falls_back_to_other() {
        assert_eq!(detect_client_kind("curl/8.0", false), ClientKind::Other);
    }

    #[test]
    fn tool_mandatory_clients() {
        assert!(ClientKind::FactoryCli.is_tool_mandatory());
        assert!(ClientKind::Droid.is_tool_mandatory());
        assert!(ClientKind::ClaudeCli.is_tool_mandatory());
        assert!(ClientKind::Stainless.is_tool_mandatory());
    }

    #[test]
    fn non_tool_mandatory_clients() {
        assert!(!ClientKind::OpenAiCodex.is_tool_mandatory());
        assert!(!ClientKind::Warp.is_tool_mandatory());
        assert!(!ClientKind::Other.is_tool_mandatory());
    }
}
