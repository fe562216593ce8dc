// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::path::PathBuf;

/// Strategy used by the anchored summarizer when merging dropped turns into
/// the rolling per-session summary.
///
/// `Narrative` (default) asks for free-form prose, matching the shape the
/// regex fallback also produces. `Structured` produces a fixed-section
/// Markdown checkpoint (Active Task / Key Decisions / Files / Constraints /
/// Pending / Narrative), which some downstream models navigate better.
/// Selected via `CLIPROXY_ANCHOR_STYLE`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AnchorStrategy {
    #[default]
    Narrative,
    Structured,
}

impl AnchorStrategy {
    fn from_env_value(value: &str) -> Self {
        match value.to_ascii_lowercase().as_str() {
            "structured" => AnchorStrategy::Structured,
            _ => AnchorStrategy::Narrative,
        }
    }
}

impl std::fmt::Display for AnchorStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AnchorStrategy::Narrative => write!(f, "narrative"),
            AnchorStrategy::Structured => write!(f, "structured"),
        }
    }
}

/// Fully-resolved runtime configuration, read once from the environment at
/// process start. Every field has a typed default so a deployment that sets
/// no `CLIPROXY_*` variable at all still gets sane, documented behavior.
#[derive(Debug, Clone)]
pub struct ProxyPilotConfig {
    // ── Eligibility / budget ────────────────────────────────────────────
    /// `CLIPROXY_AGENTIC_MAX_BODY_BYTES`, clamped to 32 KiB–2 MiB.
    pub max_body_bytes: u64,
    /// `CLIPROXY_COMPRESSION_THRESHOLD`, clamped to `[0.0, 1.0]`.
    pub compression_threshold: f32,
    /// `CLIPROXY_MIN_KEEP_MESSAGES`.
    pub min_keep_messages: usize,
    /// `CLIPROXY_TOKEN_AWARE_ENABLED`.
    pub token_aware_enabled: bool,
    /// `CLIPROXY_RESERVE_TOKENS`.
    pub reserve_tokens: u32,

    // ── Memory store ────────────────────────────────────────────────────
    /// `CLIPROXY_MEMORY_ENABLED`.
    pub memory_enabled: bool,
    /// `CLIPROXY_MEMORY_DIR`; `None` means the default
    /// `<writable-home>/.proxypilot/memory`.
    pub memory_dir: Option<PathBuf>,
    /// `CLIPROXY_MEMORY_MAX_AGE_DAYS`.
    pub memory_max_age_days: u32,
    /// `CLIPROXY_MEMORY_MAX_SESSIONS`.
    pub memory_max_sessions: usize,
    /// `CLIPROXY_MEMORY_MAX_BYTES_PER_SESSION`.
    pub memory_max_bytes_per_session: u64,
    /// `CLIPROXY_MEMORY_MAX_WRITES_PER_MIN`.
    pub memory_max_writes_per_min: u32,

    // ── Scaffold / TODO injection ───────────────────────────────────────
    /// `CLIPROXY_TODO_ENABLED`.
    pub todo_enabled: bool,
    /// `CLIPROXY_SCAFFOLD_ENABLED`.
    pub scaffold_enabled: bool,
    /// `CLIPROXY_SCAFFOLD_APPEND_ONLY`.
    pub scaffold_append_only: bool,
    /// `CLIPROXY_TODO_MAX_CHARS`, clamped to 512–20 000.
    pub todo_max_chars: usize,
    /// `CLIPROXY_SPEC_MODE`.
    pub spec_mode: bool,

    // ── Semantic retrieval ──────────────────────────────────────────────
    /// `CLIPROXY_SEMANTIC_ENABLED`.
    pub semantic_enabled: bool,
    /// `CLIPROXY_SEMANTIC_MODEL`.
    pub semantic_model: String,
    /// `CLIPROXY_SEMANTIC_BASE_URL`.
    pub semantic_base_url: String,
    /// `CLIPROXY_SEMANTIC_MAX_SNIPS`.
    pub semantic_max_snips: usize,
    /// `CLIPROXY_SEMANTIC_MAX_CHARS`.
    pub semantic_max_chars: usize,
    /// `CLIPROXY_SEMANTIC_QUERY_MAX_CHARS`.
    pub semantic_query_max_chars: usize,
    /// `CLIPROXY_SEMANTIC_MAX_NAMESPACES`.
    pub semantic_max_namespaces: usize,
    /// `CLIPROXY_SEMANTIC_MAX_BYTES_PER_NAMESPACE`.
    pub semantic_max_bytes_per_namespace: u64,
    /// `CLIPROXY_SEMANTIC_MAX_WRITES_PER_MIN`.
    pub semantic_max_writes_per_min: u32,
    /// `CLIPROXY_SEMANTIC_LEXICAL_WEIGHT`, clamped to `[0.0, 1.0]`. Zero
    /// means pure cosine ranking; the lexical blend is opt-in.
    pub semantic_lexical_weight: f32,

    // ── Anchored summary ────────────────────────────────────────────────
    /// `CLIPROXY_ANCHOR_APPEND_ONLY`.
    pub anchor_append_only: bool,
    /// `CLIPROXY_ANCHOR_SUMMARY_MAX_CHARS`.
    pub anchor_summary_max_chars: usize,
    /// `CLIPROXY_ANCHOR_STYLE`.
    pub anchor_style: AnchorStrategy,
    /// `CLIPROXY_ANCHOR_RETRY_LLM`. Off by default: a failed LLM summary
    /// already falls back to the regex path in the same request, so
    /// retrying next request only re-pays the synchronous round trip.
    pub anchor_retry_llm: bool,
    /// `CLIPROXY_LLM_SUMMARY_ENABLED`.
    pub llm_summary_enabled: bool,
    /// `CLIPROXY_SUMMARY_MODEL`.
    pub summary_model: String,
}

impl Default for ProxyPilotConfig {
    fn default() -> Self {
        Self {
            max_body_bytes: 200 * 1024,
            compression_threshold: 0.85,
            min_keep_messages: 25,
            token_aware_enabled: true,
            reserve_tokens: 8192,

            memory_enabled: true,
            memory_dir: None,
            memory_max_age_days: 30,
            memory_max_sessions: 500,
            memory_max_bytes_per_session: 4 * 1024 * 1024,
            memory_max_writes_per_min: 120,

            todo_enabled: true,
            scaffold_enabled: true,
            scaffold_append_only: true,
            todo_max_chars: 4096,
            spec_mode: false,

            semantic_enabled: true,
            semantic_model: "nomic-embed-text".to_string(),
            semantic_base_url: "http://localhost:11434".to_string(),
            semantic_max_snips: 3,
            semantic_max_chars: 2000,
            semantic_query_max_chars: 1000,
            semantic_max_namespaces: 100,
            semantic_max_bytes_per_namespace: 16 * 1024 * 1024,
            semantic_max_writes_per_min: 60,
            semantic_lexical_weight: 0.0,

            anchor_append_only: true,
            anchor_summary_max_chars: 14_000,
            anchor_style: AnchorStrategy::Narrative,
            anchor_retry_llm: false,
            llm_summary_enabled: false,
            summary_model: "gemini-3-flash".to_string(),
        }
    }
}

impl ProxyPilotConfig {
    pub(crate) fn clamp(mut self) -> Self {
        self.max_body_bytes = self.max_body_bytes.clamp(32 * 1024, 2 * 1024 * 1024);
        self.compression_threshold = self.compression_threshold.clamp(0.0, 1.0);
        self.todo_max_chars = self.todo_max_chars.clamp(512, 20_000);
        self.semantic_lexical_weight = self.semantic_lexical_weight.clamp(0.0, 1.0);
        self
    }
}

pub(crate) fn anchor_strategy_from_env(value: &str) -> AnchorStrategy {
    AnchorStrategy::from_env_value(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_self_consistent_after_clamp() {
        let cfg = ProxyPilotConfig::default().clamp();
        assert_eq!(cfg.max_body_bytes, 200 * 1024);
        assert_eq!(cfg.todo_max_chars, 4096);
    }

    #[test]
    fn clamp_enforces_body_byte_floor() {
        let mut cfg = ProxyPilotConfig::default();
        cfg.max_body_bytes = 10;
        assert_eq!(cfg.clamp().max_body_bytes, 32 * 1024);
    }

    #[test]
    fn clamp_enforces_body_byte_ceiling() {
        let mut cfg = ProxyPilotConfig::default();
        cfg.max_body_bytes = u64::MAX;
        assert_eq!(cfg.clamp().max_body_bytes, 2 * 1024 * 1024);
    }

    #[test]
    fn anchor_style_parses_structured() {
        assert_eq!(
            anchor_strategy_from_env("Structured"),
            AnchorStrategy::Structured
        );
    }

    #[test]
    fn anchor_style_falls_back_to_narrative() {
        assert_eq!(anchor_strategy_from_env("garbage"), AnchorStrategy::Narrative);
    }

    #[test]
    fn anchor_style_display() {
        assert_eq!(AnchorStrategy::Structured.to_string(), "structured");
    }
}
