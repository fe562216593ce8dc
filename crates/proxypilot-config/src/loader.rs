// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::path::PathBuf;

use tracing::debug;

use crate::schema::anchor_strategy_from_env;
use crate::ProxyPilotConfig;

/// Read a `CLIPROXY_*` boolean variable. Accepts `0`/`false`/`off`/`no`
/// (case-insensitive) as false and anything else present as true; an unset
/// variable keeps `default`.
fn env_bool(name: &str, default: bool) -> bool {
    match std::env::var(name) {
        Ok(raw) => !matches!(raw.to_ascii_lowercase().as_str(), "0" | "false" | "off" | "no"),
        Err(_) => default,
    }
}

fn env_parsed<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|raw| raw.parse::<T>().ok())
        .unwrap_or(default)
}

fn env_string(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}

/// Load [`ProxyPilotConfig`] from the process environment.
/// Every variable is optional; unset or unparseable values fall back to the
/// documented default rather than failing the load, since a malformed
/// `CLIPROXY_*` variable must never take the proxy itself down.
pub fn load() -> ProxyPilotConfig {
    let defaults = ProxyPilotConfig::default();

    let cfg = ProxyPilotConfig {
        max_body_bytes: env_parsed("CLIPROXY_AGENTIC_MAX_BODY_BYTES", defaults.max_body_bytes),
        compression_threshold: env_parsed(
            "CLIPROXY_COMPRESSION_THRESHOLD",
            defaults.compression_threshold,
        ),
        min_keep_messages: env_parsed("CLIPROXY_MIN_KEEP_MESSAGES", defaults.min_keep_messages),
        token_aware_enabled: env_bool("CLIPROXY_TOKEN_AWARE_ENABLED", defaults.token_aware_enabled),
        reserve_tokens: env_parsed("CLIPROXY_RESERVE_TOKENS", defaults.reserve_tokens),

        memory_enabled: env_bool("CLIPROXY_MEMORY_ENABLED", defaults.memory_enabled),
        memory_dir: std::env::var("CLIPROXY_MEMORY_DIR").ok().map(PathBuf::from),
        memory_max_age_days: env_parsed(
            "CLIPROXY_MEMORY_MAX_AGE_DAYS",
            defaults.memory_max_age_days,
        ),
        memory_max_sessions: env_parsed(
            "CLIPROXY_MEMORY_MAX_SESSIONS",
            defaults.memory_max_sessions,
        ),
        memory_max_bytes_per_session: env_parsed(
            "CLIPROXY_MEMORY_MAX_BYTES_PER_SESSION",
            defaults.memory_max_bytes_per_session,
        ),
        memory_max_writes_per_min: env_parsed(
            "CLIPROXY_MEMORY_MAX_WRITES_PER_MIN",
            defaults.memory_max_writes_per_min,
        ),

        todo_enabled: env_bool("CLIPROXY_TODO_ENABLED", defaults.todo_enabled),
        scaffold_enabled: env_bool("CLIPROXY_SCAFFOLD_ENABLED", defaults.scaffold_enabled),
        scaffold_append_only: env_bool(
            "CLIPROXY_SCAFFOLD_APPEND_ONLY",
            defaults.scaffold_append_only,
        ),
        todo_max_chars: env_parsed("CLIPROXY_TODO_MAX_CHARS", defaults.todo_max_chars),
        spec_mode: env_bool("CLIPROXY_SPEC_MODE", defaults.spec_mode),

        semantic_enabled: env_bool("CLIPROXY_SEMANTIC_ENABLED", defaults.semantic_enabled),
        semantic_model: env_string("CLIPROXY_SEMANTIC_MODEL", &defaults.semantic_model),
        semantic_base_url: env_string("CLIPROXY_SEMANTIC_BASE_URL", &defaults.semantic_base_url),
        semantic_max_snips: env_parsed(
            "CLIPROXY_SEMANTIC_MAX_SNIPS",
            defaults.semantic_max_snips,
        ),
        semantic_max_chars: env_parsed(
            "CLIPROXY_SEMANTIC_MAX_CHARS",
            defaults.semantic_max_chars,
        ),
        semantic_query_max_chars: env_parsed(
            "CLIPROXY_SEMANTIC_QUERY_MAX_CHARS",
            defaults.semantic_query_max_chars,
        ),
        semantic_max_namespaces: env_parsed(
            "CLIPROXY_SEMANTIC_MAX_NAMESPACES",
            defaults.semantic_max_namespaces,
        ),
        semantic_max_bytes_per_namespace: env_parsed(
            "CLIPROXY_SEMANTIC_MAX_BYTES_PER_NAMESPACE",
            defaults.semantic_max_bytes_per_namespace,
        ),
        semantic_max_writes_per_min: env_parsed(
            "CLIPROXY_SEMANTIC_MAX_WRITES_PER_MIN",
            defaults.semantic_max_writes_per_min,
        ),
        semantic_lexical_weight: env_parsed(
            "CLIPROXY_SEMANTIC_LEXICAL_WEIGHT",
            defaults.semantic_lexical_weight,
        ),

        anchor_append_only: env_bool("CLIPROXY_ANCHOR_APPEND_ONLY", defaults.anchor_append_only),
        anchor_summary_max_chars: env_parsed(
            "CLIPROXY_ANCHOR_SUMMARY_MAX_CHARS",
            defaults.anchor_summary_max_chars,
        ),
        anchor_style: std::env::var("CLIPROXY_ANCHOR_STYLE")
            .ok()
            .map(|v| anchor_strategy_from_env(&v))
            .unwrap_or(defaults.anchor_style),
        anchor_retry_llm: env_bool("CLIPROXY_ANCHOR_RETRY_LLM", defaults.anchor_retry_llm),
        llm_summary_enabled: env_bool(
            "CLIPROXY_LLM_SUMMARY_ENABLED",
            defaults.llm_summary_enabled,
        ),
        summary_model: env_string("CLIPROXY_SUMMARY_MODEL", &defaults.summary_model),
    }
    .clamp();

    debug!(
        max_body_bytes = cfg.max_body_bytes,
        memory_enabled = cfg.memory_enabled,
        semantic_enabled = cfg.semantic_enabled,
        anchor_style = %cfg.anchor_style,
        "loaded proxypilot configuration from environment"
    );

    cfg
}
