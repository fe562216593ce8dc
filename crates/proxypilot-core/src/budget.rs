// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Token/byte budget analyzer: decides whether a request needs trimming
//! and, if so, the target token and byte budgets to trim toward.

use proxypilot_config::ProxyPilotConfig;
use serde_json::Value;

/// Default byte budget used when the body carries no recognizable `model`
/// field, or when token-aware mode is disabled.
const DEFAULT_BYTE_BUDGET: u64 = 200 * 1024;

const MIN_TARGET_BYTES: u64 = 32 * 1024;

/// Result of analyzing a request body against the model's context window
/// and the configured compression threshold.
#[derive(Debug, Clone, PartialEq)]
pub struct BudgetAnalysis {
    pub should_trim: bool,
    pub current_tokens: u64,
    pub context_window: u32,
    pub target_tokens: u64,
    pub target_max_bytes: u64,
    pub model: String,
}

/// A four-bytes-per-token heuristic. Kept as its own function so a more
/// accurate estimator can be swapped in without touching callers.
fn estimate_tokens_for(body_bytes: usize) -> u64 {
    (body_bytes as u64) / 4
}

/// Run the budget analyzer over a parsed body and its raw byte length.
///
/// `body_bytes` is the exact wire length of `body` as it will be
/// serialized; callers that have already parsed the JSON still need the
/// original byte count (re-serializing can change whitespace and shift the
/// result by a few bytes, which would make [`BudgetAnalysis::should_trim`]
/// disagree with what was actually sent).
pub fn analyze(body: &Value, body_bytes: usize, cfg: &ProxyPilotConfig) -> BudgetAnalysis {
    let model = body
        .get("model")
        .and_then(Value::as_str)
        .unwrap_or("")
        .to_string();

    if model.is_empty() {
        return BudgetAnalysis {
            should_trim: false,
            current_tokens: estimate_tokens_for(body_bytes),
            context_window: 0,
            target_tokens: 0,
            target_max_bytes: DEFAULT_BYTE_BUDGET.clamp(32 * 1024, cfg.max_body_bytes),
            model,
        };
    }

    let context_window = proxypilot_model::context_window(&model);

    if !cfg.token_aware_enabled {
        let byte_budget = ((context_window as u64) * 4)
            .min(DEFAULT_BYTE_BUDGET)
            .clamp(32 * 1024, cfg.max_body_bytes);
        return BudgetAnalysis {
            should_trim: (body_bytes as u64) > byte_budget,
            current_tokens: estimate_tokens_for(body_bytes),
            context_window,
            target_tokens: 0,
            target_max_bytes: byte_budget,
            model,
        };
    }

    let current_tokens = estimate_tokens_for(body_bytes);
    let reserve = cfg.reserve_tokens as u64;
    let window = context_window as u64;
    let available = window.saturating_sub(reserve).max(window / 2);
    let threshold = cfg.compression_threshold as f64;
    let available_threshold = (available as f64 * threshold) as u64;

    if current_tokens <= available_threshold {
        return BudgetAnalysis {
            should_trim: false,
            current_tokens,
            context_window,
            target_tokens: 0,
            target_max_bytes: cfg.max_body_bytes,
            model,
        };
    }

    let target_tokens = (available as f64 * threshold * 0.9) as u64;
    let target_max_bytes = (target_tokens * 4).clamp(MIN_TARGET_BYTES, cfg.max_body_bytes);

    BudgetAnalysis {
        should_trim: true,
        current_tokens,
        context_window,
        target_tokens,
        target_max_bytes,
        model,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn cfg() -> ProxyPilotConfig {
        ProxyPilotConfig::default()
    }

    #[test]
    fn empty_model_disables_trimming() {
        let body = json!({"messages": []});
        let analysis = analyze(&body, 1000, &cfg());
        assert!(!analysis.should_trim);
        assert_eq!(analysis.context_window, 0);
    }

    #[test]
    fn small_body_under_threshold_does_not_trim() {
        let body = json!({"model": "gpt-4o", "messages": []});
        let analysis = analyze(&body, 1000, &cfg());
        assert!(!analysis.should_trim);
        assert_eq!(analysis.context_window, 128_000);
    }

    #[test]
    fn huge_body_over_threshold_triggers_trim() {
        let body = json!({"model": "gpt-4", "messages": []}); // 8k window
        // available = max(8000-8192, 4000) = 4000 tokens -> ~16000 bytes threshold*0.85
        let analysis = analyze(&body, 1_000_000, &cfg());
        assert!(analysis.should_trim);
        assert!(analysis.target_tokens > 0);
        assert!(analysis.target_max_bytes >= 32 * 1024);
    }

    #[test]
    fn target_max_bytes_never_exceeds_global_cap() {
        let mut c = cfg();
        c.max_body_bytes = 50 * 1024;
        let body = json!({"model": "gemini-1.5-pro", "messages": []});
        let analysis = analyze(&body, 10_000_000, &c);
        assert!(analysis.target_max_bytes <= 50 * 1024);
    }

    #[test]
    fn token_aware_disabled_uses_byte_only_budget() {
        let mut c = cfg();
        c.token_aware_enabled = false;
        let body = json!({"model": "gpt-4", "messages": []});
        let analysis = analyze(&body, 500_000, &c);
        assert!(analysis.should_trim);
        assert_eq!(analysis.target_tokens, 0);
    }

    #[test]
    fn token_aware_disabled_small_body_does_not_trim() {
        let mut c = cfg();
        c.token_aware_enabled = false;
        let body = json!({"model": "gpt-4", "messages": []});
        let analysis = analyze(&body, 100, &c);
        assert!(!analysis.should_trim);
    }
}
