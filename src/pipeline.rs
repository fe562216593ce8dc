// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! The framework-agnostic pipeline: everything from "parse the body" to
//! "here is the new body plus a diagnostics record", with no knowledge of
//! axum, tower, or HTTP transport. [`crate::layer`] is the only thing that
//! knows this function exists inside an HTTP request.

use http::HeaderMap;
use proxypilot_core::{
    analyze, body_contains_spec_approved, build_anchored_summary, build_scaffold_block, extract_coding_guidelines,
    extract_last_user_text, extract_pinned_text, inject_scaffold, trim_chat, trim_claude, trim_responses,
    truncate_with_sentinel, ScaffoldInput,
};
use proxypilot_memory::Snippet;
use proxypilot_model::{detect_client_kind, Event, Shape};
use serde_json::Value;

use crate::eligibility::{self, SPEC_MODE_HEADER, TODO_HEADER};
use crate::error::PipelineError;
use crate::state::ProxyPilotState;

/// Requests larger than this are forwarded truncated, never rejected.
pub const HARD_BODY_CEILING: usize = 10 * 1024 * 1024;

const MEMORY_LEXICAL_MAX_CHARS: usize = 6_000;
const MEMORY_LEXICAL_MAX_SNIPS: usize = 8;
const SCAFFOLD_MEMORY_MAX_CHARS: usize = 2_000;
const SCAFFOLD_MEMORY_MAX_SNIPS: usize = 4;
const RETRIEVAL_MARGIN_BYTES: usize = 512;
const PINNED_CAP_CHARS: usize = 4_096;

/// Everything the pipeline learned while processing one request, used both
/// to set response/upstream headers and for tests to assert on behavior.
#[derive(Debug, Clone)]
pub struct PipelineOutcome {
    pub trimmed: bool,
    pub original_bytes: u64,
    pub trimmed_bytes: u64,
    pub model: String,
    pub context_window: u32,
    pub current_tokens: u64,
    pub target_tokens: u64,
    pub session: String,
    pub shape: Shape,
    pub memory_stored: bool,
    pub memory_retrieved: bool,
    pub memory_limited: bool,
    pub semantic_limited: bool,
    pub scaffold_injected: bool,
    pub semantic_disabled: bool,
}

impl Default for PipelineOutcome {
    fn default() -> Self {
        Self {
            trimmed: false,
            original_bytes: 0,
            trimmed_bytes: 0,
            model: String::new(),
            context_window: 0,
            current_tokens: 0,
            target_tokens: 0,
            session: String::new(),
            shape: Shape::Unknown,
            memory_stored: false,
            memory_retrieved: false,
            memory_limited: false,
            semantic_limited: false,
            scaffold_injected: false,
            semantic_disabled: false,
        }
    }
}

/// Truncate an over-ceiling body instead of rejecting it. Not UTF-8-aware:
/// a request that gets here is already too big to salvage cleanly, and the
/// trimmer downstream only needs *a* body, not a semantically complete
/// one.
pub fn truncate_to_ceiling(mut body: Vec<u8>) -> Vec<u8> {
    body.truncate(HARD_BODY_CEILING);
    body
}

/// Run the full pipeline over one eligible request. `headers` is the
/// inbound request's header map (still containing the client-only control
/// headers — [`crate::headers::strip_client_only_headers`] removes those
/// separately, after this returns). Returns the rewritten body bytes plus a
/// diagnostics record.
pub async fn run(
    state: &ProxyPilotState,
    headers: &HeaderMap,
    path: &str,
    raw_body: Vec<u8>,
) -> Result<(Vec<u8>, PipelineOutcome), PipelineError> {
    let raw_body = truncate_to_ceiling(raw_body);
    let original_bytes = raw_body.len() as u64;

    if raw_body.is_empty() {
        return Ok((raw_body, PipelineOutcome::default()));
    }

    let mut body: Value = match serde_json::from_slice(&raw_body) {
        Ok(v) => v,
        Err(_) => return Ok((raw_body, PipelineOutcome::default())),
    };

    let shape = Shape::from_path(path);
    let session = eligibility::derive_session_key(headers, &body);
    let namespace = eligibility::derive_namespace(headers, &body, &session);
    let ua = headers.get(http::header::USER_AGENT).and_then(|v| v.to_str().ok()).unwrap_or("");
    let has_stainless = headers.keys().any(|n| n.as_str().to_ascii_lowercase().starts_with("x-stainless-"));
    let client = detect_client_kind(ua, has_stainless);

    let mut outcome = PipelineOutcome {
        session: session.clone(),
        shape,
        original_bytes,
        ..Default::default()
    };

    state.maybe_prune();

    let mut analysis = analyze(&body, raw_body.len(), &state.config);

    let mut scaffold_injected = false;
    if state.config.scaffold_enabled && shape != Shape::Unknown {
        scaffold_injected = apply_scaffold(state, headers, &mut body, shape, &session, &namespace);
        let reserialized = serde_json::to_vec(&body).unwrap_or_default();
        analysis = analyze(&body, reserialized.len(), &state.config);
    }
    outcome.scaffold_injected = scaffold_injected;
    outcome.model = analysis.model.clone();
    outcome.context_window = analysis.context_window;
    outcome.current_tokens = analysis.current_tokens;
    outcome.target_tokens = analysis.target_tokens;

    let mut did_trim = false;
    if analysis.should_trim && shape != Shape::Unknown {
        did_trim = true;
        let trim_outcome = match shape {
            Shape::Chat => trim_chat(&body, &state.config, analysis.target_max_bytes, client),
            Shape::Responses => trim_responses(&body, &state.config, analysis.target_max_bytes, client),
            Shape::Claude => trim_claude(&body, &state.config, analysis.target_max_bytes, client),
            Shape::Unknown => unreachable!("guarded above"),
        };
        body = trim_outcome.body;
        let query = trim_outcome.query;
        let dropped = trim_outcome.dropped;

        // With memory disabled, trimming still happens but nothing is
        // persisted, summarized, embedded, or retrieved.
        if state.config.memory_enabled {
            if !dropped.is_empty() {
                let permitted = state.limiter.allow_memory_write(&session);
                state.counters.record_memory_write(permitted);
                if permitted {
                    let _ = state.store.append(&session, &dropped);
                    outcome.memory_stored = true;
                } else {
                    outcome.memory_limited = true;
                }
                update_anchored_summary(state, &session, &dropped, &query).await;
                enqueue_semantic_embeds(state, &namespace, &session, &dropped, &mut outcome);
            }

            if !query.is_empty() {
                run_retrieval(
                    state,
                    &mut body,
                    shape,
                    &namespace,
                    &session,
                    &query,
                    analysis.target_max_bytes,
                    &mut outcome,
                )
                .await;
            }
        }
    }

    outcome.semantic_disabled = state.store.is_semantic_disabled(&session);

    // Untouched requests forward the original bytes verbatim; re-serializing
    // would reorder keys and change whitespace.
    let final_bytes = if scaffold_injected || did_trim {
        serde_json::to_vec(&body).map_err(proxypilot_core::CoreError::from)?
    } else {
        raw_body
    };
    outcome.trimmed = did_trim;
    outcome.trimmed_bytes = final_bytes.len() as u64;

    Ok((final_bytes, outcome))
}

/// TODO-header absorption, `<coding_guidelines>` extraction into pinned,
/// TODO seeding, scaffold assembly and injection. Returns whether a block
/// was actually injected.
fn apply_scaffold(
    state: &ProxyPilotState,
    headers: &HeaderMap,
    body: &mut Value,
    shape: Shape,
    session: &str,
    namespace: &str,
) -> bool {
    if let Some(todo_header) = headers.get(TODO_HEADER).and_then(|v| v.to_str().ok()) {
        let _ = state.store.write_todo(session, todo_header, state.config.todo_max_chars);
    }

    let pinned_from_body = extract_pinned_text(shape, body).unwrap_or_default();
    let last_user_text = extract_last_user_text(shape, body);
    if let Some(guidelines) = extract_coding_guidelines(&pinned_from_body).or_else(|| extract_coding_guidelines(&last_user_text)) {
        let existing = state.store.read_pinned(session).unwrap_or_default();
        let merged = if existing.contains(guidelines.as_str()) {
            existing
        } else if existing.is_empty() {
            guidelines
        } else {
            format!("{existing}\n\n{guidelines}")
        };
        let _ = state.store.write_pinned(session, &merged, PINNED_CAP_CHARS);
    }

    if state.config.todo_enabled && state.store.read_todo(session).is_none() && !last_user_text.is_empty() {
        let seeded = truncate_with_sentinel(&last_user_text, state.config.todo_max_chars);
        let _ = state.store.write_todo(session, &seeded, state.config.todo_max_chars);
    }

    let anchor = promote_pending_anchor(state, session);
    let spec_mode_requested = state.config.spec_mode
        || headers.get(SPEC_MODE_HEADER).map(|v| v == "1" || v == "true").unwrap_or(false)
        || body.get("spec_mode").and_then(Value::as_bool).unwrap_or(false)
        || body.pointer("/metadata/spec_mode").and_then(Value::as_bool).unwrap_or(false);
    let spec_approved = body_contains_spec_approved(&last_user_text);

    // The scaffold's memory section comes from the lexical index only; the
    // semantic snippets ride the retrieval injector on the last user
    // message instead, where the embed call is already paid for.
    let memory = if last_user_text.is_empty() {
        None
    } else {
        let snips = state.store.search(
            session,
            &last_user_text,
            SCAFFOLD_MEMORY_MAX_CHARS,
            SCAFFOLD_MEMORY_MAX_SNIPS,
        );
        if snips.is_empty() { None } else { Some(format_snippet_lines(&snips)) }
    };

    let input = ScaffoldInput {
        pinned: state.store.read_pinned(session),
        agents_md: read_agents_md(namespace),
        anchor,
        todo: if state.config.todo_enabled { state.store.read_todo(session) } else { None },
        memory,
        spec_mode_requested,
        spec_approved_in_body: spec_approved,
    };

    let body_len = serde_json::to_vec(body).map(|v| v.len()).unwrap_or(0);
    let remaining_budget = state.config.max_body_bytes.saturating_sub(body_len as u64) as usize;
    match build_scaffold_block(&input, remaining_budget) {
        Some(block) => {
            inject_scaffold(shape, body, &block, state.config.scaffold_append_only);
            true
        }
        None => false,
    }
}

/// Workspace-level durable instructions, merged into the pinned section
/// when the namespace is a real workspace path.
fn read_agents_md(namespace: &str) -> Option<String> {
    if !std::path::Path::new(namespace).is_absolute() {
        return None;
    }
    let path = std::path::Path::new(namespace).join("AGENTS.md");
    std::fs::read_to_string(path).ok().filter(|s| !s.trim().is_empty())
}

/// Under append-only anchor mode the new summary is written as "pending"
/// and only promoted to the real summary (then cleared) on the request that
/// reads it — so an in-flight request never observes a summary of itself.
fn promote_pending_anchor(state: &ProxyPilotState, session: &str) -> Option<String> {
    match state.store.read_pending_anchor(session) {
        Some(pending) => {
            let _ = state.store.write_summary(session, &pending, state.config.anchor_summary_max_chars);
            let _ = state.store.clear_pending_anchor(session);
            Some(pending)
        }
        None => state.store.read_summary(session),
    }
}

async fn update_anchored_summary(state: &ProxyPilotState, session: &str, dropped: &[Event], query: &str) {
    let prev = state.store.read_summary(session).unwrap_or_default();
    let executor = if state.config.llm_summary_enabled
        && (state.config.anchor_retry_llm || !state.llm_summary_failed(session))
    {
        state.summary_executor.as_deref()
    } else {
        None
    };
    let next = build_anchored_summary(
        &prev,
        dropped,
        query,
        state.config.anchor_style,
        &state.config.summary_model,
        state.config.anchor_summary_max_chars,
        executor,
    )
    .await;
    if next.llm_failed {
        state.mark_llm_summary_failed(session);
    }

    let result = if state.config.anchor_append_only {
        state.store.set_pending_anchor(session, &next.text, state.config.anchor_summary_max_chars)
    } else {
        state.store.write_summary(session, &next.text, state.config.anchor_summary_max_chars)
    };
    if let Err(err) = result {
        tracing::warn!(error = %err, session, "failed to persist anchored summary");
    }
}

fn enqueue_semantic_embeds(
    state: &ProxyPilotState,
    namespace: &str,
    session: &str,
    dropped: &[Event],
    outcome: &mut PipelineOutcome,
) {
    let Some(queue) = state.embed_queue.as_ref() else { return };
    if !state.config.semantic_enabled || state.store.is_semantic_disabled(session) {
        return;
    }
    let permitted = state.limiter.allow_semantic_write(namespace);
    state.counters.record_semantic_write(permitted);
    if !permitted {
        outcome.semantic_limited = true;
        return;
    }
    let texts: Vec<String> = dropped.iter().map(|e| e.text.clone()).collect();
    let roles: Vec<String> = dropped.iter().map(|e| e.role.clone()).collect();
    queue.enqueue(proxypilot_memory::EmbedTask {
        namespace: namespace.to_string(),
        session: session.to_string(),
        texts,
        roles,
        source: "dropped".to_string(),
    });
}

/// Lexical + semantic retrieval, combined into a single `<memory>` block
/// appended to the last user message within the remaining byte budget. The
/// block is omitted entirely when it would not fit, never silently
/// truncated.
#[allow(clippy::too_many_arguments)]
async fn run_retrieval(
    state: &ProxyPilotState,
    body: &mut Value,
    shape: Shape,
    namespace: &str,
    session: &str,
    query: &str,
    max_bytes: u64,
    outcome: &mut PipelineOutcome,
) {
    let mut snippets: Vec<Snippet> = state.store.search(session, query, MEMORY_LEXICAL_MAX_CHARS, MEMORY_LEXICAL_MAX_SNIPS);

    if state.config.semantic_enabled && !state.store.is_semantic_disabled(session) {
        if let Some(client) = state.embed_client.as_ref() {
            let query_capped = truncate_with_sentinel(query, state.config.semantic_query_max_chars);
            match client.embed(&[query_capped.clone()]).await {
                Err(_) => state.record_semantic_failure(session),
                Ok(vectors) => {
                    state.record_semantic_success(session);
                    if let Some(vec) = vectors.into_iter().next() {
                        let semantic_snips = state.semantic.search_semantic(
                            namespace,
                            &vec,
                            query,
                            state.config.semantic_max_chars,
                            state.config.semantic_max_snips,
                            state.config.semantic_lexical_weight,
                        );
                        snippets.extend(semantic_snips);

                        if let Some(queue) = state.embed_queue.as_ref() {
                            let permitted = state.limiter.allow_semantic_write(namespace);
                            state.counters.record_semantic_write(permitted);
                            if permitted {
                                queue.enqueue(proxypilot_memory::EmbedTask {
                                    namespace: namespace.to_string(),
                                    session: session.to_string(),
                                    texts: vec![query.to_string()],
                                    roles: vec!["user".to_string()],
                                    source: "retrieval".to_string(),
                                });
                            } else {
                                outcome.semantic_limited = true;
                            }
                        }
                    }
                }
            }
        }
    }

    if snippets.is_empty() {
        return;
    }

    let block = format_memory_block(&snippets);
    let body_len = serde_json::to_vec(body).map(|v| v.len()).unwrap_or(0);
    if body_len + block.len() + RETRIEVAL_MARGIN_BYTES > max_bytes as usize {
        return;
    }

    proxypilot_core::append_to_last_user_text(shape, body, &block);
    outcome.memory_retrieved = true;
}

fn format_snippet_lines(snippets: &[Snippet]) -> String {
    snippets
        .iter()
        .map(|s| format!("- [{}] {}", s.role, s.text))
        .collect::<Vec<_>>()
        .join("\n")
}

fn format_memory_block(snippets: &[Snippet]) -> String {
    format!("<memory>\n{}\n</memory>", format_snippet_lines(snippets))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proxypilot_config::ProxyPilotConfig;
    use serde_json::json;

    fn test_state() -> (tempfile::TempDir, ProxyPilotState) {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = ProxyPilotConfig::default();
        cfg.memory_dir = Some(dir.path().to_path_buf());
        cfg.semantic_enabled = false;
        (dir, ProxyPilotState::new(cfg, None))
    }

    #[tokio::test]
    async fn pass_through_for_empty_body() {
        let (_dir, state) = test_state();
        let headers = HeaderMap::new();
        let (body, outcome) = run(&state, &headers, "/v1/chat/completions", Vec::new()).await.unwrap();
        assert!(body.is_empty());
        assert!(!outcome.trimmed);
    }

    #[tokio::test]
    async fn pass_through_for_unparseable_body() {
        let (_dir, state) = test_state();
        let headers = HeaderMap::new();
        let raw = b"not json".to_vec();
        let (body, outcome) = run(&state, &headers, "/v1/chat/completions", raw.clone()).await.unwrap();
        assert_eq!(body, raw);
        assert!(!outcome.trimmed);
    }

    #[tokio::test]
    async fn small_request_is_not_trimmed() {
        let (_dir, state) = test_state();
        let headers = HeaderMap::new();
        let body = json!({"model": "gpt-4o", "messages": [{"role": "user", "content": "hi"}]});
        let raw = serde_json::to_vec(&body).unwrap();
        let (_out_body, outcome) = run(&state, &headers, "/v1/chat/completions", raw).await.unwrap();
        assert_eq!(outcome.model, "gpt-4o");
    }

    #[tokio::test]
    async fn unknown_shape_passes_through_untrimmed() {
        let (_dir, state) = test_state();
        let headers = HeaderMap::new();
        let body = json!({"anything": "goes"});
        let raw = serde_json::to_vec(&body).unwrap();
        let (out_body, outcome) = run(&state, &headers, "/v1/not-a-vendor-path", raw).await.unwrap();
        let out: Value = serde_json::from_slice(&out_body).unwrap();
        assert_eq!(out, body);
        assert_eq!(outcome.shape, Shape::Unknown);
    }

    #[test]
    fn truncates_bodies_over_the_hard_ceiling() {
        let oversized = vec![b'a'; HARD_BODY_CEILING + 1000];
        let truncated = truncate_to_ceiling(oversized);
        assert_eq!(truncated.len(), HARD_BODY_CEILING);
    }
}
