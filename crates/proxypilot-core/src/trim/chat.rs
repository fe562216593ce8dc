// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Chat Completions trimmer.

use std::collections::BTreeSet;

use proxypilot_config::ProxyPilotConfig;
use proxypilot_model::{ClientKind, Event, EventKind, Shape};
use serde_json::Value;

use crate::extractor::{cap_content_text, extract_last_user_text, text_of_content};
use crate::truncate::{smart_truncate, OutputCategory};

use super::{run_narrowing_loop, TrimOutcome, DROPPED_TOOL_TEXT_CAP_TOKENS};

const PINNED_CAP_CHARS: usize = 2048;

fn is_tool_result(message: &Value) -> bool {
    matches!(
        message.get("role").and_then(Value::as_str),
        Some("tool") | Some("function")
    )
}

fn is_tool_call_assistant(message: &Value) -> bool {
    message.get("role").and_then(Value::as_str) == Some("assistant")
        && (message.get("tool_calls").is_some() || message.get("function_call").is_some())
}

/// Pick which indices of `rest` (non-system messages, original order) to
/// keep for a given quota, then force in any assistant tool-call message
/// whose tool-result was selected. A kept `tool`/`function` message without
/// its calling assistant turn is rejected by upstream validators.
fn select_kept(rest: &[Value], keep: usize) -> BTreeSet<usize> {
    let mut kept = BTreeSet::new();
    let mut quota_used = 0usize;
    for idx in (0..rest.len()).rev() {
        if quota_used >= keep {
            break;
        }
        kept.insert(idx);
        quota_used += 1;
    }
    for &idx in kept.clone().iter() {
        if is_tool_result(&rest[idx]) && idx > 0 && is_tool_call_assistant(&rest[idx - 1]) {
            kept.insert(idx - 1);
        }
    }
    kept
}

fn event_for(message: &Value) -> Event {
    let role = message.get("role").and_then(Value::as_str).unwrap_or("").to_string();
    let mut text = text_of_content(message.get("content").unwrap_or(&Value::Null));
    if is_tool_result(message) {
        text = smart_truncate(&text, OutputCategory::HeadTail, DROPPED_TOOL_TEXT_CAP_TOKENS);
    }
    let mut event = Event::new(EventKind::DroppedChat, role, text);
    if is_tool_result(message) {
        event = event.with_type("tool_result");
    } else if is_tool_call_assistant(message) {
        event = event.with_type("tool_call");
    }
    event
}

pub fn trim_chat(
    body: &Value,
    cfg: &ProxyPilotConfig,
    target_max_bytes: u64,
    client: ClientKind,
) -> TrimOutcome {
    let query = extract_last_user_text(Shape::Chat, body);
    let messages = body.get("messages").and_then(Value::as_array).cloned().unwrap_or_default();

    let mut system: Option<Value> = None;
    let mut rest: Vec<Value> = Vec::with_capacity(messages.len());
    for (i, m) in messages.iter().enumerate() {
        if i == 0 && m.get("role").and_then(Value::as_str) == Some("system") {
            system = Some(m.clone());
        } else {
            rest.push(m.clone());
        }
    }

    let tool_mandatory = client.is_tool_mandatory();

    let (body_out, dropped) = {
        let rest = &rest;
        let system = &system;
        run_narrowing_loop(cfg, target_max_bytes, tool_mandatory, |keep, cap, drop_tools| {
            let kept_idx = select_kept(rest, keep);
            let mut dropped = Vec::new();
            let mut out: Vec<Value> = Vec::new();

            if let Some(sys) = system {
                let mut sys = sys.clone();
                if let Some(content) = sys.get_mut("content") {
                    cap_content_text(content, PINNED_CAP_CHARS);
                }
                out.push(sys);
            }

            for (idx, m) in rest.iter().enumerate() {
                if kept_idx.contains(&idx) {
                    let mut m = m.clone();
                    if let Some(content) = m.get_mut("content") {
                        cap_content_text(content, cap);
                    }
                    out.push(m);
                } else {
                    dropped.push(event_for(m));
                }
            }

            let mut candidate = body.clone();
            if let Some(map) = candidate.as_object_mut() {
                map.insert("messages".to_string(), Value::Array(out));
                if drop_tools {
                    map.insert("tool_choice".to_string(), Value::String("none".to_string()));
                    map.remove("tools");
                }
            }
            (candidate, dropped)
        })
    };

    TrimOutcome {
        body: body_out,
        query,
        dropped,
        shape: Shape::Chat,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn cfg() -> ProxyPilotConfig {
        let mut c = ProxyPilotConfig::default();
        c.min_keep_messages = 2;
        c
    }

    #[test]
    fn preserves_system_message_at_position_zero() {
        let body = json!({
            "model": "gpt-4o",
            "messages": [
                {"role": "system", "content": "s"},
                {"role": "user", "content": "x".repeat(50_000)},
            ]
        });
        let out = trim_chat(&body, &cfg(), 4_000, ClientKind::Other);
        let messages = out.body["messages"].as_array().unwrap();
        assert_eq!(messages[0]["role"], "system");
    }

    #[test]
    fn keeps_tool_pair_contiguous_and_promoted() {
        let body = json!({
            "model": "gpt-4o",
            "messages": [
                {"role": "system", "content": "s"},
                {"role": "user", "content": "old".repeat(2000)},
                {"role": "assistant", "content": null, "tool_calls": [{"id": "c1"}]},
                {"role": "tool", "tool_call_id": "c1", "content": "r1"},
                {"role": "user", "content": "h".repeat(50_000)},
            ]
        });
        let out = trim_chat(&body, &cfg(), 4_000, ClientKind::Other);
        let messages = out.body["messages"].as_array().unwrap();
        let assistant_pos = messages.iter().position(|m| m["role"] == "assistant");
        let tool_pos = messages.iter().position(|m| m["role"] == "tool");
        assert!(assistant_pos.is_some() && tool_pos.is_some());
        assert_eq!(assistant_pos.unwrap() + 1, tool_pos.unwrap());
    }

    #[test]
    fn drops_old_user_text_into_events() {
        let body = json!({
            "model": "gpt-4o",
            "messages": [
                {"role": "system", "content": "s"},
                {"role": "user", "content": "the old important text"},
                {"role": "user", "content": "x".repeat(50_000)},
            ]
        });
        let mut c = cfg();
        c.min_keep_messages = 1;
        let out = trim_chat(&body, &c, 2_000, ClientKind::Other);
        assert!(out.dropped.iter().any(|e| e.text.contains("old important text")));
    }

    #[test]
    fn tool_mandatory_client_keeps_tools_field() {
        let body = json!({
            "model": "gpt-4o",
            "tools": [{"type": "function", "function": {"name": "f"}}],
            "messages": (0..200).map(|i| json!({"role": "user", "content": format!("msg {i}").repeat(50)})).collect::<Vec<_>>(),
        });
        let mut c = cfg();
        c.min_keep_messages = 1;
        let out = trim_chat(&body, &c, 3_000, ClientKind::FactoryCli);
        assert!(out.body.get("tools").is_some());
    }

    #[test]
    fn non_mandatory_client_eventually_drops_tools() {
        let body = json!({
            "model": "gpt-4o",
            "tools": [{"type": "function", "function": {"name": "f"}}],
            "messages": (0..200).map(|i| json!({"role": "user", "content": format!("msg {i}").repeat(50)})).collect::<Vec<_>>(),
        });
        let mut c = cfg();
        c.min_keep_messages = 1;
        let out = trim_chat(&body, &c, 2_500, ClientKind::Other);
        assert_eq!(out.body.get("tool_choice").and_then(Value::as_str), Some("none"));
    }

    #[test]
    fn query_is_most_recent_user_text() {
        let body = json!({
            "model": "gpt-4o",
            "messages": [
                {"role": "user", "content": "first"},
                {"role": "user", "content": "second"},
            ]
        });
        let out = trim_chat(&body, &cfg(), 100_000, ClientKind::Other);
        assert_eq!(out.query, "second");
    }
}
