// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Anthropic Messages trimmer.
//!
//! Tool pairing here is matched by `tool_use_id` (content-part level), not
//! by message adjacency: a conversation may interleave an unrelated user
//! turn between a `tool_use` and its `tool_result`, so once both sides of
//! a pair are kept they are spliced to sit next to each other and whatever
//! was between them is pushed to just after the pair instead.

use std::collections::{BTreeSet, HashMap};

use proxypilot_config::ProxyPilotConfig;
use proxypilot_model::{ClientKind, Event, EventKind, Shape};
use serde_json::Value;

use crate::extractor::{cap_content_text, extract_last_user_text, text_of_content};
use crate::truncate::{smart_truncate, OutputCategory};

use super::{run_narrowing_loop, TrimOutcome, DROPPED_TOOL_TEXT_CAP_TOKENS};

const PINNED_CAP_CHARS: usize = 2048;

fn content_parts(message: &Value) -> Vec<&Value> {
    match message.get("content") {
        Some(Value::Array(parts)) => parts.iter().collect(),
        _ => Vec::new(),
    }
}

fn has_part_type(message: &Value, type_: &str) -> bool {
    content_parts(message)
        .iter()
        .any(|p| p.get("type").and_then(Value::as_str) == Some(type_))
}

fn is_tool_result_message(message: &Value) -> bool {
    has_part_type(message, "tool_result")
}

fn is_tool_use_assistant(message: &Value) -> bool {
    message.get("role").and_then(Value::as_str) == Some("assistant") && has_part_type(message, "tool_use")
}

fn tool_result_ids(message: &Value) -> Vec<String> {
    content_parts(message)
        .iter()
        .filter(|p| p.get("type").and_then(Value::as_str) == Some("tool_result"))
        .filter_map(|p| p.get("tool_use_id").and_then(Value::as_str))
        .map(str::to_string)
        .collect()
}

fn tool_use_ids(message: &Value) -> Vec<String> {
    content_parts(message)
        .iter()
        .filter(|p| p.get("type").and_then(Value::as_str) == Some("tool_use"))
        .filter_map(|p| p.get("id").and_then(Value::as_str))
        .map(str::to_string)
        .collect()
}

/// First message index that emits each `tool_use` id, searched over the
/// full (untrimmed) history.
fn build_tool_use_index(messages: &[Value]) -> HashMap<String, usize> {
    let mut index = HashMap::new();
    for (idx, m) in messages.iter().enumerate() {
        for id in tool_use_ids(m) {
            index.entry(id).or_insert(idx);
        }
    }
    index
}

fn select_kept(messages: &[Value], keep: usize, tool_use_index: &HashMap<String, usize>) -> BTreeSet<usize> {
    let mut kept = BTreeSet::new();
    let mut quota_used = 0usize;
    for idx in (0..messages.len()).rev() {
        if quota_used >= keep {
            break;
        }
        kept.insert(idx);
        quota_used += 1;
    }
    // Force in the tool_use message for every kept tool_result, regardless
    // of position or quota.
    let to_add: Vec<usize> = kept
        .iter()
        .filter(|&&idx| is_tool_result_message(&messages[idx]))
        .flat_map(|&idx| tool_result_ids(&messages[idx]))
        .filter_map(|id| tool_use_index.get(&id).copied())
        .collect();
    kept.extend(to_add);
    kept
}

/// Splice each kept (call_idx, result_idx) pair to be adjacent, moving
/// whatever sat between them (in the current order) to just after the pair.
fn reorder_for_pairs(order: &mut Vec<usize>, pairs: &[(usize, usize)]) {
    for &(call_idx, result_idx) in pairs {
        let call_pos = order.iter().position(|&x| x == call_idx);
        let result_pos = order.iter().position(|&x| x == result_idx);
        let (Some(cp), Some(rp)) = (call_pos, result_pos) else { continue };
        if cp >= rp || cp + 1 == rp {
            continue;
        }
        let between: Vec<usize> = order[cp + 1..rp].to_vec();
        let mut new_order = order[..cp].to_vec();
        new_order.push(call_idx);
        new_order.push(result_idx);
        new_order.extend(between);
        new_order.extend(order[rp + 1..].to_vec());
        *order = new_order;
    }
}

fn event_for(message: &Value) -> Event {
    let role = message.get("role").and_then(Value::as_str).unwrap_or("").to_string();
    let mut text = text_of_content(message.get("content").unwrap_or(&Value::Null));
    if is_tool_result_message(message) {
        text = smart_truncate(&text, OutputCategory::HeadTail, DROPPED_TOOL_TEXT_CAP_TOKENS);
    }
    let mut event = Event::new(EventKind::DroppedClaude, role, text);
    if is_tool_result_message(message) {
        event = event.with_type("tool_result");
    } else if is_tool_use_assistant(message) {
        event = event.with_type("tool_use");
    }
    event
}

pub fn trim_claude(
    body: &Value,
    cfg: &ProxyPilotConfig,
    target_max_bytes: u64,
    client: ClientKind,
) -> TrimOutcome {
    let query = extract_last_user_text(Shape::Claude, body);
    let messages = body.get("messages").and_then(Value::as_array).cloned().unwrap_or_default();
    let tool_use_index = build_tool_use_index(&messages);
    let tool_mandatory = client.is_tool_mandatory();

    let (body_out, dropped) = {
        let messages = &messages;
        let tool_use_index = &tool_use_index;
        run_narrowing_loop(cfg, target_max_bytes, tool_mandatory, |keep, cap, drop_tools| {
            let kept_idx = select_kept(messages, keep, tool_use_index);

            let pairs: Vec<(usize, usize)> = kept_idx
                .iter()
                .filter(|&&idx| is_tool_result_message(&messages[idx]))
                .flat_map(|&idx| {
                    tool_result_ids(&messages[idx])
                        .into_iter()
                        .filter_map(move |id| tool_use_index.get(&id).map(|&call_idx| (call_idx, idx)))
                })
                .filter(|(call_idx, _)| kept_idx.contains(call_idx))
                .collect();

            let mut order: Vec<usize> = kept_idx.iter().copied().collect();
            reorder_for_pairs(&mut order, &pairs);

            let mut dropped = Vec::new();
            for (idx, m) in messages.iter().enumerate() {
                if !kept_idx.contains(&idx) {
                    dropped.push(event_for(m));
                }
            }

            let out: Vec<Value> = order
                .into_iter()
                .map(|idx| {
                    let mut m = messages[idx].clone();
                    if let Some(content) = m.get_mut("content") {
                        cap_content_text(content, cap);
                    }
                    m
                })
                .collect();

            let mut candidate = body.clone();
            if let Some(map) = candidate.as_object_mut() {
                if let Some(system) = map.get_mut("system") {
                    cap_content_text(system, PINNED_CAP_CHARS);
                }
                map.insert("messages".to_string(), Value::Array(out));
                if drop_tools {
                    map.insert("tool_choice".to_string(), serde_json::json!({"type": "none"}));
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
        shape: Shape::Claude,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn cfg() -> ProxyPilotConfig {
        let mut c = ProxyPilotConfig::default();
        c.min_keep_messages = 1;
        c
    }

    #[test]
    fn interleaved_tool_result_is_spliced_next_to_its_tool_use() {
        let body = json!({
            "model": "claude-3.5-sonnet",
            "messages": [
                {"role": "user", "content": "do it"},
                {"role": "assistant", "content": [{"type": "tool_use", "id": "A", "name": "f", "input": {}}]},
                {"role": "user", "content": "chit-chat"},
                {"role": "user", "content": [{"type": "tool_result", "tool_use_id": "A", "content": "ok"}]},
            ]
        });
        let out = trim_claude(&body, &cfg(), 100_000, ClientKind::Other);
        let messages = out.body["messages"].as_array().unwrap();
        let tool_use_pos = messages.iter().position(|m| has_part_type(m, "tool_use")).unwrap();
        let tool_result_pos = messages.iter().position(|m| has_part_type(m, "tool_result")).unwrap();
        let chit_chat_pos = messages
            .iter()
            .position(|m| m["content"].as_str() == Some("chit-chat"))
            .unwrap();
        assert_eq!(tool_use_pos + 1, tool_result_pos);
        assert!(chit_chat_pos > tool_result_pos);
    }

    #[test]
    fn tool_result_forces_tool_use_kept_even_outside_quota() {
        let body = json!({
            "model": "claude-3.5-sonnet",
            "messages": [
                {"role": "assistant", "content": [{"type": "tool_use", "id": "A", "name": "f", "input": {}}]},
                {"role": "user", "content": "padding".repeat(3000)},
                {"role": "user", "content": [{"type": "tool_result", "tool_use_id": "A", "content": "ok"}]},
            ]
        });
        let mut c = cfg();
        c.min_keep_messages = 2;
        let out = trim_claude(&body, &c, 3_000, ClientKind::Other);
        let messages = out.body["messages"].as_array().unwrap();
        assert!(messages.iter().any(|m| has_part_type(m, "tool_use")));
    }

    #[test]
    fn system_string_is_truncated_with_tighter_cap() {
        let body = json!({
            "model": "claude-3.5-sonnet",
            "system": "x".repeat(10_000),
            "messages": [{"role": "user", "content": "hi"}],
        });
        let out = trim_claude(&body, &cfg(), 100_000, ClientKind::Other);
        let system = out.body["system"].as_str().unwrap();
        assert!(system.len() <= PINNED_CAP_CHARS + 20);
    }

    #[test]
    fn tool_choice_becomes_none_object_when_tools_dropped() {
        let body = json!({
            "model": "claude-3.5-sonnet",
            "tools": [{"name": "f"}],
            "messages": (0..200).map(|i| json!({"role": "user", "content": format!("m{i}").repeat(50)})).collect::<Vec<_>>(),
        });
        let out = trim_claude(&body, &cfg(), 2_500, ClientKind::Other);
        assert_eq!(
            out.body.get("tool_choice").and_then(|v| v.get("type")).and_then(Value::as_str),
            Some("none")
        );
    }
}
