// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! OpenAI Responses trimmer.

use std::collections::{BTreeSet, HashMap};

use proxypilot_config::ProxyPilotConfig;
use proxypilot_model::{ClientKind, Event, EventKind, Shape};
use serde_json::Value;

use crate::extractor::{cap_content_text, extract_last_user_text, text_of_content};
use crate::truncate::{smart_truncate, OutputCategory};

use super::{run_narrowing_loop, TrimOutcome, DROPPED_TOOL_TEXT_CAP_TOKENS};

const PINNED_CAP_CHARS: usize = 2048;

fn item_type(item: &Value) -> &str {
    item.get("type").and_then(Value::as_str).unwrap_or("message")
}

fn call_id_of(item: &Value) -> Option<&str> {
    item.get("call_id").and_then(Value::as_str)
}

fn event_for(item: &Value) -> Event {
    let role = item
        .get("role")
        .and_then(Value::as_str)
        .unwrap_or_else(|| item_type(item))
        .to_string();
    let text = match item_type(item) {
        "function_call" => format!(
            "[function_call {}: {}]",
            item.get("name").and_then(Value::as_str).unwrap_or(""),
            item.get("arguments").and_then(Value::as_str).unwrap_or("")
        ),
        "function_call_output" => smart_truncate(
            &text_of_content(item.get("output").unwrap_or(&Value::Null)),
            OutputCategory::HeadTail,
            DROPPED_TOOL_TEXT_CAP_TOKENS,
        ),
        _ => text_of_content(item.get("content").unwrap_or(&Value::Null)),
    };
    Event::new(EventKind::DroppedResponses, role, text).with_type(item_type(item).to_string())
}

/// Select kept indices of `input` (newest-to-oldest quota), then restore
/// tool-pairing: a kept `function_call_output` whose
/// matching `function_call` isn't already kept gets that call prepended
/// from the full history; a kept/unkept `function_call` without any later
/// `function_call_output` anywhere in the original input is dropped
/// (orphan call, never answered); an orphan `function_call_output` whose
/// call cannot be found anywhere is dropped too.
fn select_kept(input: &[Value], keep: usize) -> BTreeSet<usize> {
    let mut first_call_index: HashMap<&str, usize> = HashMap::new();
    let mut answered_calls: std::collections::HashSet<&str> = std::collections::HashSet::new();
    for (idx, item) in input.iter().enumerate() {
        if item_type(item) == "function_call" {
            if let Some(id) = call_id_of(item) {
                first_call_index.entry(id).or_insert(idx);
            }
        }
        if item_type(item) == "function_call_output" {
            if let Some(id) = call_id_of(item) {
                answered_calls.insert(id);
            }
        }
    }

    let mut kept = BTreeSet::new();
    let mut quota_used = 0usize;
    for idx in (0..input.len()).rev() {
        if quota_used >= keep {
            break;
        }
        kept.insert(idx);
        quota_used += 1;
    }

    // Restore the matching call for every kept output that has one.
    let to_add: Vec<usize> = kept
        .iter()
        .filter(|&&idx| item_type(&input[idx]) == "function_call_output")
        .filter_map(|&idx| call_id_of(&input[idx]))
        .filter_map(|id| first_call_index.get(id).copied())
        .collect();
    kept.extend(to_add);

    // Drop orphan outputs (no matching call found at all) and orphan calls
    // (never answered anywhere in the original input).
    kept.retain(|&idx| {
        let item = &input[idx];
        match item_type(item) {
            "function_call_output" => call_id_of(item)
                .map(|id| first_call_index.contains_key(id))
                .unwrap_or(false),
            "function_call" => call_id_of(item)
                .map(|id| answered_calls.contains(id))
                .unwrap_or(true),
            _ => true,
        }
    });

    kept
}

pub fn trim_responses(
    body: &Value,
    cfg: &ProxyPilotConfig,
    target_max_bytes: u64,
    client: ClientKind,
) -> TrimOutcome {
    let query = extract_last_user_text(Shape::Responses, body);
    let input = body.get("input").and_then(Value::as_array).cloned().unwrap_or_default();
    let tool_mandatory = client.is_tool_mandatory();

    let (body_out, dropped) = {
        let input = &input;
        run_narrowing_loop(cfg, target_max_bytes, tool_mandatory, |keep, cap, drop_tools| {
            let kept_idx = select_kept(input, keep);
            let mut dropped = Vec::new();
            let mut out: Vec<Value> = Vec::new();

            for (idx, item) in input.iter().enumerate() {
                if kept_idx.contains(&idx) {
                    let mut item = item.clone();
                    if let Some(content) = item.get_mut("content") {
                        cap_content_text(content, cap);
                    }
                    out.push(item);
                } else {
                    dropped.push(event_for(item));
                }
            }

            let mut candidate = body.clone();
            if let Some(map) = candidate.as_object_mut() {
                if let Some(Value::String(instructions)) = map.get_mut("instructions") {
                    *instructions =
                        crate::truncate::truncate_with_sentinel(instructions, PINNED_CAP_CHARS);
                }
                map.insert("input".to_string(), Value::Array(out));
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
        shape: Shape::Responses,
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
    fn orphan_function_call_output_is_dropped() {
        let body = json!({
            "model": "gpt-4o",
            "input": [
                {"type": "message", "role": "user", "content": "hi"},
                {"type": "function_call_output", "call_id": "X", "output": "result"},
            ]
        });
        let out = trim_responses(&body, &cfg(), 100_000, ClientKind::Other);
        let input = out.body["input"].as_array().unwrap();
        assert!(!input.iter().any(|i| i["type"] == "function_call_output"));
        assert_eq!(input.len(), 1);
    }

    #[test]
    fn kept_output_restores_its_call_from_history() {
        let body = json!({
            "model": "gpt-4o",
            "input": [
                {"type": "function_call", "call_id": "A", "name": "f", "arguments": "{}"},
                {"type": "message", "role": "user", "content": "padding".repeat(3000)},
                {"type": "function_call_output", "call_id": "A", "output": "done"},
            ]
        });
        // A tight budget narrows the quota to 2: the natural tail grab is
        // (message, output), and the call must be restored from history.
        let mut c = cfg();
        c.min_keep_messages = 2;
        let out = trim_responses(&body, &c, 3_000, ClientKind::Other);
        let input = out.body["input"].as_array().unwrap();
        let call_pos = input.iter().position(|i| i["type"] == "function_call");
        let out_pos = input.iter().position(|i| i["type"] == "function_call_output");
        assert!(call_pos.is_some() && out_pos.is_some());
        assert!(call_pos.unwrap() < out_pos.unwrap());
    }

    #[test]
    fn unanswered_function_call_is_dropped() {
        let body = json!({
            "model": "gpt-4o",
            "input": [
                {"type": "function_call", "call_id": "B", "name": "f", "arguments": "{}"},
                {"type": "message", "role": "user", "content": "hi"},
            ]
        });
        let out = trim_responses(&body, &cfg(), 100_000, ClientKind::Other);
        let input = out.body["input"].as_array().unwrap();
        assert!(!input.iter().any(|i| i["type"] == "function_call"));
    }

    #[test]
    fn instructions_are_truncated_not_dropped() {
        let body = json!({
            "model": "gpt-4o",
            "instructions": "x".repeat(10_000),
            "input": [{"type": "message", "role": "user", "content": "hi"}],
        });
        let out = trim_responses(&body, &cfg(), 100_000, ClientKind::Other);
        let instructions = out.body["instructions"].as_str().unwrap();
        assert!(instructions.len() <= PINNED_CAP_CHARS + 20);
    }
}
