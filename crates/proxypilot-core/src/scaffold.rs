// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! The `<proxypilot_state>` scaffold block: pinned context, anchored
//! summary, TODO, memory snippets, and the optional "SPEC MODE"
//! instruction, assembled into a single append-only or prepend-to-user
//! block within the remaining byte budget.

use once_cell::sync::Lazy;
use proxypilot_model::Shape;
use regex::Regex;
use serde_json::Value;

use crate::truncate::truncate_with_sentinel;

const HEADROOM_BYTES: usize = 512;

/// Byte cost of the appended truncation sentinel, budgeted for up front so
/// a truncated block still lands within the cap.
const SENTINEL_BYTES: usize = " …[truncated]…".len();

const SPEC_MODE_INSTRUCTION: &str = "SPEC MODE: do not write or modify code yet. Restate your \
understanding of the requested change as a short plan and wait for the user to reply with \
\"spec approved\" before making any edits.";

const SPEC_APPROVED_SENTINEL: &str = "spec approved";

static CODING_GUIDELINES_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)<coding_guidelines>(.*?)</coding_guidelines>").unwrap()
});

/// The inputs to one scaffold-block build, gathered by the middleware from
/// the memory store and request context.
#[derive(Debug, Default, Clone)]
pub struct ScaffoldInput {
    pub pinned: Option<String>,
    pub agents_md: Option<String>,
    pub anchor: Option<String>,
    pub todo: Option<String>,
    pub memory: Option<String>,
    pub spec_mode_requested: bool,
    pub spec_approved_in_body: bool,
}

impl ScaffoldInput {
    fn merged_pinned(&self) -> Option<String> {
        match (&self.pinned, &self.agents_md) {
            (None, None) => None,
            (Some(p), None) => Some(p.clone()),
            (None, Some(a)) => Some(a.clone()),
            (Some(p), Some(a)) => {
                if p.contains(a.as_str()) {
                    Some(p.clone())
                } else {
                    Some(format!("{p}\n\n{a}"))
                }
            }
        }
    }

    fn spec_section(&self) -> Option<&'static str> {
        if self.spec_mode_requested && !self.spec_approved_in_body {
            Some(SPEC_MODE_INSTRUCTION)
        } else {
            None
        }
    }
}

/// Extract the contents of a `<coding_guidelines>...</coding_guidelines>`
/// block from pinned/system text, if present.
pub fn extract_coding_guidelines(text: &str) -> Option<String> {
    CODING_GUIDELINES_RE
        .captures(text)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim().to_string())
}

/// Does the request body contain the sentinel that exits spec mode?
pub fn body_contains_spec_approved(body_text: &str) -> bool {
    body_text.to_ascii_lowercase().contains(SPEC_APPROVED_SENTINEL)
}

fn wrap(tag: &str, content: &str) -> String {
    format!("<{tag}>\n{content}\n</{tag}>")
}

/// Build the full (untruncated) `<proxypilot_state>` block, or `None` if
/// every section is empty (nothing to inject).
fn build_full_block(input: &ScaffoldInput) -> Option<String> {
    let mut sections = Vec::new();
    if let Some(pinned) = input.merged_pinned() {
        if !pinned.trim().is_empty() {
            sections.push(wrap("pinned", pinned.trim()));
        }
    }
    if let Some(anchor) = &input.anchor {
        if !anchor.trim().is_empty() {
            sections.push(wrap("anchor", anchor.trim()));
        }
    }
    if let Some(todo) = &input.todo {
        if !todo.trim().is_empty() {
            sections.push(wrap("todo", todo.trim()));
        }
    }
    if let Some(memory) = &input.memory {
        if !memory.trim().is_empty() {
            sections.push(wrap("memory", memory.trim()));
        }
    }
    if let Some(spec) = input.spec_section() {
        sections.push(wrap("spec", spec));
    }

    if sections.is_empty() {
        return None;
    }
    Some(format!(
        "<proxypilot_state>\n{}\n</proxypilot_state>",
        sections.join("\n")
    ))
}

/// Build the scaffold block, never exceeding `remaining_budget` minus 512
/// bytes of headroom. An oversized block is truncated with a visible
/// sentinel rather than dropped without trace. Returns `None` when nothing
/// fits, even truncated — the caller then leaves the request unchanged.
pub fn build_scaffold_block(input: &ScaffoldInput, remaining_budget: usize) -> Option<String> {
    let block = build_full_block(input)?;
    let cap = remaining_budget.saturating_sub(HEADROOM_BYTES);
    if block.len() <= cap {
        return Some(block);
    }
    if cap <= SENTINEL_BYTES {
        return None;
    }
    Some(truncate_with_sentinel(&block, cap - SENTINEL_BYTES))
}

/// Inject `block` into `body` in one of two modes.
///
/// `append_only`: append a new system-role item to the history array
/// (`messages`/`input`), or concatenate into Claude's top-level `system`.
/// Non-append mode: prepend the block to the last user message's text
/// (first text part if the content is an array).
pub fn inject_scaffold(shape: Shape, body: &mut Value, block: &str, append_only: bool) {
    match shape {
        Shape::Chat => {
            if append_only {
                append_system_message_chat(body, block);
            } else {
                prepend_to_last_user_text(body, "messages", block);
            }
        }
        Shape::Responses => {
            if append_only {
                append_system_item_responses(body, block);
            } else {
                prepend_to_last_user_text(body, "input", block);
            }
        }
        Shape::Claude => {
            merge_into_claude_system(body, block);
        }
        Shape::Unknown => {}
    }
}

fn append_system_message_chat(body: &mut Value, block: &str) {
    if let Some(map) = body.as_object_mut() {
        let messages = map.entry("messages").or_insert_with(|| Value::Array(Vec::new()));
        if let Some(arr) = messages.as_array_mut() {
            arr.push(serde_json::json!({"role": "system", "content": block}));
        }
    }
}

fn append_system_item_responses(body: &mut Value, block: &str) {
    if let Some(map) = body.as_object_mut() {
        let input = map.entry("input").or_insert_with(|| Value::Array(Vec::new()));
        if let Some(arr) = input.as_array_mut() {
            arr.push(serde_json::json!({"type": "message", "role": "system", "content": block}));
        }
    }
}

fn merge_into_claude_system(body: &mut Value, block: &str) {
    if let Some(map) = body.as_object_mut() {
        match map.get("system") {
            Some(Value::String(existing)) => {
                let merged = format!("{existing}\n\n{block}");
                map.insert("system".to_string(), Value::String(merged));
            }
            Some(Value::Array(_)) => {
                if let Some(Value::Array(arr)) = map.get_mut("system") {
                    arr.push(serde_json::json!({"type": "text", "text": block}));
                }
            }
            _ => {
                map.insert("system".to_string(), Value::String(block.to_string()));
            }
        }
    }
}

fn prepend_to_last_user_text(body: &mut Value, array_field: &str, block: &str) {
    let Some(map) = body.as_object_mut() else { return };
    let Some(arr) = map.get_mut(array_field).and_then(Value::as_array_mut) else { return };
    let target = arr.iter_mut().rev().find(|m| m.get("role").and_then(Value::as_str) == Some("user"));
    let Some(item) = target else { return };
    prepend_to_content(item, block);
}

fn prepend_to_content(item: &mut Value, block: &str) {
    match item.get_mut("content") {
        Some(content @ Value::String(_)) => {
            let existing = content.as_str().unwrap_or_default();
            *content = Value::String(format!("{block}\n\n{existing}"));
        }
        Some(Value::Array(parts)) => {
            if let Some(first_text) = parts.iter_mut().find(|p| p.get("type").and_then(Value::as_str) == Some("text")) {
                if let Some(Value::String(text)) = first_text.get_mut("text") {
                    *text = format!("{block}\n\n{text}");
                    return;
                }
            }
            parts.insert(0, serde_json::json!({"type": "text", "text": block}));
        }
        _ => {
            if let Some(map) = item.as_object_mut() {
                map.insert("content".to_string(), Value::String(block.to_string()));
            }
        }
    }
}

/// Append `block` to the *end* of the last user message's text (used by
/// the retrieval/memory injector, as opposed to the scaffold's prepend).
pub fn append_to_last_user_text(shape: Shape, body: &mut Value, block: &str) {
    let array_field = match shape {
        Shape::Chat | Shape::Claude => "messages",
        Shape::Responses => "input",
        Shape::Unknown => return,
    };
    let Some(map) = body.as_object_mut() else { return };
    let Some(arr) = map.get_mut(array_field).and_then(Value::as_array_mut) else { return };
    let target = arr.iter_mut().rev().find(|m| m.get("role").and_then(Value::as_str) == Some("user"));
    let Some(item) = target else { return };
    append_to_content(item, block);
}

fn append_to_content(item: &mut Value, block: &str) {
    match item.get_mut("content") {
        Some(content @ Value::String(_)) => {
            let existing = content.as_str().unwrap_or_default();
            *content = Value::String(format!("{existing}\n\n{block}"));
        }
        Some(Value::Array(parts)) => {
            parts.push(serde_json::json!({"type": "text", "text": block}));
        }
        _ => {
            if let Some(map) = item.as_object_mut() {
                map.insert("content".to_string(), Value::String(block.to_string()));
            }
        }
    }
}
