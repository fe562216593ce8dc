// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Text extraction from a parsed request body: the last user turn (for
//! retrieval queries and scaffold injection) and the pinned
//! system/instructions text (preserved verbatim at position 0).

use crate::truncate::truncate_with_sentinel;
use proxypilot_model::Shape;
use serde_json::Value;

/// Truncate every text-bearing leaf inside a content value (a bare string,
/// or an array of content-part objects) to `cap_chars`, in place. Used by
/// the trimmers to enforce the per-text character cap without flattening
/// structured content (tool_use blocks, image parts) that happens to sit
/// alongside a text part.
pub(crate) fn cap_content_text(content: &mut Value, cap_chars: usize) {
    match content {
        Value::String(s) => {
            *s = truncate_with_sentinel(s, cap_chars);
        }
        Value::Array(parts) => {
            for part in parts.iter_mut() {
                if let Some(Value::String(text)) = part.get_mut("text") {
                    *text = truncate_with_sentinel(text, cap_chars);
                }
                if let Some(inner) = part.get_mut("content") {
                    cap_content_text(inner, cap_chars);
                }
            }
        }
        _ => {}
    }
}

/// Join the text-bearing parts of a content value, ignoring `thinking` and
/// `reasoning` parts. `content` may be a bare string or an array of
/// content-part objects (`{"type": "...", "text": "..."}` and variants).
pub(crate) fn text_of_content(content: &Value) -> String {
    match content {
        Value::String(s) => s.clone(),
        Value::Array(parts) => parts
            .iter()
            .filter_map(|part| {
                let ty = part.get("type").and_then(Value::as_str).unwrap_or("");
                if ty == "thinking" || ty == "reasoning" {
                    return None;
                }
                part.get("text")
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .or_else(|| {
                        // Claude tool_result content can itself be a string
                        // or a nested content-part array.
                        part.get("content").map(text_of_content)
                    })
            })
            .collect::<Vec<_>>()
            .join("\n"),
        _ => String::new(),
    }
}

/// Scan `messages`/`input` from newest to oldest and return the text of the
/// first user-authored item found.
pub fn extract_last_user_text(shape: Shape, body: &Value) -> String {
    match shape {
        Shape::Chat | Shape::Claude => {
            let field = "messages";
            body.get(field)
                .and_then(Value::as_array)
                .into_iter()
                .flatten()
                .rev()
                .find(|m| m.get("role").and_then(Value::as_str) == Some("user"))
                .map(|m| text_of_content(m.get("content").unwrap_or(&Value::Null)))
                .unwrap_or_default()
        }
        Shape::Responses => body
            .get("input")
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
            .rev()
            .find(|item| {
                item.get("role").and_then(Value::as_str) == Some("user")
                    && item
                        .get("type")
                        .and_then(Value::as_str)
                        .map(|t| t == "message")
                        .unwrap_or(true)
            })
            .map(|item| text_of_content(item.get("content").unwrap_or(&Value::Null)))
            .unwrap_or_default(),
        Shape::Unknown => String::new(),
    }
}

/// The first system message (Chat), top-level `instructions` (Responses), or
/// top-level `system` (Claude), if present.
pub fn extract_pinned_text(shape: Shape, body: &Value) -> Option<String> {
    match shape {
        Shape::Chat => body
            .get("messages")
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
            .find(|m| m.get("role").and_then(Value::as_str) == Some("system"))
            .map(|m| text_of_content(m.get("content").unwrap_or(&Value::Null))),
        Shape::Responses => body
            .get("instructions")
            .and_then(Value::as_str)
            .map(str::to_string),
        Shape::Claude => body.get("system").map(text_of_content),
        Shape::Unknown => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn chat_extracts_last_user_text_over_later_assistant() {
        let body = json!({
            "messages": [
                {"role": "system", "content": "sys"},
                {"role": "user", "content": "first"},
                {"role": "assistant", "content": "reply"},
                {"role": "user", "content": "second"},
            ]
        });
        assert_eq!(extract_last_user_text(Shape::Chat, &body), "second");
    }

    #[test]
    fn chat_extracts_pinned_system_text() {
        let body = json!({"messages": [{"role": "system", "content": "be helpful"}]});
        assert_eq!(
            extract_pinned_text(Shape::Chat, &body),
            Some("be helpful".to_string())
        );
    }

    #[test]
    fn chat_ignores_thinking_parts_in_content_array() {
        let body = json!({
            "messages": [
                {"role": "user", "content": [
                    {"type": "thinking", "text": "hidden reasoning"},
                    {"type": "text", "text": "visible"},
                ]}
            ]
        });
        assert_eq!(extract_last_user_text(Shape::Chat, &body), "visible");
    }

    #[test]
    fn cap_content_text_truncates_string_content() {
        let mut content = Value::String("a".repeat(100));
        cap_content_text(&mut content, 10);
        assert!(content.as_str().unwrap().ends_with("…[truncated]…"));
    }

    #[test]
    fn cap_content_text_truncates_text_parts_without_touching_others() {
        let mut content = json!([
            {"type": "text", "text": "b".repeat(100)},
            {"type": "tool_use", "id": "t1", "name": "x"},
        ]);
        cap_content_text(&mut content, 10);
        assert!(content[0]["text"].as_str().unwrap().ends_with("…[truncated]…"));
        assert_eq!(content[1]["id"], "t1");
    }

    #[test]
    fn responses_extracts_instructions_as_pinned() {
        let body = json!({"instructions": "top level instructions", "input": []});
        assert_eq!(
            extract_pinned_text(Shape::Responses, &body),
            Some("top level instructions".to_string())
        );
    }

    #[test]
    fn responses_extracts_last_user_message_item() {
        let body = json!({
            "input": [
                {"type": "message", "role": "user", "content": "hi"},
                {"type": "function_call", "call_id": "c1", "name": "f"},
            ]
        });
        assert_eq!(extract_last_user_text(Shape::Responses, &body), "hi");
    }

    #[test]
    fn claude_extracts_system_string_as_pinned() {
        let body = json!({"system": "claude system prompt", "messages": []});
        assert_eq!(
            extract_pinned_text(Shape::Claude, &body),
            Some("claude system prompt".to_string())
        );
    }

    #[test]
    fn claude_ignores_reasoning_parts() {
        let body = json!({
            "messages": [
                {"role": "user", "content": [
                    {"type": "reasoning", "text": "internal"},
                    {"type": "text", "text": "shown"},
                ]}
            ]
        });
        assert_eq!(extract_last_user_text(Shape::Claude, &body), "shown");
    }

    #[test]
    fn unknown_shape_extracts_nothing() {
        let body = json!({"messages": [{"role": "user", "content": "hi"}]});
        assert_eq!(extract_last_user_text(Shape::Unknown, &body), "");
        assert_eq!(extract_pinned_text(Shape::Unknown, &body), None);
    }

    #[test]
    fn no_user_message_yields_empty_text() {
        let body = json!({"messages": [{"role": "system", "content": "sys"}]});
        assert_eq!(extract_last_user_text(Shape::Chat, &body), "");
    }
}
