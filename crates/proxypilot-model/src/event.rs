// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! The record a trimmer appends to a session's event log when it drops a
//! turn, and that the summarizer and lexical search later read back.

use serde::{Deserialize, Serialize};

/// Which wire shape produced a dropped [`Event`].
///
/// Kept distinct per shape (rather than a single `Dropped` variant) because
/// the memory store's lexical search and the anchored summarizer both want
/// to know which extractor produced the text without re-deriving it from
/// context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    DroppedChat,
    DroppedResponses,
    DroppedClaude,
}

/// One trimmed-away turn, persisted to `events.log` (append-only, one JSON
/// object per line).
///
/// `type_` mirrors the wire content-part `type` field where one exists
/// (e.g. `tool_use`, `function_call_output`); it is `None` for plain text
/// turns. Renamed on the wire to `type` to match the data-model field name
/// in the source request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub kind: EventKind,
    pub role: String,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none", default)]
    pub type_: Option<String>,
    pub text: String,
}

impl Event {
    pub fn new(kind: EventKind, role: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            kind,
            role: role.into(),
            type_: None,
            text: text.into(),
        }
    }

    pub fn with_type(mut self, type_: impl Into<String>) -> Self {
        self.type_ = Some(type_.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_json() {
        let event = Event::new(EventKind::DroppedChat, "user", "hello there")
            .with_type("text");
        let json = serde_json::to_string(&event).unwrap();
        let back: Event = serde_json::from_str(&json).unwrap();
        assert_eq!(event, back);
    }

    #[test]
    fn omits_type_when_absent() {
        let event = Event::new(EventKind::DroppedClaude, "assistant", "…");
        let json = serde_json::to_string(&event).unwrap();
        assert!(!json.contains("\"type\""));
    }

    #[test]
    fn kind_serializes_snake_case() {
        let event = Event::new(EventKind::DroppedResponses, "tool", "result");
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"dropped_responses\""));
    }

    #[test]
    fn deserializes_missing_type_field() {
        let json = r#"{"kind":"dropped_chat","role":"user","text":"hi"}"#;
        let event: Event = serde_json::from_str(json).unwrap();
        assert_eq!(event.type_, None);
    }
}
