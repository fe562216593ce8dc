// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Rolling anchored-summary builder. A regex-based default extracts
//! salient sentences from newly dropped events; an optional LLM executor
//! produces a condensed narrative or structured checkpoint instead, with
//! the regex path as the failure fallback.

use async_trait::async_trait;
use once_cell::sync::Lazy;
use proxypilot_config::AnchorStrategy;
use proxypilot_model::Event;
use regex::Regex;

use crate::truncate::truncate_with_sentinel;

const NARRATIVE_PROMPT: &str =
    "You are a context compaction assistant for a coding proxy. Summarize the following \
     dropped conversation turns in a concise, information-dense way. Preserve technical \
     details, decisions, file names, and tool outputs that may matter for future turns.";

const STRUCTURED_PROMPT: &str = "\
Produce a structured state checkpoint from the dropped turns below. Use EXACTLY these \
Markdown sections:

## Active Task
## Key Decisions
## Files
## Constraints
## Pending
## Narrative";

static SENTENCE_SPLIT: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?m)[^.!?\n]+[.!?]?").unwrap());
static FILE_PATH: Lazy<Regex> = Lazy::new(|| Regex::new(r"\S+/\S+\.\w{1,5}|\b\w+\.\w{1,5}\b").unwrap());
static VERB_HINT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(fix|fixed|add|added|remove|removed|update|updated|implement|implemented|refactor|refactored|rename|renamed|create|created|delete|deleted|run|ran|test|tested|debug|investigat\w*|decide\w*)\b").unwrap()
});
static PROPER_NOUN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b[A-Z][a-zA-Z0-9]{2,}\b").unwrap());

/// Errors from an LLM-backed summary executor.
#[derive(Debug, thiserror::Error)]
pub enum SummaryError {
    #[error("summary executor failed: {0}")]
    Executor(String),
}

/// Pluggable LLM backend for the summarizer. proxypilot-core has no opinion
/// on transport or auth — the host wires a concrete implementation through
/// its own upstream auth manager.
#[async_trait]
pub trait SummaryExecutor: Send + Sync {
    async fn summarize(&self, model: &str, prompt: &str) -> Result<String, SummaryError>;
}

fn prompt_for(strategy: AnchorStrategy) -> &'static str {
    match strategy {
        AnchorStrategy::Narrative => NARRATIVE_PROMPT,
        AnchorStrategy::Structured => STRUCTURED_PROMPT,
    }
}

/// Score a sentence by presence of file paths, proper nouns, and action
/// verbs — a cheap proxy for "this sentence carries information the next
/// turn will need".
fn salience(sentence: &str) -> u32 {
    let mut score = 0;
    if FILE_PATH.is_match(sentence) {
        score += 2;
    }
    if VERB_HINT.is_match(sentence) {
        score += 2;
    }
    score += PROPER_NOUN.find_iter(sentence).count().min(3) as u32;
    score
}

/// Deterministic fallback: pick the most salient sentences out of the
/// dropped events' text and append them to the previous summary.
pub fn regex_summary(prev: &str, dropped: &[Event], max_chars: usize) -> String {
    let combined_text: String = dropped
        .iter()
        .map(|e| e.text.as_str())
        .collect::<Vec<_>>()
        .join(" ");

    let mut sentences: Vec<(&str, u32)> = SENTENCE_SPLIT
        .find_iter(&combined_text)
        .map(|m| m.as_str().trim())
        .filter(|s| s.len() > 8)
        .map(|s| (s, salience(s)))
        .filter(|(_, score)| *score >= 2)
        .collect();
    sentences.sort_by(|a, b| b.1.cmp(&a.1));

    let addition = sentences
        .into_iter()
        .map(|(s, _)| s)
        .take(20)
        .collect::<Vec<_>>()
        .join(" ");

    let merged = if prev.trim().is_empty() {
        addition
    } else if addition.is_empty() {
        prev.to_string()
    } else {
        format!("{}\n{}", prev.trim(), addition)
    };

    truncate_with_sentinel(&merged, max_chars)
}

/// Result of one anchored-summary build.
pub struct AnchoredSummary {
    pub text: String,
    /// True when a configured executor was tried and failed; `text` then
    /// came from the regex fallback. Callers decide whether the next
    /// request tries the executor again.
    pub llm_failed: bool,
}

/// Build the next anchored summary, preferring an LLM executor when one is
/// configured and falling back to [`regex_summary`] on any failure.
/// Cross-request retry policy is the caller's concern; this function always
/// does exactly one attempt per call.
pub async fn build_anchored_summary(
    prev: &str,
    dropped: &[Event],
    latest_intent: &str,
    strategy: AnchorStrategy,
    summary_model: &str,
    max_chars: usize,
    executor: Option<&dyn SummaryExecutor>,
) -> AnchoredSummary {
    if dropped.is_empty() && latest_intent.is_empty() {
        return AnchoredSummary {
            text: truncate_with_sentinel(prev, max_chars),
            llm_failed: false,
        };
    }

    let mut llm_failed = false;
    if let Some(executor) = executor {
        let dropped_text: String = dropped.iter().map(|e| e.text.as_str()).collect::<Vec<_>>().join("\n");
        let prompt = format!(
            "{}\n\n--- previous summary ---\n{}\n\n--- newly dropped ---\n{}\n\n--- latest intent ---\n{}",
            prompt_for(strategy),
            prev,
            dropped_text,
            latest_intent
        );
        match executor.summarize(summary_model, &prompt).await {
            Ok(summary) => {
                return AnchoredSummary {
                    text: truncate_with_sentinel(&summary, max_chars),
                    llm_failed: false,
                }
            }
            Err(err) => {
                tracing::warn!(error = %err, "llm summarizer failed, falling back to regex summary");
                llm_failed = true;
            }
        }
    }

    AnchoredSummary {
        text: regex_summary(prev, dropped, max_chars),
        llm_failed,
    }
}
