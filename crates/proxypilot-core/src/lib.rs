// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! The trimming, budgeting, and scaffold-injection pipeline stages that sit
//! between proxypilot's wire-format detection (`proxypilot-model`) and its
//! persistent memory store (`proxypilot-memory`).
//!
//! None of this crate touches HTTP: every function here takes a parsed
//! `serde_json::Value` body and a loaded [`proxypilot_config::ProxyPilotConfig`]
//! and returns a new body plus whatever bookkeeping (dropped events, a
//! query string, a budget decision) the caller needs next.

mod budget;
mod error;
mod extractor;
mod scaffold;
mod summarizer;
mod trim;
mod truncate;

pub use budget::{analyze, BudgetAnalysis};
pub use error::CoreError;
pub use extractor::{extract_last_user_text, extract_pinned_text};
pub use scaffold::{
    append_to_last_user_text, body_contains_spec_approved, build_scaffold_block,
    extract_coding_guidelines, inject_scaffold, ScaffoldInput,
};
pub use summarizer::{
    build_anchored_summary, regex_summary, AnchoredSummary, SummaryError, SummaryExecutor,
};
pub use trim::{trim_chat, trim_claude, trim_responses, TrimOutcome};
pub use truncate::{smart_truncate, truncate_with_sentinel, OutputCategory};
