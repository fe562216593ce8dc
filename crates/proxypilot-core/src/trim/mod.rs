// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! The shape-specific trimmers: each reduces a history array to fit a byte
//! budget while preserving tool-call/tool-result pairing and the first
//! system/instructions message.

mod chat;
mod claude;
mod responses;

pub use chat::trim_chat;
pub use claude::trim_claude;
pub use responses::trim_responses;

use proxypilot_config::ProxyPilotConfig;
use proxypilot_model::{Event, Shape};
use serde_json::Value;

/// Starting kept-item count before the narrowing loop begins reducing it.
/// Above `min_keep_messages` by default so the first pass over a merely
/// moderately oversized request does not always collapse straight to the
/// floor.
const START_KEEP: usize = 30;
const START_CHAR_CAP: usize = 20_000;
const MIN_CHAR_CAP: usize = 5_000;
const MAX_ITERATIONS: usize = 12;

/// Cap (in estimator tokens) applied to tool-result text before it is
/// logged as a dropped event. Tool output keeps its head and tail, where
/// the command line and the final result live, rather than a flat prefix.
pub(crate) const DROPPED_TOOL_TEXT_CAP_TOKENS: usize = 2_000;

/// Result of running a shape-specific trimmer.
pub struct TrimOutcome {
    pub body: Value,
    pub query: String,
    pub dropped: Vec<Event>,
    pub shape: Shape,
}

/// Drive the common narrow-until-it-fits loop.
///
/// `build` receives `(keep, char_cap, drop_tools)` and returns a candidate
/// body plus the events dropped to produce it; it is called again with a
/// narrower `keep`/`char_cap` (or `drop_tools=true`) each time the candidate
/// doesn't fit. `tool_mandatory` clients never see `drop_tools=true` — the
/// loop keeps narrowing `char_cap` instead, since those products hard-fail
/// when tool definitions vanish mid-conversation.
pub(crate) fn run_narrowing_loop(
    cfg: &ProxyPilotConfig,
    target_max_bytes: u64,
    tool_mandatory: bool,
    mut build: impl FnMut(usize, usize, bool) -> (Value, Vec<Event>),
) -> (Value, Vec<Event>) {
    let mut keep = START_KEEP;
    let mut char_cap = START_CHAR_CAP;
    let mut drop_tools = false;
    let mut failures = 0u32;

    let mut candidate = build(keep, char_cap, drop_tools);

    for _ in 0..MAX_ITERATIONS {
        let bytes = serde_json::to_vec(&candidate.0).map(|v| v.len() as u64).unwrap_or(u64::MAX);
        if bytes <= target_max_bytes {
            return candidate;
        }

        let at_floor = keep <= cfg.min_keep_messages && char_cap <= MIN_CHAR_CAP;
        if at_floor {
            // Bottomed out: forward the smallest version produced rather
            // than reject.
            return candidate;
        }

        failures += 1;
        keep = (keep / 2).max(cfg.min_keep_messages);
        char_cap = (char_cap / 2).max(MIN_CHAR_CAP);
        if failures >= 2 && !tool_mandatory {
            drop_tools = true;
        }

        candidate = build(keep, char_cap, drop_tools);
    }

    candidate
}
