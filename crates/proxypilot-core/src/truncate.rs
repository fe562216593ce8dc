// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Content-aware truncation for oversized text blocks, shared by the
//! trimmers (truncating text kept in the outgoing body) and the dropped-
//! event persistence path (truncating text before it is logged).

/// How a piece of text should be shortened once it exceeds its cap.
///
/// `Generic` is the safe default for arbitrary prose (a user message, an
/// assistant reply). The other variants are used for tool-result/
/// function-call-output text, where more of the useful signal lives at one
/// end of the content than evenly spread through it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputCategory {
    /// Keep both ends: useful when the start explains what ran and the end
    /// holds the final result (shell command output, test runs).
    HeadTail,
    /// Keep only the leading lines: ranked match lists where later entries
    /// are lower-relevance (search/grep results).
    MatchList,
    /// Balanced head+tail split: file contents, where both the top
    /// (imports/declarations) and the bottom (recent edits) matter.
    FileContent,
    /// Hard-truncate at the nearest line boundary.
    #[default]
    Generic,
}

/// Shorten `content` to roughly `cap_tokens` (a 4-bytes-per-token heuristic,
/// matching the budget analyzer's estimator) using a category-appropriate
/// strategy, appending a notice describing what was omitted.
///
/// Returns `content` unchanged when it already fits. `cap_tokens = 0` also
/// returns `content` unchanged — it signals "no cap configured", not "cap to
/// zero".
pub fn smart_truncate(content: &str, category: OutputCategory, cap_tokens: usize) -> String {
    if cap_tokens == 0 {
        return content.to_string();
    }
    let cap_chars = cap_tokens * 4;
    if content.len() <= cap_chars {
        return content.to_string();
    }
    let omitted_bytes = content.len().saturating_sub(cap_chars);
    match category {
        OutputCategory::HeadTail => head_tail_lines(
            content,
            cap_chars,
            60,
            40,
            &format!("[... {{lines}} lines / {omitted_bytes} bytes omitted ...]"),
        ),
        OutputCategory::MatchList => head_lines(
            content,
            cap_chars,
            &format!(
                "[... {{lines}} more matches omitted ({omitted_bytes} bytes); \
                 narrow the query to see them ...]"
            ),
        ),
        OutputCategory::FileContent => head_tail_lines(
            content,
            cap_chars,
            usize::MAX,
            usize::MAX,
            &format!("[... {{lines}} lines omitted ({omitted_bytes} bytes) ...]"),
        ),
        OutputCategory::Generic => {
            let cut = content[..cap_chars]
                .rfind('\n')
                .map(|p| p + 1)
                .unwrap_or(cap_chars);
            format!("{} …[truncated]…", &content[..cut])
        }
    }
}

/// Hard character-budget truncation used by the trimmers for plain prose
/// (not tool output): cut at `cap_chars` and append the truncation
/// sentinel.
pub fn truncate_with_sentinel(content: &str, cap_chars: usize) -> String {
    if content.len() <= cap_chars {
        return content.to_string();
    }
    let mut end = cap_chars.min(content.len());
    while end > 0 && !content.is_char_boundary(end) {
        end -= 1;
    }
    format!("{} …[truncated]…", &content[..end])
}

fn head_lines(content: &str, cap_chars: usize, notice_template: &str) -> String {
    let lines: Vec<&str> = content.lines().collect();
    let mut kept = String::with_capacity(cap_chars);
    let mut kept_count = 0usize;
    for line in &lines {
        let needed = if kept.is_empty() { line.len() } else { line.len() + 1 };
        if kept.len() + needed > cap_chars {
            break;
        }
        if !kept.is_empty() {
            kept.push('\n');
        }
        kept.push_str(line);
        kept_count += 1;
    }
    let omitted = lines.len().saturating_sub(kept_count);
    if omitted == 0 {
        return content[..cap_chars.min(content.len())].to_string();
    }
    let notice = notice_template.replace("{lines}", &omitted.to_string());
    format!("{kept}\n{notice}")
}

fn head_tail_lines(
    content: &str,
    cap_chars: usize,
    max_head: usize,
    max_tail: usize,
    notice_template: &str,
) -> String {
    let lines: Vec<&str> = content.lines().collect();
    let half_cap = cap_chars / 2;

    let mut head = String::with_capacity(half_cap);
    let mut head_count = 0usize;
    for line in lines.iter().take(max_head) {
        let needed = if head.is_empty() { line.len() } else { line.len() + 1 };
        if head.len() + needed > half_cap {
            break;
        }
        if !head.is_empty() {
            head.push('\n');
        }
        head.push_str(line);
        head_count += 1;
    }

    let mut tail_lines: Vec<&str> = Vec::new();
    let mut tail_chars = 0usize;
    for line in lines.iter().rev().take(max_tail) {
        let needed = if tail_lines.is_empty() { line.len() } else { line.len() + 1 };
        if tail_chars + needed > half_cap {
            break;
        }
        tail_chars += needed;
        tail_lines.push(line);
    }
    tail_lines.reverse();
    let tail_count = tail_lines.len();
    let tail = tail_lines.join("\n");

    let omitted = lines.len().saturating_sub(head_count + tail_count);
    if omitted == 0 {
        return content[..cap_chars.min(content.len())].to_string();
    }
    let notice = notice_template.replace("{lines}", &omitted.to_string());
    format!("{head}\n{notice}\n{tail}")
}
