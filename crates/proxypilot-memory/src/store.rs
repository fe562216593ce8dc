// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! The file-backed memory store: per-session append-only event log,
//! per-session single-file artifacts (todo/pinned/summary/pending-anchor),
//! and the lexical `search` used by the retrieval step before semantic
//! search is consulted.

use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

use proxypilot_model::Event;

use crate::error::StoreError;
use crate::paths;

const MAX_EVENT_TEXT_CHARS: usize = 8_000;
const SENTINEL: &str = "…[truncated]…";

/// One retrieved snippet, either lexical or semantic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snippet {
    pub role: String,
    pub text: String,
    pub score: i64,
}

/// File-backed session memory. Shared across request workers behind an
/// `Arc`; all mutation happens under the per-session lock handed out by
/// `lock_for`, never under the table lock itself.
pub struct Store {
    base: PathBuf,
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl Store {
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self {
            base: base.into(),
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base
    }

    fn lock_for(&self, key: &str) -> Arc<Mutex<()>> {
        let mut table = self.locks.lock().unwrap();
        table.entry(key.to_string()).or_insert_with(|| Arc::new(Mutex::new(()))).clone()
    }

    // ── Event log ────────────────────────────────────────────────────────

    pub fn append(&self, session: &str, events: &[Event]) -> Result<(), StoreError> {
        if events.is_empty() {
            return Ok(());
        }
        let lock = self.lock_for(&format!("session:{session}"));
        let _guard = lock.lock().unwrap();

        let dir = paths::session_dir(&self.base, session);
        fs::create_dir_all(&dir).map_err(|e| StoreError::io(dir.display().to_string(), e))?;
        let path = paths::events_log(&self.base, session);
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| StoreError::io(path.display().to_string(), e))?;

        for event in events {
            let mut capped = event.clone();
            capped.text = cap_text(&capped.text, MAX_EVENT_TEXT_CHARS);
            let line = serde_json::to_string(&capped)?;
            writeln!(file, "{line}").map_err(|e| StoreError::io(path.display().to_string(), e))?;
        }
        Ok(())
    }

    fn read_events(&self, session: &str) -> Vec<Event> {
        let path = paths::events_log(&self.base, session);
        let Ok(content) = fs::read_to_string(&path) else { return Vec::new() };
        content
            .lines()
            .filter_map(|line| serde_json::from_str::<Event>(line).ok())
            .collect()
    }

    /// Tokenize-and-score lexical retrieval over the event log. Later
    /// events score a small recency bonus so two events with equal term
    /// overlap prefer the more recent one.
    pub fn search(&self, session: &str, query: &str, max_chars: usize, max_snips: usize) -> Vec<Snippet> {
        let terms = tokenize(query);
        if terms.is_empty() {
            return Vec::new();
        }
        let events = self.read_events(session);
        let total = events.len();
        let mut scored: Vec<Snippet> = events
            .iter()
            .enumerate()
            .filter_map(|(idx, event)| {
                let event_terms = tokenize(&event.text);
                let overlap = terms.iter().filter(|t| event_terms.contains(*t)).count();
                if overlap == 0 {
                    return None;
                }
                let recency_bonus = idx as i64;
                let score = (overlap as i64) * (total as i64 + 1) + recency_bonus;
                Some(Snippet {
                    role: event.role.clone(),
                    text: event.text.clone(),
                    score,
                })
            })
            .collect();

        scored.sort_by(|a, b| b.score.cmp(&a.score));
        scored.truncate(max_snips);

        let mut budget = max_chars;
        let mut out = Vec::new();
        for snip in scored {
            if budget == 0 {
                break;
            }
            let truncated_text = cap_text(&snip.text, budget.min(snip.text.len().max(1)));
            let take = truncated_text.len().min(budget);
            budget = budget.saturating_sub(take);
            out.push(Snippet {
                text: truncated_text,
                ..snip
            });
        }
        out
    }

    // ── Single-file artifacts ────────────────────────────────────────────

    pub fn read_todo(&self, session: &str) -> Option<String> {
        self.read_artifact(session, paths::todo_file)
    }

    pub fn write_todo(&self, session: &str, text: &str, max: usize) -> Result<(), StoreError> {
        self.write_artifact(session, paths::todo_file, text, max)
    }

    pub fn read_pinned(&self, session: &str) -> Option<String> {
        self.read_artifact(session, paths::pinned_file)
    }

    pub fn write_pinned(&self, session: &str, text: &str, max: usize) -> Result<(), StoreError> {
        self.write_artifact(session, paths::pinned_file, text, max)
    }

    pub fn read_summary(&self, session: &str) -> Option<String> {
        self.read_artifact(session, paths::summary_file)
    }

    pub fn write_summary(&self, session: &str, text: &str, max: usize) -> Result<(), StoreError> {
        self.write_artifact(session, paths::summary_file, text, max)
    }

    pub fn read_pending_anchor(&self, session: &str) -> Option<String> {
        self.read_artifact(session, paths::pending_anchor_file)
    }

    pub fn set_pending_anchor(&self, session: &str, text: &str, max: usize) -> Result<(), StoreError> {
        self.write_artifact(session, paths::pending_anchor_file, text, max)
    }

    pub fn clear_pending_anchor(&self, session: &str) -> Result<(), StoreError> {
        let lock = self.lock_for(&format!("session:{session}"));
        let _guard = lock.lock().unwrap();
        let path = paths::pending_anchor_file(&self.base, session);
        if path.exists() {
            fs::remove_file(&path).map_err(|e| StoreError::io(path.display().to_string(), e))?;
        }
        Ok(())
    }

    fn read_artifact(&self, session: &str, path_fn: fn(&Path, &str) -> PathBuf) -> Option<String> {
        let path = path_fn(&self.base, session);
        fs::read_to_string(path).ok()
    }

    fn write_artifact(
        &self,
        session: &str,
        path_fn: fn(&Path, &str) -> PathBuf,
        text: &str,
        max: usize,
    ) -> Result<(), StoreError> {
        let lock = self.lock_for(&format!("session:{session}"));
        let _guard = lock.lock().unwrap();
        let dir = paths::session_dir(&self.base, session);
        fs::create_dir_all(&dir).map_err(|e| StoreError::io(dir.display().to_string(), e))?;
        let path = path_fn(&self.base, session);
        let capped = cap_text(text, max);
        atomic_write(&path, capped.as_bytes())
    }

    // ── Semantic kill-switch ─────────────────────────────────────────────

    pub fn is_semantic_disabled(&self, session: &str) -> bool {
        paths::semantic_disabled_flag(&self.base, session).exists()
    }

    pub fn set_semantic_disabled(&self, session: &str) -> Result<(), StoreError> {
        let lock = self.lock_for(&format!("session:{session}"));
        let _guard = lock.lock().unwrap();
        let dir = paths::session_dir(&self.base, session);
        fs::create_dir_all(&dir).map_err(|e| StoreError::io(dir.display().to_string(), e))?;
        let path = paths::semantic_disabled_flag(&self.base, session);
        atomic_write(&path, b"")
    }

    // ── Pruning ──────────────────────────────────────────────────────────

    /// Enforce age/count/byte-size quotas over `sessions/*`, deleting oldest
    /// (by event-log mtime) first.
    pub fn prune_sessions(&self, max_age_days: u64, max_sessions: usize, max_bytes_per_session: u64) {
        let sessions_dir = self.base.join("sessions");
        let Ok(entries) = fs::read_dir(&sessions_dir) else { return };

        let mut dirs: Vec<(PathBuf, SystemTime)> = entries
            .filter_map(|e| e.ok())
            .filter(|e| e.path().is_dir())
            .map(|e| {
                let mtime = dir_mtime(&e.path());
                (e.path(), mtime)
            })
            .collect();
        dirs.sort_by_key(|(_, mtime)| *mtime);

        let max_age = Duration::from_secs(max_age_days * 86_400);
        let now = SystemTime::now();

        let mut kept: Vec<PathBuf> = Vec::new();
        for (path, mtime) in dirs {
            let age = now.duration_since(mtime).unwrap_or_default();
            let too_old = max_age_days > 0 && age > max_age;
            let too_big = max_bytes_per_session > 0 && dir_size(&path) > max_bytes_per_session;
            if too_old || too_big {
                let _ = fs::remove_dir_all(&path);
                continue;
            }
            kept.push(path);
        }

        if max_sessions > 0 && kept.len() > max_sessions {
            let excess = kept.len() - max_sessions;
            for path in kept.into_iter().take(excess) {
                let _ = fs::remove_dir_all(&path);
            }
        }
    }
}

fn cap_text(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars || max_chars == 0 {
        return text.to_string();
    }
    let keep = max_chars.saturating_sub(SENTINEL.chars().count());
    let truncated: String = text.chars().take(keep).collect();
    format!("{truncated}{SENTINEL}")
}

fn tokenize(text: &str) -> std::collections::HashSet<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.len() > 2)
        .map(str::to_string)
        .collect()
}

fn dir_mtime(path: &Path) -> SystemTime {
    fs::metadata(path)
        .and_then(|m| m.modified())
        .unwrap_or(SystemTime::UNIX_EPOCH)
}

fn dir_size(path: &Path) -> u64 {
    let Ok(entries) = fs::read_dir(path) else { return 0 };
    entries
        .filter_map(|e| e.ok())
        .filter_map(|e| e.metadata().ok())
        .map(|m| m.len())
        .sum()
}

/// Write-to-temp-then-rename so a crash mid-write never leaves a torn
/// file.
fn atomic_write(path: &Path, content: &[u8]) -> Result<(), StoreError> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let tmp_path = dir.join(format!(
        ".{}.tmp",
        path.file_name().and_then(|n| n.to_str()).unwrap_or("artifact")
    ));
    {
        let mut tmp = fs::File::create(&tmp_path).map_err(|e| StoreError::io(tmp_path.display().to_string(), e))?;
        tmp.write_all(content).map_err(|e| StoreError::io(tmp_path.display().to_string(), e))?;
        tmp.sync_all().ok();
    }
    fs::rename(&tmp_path, path).map_err(|e| StoreError::io(path.display().to_string(), e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proxypilot_model::EventKind;
    use tempfile::tempdir;

    #[test]
    fn append_then_search_finds_matching_event() {
        let dir = tempdir().unwrap();
        let store = Store::new(dir.path());
        store
            .append(
                "s1",
                &[Event::new(EventKind::DroppedChat, "user", "fix the parser bug")],
            )
            .unwrap();
        let hits = store.search("s1", "parser", 1000, 5);
        assert_eq!(hits.len(), 1);
        assert!(hits[0].text.contains("parser"));
    }

    #[test]
    fn search_with_no_matching_terms_returns_empty() {
        let dir = tempdir().unwrap();
        let store = Store::new(dir.path());
        store
            .append("s1", &[Event::new(EventKind::DroppedChat, "user", "hello world")])
            .unwrap();
        assert!(store.search("s1", "zzz", 1000, 5).is_empty());
    }

    #[test]
    fn events_log_is_append_only_across_calls() {
        let dir = tempdir().unwrap();
        let store = Store::new(dir.path());
        store
            .append("s1", &[Event::new(EventKind::DroppedChat, "user", "first")])
            .unwrap();
        let path = paths::events_log(dir.path(), "s1");
        let before = fs::read_to_string(&path).unwrap();
        store
            .append("s1", &[Event::new(EventKind::DroppedChat, "user", "second")])
            .unwrap();
        let after = fs::read_to_string(&path).unwrap();
        assert!(after.starts_with(&before));
    }

    #[test]
    fn write_then_read_todo_round_trips() {
        let dir = tempdir().unwrap();
        let store = Store::new(dir.path());
        store.write_todo("s1", "- step one", 1000).unwrap();
        assert_eq!(store.read_todo("s1"), Some("- step one".to_string()));
    }

    #[test]
    fn write_todo_caps_oversized_text() {
        let dir = tempdir().unwrap();
        let store = Store::new(dir.path());
        store.write_todo("s1", &"x".repeat(2000), 100).unwrap();
        let text = store.read_todo("s1").unwrap();
        assert!(text.len() <= 100 + SENTINEL.len());
        assert!(text.ends_with(SENTINEL));
    }

    #[test]
    fn pending_anchor_set_read_clear() {
        let dir = tempdir().unwrap();
        let store = Store::new(dir.path());
        assert_eq!(store.read_pending_anchor("s1"), None);
        store.set_pending_anchor("s1", "draft summary", 1000).unwrap();
        assert_eq!(store.read_pending_anchor("s1"), Some("draft summary".to_string()));
        store.clear_pending_anchor("s1").unwrap();
        assert_eq!(store.read_pending_anchor("s1"), None);
    }

    #[test]
    fn semantic_disabled_flag_round_trips() {
        let dir = tempdir().unwrap();
        let store = Store::new(dir.path());
        assert!(!store.is_semantic_disabled("s1"));
        store.set_semantic_disabled("s1").unwrap();
        assert!(store.is_semantic_disabled("s1"));
    }

    #[test]
    fn prune_sessions_removes_sessions_over_byte_quota() {
        let dir = tempdir().unwrap();
        let store = Store::new(dir.path());
        store.write_todo("big", &"x".repeat(500), 1000).unwrap();
        store.prune_sessions(0, 0, 10);
        assert!(!paths::session_dir(dir.path(), "big").exists());
    }

    #[test]
    fn prune_sessions_enforces_max_session_count() {
        let dir = tempdir().unwrap();
        let store = Store::new(dir.path());
        for i in 0..3 {
            store.write_todo(&format!("s{i}"), "x", 100).unwrap();
        }
        store.prune_sessions(0, 2, 0);
        let remaining = fs::read_dir(dir.path().join("sessions")).unwrap().count();
        assert_eq!(remaining, 2);
    }

    #[test]
    fn prune_sessions_keeps_sessions_within_quota() {
        let dir = tempdir().unwrap();
        let store = Store::new(dir.path());
        store.write_todo("keep", "x", 100).unwrap();
        store.prune_sessions(36_500, 10, 0);
        assert!(paths::session_dir(dir.path(), "keep").exists());
    }
}
