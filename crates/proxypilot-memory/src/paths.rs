// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! On-disk layout: `<base>/sessions/<session>/*` and
//! `<base>/semantic/<namespace>/*`.

use std::path::{Path, PathBuf};

pub fn default_base_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".proxypilot")
        .join("memory")
}

pub fn session_dir(base: &Path, session: &str) -> PathBuf {
    base.join("sessions").join(sanitize(session))
}

pub fn events_log(base: &Path, session: &str) -> PathBuf {
    session_dir(base, session).join("events.log")
}

pub fn todo_file(base: &Path, session: &str) -> PathBuf {
    session_dir(base, session).join("todo.md")
}

pub fn pinned_file(base: &Path, session: &str) -> PathBuf {
    session_dir(base, session).join("pinned.md")
}

pub fn summary_file(base: &Path, session: &str) -> PathBuf {
    session_dir(base, session).join("summary.md")
}

pub fn pending_anchor_file(base: &Path, session: &str) -> PathBuf {
    session_dir(base, session).join("pending_anchor.md")
}

pub fn semantic_disabled_flag(base: &Path, session: &str) -> PathBuf {
    session_dir(base, session).join("semantic_disabled")
}

pub fn semantic_dir(base: &Path, namespace: &str) -> PathBuf {
    base.join("semantic").join(sanitize(namespace))
}

pub fn semantic_records_file(base: &Path, namespace: &str) -> PathBuf {
    semantic_dir(base, namespace).join("records.bin")
}

pub fn semantic_meta_file(base: &Path, namespace: &str) -> PathBuf {
    semantic_dir(base, namespace).join("index.meta")
}

/// Replace path separators and other filesystem-hostile characters so a
/// session/namespace key (which may contain `/` for a workspace path) can't
/// escape the base directory or collide with reserved names.
fn sanitize(key: &str) -> String {
    key.chars()
        .map(|c| if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') { c } else { '_' })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_replaces_path_separators() {
        assert_eq!(sanitize("/home/user/repo"), "_home_user_repo");
    }

    #[test]
    fn sanitize_keeps_safe_characters() {
        assert_eq!(sanitize("abc-123_x.y"), "abc-123_x.y");
    }

    #[test]
    fn session_dir_is_under_sessions_subtree() {
        let base = Path::new("/tmp/base");
        let dir = session_dir(base, "abc");
        assert_eq!(dir, Path::new("/tmp/base/sessions/abc"));
    }
}
