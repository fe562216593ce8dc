// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Per-namespace semantic index: vectors are appended as little-endian
//! `f32` to `records.bin`, one JSONL metadata line per vector (in the same
//! order) to `index.meta`. Search is cosine similarity with an optional
//! lexical blend for tie-breaking.

use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

use serde::{Deserialize, Serialize};

use crate::error::StoreError;
use crate::paths;
use crate::store::Snippet;

/// One vector appended to a namespace's semantic index.
#[derive(Debug, Clone)]
pub struct SemanticRecord {
    pub role: String,
    pub text: String,
    pub vec: Vec<f32>,
    pub source: String,
    pub session: String,
}

#[derive(Serialize, Deserialize)]
struct RecordMeta {
    role: String,
    text: String,
    source: String,
    session: String,
    dim: usize,
}

pub struct SemanticIndex {
    base: PathBuf,
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl SemanticIndex {
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self {
            base: base.into(),
            locks: Mutex::new(HashMap::new()),
        }
    }

    fn lock_for(&self, namespace: &str) -> Arc<Mutex<()>> {
        let mut table = self.locks.lock().unwrap();
        table.entry(namespace.to_string()).or_insert_with(|| Arc::new(Mutex::new(()))).clone()
    }

    pub fn append_semantic(&self, namespace: &str, records: &[SemanticRecord]) -> Result<(), StoreError> {
        if records.is_empty() {
            return Ok(());
        }
        let lock = self.lock_for(namespace);
        let _guard = lock.lock().unwrap();

        let dir = paths::semantic_dir(&self.base, namespace);
        fs::create_dir_all(&dir).map_err(|e| StoreError::io(dir.display().to_string(), e))?;

        let bin_path = paths::semantic_records_file(&self.base, namespace);
        let meta_path = paths::semantic_meta_file(&self.base, namespace);

        let mut bin = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&bin_path)
            .map_err(|e| StoreError::io(bin_path.display().to_string(), e))?;
        let mut meta = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&meta_path)
            .map_err(|e| StoreError::io(meta_path.display().to_string(), e))?;

        for record in records {
            for component in &record.vec {
                bin.write_all(&component.to_le_bytes())
                    .map_err(|e| StoreError::io(bin_path.display().to_string(), e))?;
            }
            let line = serde_json::to_string(&RecordMeta {
                role: record.role.clone(),
                text: record.text.clone(),
                source: record.source.clone(),
                session: record.session.clone(),
                dim: record.vec.len(),
            })?;
            writeln!(meta, "{line}").map_err(|e| StoreError::io(meta_path.display().to_string(), e))?;
        }
        Ok(())
    }

    fn read_records(&self, namespace: &str) -> Vec<(RecordMeta, Vec<f32>)> {
        let bin_path = paths::semantic_records_file(&self.base, namespace);
        let meta_path = paths::semantic_meta_file(&self.base, namespace);
        let Ok(meta_content) = fs::read_to_string(&meta_path) else { return Vec::new() };
        let Ok(mut bin_file) = fs::File::open(&bin_path) else { return Vec::new() };

        let mut raw = Vec::new();
        if bin_file.read_to_end(&mut raw).is_err() {
            return Vec::new();
        }

        let mut offset = 0usize;
        let mut out = Vec::new();
        for line in meta_content.lines() {
            let Ok(meta) = serde_json::from_str::<RecordMeta>(line) else { continue };
            let bytes_needed = meta.dim * 4;
            if offset + bytes_needed > raw.len() {
                break;
            }
            let vec: Vec<f32> = raw[offset..offset + bytes_needed]
                .chunks_exact(4)
                .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
                .collect();
            offset += bytes_needed;
            out.push((meta, vec));
        }
        out
    }

    /// Cosine similarity search blended with an optional lexical
    /// term-overlap tie-breaker, `lexical_weight` in `[0,1]` (0 = pure
    /// cosine, the default).
    pub fn search_semantic(
        &self,
        namespace: &str,
        query_vec: &[f32],
        query_text: &str,
        max_chars: usize,
        max_snips: usize,
        lexical_weight: f32,
    ) -> Vec<Snippet> {
        let records = self.read_records(namespace);
        let query_terms = tokenize(query_text);

        let mut scored: Vec<(f32, Snippet)> = records
            .into_iter()
            .filter_map(|(meta, vec)| {
                let cosine = cosine_similarity(query_vec, &vec)?;
                let lexical = if lexical_weight > 0.0 {
                    let terms = tokenize(&meta.text);
                    let overlap = query_terms.intersection(&terms).count();
                    overlap as f32 / query_terms.len().max(1) as f32
                } else {
                    0.0
                };
                let score = cosine * (1.0 - lexical_weight) + lexical * lexical_weight;
                Some((
                    score,
                    Snippet {
                        role: meta.role,
                        text: meta.text,
                        score: (score * 1_000_000.0) as i64,
                    },
                ))
            })
            .collect();

        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(max_snips);

        let mut budget = max_chars;
        let mut out = Vec::new();
        for (_, snip) in scored {
            if budget == 0 {
                break;
            }
            let take = snip.text.len().min(budget);
            let text: String = snip.text.chars().take(take).collect();
            budget = budget.saturating_sub(text.len());
            out.push(Snippet { text, ..snip });
        }
        out
    }

    pub fn prune_semantic(&self, max_age_days: u64, max_namespaces: usize, max_bytes_per_namespace: u64) {
        let semantic_dir = self.base.join("semantic");
        let Ok(entries) = fs::read_dir(&semantic_dir) else { return };

        let mut dirs: Vec<(PathBuf, SystemTime)> = entries
            .filter_map(|e| e.ok())
            .filter(|e| e.path().is_dir())
            .map(|e| (e.path(), dir_mtime(&e.path())))
            .collect();
        dirs.sort_by_key(|(_, mtime)| *mtime);

        let max_age = Duration::from_secs(max_age_days * 86_400);
        let now = SystemTime::now();

        let mut kept: Vec<PathBuf> = Vec::new();
        for (path, mtime) in dirs {
            let age = now.duration_since(mtime).unwrap_or_default();
            let too_old = max_age_days > 0 && age > max_age;
            let too_big = max_bytes_per_namespace > 0 && dir_size(&path) > max_bytes_per_namespace;
            if too_old || too_big {
                let _ = fs::remove_dir_all(&path);
                continue;
            }
            kept.push(path);
        }

        if max_namespaces > 0 && kept.len() > max_namespaces {
            let excess = kept.len() - max_namespaces;
            for path in kept.into_iter().take(excess) {
                let _ = fs::remove_dir_all(&path);
            }
        }
    }
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> Option<f32> {
    if a.is_empty() || a.len() != b.len() {
        return None;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return Some(0.0);
    }
    Some(dot / (norm_a * norm_b))
}

fn tokenize(text: &str) -> std::collections::HashSet<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.len() > 2)
        .map(str::to_string)
        .collect()
}

fn dir_mtime(path: &Path) -> SystemTime {
    fs::metadata(path).and_then(|m| m.modified()).unwrap_or(SystemTime::UNIX_EPOCH)
}

fn dir_size(path: &Path) -> u64 {
    let Ok(entries) = fs::read_dir(path) else { return 0 };
    entries.filter_map(|e| e.ok()).filter_map(|e| e.metadata().ok()).map(|m| m.len()).sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn rec(role: &str, text: &str, vec: Vec<f32>) -> SemanticRecord {
        SemanticRecord {
            role: role.to_string(),
            text: text.to_string(),
            vec,
            source: "test".to_string(),
            session: "s1".to_string(),
        }
    }

    #[test]
    fn append_then_search_returns_closest_vector() {
        let dir = tempdir().unwrap();
        let idx = SemanticIndex::new(dir.path());
        idx.append_semantic(
            "repo",
            &[
                rec("user", "fix the parser", vec![1.0, 0.0, 0.0]),
                rec("user", "update docs", vec![0.0, 1.0, 0.0]),
            ],
        )
        .unwrap();
        let hits = idx.search_semantic("repo", &[1.0, 0.0, 0.0], "parser", 1000, 5, 0.0);
        assert_eq!(hits[0].text, "fix the parser");
    }

    #[test]
    fn empty_index_returns_no_hits() {
        let dir = tempdir().unwrap();
        let idx = SemanticIndex::new(dir.path());
        assert!(idx.search_semantic("repo", &[1.0, 0.0], "x", 1000, 5, 0.0).is_empty());
    }

    #[test]
    fn cosine_similarity_is_one_for_identical_vectors() {
        assert!((cosine_similarity(&[1.0, 2.0, 3.0], &[1.0, 2.0, 3.0]).unwrap() - 1.0).abs() < 1e-6);
    }

    #[test]
    fn cosine_similarity_none_for_mismatched_dims() {
        assert!(cosine_similarity(&[1.0, 2.0], &[1.0]).is_none());
    }

    #[test]
    fn prune_semantic_removes_namespaces_over_byte_quota() {
        let dir = tempdir().unwrap();
        let idx = SemanticIndex::new(dir.path());
        idx.append_semantic("old-repo", &[rec("user", &"x".repeat(200), vec![1.0])]).unwrap();
        idx.prune_semantic(0, 0, 10);
        assert!(!paths::semantic_dir(dir.path(), "old-repo").exists());
    }

    #[test]
    fn prune_semantic_keeps_namespaces_within_quota() {
        let dir = tempdir().unwrap();
        let idx = SemanticIndex::new(dir.path());
        idx.append_semantic("repo", &[rec("user", "x", vec![1.0])]).unwrap();
        idx.prune_semantic(36_500, 10, 0);
        assert!(paths::semantic_dir(dir.path(), "repo").exists());
    }
}
