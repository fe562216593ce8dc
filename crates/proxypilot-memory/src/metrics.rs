// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Lock-free diagnostic counters. These drive the semantic kill-switch and
//! the loopback diagnostic headers, so they live here rather than behind an
//! external metrics exporter.

use std::sync::atomic::{AtomicU64, Ordering};

/// Per-process counters. All fields are plain `AtomicU64`s read with
/// `Ordering::Relaxed`: exact cross-counter consistency is not required,
/// only that each counter's own total is correct.
#[derive(Debug, Default)]
pub struct Counters {
    pub memory_writes_permitted: AtomicU64,
    pub memory_writes_denied: AtomicU64,
    pub semantic_writes_permitted: AtomicU64,
    pub semantic_writes_denied: AtomicU64,
    pub embed_queued: AtomicU64,
    pub embed_processed: AtomicU64,
    pub embed_dropped: AtomicU64,
    pub embed_failed: AtomicU64,
}

impl Counters {
    pub fn new() -> Self {
        Self::default()
    }

    fn inc(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_memory_write(&self, permitted: bool) {
        if permitted {
            Self::inc(&self.memory_writes_permitted);
        } else {
            Self::inc(&self.memory_writes_denied);
        }
    }

    pub fn record_semantic_write(&self, permitted: bool) {
        if permitted {
            Self::inc(&self.semantic_writes_permitted);
        } else {
            Self::inc(&self.semantic_writes_denied);
        }
    }

    pub fn record_embed_queued(&self) {
        Self::inc(&self.embed_queued);
    }

    pub fn record_embed_processed(&self) {
        Self::inc(&self.embed_processed);
    }

    pub fn record_embed_dropped(&self) {
        Self::inc(&self.embed_dropped);
    }

    pub fn record_embed_failed(&self) {
        Self::inc(&self.embed_failed);
    }

    pub fn snapshot(&self) -> CountersSnapshot {
        CountersSnapshot {
            memory_writes_permitted: self.memory_writes_permitted.load(Ordering::Relaxed),
            memory_writes_denied: self.memory_writes_denied.load(Ordering::Relaxed),
            semantic_writes_permitted: self.semantic_writes_permitted.load(Ordering::Relaxed),
            semantic_writes_denied: self.semantic_writes_denied.load(Ordering::Relaxed),
            embed_queued: self.embed_queued.load(Ordering::Relaxed),
            embed_processed: self.embed_processed.load(Ordering::Relaxed),
            embed_dropped: self.embed_dropped.load(Ordering::Relaxed),
            embed_failed: self.embed_failed.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`Counters`] for header population and tests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CountersSnapshot {
    pub memory_writes_permitted: u64,
    pub memory_writes_denied: u64,
    pub semantic_writes_permitted: u64,
    pub semantic_writes_denied: u64,
    pub embed_queued: u64,
    pub embed_processed: u64,
    pub embed_dropped: u64,
    pub embed_failed: u64,
}
