// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Per-session token-bucket rate limiting for memory and semantic writes,
//! built on the `governor` crate's keyed GCRA limiter.

use std::num::NonZeroU32;

use governor::{clock::DefaultClock, state::keyed::DashMapStateStore, Quota, RateLimiter};

type KeyedLimiter = RateLimiter<String, DashMapStateStore<String>, DefaultClock>;

/// Rate limiter pair for a single memory store: one bucket table keyed by
/// session for event-log/todo/pinned/summary writes, one for semantic writes.
pub struct WriteLimiter {
    memory: KeyedLimiter,
    semantic: KeyedLimiter,
}

fn quota_per_minute(per_min: u32) -> Quota {
    let n = NonZeroU32::new(per_min.max(1)).unwrap();
    Quota::per_minute(n).allow_burst(NonZeroU32::new((per_min / 4).max(1)).unwrap())
}

impl WriteLimiter {
    pub fn new(memory_per_min: u32, semantic_per_min: u32) -> Self {
        Self {
            memory: RateLimiter::keyed(quota_per_minute(memory_per_min)),
            semantic: RateLimiter::keyed(quota_per_minute(semantic_per_min)),
        }
    }

    pub fn allow_memory_write(&self, session: &str) -> bool {
        self.memory.check_key(&session.to_string()).is_ok()
    }

    pub fn allow_semantic_write(&self, namespace: &str) -> bool {
        self.semantic.check_key(&namespace.to_string()).is_ok()
    }

    /// Drop buckets idle for longer than the GCRA's own retention window.
    /// Called opportunistically by the pruner so the table doesn't grow
    /// unbounded across many distinct sessions.
    pub fn gc(&self) {
        self.memory.retain_recent();
        self.semantic.retain_recent();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allows_writes_under_the_quota() {
        let limiter = WriteLimiter::new(120, 120);
        for _ in 0..5 {
            assert!(limiter.allow_memory_write("s1"));
        }
    }

    #[test]
    fn denies_writes_once_burst_is_exhausted() {
        let limiter = WriteLimiter::new(4, 120);
        // quota_per_minute(4) allows a burst of 1, so a tight loop trips it.
        let mut denied = false;
        for _ in 0..20 {
            if !limiter.allow_memory_write("s2") {
                denied = true;
                break;
            }
        }
        assert!(denied);
    }

    #[test]
    fn sessions_are_tracked_independently() {
        let limiter = WriteLimiter::new(4, 120);
        while limiter.allow_memory_write("busy") {}
        assert!(limiter.allow_memory_write("fresh"));
    }

    #[test]
    fn memory_and_semantic_buckets_are_independent() {
        let limiter = WriteLimiter::new(4, 120);
        while limiter.allow_memory_write("x") {}
        assert!(limiter.allow_semantic_write("x"));
    }

    #[test]
    fn gc_does_not_panic_on_empty_tables() {
        let limiter = WriteLimiter::new(120, 120);
        limiter.gc();
    }
}
