// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Process-wide singletons the pipeline needs on every request: the memory
//! store, semantic index, embeddings client/queue, rate limiters, and
//! diagnostic counters. Everything here is constructed once in
//! [`ProxyPilotState::new`] and shared behind `Arc` across request
//! handlers.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};

use proxypilot_config::ProxyPilotConfig;
use proxypilot_core::SummaryExecutor;
use proxypilot_memory::{Counters, EmbedClient, EmbedQueue, SemanticIndex, Store, WriteLimiter};
use tokio::task::JoinHandle;

/// How often [`ProxyPilotState::maybe_prune`] is allowed to actually touch
/// disk.
const PRUNE_INTERVAL_SECS: i64 = 600;

/// Consecutive synchronous-embed failures for the same session before
/// semantic retrieval is disabled for it.
const SEMANTIC_FAILURE_THRESHOLD: u32 = 3;

pub struct ProxyPilotState {
    pub config: ProxyPilotConfig,
    pub store: Store,
    pub semantic: Arc<SemanticIndex>,
    pub limiter: WriteLimiter,
    pub counters: Arc<Counters>,
    pub embed_queue: Option<EmbedQueue>,
    pub embed_client: Option<Arc<EmbedClient>>,
    pub summary_executor: Option<Arc<dyn SummaryExecutor>>,
    embed_worker: Option<JoinHandle<()>>,
    last_prune_unix: AtomicI64,
    semantic_failures: Mutex<HashMap<String, u32>>,
    llm_summary_failed: Mutex<HashSet<String>>,
}

impl ProxyPilotState {
    /// Build the process-wide state from `config`, spawning the background
    /// embedder task when semantic retrieval is enabled. Pass an optional
    /// `summary_executor` to back the anchored summarizer with an LLM;
    /// `None` means every summary goes through the regex fallback.
    pub fn new(config: ProxyPilotConfig, summary_executor: Option<Arc<dyn SummaryExecutor>>) -> Self {
        let base_dir = config
            .memory_dir
            .clone()
            .unwrap_or_else(proxypilot_memory::default_base_dir);
        let store = Store::new(base_dir.clone());
        let semantic = Arc::new(SemanticIndex::new(base_dir));
        let limiter = WriteLimiter::new(config.memory_max_writes_per_min, config.semantic_max_writes_per_min);
        let counters = Arc::new(Counters::new());

        let (embed_queue, embed_worker, embed_client) = if config.semantic_enabled {
            let client = Arc::new(EmbedClient::new(config.semantic_base_url.clone(), config.semantic_model.clone()));
            let (queue, handle) = EmbedQueue::spawn(client.clone(), semantic.clone(), counters.clone());
            (Some(queue), Some(handle), Some(client))
        } else {
            (None, None, None)
        };

        Self {
            config,
            store,
            semantic,
            limiter,
            counters,
            embed_queue,
            embed_client,
            summary_executor,
            embed_worker,
            last_prune_unix: AtomicI64::new(0),
            semantic_failures: Mutex::new(HashMap::new()),
            llm_summary_failed: Mutex::new(HashSet::new()),
        }
    }

    /// Record a synchronous embeddings-service failure for `session`. Once
    /// [`SEMANTIC_FAILURE_THRESHOLD`] consecutive failures accumulate,
    /// semantic retrieval is disabled for that session and the counter
    /// resets.
    pub fn record_semantic_failure(&self, session: &str) {
        let mut table = self.semantic_failures.lock().unwrap();
        let count = table.entry(session.to_string()).or_insert(0);
        *count += 1;
        if *count >= SEMANTIC_FAILURE_THRESHOLD {
            let _ = self.store.set_semantic_disabled(session);
            table.remove(session);
        }
    }

    /// Clear the failure counter for `session` after a successful embed.
    pub fn record_semantic_success(&self, session: &str) {
        self.semantic_failures.lock().unwrap().remove(session);
    }

    /// Remember that the LLM summarizer failed for `session`. Unless
    /// `anchor_retry_llm` is set, later requests for the session go
    /// straight to the regex summary instead of re-paying a synchronous
    /// round trip against a down model.
    pub fn mark_llm_summary_failed(&self, session: &str) {
        self.llm_summary_failed.lock().unwrap().insert(session.to_string());
    }

    pub fn llm_summary_failed(&self, session: &str) -> bool {
        self.llm_summary_failed.lock().unwrap().contains(session)
    }

    /// Run the memory and semantic pruners, but only if at least
    /// [`PRUNE_INTERVAL_SECS`] have passed since the last run. Cheap to call
    /// on every request; the actual disk work is gated internally.
    pub fn maybe_prune(&self) {
        let now = chrono::Utc::now().timestamp();
        let last = self.last_prune_unix.load(Ordering::Relaxed);
        if now - last < PRUNE_INTERVAL_SECS {
            return;
        }
        if self
            .last_prune_unix
            .compare_exchange(last, now, Ordering::Relaxed, Ordering::Relaxed)
            .is_err()
        {
            return;
        }

        self.store.prune_sessions(
            self.config.memory_max_age_days as u64,
            self.config.memory_max_sessions,
            self.config.memory_max_bytes_per_session,
        );
        self.semantic.prune_semantic(
            self.config.memory_max_age_days as u64,
            self.config.semantic_max_namespaces,
            self.config.semantic_max_bytes_per_namespace,
        );
        self.limiter.gc();
    }

    /// Stop the background embedder task, letting it drain whatever is
    /// already queued. Idempotent; safe to call during graceful shutdown
    /// even if semantic retrieval was never enabled.
    pub async fn shutdown(&mut self) {
        self.embed_queue = None;
        if let Some(handle) = self.embed_worker.take() {
            let _ = handle.await;
        }
    }
}
