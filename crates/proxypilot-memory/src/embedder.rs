// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Bounded background embedding queue: the request path never blocks on
//! embedding — it tries a non-blocking send and moves on; a single consumer
//! task drains the channel and writes completed vectors into the semantic
//! index.

use std::sync::Arc;

use tokio::sync::mpsc;

use crate::embed_client::EmbedClient;
use crate::metrics::Counters;
use crate::semantic::{SemanticIndex, SemanticRecord};

const QUEUE_CAPACITY: usize = 64;

/// One unit of embedding work: a batch of texts (with parallel roles) bound
/// for a single namespace/session pair.
pub struct EmbedTask {
    pub namespace: String,
    pub session: String,
    pub texts: Vec<String>,
    pub roles: Vec<String>,
    pub source: String,
}

#[derive(Clone)]
pub struct EmbedQueue {
    sender: mpsc::Sender<EmbedTask>,
    counters: Arc<Counters>,
}

impl EmbedQueue {
    /// Spawn the background consumer and return a handle for enqueueing
    /// work. The returned `JoinHandle` lets `shutdown()` wait for the queue
    /// to drain.
    pub fn spawn(client: Arc<EmbedClient>, index: Arc<SemanticIndex>, counters: Arc<Counters>) -> (Self, tokio::task::JoinHandle<()>) {
        let (sender, receiver) = mpsc::channel(QUEUE_CAPACITY);
        let worker_counters = counters.clone();
        let handle = tokio::spawn(run_worker(receiver, client, index, worker_counters));
        (Self { sender, counters }, handle)
    }

    /// Enqueue a task without blocking; drops and counts it if the queue is
    /// full.
    pub fn enqueue(&self, task: EmbedTask) {
        match self.sender.try_send(task) {
            Ok(()) => self.counters.record_embed_queued(),
            Err(_) => self.counters.record_embed_dropped(),
        }
    }
}

async fn run_worker(
    mut receiver: mpsc::Receiver<EmbedTask>,
    client: Arc<EmbedClient>,
    index: Arc<SemanticIndex>,
    counters: Arc<Counters>,
) {
    while let Some(task) = receiver.recv().await {
        match client.embed(&task.texts).await {
            Ok(vectors) => {
                let fallback_role = task.source.clone();
                let records: Vec<SemanticRecord> = vectors
                    .into_iter()
                    .enumerate()
                    .map(|(i, vec)| SemanticRecord {
                        role: task.roles.get(i).cloned().unwrap_or_else(|| fallback_role.clone()),
                        text: task.texts.get(i).cloned().unwrap_or_default(),
                        vec,
                        source: task.source.clone(),
                        session: task.session.clone(),
                    })
                    .collect();
                if index.append_semantic(&task.namespace, &records).is_ok() {
                    counters.record_embed_processed();
                } else {
                    counters.record_embed_failed();
                }
            }
            Err(err) => {
                tracing::warn!(namespace = %task.namespace, error = %err, "embedding request failed");
                counters.record_embed_failed();
            }
        }
    }
}
