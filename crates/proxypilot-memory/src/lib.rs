// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! The on-disk memory store, semantic index, embeddings client, async
//! embedder queue, and rate limiter backing proxypilot's retrieval and
//! scaffold-injection pipeline stages.

mod embed_client;
mod embedder;
mod error;
mod limiter;
mod metrics;
mod paths;
mod semantic;
mod store;

pub use embed_client::{EmbedClient, EmbedError};
pub use embedder::{EmbedQueue, EmbedTask};
pub use error::StoreError;
pub use limiter::WriteLimiter;
pub use metrics::{Counters, CountersSnapshot};
pub use paths::default_base_dir;
pub use semantic::{SemanticIndex, SemanticRecord};
pub use store::{Snippet, Store};
