// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Minimal HTTP client for a local embedding service: posts a batch of
//! strings to `<base>/api/embed` and returns one vector per input.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

const EMBED_TIMEOUT: Duration = Duration::from_secs(8);

#[derive(Debug, Error)]
pub enum EmbedError {
    #[error("embedding request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("embedding service returned status {0}")]
    Status(reqwest::StatusCode),
    #[error("embedding response had {got} vectors for {expected} inputs")]
    CountMismatch { got: usize, expected: usize },
}

#[derive(Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: &'a [String],
    options: EmbedOptions,
}

#[derive(Serialize)]
struct EmbedOptions {
    truncate: bool,
}

#[derive(Deserialize)]
struct EmbedResponse {
    embeddings: Vec<Vec<f64>>,
}

/// Client for a single embedding model at a fixed base URL.
pub struct EmbedClient {
    http: reqwest::Client,
    base_url: String,
    model: String,
}

impl EmbedClient {
    pub fn new(base_url: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::builder()
                .timeout(EMBED_TIMEOUT)
                .build()
                .unwrap_or_else(|_| reqwest::Client::new()),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
        }
    }

    /// Embed a batch of strings, returning one `f32` vector per input in
    /// the same order. The wire format carries `f64` values; they are
    /// narrowed to `f32` here since the on-disk semantic record format
    /// stores little-endian `f32`.
    pub async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let url = format!("{}/api/embed", self.base_url);
        let body = EmbedRequest {
            model: &self.model,
            input: texts,
            options: EmbedOptions { truncate: true },
        };
        let resp = self.http.post(&url).json(&body).send().await?;
        if !resp.status().is_success() {
            return Err(EmbedError::Status(resp.status()));
        }
        let parsed: EmbedResponse = resp.json().await?;
        if parsed.embeddings.len() != texts.len() {
            return Err(EmbedError::CountMismatch {
                got: parsed.embeddings.len(),
                expected: texts.len(),
            });
        }
        Ok(parsed
            .embeddings
            .into_iter()
            .map(|v| v.into_iter().map(|x| x as f32).collect())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_url_trailing_slash_is_stripped() {
        let client = EmbedClient::new("http://localhost:11434/", "nomic-embed-text");
        assert_eq!(client.base_url, "http://localhost:11434");
    }

    #[tokio::test]
    async fn empty_input_returns_empty_without_a_request() {
        let client = EmbedClient::new("http://127.0.0.1:1", "m");
        let out = client.embed(&[]).await.unwrap();
        assert!(out.is_empty());
    }
}
