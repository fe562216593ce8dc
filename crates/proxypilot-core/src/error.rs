// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use thiserror::Error;

/// Errors surfaced by the core pipeline stages. None of these ever become
/// a client-visible response body — callers log them and degrade
/// gracefully, with the sole exception of [`CoreError::BodyRead`], which
/// the host turns into a 400.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("failed to read request body")]
    BodyRead,
    #[error("failed to parse request body as JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),
}
