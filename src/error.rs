// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use thiserror::Error;

/// Errors the pipeline surfaces to its caller. The pipeline degrades
/// instead of failing wherever it can — budget analysis, trimming,
/// scaffolding and memory are all best-effort and never raise an error of
/// their own. What's left here is strictly the handful of cases where the
/// request itself cannot be processed at all.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("failed to read request body: {0}")]
    BodyRead(String),
    #[error(transparent)]
    Core(#[from] proxypilot_core::CoreError),
}
