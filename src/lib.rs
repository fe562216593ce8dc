// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! proxypilot: agentic prompt-budget and memory-augmentation middleware for
//! local LLM reverse proxies.
//!
//! A host binary that already speaks axum wires [`layer::proxypilot_middleware`]
//! in front of its upstream-forwarding handler:
//!
//! ```ignore
//! let state = Arc::new(ProxyPilotState::new(proxypilot_config::load(), None));
//! let app = Router::new()
//!     .route("/v1/chat/completions", post(forward_upstream))
//!     .layer(axum::middleware::from_fn_with_state(state.clone(), proxypilot_middleware))
//!     .into_make_service_with_connect_info::<SocketAddr>();
//! ```
//!
//! Everything below that line — eligibility, shape detection, budgeting,
//! trimming, scaffolding, memory, and retrieval — runs inside
//! [`pipeline::run`] with no HTTP awareness at all; `layer` is the only
//! module that touches axum types.

pub mod eligibility;
pub mod error;
pub mod headers;
pub mod layer;
pub mod pipeline;
pub mod state;

pub use error::PipelineError;
pub use layer::proxypilot_middleware;
pub use pipeline::{PipelineOutcome, HARD_BODY_CEILING};
pub use state::ProxyPilotState;

use tracing_subscriber::{fmt, EnvFilter};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Initialize `tracing` the way the rest of the proxypilot workspace
/// expects: `RUST_LOG` wins when set, otherwise fall back to `level`.
/// Safe to call more than once — later calls are no-ops, since a process
/// embedding proxypilot as a library may already have its own subscriber
/// installed.
pub fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let _ = tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .with(filter)
        .try_init();
}
