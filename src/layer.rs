// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! The axum middleware adapter: one async function of `(State,
//! ConnectInfo, Request, Next)` that a host wires in with
//! `axum::middleware::from_fn_with_state`. Everything below it is
//! HTTP-agnostic.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::{to_bytes, Body};
use axum::extract::{ConnectInfo, Request, State};
use axum::http::{HeaderValue, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

use crate::eligibility;
use crate::headers;
use crate::pipeline;
use crate::state::ProxyPilotState;

/// Read up to this many bytes before giving up. Set well above
/// [`HARD_BODY_CEILING`] so a legitimate-but-huge request still gets
/// buffered; the pipeline truncates it down to the ceiling afterward. Only
/// a genuinely pathological body trips this limit.
const OUTER_READ_LIMIT: usize = 64 * 1024 * 1024;

/// Eligibility-gated budget/memory/scaffold middleware. Ineligible requests
/// pass through with the body untouched; `next` always runs even when the
/// pipeline itself fails — pipeline failures degrade gracefully, they never
/// fail the request.
pub async fn proxypilot_middleware(
    State(state): State<Arc<ProxyPilotState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    req: Request,
    next: Next,
) -> Response {
    let (mut parts, body) = req.into_parts();

    if !eligibility::is_eligible(&parts.method, &parts.headers) {
        // The bypass switch and the other control headers are still
        // consumed on this branch; they must never reach upstream.
        headers::strip_client_only_headers(&mut parts.headers);
        let req = Request::from_parts(parts, body);
        return next.run(req).await;
    }

    let body_bytes = match to_bytes(body, OUTER_READ_LIMIT).await {
        Ok(bytes) => bytes.to_vec(),
        Err(err) => {
            // A failed or aborted body read gets a bare 400; internal error
            // detail never reaches the client.
            tracing::warn!(error = %err, "failed to read request body");
            return StatusCode::BAD_REQUEST.into_response();
        }
    };

    let path = parts.uri.path().to_string();
    let (new_body, outcome) = match pipeline::run(&state, &parts.headers, &path, body_bytes.clone()).await {
        Ok(result) => result,
        Err(err) => {
            tracing::warn!(error = %err, path, "pipeline failed, forwarding request unmodified");
            (body_bytes, pipeline::PipelineOutcome::default())
        }
    };

    headers::strip_client_only_headers(&mut parts.headers);
    headers::apply_trimming_headers(&mut parts.headers, &outcome);
    if let Ok(len) = HeaderValue::from_str(&new_body.len().to_string()) {
        parts.headers.insert(axum::http::header::CONTENT_LENGTH, len);
    }

    let req = Request::from_parts(parts, Body::from(new_body));
    let mut response = next.run(req).await;
    headers::apply_diagnostic_headers(response.headers_mut(), &outcome, addr.ip());
    response
}
