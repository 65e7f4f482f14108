// SPDX-License-Identifier: MIT OR Apache-2.0
#![doc = include_str!("../README.md")]
#![deny(unsafe_code)]

use axum::{
    Extension, Json, Router,
    body::{Body, Bytes},
    extract::State,
    http::StatusCode,
    middleware::{from_fn, from_fn_with_state},
    response::sse::{Event as SseEvent, Sse},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use futures::StreamExt;
use serde_json::json;
use std::convert::Infallible;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use toolgate_config::{GatewayConfig, SharedConfig};
use toolgate_core::{ChatChunk, GatewayError, RequestContext};
use toolgate_inject::inject;
use toolgate_parse::{ScanOptions, StreamTransform, transform_response};
use toolgate_route::{
    Disposition, RetryReason, classify_status, effective_key, resolve, rewrite_model, run_attempts,
};
use toolgate_upstream::{SseDecoder, StreamReply, UpstreamClient, UpstreamError};
use tracing::{debug, info};

pub mod auth;
pub mod middleware;

use auth::ClientKey;

/// Shared state for the HTTP surface.
#[derive(Clone)]
pub struct AppState {
    /// The hot-swappable configuration snapshot handle.
    pub config: SharedConfig,
    /// The pooled upstream HTTP client.
    pub upstream: UpstreamClient,
}

/// Build the Axum router with all gateway routes.
///
/// `/v1/*` routes sit behind bearer authentication; `/health` does not.
pub fn build_app(state: Arc<AppState>) -> Router {
    let api = Router::new()
        .route("/v1/chat/completions", post(chat_completions))
        .route("/v1/models", get(list_models))
        .route_layer(from_fn_with_state(state.clone(), auth::require_bearer));

    Router::new()
        .merge(api)
        .route("/health", get(health))
        .layer(from_fn(middleware::request_id_middleware))
        .layer(from_fn(middleware::request_logger))
        .layer(middleware::cors_layer())
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Plain endpoints
// ---------------------------------------------------------------------------

async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let config = state.config.current();
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "channels": config.upstream_services.len(),
    }))
}

/// Every model advertised by a routable channel, deduplicated in
/// configuration order, in the OpenAI model-list shape.
async fn list_models(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let config = state.config.current();
    let mut ids: Vec<&str> = Vec::new();
    for channel in config
        .upstream_services
        .iter()
        .filter(|ch| !ch.is_placeholder())
    {
        for model in channel.advertised_models() {
            if !ids.contains(&model) {
                ids.push(model);
            }
        }
    }
    let data: Vec<_> = ids
        .into_iter()
        .map(|id| json!({"id": id, "object": "model", "owned_by": "toolgate"}))
        .collect();
    Json(json!({"object": "list", "data": data}))
}

// ---------------------------------------------------------------------------
// Chat completions
// ---------------------------------------------------------------------------

async fn chat_completions(
    State(state): State<Arc<AppState>>,
    Extension(client_key): Extension<ClientKey>,
    body: Bytes,
) -> Response {
    // One snapshot per request; a concurrent admin swap never tears us.
    let config = state.config.current();

    let injection = match inject(&body, &config, Some(client_key.0)) {
        Ok(i) => i,
        Err(e) => return reject(e),
    };
    let ctx = injection.ctx;

    let channels = match resolve(&config, &ctx.model) {
        Ok(c) => c,
        Err(e) => return reject(e),
    };
    debug!(model = %ctx.model, stream = ctx.stream, fc = ctx.fc_active, "dispatching");

    if ctx.stream {
        streamed(&state, &config, &channels, injection.body, &ctx).await
    } else {
        buffered(&state, &config, &channels, injection.body, &ctx).await
    }
}

async fn buffered(
    state: &AppState,
    config: &GatewayConfig,
    channels: &[&toolgate_config::ChannelConfig],
    body: Vec<u8>,
    ctx: &RequestContext,
) -> Response {
    let result = run_attempts(channels, &ctx.model, |channel| {
        let body = rewrite_model(&body, channel, &ctx.model);
        let key = effective_key(config, channel, ctx.client_key.as_deref()).to_string();
        let url = channel.endpoint();
        let client = state.upstream.clone();
        async move {
            let reply = client
                .send_json(&url, &key, body)
                .await
                .map_err(retry_from_transport)?;
            match classify_status(reply.status) {
                Disposition::Success | Disposition::Terminal => Ok(reply),
                Disposition::Retryable => Err(retry_from_status(reply.status, &reply.body)),
            }
        }
    })
    .await;

    match result {
        Err(e) => reject(e),
        Ok(reply) if classify_status(reply.status) == Disposition::Success => {
            let body = if ctx.fc_active {
                transform_response(&reply.body, &ctx.trigger, config.features.strip_think_tags)
            } else {
                reply.body.to_vec()
            };
            relay(reply.status, body)
        }
        // Terminal upstream failure: the client sees it verbatim.
        Ok(reply) => relay(reply.status, reply.body.to_vec()),
    }
}

/// Outcome of one streaming attempt: an open 2xx stream, or a terminal
/// upstream failure to relay verbatim.
enum StreamAttempt {
    Open(StreamReply),
    Terminal { status: u16, body: Vec<u8> },
}

async fn streamed(
    state: &AppState,
    config: &GatewayConfig,
    channels: &[&toolgate_config::ChannelConfig],
    body: Vec<u8>,
    ctx: &RequestContext,
) -> Response {
    let result = run_attempts(channels, &ctx.model, |channel| {
        let body = rewrite_model(&body, channel, &ctx.model);
        let key = effective_key(config, channel, ctx.client_key.as_deref()).to_string();
        let url = channel.endpoint();
        let client = state.upstream.clone();
        async move {
            let reply = client
                .send_stream(&url, &key, body)
                .await
                .map_err(retry_from_transport)?;
            match classify_status(reply.status) {
                // From here on the response body is live: no further
                // channel can be contacted for this request.
                Disposition::Success => Ok(StreamAttempt::Open(reply)),
                Disposition::Terminal => {
                    let body = collect_limited(reply.bytes, 64 * 1024).await;
                    Ok(StreamAttempt::Terminal {
                        status: reply.status,
                        body,
                    })
                }
                Disposition::Retryable => {
                    let body = collect_limited(reply.bytes, 4 * 1024).await;
                    Err(retry_from_status(reply.status, &body))
                }
            }
        }
    })
    .await;

    match result {
        Err(e) => reject(e),
        Ok(StreamAttempt::Terminal { status, body }) => relay(status, body),
        Ok(StreamAttempt::Open(reply)) => {
            if ctx.fc_active {
                translate_stream(reply, ctx, config)
            } else {
                passthrough_stream(reply)
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Streaming bodies
// ---------------------------------------------------------------------------

/// Relay a non-function-calling stream byte for byte.
fn passthrough_stream(reply: StreamReply) -> Response {
    (
        StatusCode::OK,
        [
            ("content-type", "text/event-stream"),
            ("cache-control", "no-cache"),
        ],
        Body::from_stream(reply.bytes),
    )
        .into_response()
}

/// Pipe the upstream SSE stream through the scanner, emitting translated
/// `chat.completion.chunk` frames and the `[DONE]` sentinel.
///
/// The channel is bounded: a slow client exerts back-pressure all the way to
/// the upstream read, and a disconnected client tears the task (and with it
/// the upstream fetch) down within one buffer window.
fn translate_stream(reply: StreamReply, ctx: &RequestContext, config: &GatewayConfig) -> Response {
    let (tx, rx) = mpsc::channel::<Result<SseEvent, Infallible>>(16);
    let trigger = ctx.trigger.clone();
    let model = ctx.model.clone();
    let opts = ScanOptions {
        strip_think: config.features.strip_think_tags,
        envelope_cap: config.features.envelope_cap_bytes,
    };

    tokio::spawn(pump_stream(reply, trigger, opts, model, tx));

    Sse::new(ReceiverStream::new(rx)).into_response()
}

async fn pump_stream(
    mut reply: StreamReply,
    trigger: String,
    opts: ScanOptions,
    model: String,
    tx: mpsc::Sender<Result<SseEvent, Infallible>>,
) {
    let mut decoder = SseDecoder::new();
    let mut transform = StreamTransform::new(trigger, opts, model);
    let mut saw_done = false;

    'read: while let Some(next) = reply.bytes.next().await {
        let Ok(chunk) = next else {
            // Upstream died mid-stream; parser errors never become HTTP
            // errors once streaming has begun — degrade to a finish chunk.
            break;
        };
        for payload in decoder.feed(&chunk) {
            if payload == "[DONE]" {
                saw_done = true;
                break 'read;
            }
            if send_chunks(&tx, transform.push_json(&payload)).await.is_err() {
                return; // client went away; dropping `reply` cancels upstream
            }
        }
    }

    if !saw_done {
        for payload in decoder.finish() {
            if payload == "[DONE]" {
                break;
            }
            if send_chunks(&tx, transform.push_json(&payload)).await.is_err() {
                return;
            }
        }
    }

    if send_chunks(&tx, transform.close()).await.is_err() {
        return;
    }
    let _ = tx.send(Ok(SseEvent::default().data("[DONE]"))).await;
}

async fn send_chunks(
    tx: &mpsc::Sender<Result<SseEvent, Infallible>>,
    chunks: Vec<ChatChunk>,
) -> Result<(), ()> {
    for chunk in chunks {
        let Ok(payload) = serde_json::to_string(&chunk) else {
            continue;
        };
        if tx.send(Ok(SseEvent::default().data(payload))).await.is_err() {
            return Err(());
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

async fn collect_limited(
    mut bytes: futures::stream::BoxStream<'static, Result<bytes::Bytes, UpstreamError>>,
    cap: usize,
) -> Vec<u8> {
    let mut out = Vec::new();
    while let Some(Ok(chunk)) = bytes.next().await {
        out.extend_from_slice(&chunk);
        if out.len() >= cap {
            break;
        }
    }
    out
}

fn retry_from_transport(err: UpstreamError) -> RetryReason {
    match err {
        UpstreamError::Timeout { secs } => RetryReason::Timeout { secs },
        other => RetryReason::Network {
            detail: other.to_string(),
        },
    }
}

fn retry_from_status(status: u16, body: &[u8]) -> RetryReason {
    let detail = snippet(body);
    if status == 429 {
        RetryReason::RateLimited { detail }
    } else {
        RetryReason::ServerError { status, detail }
    }
}

/// A short, single-line excerpt of an upstream error body for diagnostics.
fn snippet(body: &[u8]) -> String {
    let text = String::from_utf8_lossy(body);
    let line = text.lines().next().unwrap_or_default();
    let mut s: String = line.chars().take(200).collect();
    if line.chars().count() > 200 {
        s.push('\u{2026}');
    }
    s
}

fn reject(err: GatewayError) -> Response {
    info!(code = err.code(), status = err.status(), "request rejected");
    (
        StatusCode::from_u16(err.status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
        Json(err.to_body()),
    )
        .into_response()
}

/// Relay an upstream body with its original status.
fn relay(status: u16, body: Vec<u8>) -> Response {
    (
        StatusCode::from_u16(status).unwrap_or(StatusCode::BAD_GATEWAY),
        [("content-type", "application/json")],
        body,
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snippet_truncates_long_bodies() {
        let long = "x".repeat(500);
        let s = snippet(long.as_bytes());
        assert_eq!(s.chars().count(), 201); // 200 chars + ellipsis
    }

    #[test]
    fn snippet_takes_first_line_only() {
        assert_eq!(snippet(b"first\nsecond"), "first");
        assert_eq!(snippet(b""), "");
    }

    #[test]
    fn retry_from_status_distinguishes_rate_limits() {
        assert!(matches!(
            retry_from_status(429, b"slow"),
            RetryReason::RateLimited { .. }
        ));
        assert!(matches!(
            retry_from_status(503, b"down"),
            RetryReason::ServerError { status: 503, .. }
        ));
    }

    #[test]
    fn retry_from_transport_maps_timeouts() {
        assert!(matches!(
            retry_from_transport(UpstreamError::Timeout { secs: 9 }),
            RetryReason::Timeout { secs: 9 }
        ));
        assert!(matches!(
            retry_from_transport(UpstreamError::Network {
                detail: "refused".into()
            }),
            RetryReason::Network { .. }
        ));
    }
}
