// SPDX-License-Identifier: MIT OR Apache-2.0
#![doc = include_str!("../README.md")]
#![deny(unsafe_code)]
#![warn(missing_docs)]

use bytes::Bytes;
use futures::StreamExt;
use futures::stream::BoxStream;
use std::time::Duration;
use tracing::debug;

mod sse;

pub use sse::SseDecoder;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Transport-level failures, all occurring before any byte reached the
/// client (and therefore all retryable by the router).
#[derive(Debug, thiserror::Error)]
pub enum UpstreamError {
    /// A deadline elapsed before the upstream answered.
    #[error("upstream timed out after {secs}s")]
    Timeout {
        /// The deadline that elapsed.
        secs: u64,
    },

    /// Connection or transport failure.
    #[error("upstream transport error: {detail}")]
    Network {
        /// Human-readable detail.
        detail: String,
    },

    /// The client itself could not be constructed.
    #[error("failed to build HTTP client: {detail}")]
    Build {
        /// Human-readable detail.
        detail: String,
    },
}

impl UpstreamError {
    fn from_reqwest(err: reqwest::Error, timeout_secs: u64) -> Self {
        if err.is_timeout() {
            Self::Timeout { secs: timeout_secs }
        } else {
            Self::Network {
                detail: err.to_string(),
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Replies
// ---------------------------------------------------------------------------

/// A fully buffered upstream reply.
#[derive(Debug)]
pub struct JsonReply {
    /// Upstream HTTP status, propagated to the router for classification.
    pub status: u16,
    /// The complete response body.
    pub body: Bytes,
}

/// A streaming upstream reply.
///
/// The body is exposed as a stream of byte chunks; nothing is buffered
/// beyond what the transport produces.  Dropping the stream cancels the
/// upstream fetch.
pub struct StreamReply {
    /// Upstream HTTP status, known before the first body byte.
    pub status: u16,
    /// The response body as it arrives.
    pub bytes: BoxStream<'static, Result<Bytes, UpstreamError>>,
}

impl std::fmt::Debug for StreamReply {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamReply")
            .field("status", &self.status)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Pooled HTTP client for upstream chat-completions dispatch.
///
/// One instance is shared per process; connection reuse keeps TLS sessions
/// warm across requests.
#[derive(Debug, Clone)]
pub struct UpstreamClient {
    http: reqwest::Client,
    timeout: Duration,
}

impl UpstreamClient {
    /// Build a client with the given total-request timeout (applied to
    /// buffered requests; streaming requests are bounded by connect timeout
    /// and cancellation instead).
    pub fn new(timeout: Duration) -> Result<Self, UpstreamError> {
        let http = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .pool_idle_timeout(Duration::from_secs(90))
            .tcp_keepalive(Duration::from_secs(60))
            .build()
            .map_err(|e| UpstreamError::Build {
                detail: e.to_string(),
            })?;
        Ok(Self { http, timeout })
    }

    fn post(&self, url: &str, api_key: &str, body: Vec<u8>) -> reqwest::RequestBuilder {
        self.http
            .post(url)
            .header("authorization", format!("Bearer {api_key}"))
            .header("content-type", "application/json")
            .body(body)
    }

    /// Dispatch a buffered (non-streaming) request.
    pub async fn send_json(
        &self,
        url: &str,
        api_key: &str,
        body: Vec<u8>,
    ) -> Result<JsonReply, UpstreamError> {
        let secs = self.timeout.as_secs();
        let response = self
            .post(url, api_key, body)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| UpstreamError::from_reqwest(e, secs))?;

        let status = response.status().as_u16();
        let body = response
            .bytes()
            .await
            .map_err(|e| UpstreamError::from_reqwest(e, secs))?;
        debug!(url, status, bytes = body.len(), "upstream reply");
        Ok(JsonReply { status, body })
    }

    /// Dispatch a streaming request.  The status is available immediately;
    /// the body arrives chunk by chunk.
    pub async fn send_stream(
        &self,
        url: &str,
        api_key: &str,
        body: Vec<u8>,
    ) -> Result<StreamReply, UpstreamError> {
        let secs = self.timeout.as_secs();
        let response = self
            .post(url, api_key, body)
            .header("accept", "text/event-stream")
            .send()
            .await
            .map_err(|e| UpstreamError::from_reqwest(e, secs))?;

        let status = response.status().as_u16();
        debug!(url, status, "upstream stream opened");
        let bytes = response
            .bytes_stream()
            .map(move |r| r.map_err(|e| UpstreamError::from_reqwest(e, secs)))
            .boxed();
        Ok(StreamReply { status, bytes })
    }
}
