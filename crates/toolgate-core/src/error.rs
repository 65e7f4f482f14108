// SPDX-License-Identifier: MIT OR Apache-2.0
//! Unified error taxonomy for the gateway.
//!
//! Every user-visible failure carries a stable machine-readable code and maps
//! to an OpenAI-shaped error body: `{"error":{"message","type","code"}}`.
//! Retryable upstream failures are absorbed inside the router's attempt loop;
//! only the last one is surfaced through this taxonomy.

use serde_json::{Value, json};

/// Errors surfaced by the gateway core.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// The client body was not a valid chat-completions request.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Missing or unknown bearer key.
    #[error("missing or invalid API key")]
    Unauthorized,

    /// Routing produced no eligible upstream channel.
    #[error("no upstream channel available for model '{model}'")]
    NoUpstreamAvailable {
        /// The model the client asked for.
        model: String,
    },

    /// Every eligible channel answered 429.
    #[error("upstream rate limited: {detail}")]
    UpstreamRateLimited {
        /// Detail from the last attempted channel.
        detail: String,
    },

    /// Every eligible channel failed with a 5xx or a network error.
    #[error("upstream error: {detail}")]
    UpstreamServerError {
        /// Detail from the last attempted channel.
        detail: String,
    },

    /// An I/O deadline elapsed before the upstream produced a byte.
    #[error("upstream timed out after {secs}s")]
    UpstreamTimeout {
        /// The deadline that elapsed.
        secs: u64,
    },

    /// The tool-call envelope grew past the configured cap or was
    /// fundamentally unparseable.  Degrades to prose with
    /// `finish_reason="stop"`; never surfaced as an HTTP error once a
    /// response has begun.
    #[error("tool-call envelope exceeded {cap} bytes")]
    MalformedEnvelope {
        /// The configured accumulation cap.
        cap: usize,
    },

    /// The downstream client went away; the upstream fetch is cancelled and
    /// no response is written.
    #[error("client disconnected")]
    ClientDisconnected,
}

impl GatewayError {
    /// HTTP status this error maps to.
    #[must_use]
    pub fn status(&self) -> u16 {
        match self {
            Self::InvalidRequest(_) => 400,
            Self::Unauthorized => 401,
            Self::NoUpstreamAvailable { .. } => 503,
            Self::UpstreamRateLimited { .. } => 429,
            Self::UpstreamServerError { .. } => 502,
            Self::UpstreamTimeout { .. } => 504,
            Self::MalformedEnvelope { .. } => 500,
            Self::ClientDisconnected => 499,
        }
    }

    /// OpenAI error `type` field.
    #[must_use]
    pub fn error_type(&self) -> &'static str {
        match self {
            Self::InvalidRequest(_) | Self::Unauthorized => "invalid_request_error",
            Self::UpstreamRateLimited { .. } => "rate_limit_error",
            Self::NoUpstreamAvailable { .. }
            | Self::UpstreamServerError { .. }
            | Self::UpstreamTimeout { .. }
            | Self::MalformedEnvelope { .. }
            | Self::ClientDisconnected => "api_error",
        }
    }

    /// Stable machine-readable `code` field.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidRequest(_) => "invalid_request",
            Self::Unauthorized => "invalid_api_key",
            Self::NoUpstreamAvailable { .. } => "no_upstream_available",
            Self::UpstreamRateLimited { .. } => "upstream_rate_limited",
            Self::UpstreamServerError { .. } => "upstream_error",
            Self::UpstreamTimeout { .. } => "upstream_timeout",
            Self::MalformedEnvelope { .. } => "malformed_envelope",
            Self::ClientDisconnected => "client_disconnected",
        }
    }

    /// Render the OpenAI-shaped error body.
    ///
    /// The 401 body carries only `type` and `code` — clients match on the
    /// exact shape `{"error":{"type":"invalid_request_error","code":"invalid_api_key"}}`.
    #[must_use]
    pub fn to_body(&self) -> Value {
        match self {
            Self::Unauthorized => json!({
                "error": {
                    "type": self.error_type(),
                    "code": self.code(),
                }
            }),
            other => json!({
                "error": {
                    "message": other.to_string(),
                    "type": other.error_type(),
                    "code": other.code(),
                }
            }),
        }
    }
}
