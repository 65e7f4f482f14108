// SPDX-License-Identifier: MIT OR Apache-2.0
//! Per-request context and the trigger-token constants.

use crate::wire::ToolDef;

/// Default trigger token.
///
/// A high-entropy ASCII sentinel that partitions assistant prose from the
/// tool-call envelope.  It must never collide with plausible natural text and
/// must not contain SSE framing bytes (no newlines, no carriage returns).
/// Deployments may override it through configuration; whatever value is in
/// effect stays fixed for the lifetime of a request.
pub const DEFAULT_TRIGGER: &str = "<<!TOOLGATE:9f2d7c4e1ab85063!>>";

/// Opening marker of a thinking region.  Text between the markers passes
/// through to the client untouched and is never scanned for the trigger.
pub const THINK_OPEN: &str = "<think>";

/// Closing marker of a thinking region.
pub const THINK_CLOSE: &str = "</think>";

/// Immutable per-request record threaded from the injector through the
/// router to the parser.
///
/// Constructed once when the incoming body is transformed; everything
/// downstream reads it, nothing mutates it.
#[derive(Debug, Clone)]
pub struct RequestContext {
    /// The client's bearer key (used verbatim upstream in key-passthrough
    /// deployments).
    pub client_key: Option<String>,
    /// Model name as requested by the client.
    pub model: String,
    /// Whether the client asked for a streamed response.
    pub stream: bool,
    /// Whether function-calling translation is active for this request.
    pub fc_active: bool,
    /// The trigger token in effect for this request.
    pub trigger: String,
    /// The original tool definitions from the client request.
    pub tools: Vec<ToolDef>,
}

impl RequestContext {
    /// Context for a request that bypasses translation entirely.
    #[must_use]
    pub fn passthrough(model: impl Into<String>, stream: bool) -> Self {
        Self {
            client_key: None,
            model: model.into(),
            stream,
            fc_active: false,
            trigger: DEFAULT_TRIGGER.to_string(),
            tools: Vec::new(),
        }
    }
}
