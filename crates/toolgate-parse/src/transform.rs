// SPDX-License-Identifier: MIT OR Apache-2.0
//! Response rebuilding: buffered bodies and streaming chunk translation.

use crate::extract::{FinishReason, extract, strip_think_regions};
use crate::scanner::{ScanEvent, ScanOptions, StreamScanner};
use chrono::Utc;
use toolgate_core::{ChatChunk, ChatResponse, ChunkHeader, FunctionCall, ToolCall};

// ---------------------------------------------------------------------------
// Non-streaming
// ---------------------------------------------------------------------------

/// Transform a buffered upstream `chat.completion` body.
///
/// Runs the extraction algorithm over the assistant content and rebuilds the
/// response with the pre-trigger prose and the extracted `tool_calls`.  When
/// nothing is extracted (and think-stripping is off) the upstream bytes are
/// returned unchanged, preserving byte-for-byte fidelity for non-tool
/// replies.  Bodies that do not parse as a chat completion pass through
/// untouched.
#[must_use]
pub fn transform_response(body: &[u8], trigger: &str, strip_think: bool) -> Vec<u8> {
    let Ok(mut response) = serde_json::from_slice::<ChatResponse>(body) else {
        return body.to_vec();
    };
    let Some(choice) = response.choices.first_mut() else {
        return body.to_vec();
    };
    let Some(content) = choice.message.content.clone() else {
        return body.to_vec();
    };

    let extraction = extract(&content, trigger);
    if extraction.calls.is_empty() && !strip_think {
        return body.to_vec();
    }

    let prose = if strip_think {
        strip_think_regions(&extraction.prose)
    } else {
        extraction.prose
    };
    choice.message.content = Some(prose);

    if !extraction.calls.is_empty() {
        choice.message.tool_calls = Some(
            extraction
                .calls
                .into_iter()
                .map(|c| ToolCall {
                    id: c.id,
                    call_type: "function".into(),
                    function: FunctionCall {
                        name: c.name,
                        arguments: c.arguments,
                    },
                })
                .collect(),
        );
        choice.finish_reason = Some(FinishReason::ToolCalls.as_str().to_string());
    }

    serde_json::to_vec(&response).unwrap_or_else(|_| body.to_vec())
}

// ---------------------------------------------------------------------------
// Streaming
// ---------------------------------------------------------------------------

/// Translates upstream `chat.completion.chunk` payloads into client chunks.
///
/// One instance per streamed response.  Callers feed each decoded SSE data
/// payload through [`StreamTransform::push_json`] and call
/// [`StreamTransform::close`] when the upstream stream ends (or on the
/// `[DONE]` sentinel).  Chunk identity (`id`, `created`, `model`) is adopted
/// from the first upstream chunk so pass-through responses keep their
/// original identity.
#[derive(Debug)]
pub struct StreamTransform {
    scanner: StreamScanner,
    header: Option<ChunkHeader>,
    fallback_model: String,
    upstream_finish: Option<String>,
    closed: bool,
}

impl StreamTransform {
    /// Create a transform for one response.
    #[must_use]
    pub fn new(trigger: impl Into<String>, opts: ScanOptions, fallback_model: impl Into<String>) -> Self {
        Self {
            scanner: StreamScanner::new(trigger, opts),
            header: None,
            fallback_model: fallback_model.into(),
            upstream_finish: None,
            closed: false,
        }
    }

    fn header(&mut self) -> &ChunkHeader {
        self.header.get_or_insert_with(|| {
            let created = Utc::now().timestamp().max(0) as u64;
            ChunkHeader::new(self.fallback_model.clone(), created)
        })
    }

    fn map_events(&mut self, events: Vec<ScanEvent>, out: &mut Vec<ChatChunk>) {
        for event in events {
            let header = self.header();
            match event {
                ScanEvent::Content(text) => out.push(header.content_chunk(text)),
                ScanEvent::Call {
                    index,
                    id,
                    name,
                    arguments,
                } => {
                    out.push(header.tool_call_open_chunk(index, &id, &name));
                    out.push(header.tool_call_args_chunk(index, &arguments));
                }
            }
        }
    }

    /// Feed one decoded SSE data payload.  Payloads that do not parse as a
    /// chunk are dropped — a degraded upstream must not break the client
    /// stream.
    pub fn push_json(&mut self, payload: &str) -> Vec<ChatChunk> {
        let mut out = Vec::new();
        if self.closed {
            return out;
        }
        let Ok(chunk) = serde_json::from_str::<ChatChunk>(payload) else {
            return out;
        };

        if self.header.is_none() {
            self.header = Some(ChunkHeader {
                id: chunk.id.clone(),
                created: chunk.created,
                model: chunk.model.clone(),
            });
        }

        // Usage-only frames (empty choices) pass through untouched.
        let Some(choice) = chunk.choices.first() else {
            out.push(chunk);
            return out;
        };

        if let Some(reason) = &choice.finish_reason {
            self.upstream_finish = Some(reason.clone());
        }

        // Deltas that already carry tool calls come from an upstream that
        // speaks function calling natively; they pass through untouched.
        if choice.delta.tool_calls.is_some() {
            out.push(chunk);
            return out;
        }

        if choice.delta.role.is_some() {
            let header = self.header();
            out.push(header.role_chunk());
        }

        if let Some(text) = choice.delta.content.clone()
            && !text.is_empty()
        {
            let events = self.scanner.feed(&text);
            self.map_events(events, &mut out);
        }

        out
    }

    /// Flush the scanner and emit the terminal finish chunk.
    pub fn close(&mut self) -> Vec<ChatChunk> {
        let mut out = Vec::new();
        if self.closed {
            return out;
        }
        self.closed = true;

        let (events, reason) = self.scanner.finish();
        self.map_events(events, &mut out);

        let reason = match reason {
            FinishReason::ToolCalls => "tool_calls".to_string(),
            FinishReason::Stop => self
                .upstream_finish
                .clone()
                .unwrap_or_else(|| "stop".to_string()),
        };
        let header = self.header();
        out.push(header.finish_chunk(&reason));
        out
    }
}
