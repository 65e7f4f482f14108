// SPDX-License-Identifier: MIT OR Apache-2.0
//! OpenAI Chat Completions wire types.
//!
//! The chat-completions body is an open-ended record: clients routinely send
//! fields this gateway has no opinion about (`temperature`, `top_p`, vendor
//! extensions).  Every container therefore carries a flattened `extra` map so
//! unrecognized fields survive the round trip to the upstream unchanged.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

// ---------------------------------------------------------------------------
// Tool definitions
// ---------------------------------------------------------------------------

/// A function tool definition (element of the request `tools` array).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolDef {
    /// Tool type — always `"function"`.
    #[serde(rename = "type")]
    pub tool_type: String,
    /// The function definition payload.
    pub function: FunctionDef,
}

/// The function payload inside a [`ToolDef`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FunctionDef {
    /// Function name.
    pub name: String,
    /// Human-readable description.
    #[serde(default)]
    pub description: String,
    /// JSON Schema for the function parameters.
    #[serde(default = "empty_object")]
    pub parameters: Value,
}

fn empty_object() -> Value {
    Value::Object(serde_json::Map::new())
}

impl ToolDef {
    /// Create a function tool definition.
    #[must_use]
    pub fn function(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: Value,
    ) -> Self {
        Self {
            tool_type: "function".into(),
            function: FunctionDef {
                name: name.into(),
                description: description.into(),
                parameters,
            },
        }
    }
}

// ---------------------------------------------------------------------------
// Tool calls
// ---------------------------------------------------------------------------

/// A tool call emitted by the model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolCall {
    /// Unique identifier for this call within the assistant turn.
    pub id: String,
    /// Call type — always `"function"`.
    #[serde(rename = "type")]
    pub call_type: String,
    /// The function invocation details.
    pub function: FunctionCall,
}

/// The function invocation inside a [`ToolCall`].
///
/// `arguments` is the literal string form: on the wire to the client the
/// arguments are always a string, even though the model emits structured
/// JSON.  The text is preserved byte-exactly and never re-serialized.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FunctionCall {
    /// Name of the function to invoke.
    pub name: String,
    /// JSON-encoded arguments, verbatim as the model produced them.
    pub arguments: String,
}

impl ToolCall {
    /// Create a function call with a fresh `call_` identifier.
    #[must_use]
    pub fn function(name: impl Into<String>, arguments: impl Into<String>) -> Self {
        Self {
            id: new_call_id(),
            call_type: "function".into(),
            function: FunctionCall {
                name: name.into(),
                arguments: arguments.into(),
            },
        }
    }
}

/// Generate a tool-call identifier of the form `call_<short hex>`.
///
/// Identifiers are unique within a response and stable across the streaming
/// deltas that reference them.
#[must_use]
pub fn new_call_id() -> String {
    let id = uuid::Uuid::new_v4().simple().to_string();
    format!("call_{}", &id[..12])
}

// ---------------------------------------------------------------------------
// Request
// ---------------------------------------------------------------------------

/// A chat message as sent by the client.
///
/// `content` is kept as a raw [`Value`] because OpenAI allows both a plain
/// string and a multi-part array; the gateway only inspects text and forwards
/// everything else untouched.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatMessage {
    /// Message role (`system`, `developer`, `user`, `assistant`, or `tool`).
    pub role: String,
    /// Message content — string or content-part array.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<Value>,
    /// Tool calls requested by a prior assistant turn.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
    /// ID of the tool call this message is responding to.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    /// Optional participant name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Unrecognized fields, forwarded unchanged.
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl ChatMessage {
    /// Create a system message with plain-text content.
    #[must_use]
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".into(),
            content: Some(Value::String(content.into())),
            tool_calls: None,
            tool_call_id: None,
            name: None,
            extra: BTreeMap::new(),
        }
    }

    /// Create a user message with plain-text content.
    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".into(),
            content: Some(Value::String(content.into())),
            tool_calls: None,
            tool_call_id: None,
            name: None,
            extra: BTreeMap::new(),
        }
    }

    /// Text view of the content: the string itself, or the concatenated
    /// `text` fields of a content-part array.  Non-text parts contribute
    /// nothing.
    #[must_use]
    pub fn text_content(&self) -> String {
        match &self.content {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Array(parts)) => parts
                .iter()
                .filter_map(|p| p.get("text").and_then(Value::as_str))
                .collect::<Vec<_>>()
                .join(""),
            _ => String::new(),
        }
    }

    /// Replace the content with a plain string.
    pub fn set_text(&mut self, text: impl Into<String>) {
        self.content = Some(Value::String(text.into()));
    }
}

/// A chat-completions request body.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatRequest {
    /// Model identifier as requested by the client.
    pub model: String,
    /// Conversation messages.
    pub messages: Vec<ChatMessage>,
    /// Tool definitions available to the model.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<ToolDef>>,
    /// Tool-choice directive.  Accepted (including `"required"`) and
    /// ignored; never forwarded upstream.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<Value>,
    /// Whether the client requested a streamed response.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stream: Option<bool>,
    /// Unrecognized fields, forwarded unchanged.
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl ChatRequest {
    /// Returns `true` if the client asked for a streamed response.
    #[must_use]
    pub fn wants_stream(&self) -> bool {
        self.stream == Some(true)
    }

    /// Returns `true` if the request carries at least one tool definition.
    #[must_use]
    pub fn has_tools(&self) -> bool {
        self.tools.as_ref().is_some_and(|t| !t.is_empty())
    }
}

// ---------------------------------------------------------------------------
// Response
// ---------------------------------------------------------------------------

/// The assistant message inside a response choice.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResponseMessage {
    /// Message role — `assistant` on the happy path.
    pub role: String,
    /// Assistant text content.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    /// Tool calls extracted from the assistant text.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
    /// Unrecognized fields, preserved unchanged.
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

/// A single choice in a chat-completions response.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Choice {
    /// Zero-based index of this choice.
    #[serde(default)]
    pub index: u32,
    /// The assistant's response message.
    pub message: ResponseMessage,
    /// Reason the model stopped (`"stop"`, `"tool_calls"`, …).
    pub finish_reason: Option<String>,
    /// Unrecognized fields, preserved unchanged.
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

/// A non-streaming chat-completions response body.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatResponse {
    /// Unique response identifier.
    pub id: String,
    /// Object type — `"chat.completion"`.
    pub object: String,
    /// Model reported by the upstream.
    pub model: String,
    /// Completion choices.
    pub choices: Vec<Choice>,
    /// Token usage, forwarded as-is when present.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<Value>,
    /// Unrecognized fields, preserved unchanged.
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

// ---------------------------------------------------------------------------
// Streaming chunks
// ---------------------------------------------------------------------------

/// A streaming chunk in the `chat.completion.chunk` shape.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatChunk {
    /// Chunk identifier, shared by every chunk of one response.
    pub id: String,
    /// Object type — always `"chat.completion.chunk"`.
    pub object: String,
    /// Unix timestamp shared by every chunk of one response.
    pub created: u64,
    /// Model name echoed to the client.
    pub model: String,
    /// Streaming choices (one element on this gateway).
    pub choices: Vec<ChunkChoice>,
    /// Token usage (final chunk only, when the upstream reports it).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<Value>,
}

/// A single choice inside a streaming chunk.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChunkChoice {
    /// Zero-based index of this choice.
    pub index: u32,
    /// The incremental delta.
    pub delta: ChunkDelta,
    /// Finish reason — `null` mid-stream, then `"stop"` or `"tool_calls"`.
    pub finish_reason: Option<String>,
}

/// Delta payload inside a streaming choice.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ChunkDelta {
    /// Role (first chunk only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    /// Incremental text content.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    /// Incremental tool-call fragments.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ChunkToolCall>>,
}

/// A tool-call fragment inside a streaming delta.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChunkToolCall {
    /// Index of the tool call in the overall `tool_calls` array.
    pub index: u32,
    /// Tool call ID (first fragment for this index only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Call type (first fragment only).
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub call_type: Option<String>,
    /// Incremental function call data.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub function: Option<ChunkFunction>,
}

/// Incremental function data inside a streaming tool-call fragment.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChunkFunction {
    /// Function name (first fragment only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Incremental arguments fragment.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub arguments: Option<String>,
}

// ---------------------------------------------------------------------------
// Chunk synthesis
// ---------------------------------------------------------------------------

/// Identity shared by every synthesized chunk of a single streamed response.
#[derive(Debug, Clone)]
pub struct ChunkHeader {
    /// Chunk identifier (`chatcmpl-…`).
    pub id: String,
    /// Creation timestamp (Unix seconds).
    pub created: u64,
    /// Model name echoed back to the client.
    pub model: String,
}

impl ChunkHeader {
    /// Create a fresh header for the given model at the given instant.
    #[must_use]
    pub fn new(model: impl Into<String>, created: u64) -> Self {
        Self {
            id: format!("chatcmpl-{}", uuid::Uuid::new_v4().simple()),
            created,
            model: model.into(),
        }
    }

    fn chunk(&self, delta: ChunkDelta, finish_reason: Option<String>) -> ChatChunk {
        ChatChunk {
            id: self.id.clone(),
            object: "chat.completion.chunk".into(),
            created: self.created,
            model: self.model.clone(),
            choices: vec![ChunkChoice {
                index: 0,
                delta,
                finish_reason,
            }],
            usage: None,
        }
    }

    /// A chunk carrying a content delta.
    #[must_use]
    pub fn content_chunk(&self, text: impl Into<String>) -> ChatChunk {
        self.chunk(
            ChunkDelta {
                role: None,
                content: Some(text.into()),
                tool_calls: None,
            },
            None,
        )
    }

    /// The opening chunk announcing the assistant role.
    #[must_use]
    pub fn role_chunk(&self) -> ChatChunk {
        self.chunk(
            ChunkDelta {
                role: Some("assistant".into()),
                content: None,
                tool_calls: None,
            },
            None,
        )
    }

    /// The first fragment for a tool call: carries id, type, and name.
    #[must_use]
    pub fn tool_call_open_chunk(&self, index: u32, id: &str, name: &str) -> ChatChunk {
        self.chunk(
            ChunkDelta {
                role: None,
                content: None,
                tool_calls: Some(vec![ChunkToolCall {
                    index,
                    id: Some(id.to_string()),
                    call_type: Some("function".into()),
                    function: Some(ChunkFunction {
                        name: Some(name.to_string()),
                        arguments: None,
                    }),
                }]),
            },
            None,
        )
    }

    /// A follow-up fragment carrying the full arguments string for an index.
    #[must_use]
    pub fn tool_call_args_chunk(&self, index: u32, arguments: &str) -> ChatChunk {
        self.chunk(
            ChunkDelta {
                role: None,
                content: None,
                tool_calls: Some(vec![ChunkToolCall {
                    index,
                    id: None,
                    call_type: None,
                    function: Some(ChunkFunction {
                        name: None,
                        arguments: Some(arguments.to_string()),
                    }),
                }]),
            },
            None,
        )
    }

    /// The terminal chunk with a finish reason and an empty delta.
    #[must_use]
    pub fn finish_chunk(&self, reason: &str) -> ChatChunk {
        self.chunk(ChunkDelta::default(), Some(reason.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    // -----------------------------------------------------------------------
    // Unknown-field passthrough
    // -----------------------------------------------------------------------

    #[test]
    fn request_preserves_unknown_fields() {
        let body = json!({
            "model": "m",
            "messages": [{"role": "user", "content": "hi"}],
            "temperature": 0.2,
            "top_p": 0.9,
            "vendor_hint": {"nested": true}
        });
        let req: ChatRequest = serde_json::from_value(body).unwrap();
        assert_eq!(req.extra["temperature"], json!(0.2));
        assert_eq!(req.extra["vendor_hint"]["nested"], json!(true));

        let back = serde_json::to_value(&req).unwrap();
        assert_eq!(back["temperature"], json!(0.2));
        assert_eq!(back["top_p"], json!(0.9));
    }

    #[test]
    fn message_preserves_unknown_fields() {
        let msg: ChatMessage = serde_json::from_value(json!({
            "role": "user",
            "content": "hi",
            "cache_control": {"type": "ephemeral"}
        }))
        .unwrap();
        assert!(msg.extra.contains_key("cache_control"));
    }

    #[test]
    fn response_roundtrips_usage_and_extras() {
        let body = json!({
            "id": "chatcmpl-1",
            "object": "chat.completion",
            "model": "m",
            "system_fingerprint": "fp_x",
            "choices": [{
                "index": 0,
                "message": {"role": "assistant", "content": "hello"},
                "finish_reason": "stop"
            }],
            "usage": {"prompt_tokens": 1, "completion_tokens": 2, "total_tokens": 3}
        });
        let resp: ChatResponse = serde_json::from_value(body.clone()).unwrap();
        let back = serde_json::to_value(&resp).unwrap();
        assert_eq!(back["system_fingerprint"], "fp_x");
        assert_eq!(back["usage"]["total_tokens"], 3);
    }

    // -----------------------------------------------------------------------
    // Content views
    // -----------------------------------------------------------------------

    #[test]
    fn text_content_from_string() {
        let msg = ChatMessage::user("hello");
        assert_eq!(msg.text_content(), "hello");
    }

    #[test]
    fn text_content_from_parts() {
        let msg: ChatMessage = serde_json::from_value(json!({
            "role": "user",
            "content": [
                {"type": "text", "text": "see "},
                {"type": "image_url", "image_url": {"url": "http://x/y.png"}},
                {"type": "text", "text": "this"}
            ]
        }))
        .unwrap();
        assert_eq!(msg.text_content(), "see this");
    }

    #[test]
    fn text_content_absent_is_empty() {
        let msg: ChatMessage = serde_json::from_value(json!({"role": "assistant"})).unwrap();
        assert_eq!(msg.text_content(), "");
    }

    // -----------------------------------------------------------------------
    // Tool helpers
    // -----------------------------------------------------------------------

    #[test]
    fn has_tools_requires_nonempty_list() {
        let mut req: ChatRequest = serde_json::from_value(json!({
            "model": "m",
            "messages": []
        }))
        .unwrap();
        assert!(!req.has_tools());

        req.tools = Some(vec![]);
        assert!(!req.has_tools());

        req.tools = Some(vec![ToolDef::function("f", "d", json!({}))]);
        assert!(req.has_tools());
    }

    #[test]
    fn call_ids_are_prefixed_and_distinct() {
        let a = new_call_id();
        let b = new_call_id();
        assert!(a.starts_with("call_"));
        assert_ne!(a, b);
    }

    #[test]
    fn tool_def_without_description_parses() {
        let def: ToolDef = serde_json::from_value(json!({
            "type": "function",
            "function": {"name": "ping"}
        }))
        .unwrap();
        assert_eq!(def.function.name, "ping");
        assert_eq!(def.function.description, "");
        assert!(def.function.parameters.is_object());
    }

    // -----------------------------------------------------------------------
    // Chunk synthesis
    // -----------------------------------------------------------------------

    #[test]
    fn chunks_share_identity() {
        let header = ChunkHeader::new("m", 1_700_000_000);
        let a = header.content_chunk("x");
        let b = header.finish_chunk("stop");
        assert_eq!(a.id, b.id);
        assert_eq!(a.created, b.created);
        assert_eq!(a.object, "chat.completion.chunk");
        assert!(a.id.starts_with("chatcmpl-"));
    }

    #[test]
    fn tool_call_open_chunk_shape() {
        let header = ChunkHeader::new("m", 0);
        let chunk = header.tool_call_open_chunk(0, "call_1", "get_weather");
        let json = serde_json::to_value(&chunk).unwrap();
        let tc = &json["choices"][0]["delta"]["tool_calls"][0];
        assert_eq!(tc["index"], 0);
        assert_eq!(tc["id"], "call_1");
        assert_eq!(tc["type"], "function");
        assert_eq!(tc["function"]["name"], "get_weather");
        assert!(tc["function"].get("arguments").is_none());
    }

    #[test]
    fn args_chunk_omits_id_and_name() {
        let header = ChunkHeader::new("m", 0);
        let chunk = header.tool_call_args_chunk(1, "{}");
        let json = serde_json::to_value(&chunk).unwrap();
        let tc = &json["choices"][0]["delta"]["tool_calls"][0];
        assert_eq!(tc["index"], 1);
        assert!(tc.get("id").is_none());
        assert_eq!(tc["function"]["arguments"], "{}");
    }

    #[test]
    fn finish_chunk_has_empty_delta() {
        let header = ChunkHeader::new("m", 0);
        let json = serde_json::to_value(header.finish_chunk("tool_calls")).unwrap();
        assert_eq!(json["choices"][0]["finish_reason"], "tool_calls");
        assert_eq!(json["choices"][0]["delta"], json!({}));
    }
}
