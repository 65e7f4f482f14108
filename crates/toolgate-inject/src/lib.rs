// SPDX-License-Identifier: MIT OR Apache-2.0
#![doc = include_str!("../README.md")]
#![deny(unsafe_code)]
#![warn(missing_docs)]

use toolgate_config::GatewayConfig;
use toolgate_core::{ChatMessage, ChatRequest, GatewayError, RequestContext, ToolDef};

// ---------------------------------------------------------------------------
// Template
// ---------------------------------------------------------------------------

/// Built-in teaching-prompt template.
///
/// Deployments may override it via `features.prompt_template`; any template
/// must contain both `{tools_list}` and `{trigger_signal}`.
pub const DEFAULT_TEMPLATE: &str = r#"You have access to the following functions. Do not mention them unless the user's request requires one.

{tools_list}

To call functions, first write whatever message the user should see (it may be empty), then output the token {trigger_signal} followed immediately by an XML block in exactly this form:

{trigger_signal}<tool_calls>
<tool_call>
<name>FUNCTION_NAME</name>
<arguments>{"parameter": "value"}</arguments>
</tool_call>
</tool_calls>

Rules:
- The <arguments> tag must contain a single JSON object matching the function's parameter schema.
- Emit one <tool_call> element per function invocation; multiple calls go inside the same <tool_calls> block.
- Output the token and the block only when you are actually invoking functions, and nothing after the closing </tool_calls> tag.
- Never output the token for any other purpose."#;

/// Render the human-readable tool enumeration substituted for
/// `{tools_list}`.
#[must_use]
pub fn render_tools_list(tools: &[ToolDef]) -> String {
    let mut out = String::new();
    for tool in tools {
        let schema = serde_json::to_string_pretty(&tool.function.parameters)
            .unwrap_or_else(|_| "{}".to_string());
        out.push_str(&format!(
            "## {name}\n{description}\nParameters (JSON Schema):\n{schema}\n\n",
            name = tool.function.name,
            description = tool.function.description,
        ));
    }
    out.trim_end().to_string()
}

/// Build the teaching prompt from a template by substituting both
/// placeholders.
#[must_use]
pub fn render_prompt(template: &str, tools: &[ToolDef], trigger: &str) -> String {
    template
        .replace("{tools_list}", &render_tools_list(tools))
        .replace("{trigger_signal}", trigger)
}

// ---------------------------------------------------------------------------
// Injection
// ---------------------------------------------------------------------------

/// Result of transforming an incoming request body.
#[derive(Debug)]
pub struct Injection {
    /// The outgoing body.  Byte-identical to the input when no
    /// transformation applied.
    pub body: Vec<u8>,
    /// Per-request context for the router and the parser.
    pub ctx: RequestContext,
}

/// Transform an incoming chat-completions body according to the
/// configuration snapshot.
///
/// Injection is deterministic: the same body and snapshot always produce
/// byte-identical output.
pub fn inject(
    body: &[u8],
    config: &GatewayConfig,
    client_key: Option<String>,
) -> Result<Injection, GatewayError> {
    let mut request: ChatRequest = serde_json::from_slice(body)
        .map_err(|e| GatewayError::InvalidRequest(format!("malformed chat-completions body: {e}")))?;

    let mut modified = false;

    if config.features.convert_developer_to_system {
        for msg in &mut request.messages {
            if msg.role == "developer" {
                msg.role = "system".into();
                modified = true;
            }
        }
    }

    let fc_active = config.features.enable_function_calling && request.has_tools();
    let trigger = config.trigger().to_string();

    let ctx = RequestContext {
        client_key,
        model: request.model.clone(),
        stream: request.wants_stream(),
        fc_active,
        trigger: trigger.clone(),
        tools: request.tools.clone().unwrap_or_default(),
    };

    if !fc_active {
        // Pass-through: the upstream sees exactly what the client sent,
        // modulo the role remap above.
        let body = if modified {
            serde_json::to_vec(&request)
                .map_err(|e| GatewayError::InvalidRequest(e.to_string()))?
        } else {
            body.to_vec()
        };
        return Ok(Injection { body, ctx });
    }

    let template = config
        .features
        .prompt_template
        .as_deref()
        .unwrap_or(DEFAULT_TEMPLATE);
    let prompt = render_prompt(template, &ctx.tools, &trigger);

    correlate_tool_results(&mut request.messages);

    request
        .messages
        .insert(0, ChatMessage::system(prompt));

    // The upstream does not understand these fields.
    request.tools = None;
    request.tool_choice = None;

    let body =
        serde_json::to_vec(&request).map_err(|e| GatewayError::InvalidRequest(e.to_string()))?;
    Ok(Injection { body, ctx })
}

/// Re-present prior tool results so the model sees both the original call
/// and its outcome.
///
/// For each `tool` message, the assistant turn carrying the matching
/// `tool_calls[*].id` is looked up and the result content is prefixed with a
/// short block naming the invoked function and its arguments.  Results with
/// no matching call, or with non-text content, are left untouched.
fn correlate_tool_results(messages: &mut [ChatMessage]) {
    let calls: Vec<(String, String, String)> = messages
        .iter()
        .filter(|m| m.role == "assistant")
        .flat_map(|m| m.tool_calls.iter().flatten())
        .map(|tc| {
            (
                tc.id.clone(),
                tc.function.name.clone(),
                tc.function.arguments.clone(),
            )
        })
        .collect();

    for msg in messages.iter_mut() {
        if msg.role != "tool" {
            continue;
        }
        let Some(call_id) = msg.tool_call_id.clone() else {
            continue;
        };
        let Some((_, name, args)) = calls.iter().find(|(id, _, _)| *id == call_id) else {
            continue;
        };
        if let Some(serde_json::Value::String(content)) = &msg.content {
            let prefixed = format!("[Result of {name}({args})]\n{content}");
            msg.set_text(prefixed);
        }
    }
}
