// SPDX-License-Identifier: MIT OR Apache-2.0
//! Batch extraction of tagged tool calls from complete assistant text.

use crate::envelope::{self, ElementStep, WrapperCheck};
use toolgate_core::wire::new_call_id;
use toolgate_core::{THINK_CLOSE, THINK_OPEN};

/// Why the assistant turn ended, as reported to the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinishReason {
    /// Normal end of prose.
    Stop,
    /// One or more tool calls were extracted.
    ToolCalls,
}

impl FinishReason {
    /// The wire string for this reason.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Stop => "stop",
            Self::ToolCalls => "tool_calls",
        }
    }
}

/// A tool call recovered from the envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedCall {
    /// Assigned identifier (`call_<suffix>`), unique within the response.
    pub id: String,
    /// Function name.
    pub name: String,
    /// Literal argument text, byte-exact as the model emitted it.
    pub arguments: String,
}

/// Result of running the extraction algorithm over assistant text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Extraction {
    /// Client-visible message content (everything before the trigger; the
    /// whole text when nothing was extracted).
    pub prose: String,
    /// Extracted calls, in envelope order.
    pub calls: Vec<ParsedCall>,
    /// Finish reason implied by the extraction.
    pub finish: FinishReason,
}

/// Find the first trigger occurrence that is not inside a
/// `<think>…</think>` region.
///
/// An unclosed `<think>` swallows the rest of the text: nothing after it can
/// trigger extraction.
fn find_trigger(text: &str, trigger: &str) -> Option<usize> {
    let mut pos = 0;
    loop {
        let rest = &text[pos..];
        let trig = rest.find(trigger)?;
        match rest.find(THINK_OPEN) {
            Some(open) if open < trig => {
                let after_open = pos + open + THINK_OPEN.len();
                let close = text[after_open..].find(THINK_CLOSE)?;
                pos = after_open + close + THINK_CLOSE.len();
            }
            _ => return Some(pos + trig),
        }
    }
}

/// Run the extraction algorithm over a complete assistant text.
///
/// Robustness rules:
/// - no trigger (or trigger only inside thinking regions) → pure prose;
/// - trigger followed by anything other than a `<tool_calls>` envelope →
///   the trigger and the garbled tail are surfaced as prose;
/// - truncated envelope → best-effort extraction of the complete
///   `<tool_call>` elements observed.
#[must_use]
pub fn extract(text: &str, trigger: &str) -> Extraction {
    let Some(at) = find_trigger(text, trigger) else {
        return Extraction {
            prose: text.to_string(),
            calls: Vec::new(),
            finish: FinishReason::Stop,
        };
    };

    let prose = &text[..at];
    let tail = &text[at + trigger.len()..];

    let calls = parse_envelope(tail);
    if calls.is_empty() {
        // Trigger without a usable envelope: surface everything as prose.
        return Extraction {
            prose: text.to_string(),
            calls: Vec::new(),
            finish: FinishReason::Stop,
        };
    }

    Extraction {
        prose: prose.to_string(),
        calls,
        finish: FinishReason::ToolCalls,
    }
}

fn parse_envelope(tail: &str) -> Vec<ParsedCall> {
    let WrapperCheck::Present { body_start } = envelope::check_wrapper(tail) else {
        return Vec::new();
    };

    let mut body = &tail[body_start..];
    let mut calls = Vec::new();
    loop {
        match envelope::next_element(body) {
            ElementStep::Complete { call, consumed } => {
                if let Some((name, arguments)) = call {
                    calls.push(ParsedCall {
                        id: new_call_id(),
                        name,
                        arguments,
                    });
                }
                body = &body[consumed..];
            }
            // NeedMore at end-of-text is the truncated-envelope case: keep
            // whatever complete elements were already collected.
            ElementStep::Closed { .. } | ElementStep::NeedMore => break,
        }
    }
    calls
}

/// Remove every `<think>…</think>` region (tags included) from `text`.
///
/// An unclosed region is removed through end-of-text.
#[must_use]
pub fn strip_think_regions(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(open) = rest.find(THINK_OPEN) {
        out.push_str(&rest[..open]);
        let after = &rest[open + THINK_OPEN.len()..];
        match after.find(THINK_CLOSE) {
            Some(close) => rest = &after[close + THINK_CLOSE.len()..],
            None => return out,
        }
    }
    out.push_str(rest);
    out
}
