// SPDX-License-Identifier: MIT OR Apache-2.0
//! Incremental scanning of the `<tool_calls>` envelope.
//!
//! The envelope is scanned with plain substring matching rather than an XML
//! parser: the `<arguments>` contract requires the literal byte content of
//! the tag, and a real XML parser would decode entities and re-serialize.
//! None of the tag names is a substring of another (`</tool_call>` does not
//! occur inside `</tool_calls>`), so matching is unambiguous.

pub(crate) const WRAPPER_OPEN: &str = "<tool_calls>";
pub(crate) const WRAPPER_CLOSE: &str = "</tool_calls>";
const ELEMENT_OPEN: &str = "<tool_call>";
const ELEMENT_CLOSE: &str = "</tool_call>";

/// One step of envelope scanning.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum ElementStep {
    /// A complete `<tool_call>` element was consumed.  `call` is `None` when
    /// the element had no usable `<name>` and is skipped.
    Complete {
        /// `(name, literal argument text)` when the element was usable.
        call: Option<(String, String)>,
        /// Bytes consumed from the front of the buffer.
        consumed: usize,
    },
    /// The wrapper close tag was consumed; the envelope is finished.
    Closed {
        /// Bytes consumed from the front of the buffer.
        consumed: usize,
    },
    /// More input is required before anything can be consumed.
    NeedMore,
}

/// How the wrapper open tag relates to the front of the buffer.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum WrapperCheck {
    /// The buffer (after leading whitespace) starts with `<tool_calls>`.
    Present {
        /// Offset just past the wrapper open tag.
        body_start: usize,
    },
    /// The buffer is still a prefix of the expected wrapper.
    Undecided,
    /// The buffer cannot begin a `<tool_calls>` envelope.
    Garbled,
}

/// Check whether `buf` begins (modulo leading whitespace) with the wrapper
/// open tag.
pub(crate) fn check_wrapper(buf: &str) -> WrapperCheck {
    let trimmed = buf.trim_start();
    let lead = buf.len() - trimmed.len();
    if trimmed.len() >= WRAPPER_OPEN.len() {
        if trimmed.starts_with(WRAPPER_OPEN) {
            WrapperCheck::Present {
                body_start: lead + WRAPPER_OPEN.len(),
            }
        } else {
            WrapperCheck::Garbled
        }
    } else if WRAPPER_OPEN.starts_with(trimmed) {
        WrapperCheck::Undecided
    } else {
        WrapperCheck::Garbled
    }
}

/// Consume the next complete element (or the wrapper close) from the front
/// of `buf`.
pub(crate) fn next_element(buf: &str) -> ElementStep {
    let open = buf.find(ELEMENT_OPEN);
    let close_all = buf.find(WRAPPER_CLOSE);

    if let Some(pc) = close_all
        && open.is_none_or(|p0| pc < p0)
    {
        return ElementStep::Closed {
            consumed: pc + WRAPPER_CLOSE.len(),
        };
    }

    let Some(p0) = open else {
        return ElementStep::NeedMore;
    };
    let Some(rel) = buf[p0..].find(ELEMENT_CLOSE) else {
        return ElementStep::NeedMore;
    };

    let inner = &buf[p0 + ELEMENT_OPEN.len()..p0 + rel];
    ElementStep::Complete {
        call: parse_element(inner),
        consumed: p0 + rel + ELEMENT_CLOSE.len(),
    }
}

/// Parse the interior of a `<tool_call>` element.
///
/// `<name>` is required and trimmed; `<arguments>` is optional and its
/// content is preserved byte-exactly (it should be JSON, but even invalid
/// text is passed along so the client can report the error).
fn parse_element(inner: &str) -> Option<(String, String)> {
    let name = tag_content(inner, "name")?.trim().to_string();
    if name.is_empty() {
        return None;
    }
    let arguments = tag_content(inner, "arguments")
        .unwrap_or_default()
        .to_string();
    Some((name, arguments))
}

/// The literal content between `<tag>` and `</tag>`, if both are present.
fn tag_content<'a>(text: &'a str, tag: &str) -> Option<&'a str> {
    let open = format!("<{tag}>");
    let close = format!("</{tag}>");
    let start = text.find(&open)? + open.len();
    let end = start + text[start..].find(&close)?;
    Some(&text[start..end])
}
