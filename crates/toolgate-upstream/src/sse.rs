// SPDX-License-Identifier: MIT OR Apache-2.0
//! Incremental server-sent-events decoding.

/// Reassembles SSE `data:` payloads from arbitrary byte chunks.
///
/// The decoder carries partial lines and partially accumulated events across
/// [`SseDecoder::feed`] calls, so upstream chunk boundaries never matter.
/// Comment lines and non-`data` fields (`event:`, `id:`, `retry:`) are
/// ignored; multi-line data is joined with `\n` per the SSE specification.
/// The `[DONE]` sentinel is surfaced as an ordinary payload — callers decide
/// what it means.
#[derive(Debug, Default)]
pub struct SseDecoder {
    line_buf: Vec<u8>,
    data: Option<String>,
}

impl SseDecoder {
    /// Create an empty decoder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a byte chunk; returns every `data:` payload completed by it.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<String> {
        self.line_buf.extend_from_slice(chunk);
        let mut out = Vec::new();

        while let Some(pos) = self.line_buf.iter().position(|&b| b == b'\n') {
            let mut line: Vec<u8> = self.line_buf.drain(..=pos).collect();
            line.pop(); // the \n
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            self.process_line(&line, &mut out);
        }
        out
    }

    /// Flush a final event that was not terminated by a blank line (some
    /// upstreams close the connection right after the last data line).
    pub fn finish(&mut self) -> Vec<String> {
        let mut out = Vec::new();
        let trailing: Vec<u8> = std::mem::take(&mut self.line_buf);
        if !trailing.is_empty() {
            let mut line = trailing;
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            self.process_line(&line, &mut out);
        }
        if let Some(payload) = self.data.take() {
            out.push(payload);
        }
        out
    }

    fn process_line(&mut self, line: &[u8], out: &mut Vec<String>) {
        if line.is_empty() {
            if let Some(payload) = self.data.take() {
                out.push(payload);
            }
            return;
        }
        if line[0] == b':' {
            return;
        }

        let text = String::from_utf8_lossy(line);
        let Some(rest) = text
            .strip_prefix("data:")
            .map(|r| r.strip_prefix(' ').unwrap_or(r))
        else {
            return;
        };

        match &mut self.data {
            Some(existing) => {
                existing.push('\n');
                existing.push_str(rest);
            }
            None => self.data = Some(rest.to_string()),
        }
    }
}
