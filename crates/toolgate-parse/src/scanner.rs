// SPDX-License-Identifier: MIT OR Apache-2.0
//! Incremental scanner for streamed assistant text.
//!
//! The scanner is an explicit stream transducer: callers `feed` it decoded
//! content deltas in arrival order and receive zero or more events per call;
//! `finish` flushes whatever is held back when the upstream stream closes.
//! All buffer-reassembly state lives in this object — the state machine is
//! the contract, not an artifact of suspension points.

use crate::envelope::{self, ElementStep, WrapperCheck};
use crate::extract::FinishReason;
use toolgate_core::wire::new_call_id;
use toolgate_core::{THINK_CLOSE, THINK_OPEN};

/// Events produced by the scanner, in emission order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanEvent {
    /// Pass-through text for the client.
    Content(String),
    /// A complete tool call recovered from the envelope.
    Call {
        /// Stable zero-based index, monotonic from 0.
        index: u32,
        /// Assigned identifier, unique within the response.
        id: String,
        /// Function name.
        name: String,
        /// Literal argument text.
        arguments: String,
    },
}

/// Scanner tunables.
#[derive(Debug, Clone)]
pub struct ScanOptions {
    /// Drop `<think>…</think>` regions from the output instead of passing
    /// them through.
    pub strip_think: bool,
    /// Cap on envelope accumulation, in bytes.  Past the cap the buffered
    /// envelope degrades to pass-through content.
    pub envelope_cap: usize,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            strip_think: false,
            envelope_cap: 256 * 1024,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    /// Emitting prose; watching for the trigger and for `<think>`.
    Prose,
    /// Inside a thinking region; watching for `</think>` only.
    InThink,
    /// Past the trigger; accumulating the envelope.
    InEnvelope,
    /// Envelope closed; everything further is discarded.
    Terminal,
}

/// Incremental scanner with partial-marker holdback across chunk
/// boundaries.
#[derive(Debug)]
pub struct StreamScanner {
    trigger: String,
    opts: ScanOptions,
    state: State,
    /// Rolling prose buffer.  Bounded: everything but a potential marker
    /// prefix (at most `max(len(trigger), len("</think>")) - 1` bytes) is
    /// flushed on every feed.
    pending: String,
    /// Envelope accumulation, bounded by `opts.envelope_cap`.
    envelope: String,
    wrapper_seen: bool,
    next_index: u32,
    calls_emitted: u32,
}

impl StreamScanner {
    /// Create a scanner for one response.
    #[must_use]
    pub fn new(trigger: impl Into<String>, opts: ScanOptions) -> Self {
        Self {
            trigger: trigger.into(),
            opts,
            state: State::Prose,
            pending: String::new(),
            envelope: String::new(),
            wrapper_seen: false,
            next_index: 0,
            calls_emitted: 0,
        }
    }

    /// Number of tool calls emitted so far.
    #[must_use]
    pub fn calls_emitted(&self) -> u32 {
        self.calls_emitted
    }

    /// Feed one decoded content delta; returns the events it releases.
    pub fn feed(&mut self, delta: &str) -> Vec<ScanEvent> {
        let mut events = Vec::new();
        if self.state == State::Terminal {
            return events;
        }
        self.pending.push_str(delta);
        self.drain(&mut events, false);
        events
    }

    /// Signal end of the upstream stream; flushes held-back text and
    /// returns the final events plus the finish reason.
    pub fn finish(&mut self) -> (Vec<ScanEvent>, FinishReason) {
        let mut events = Vec::new();
        self.drain(&mut events, true);

        loop {
            match self.state {
                State::Prose => {
                    // Held-back bytes were a partial marker that never
                    // completed; they are plain prose now.
                    self.flush_pending(&mut events);
                    break;
                }
                State::InThink => {
                    if !self.opts.strip_think {
                        self.flush_pending(&mut events);
                    } else {
                        self.pending.clear();
                    }
                    break;
                }
                State::InEnvelope => {
                    if self.calls_emitted == 0 && !self.envelope.is_empty() {
                        // Truncated envelope with nothing usable: surface
                        // the buffered text, re-scanned through the prose
                        // states so an embedded trigger occurrence still
                        // never reaches the client.
                        self.degrade();
                        self.drain(&mut events, true);
                    } else {
                        // Complete elements were already emitted; the
                        // partial tail is dropped.
                        self.envelope.clear();
                        break;
                    }
                }
                State::Terminal => break,
            }
        }
        self.state = State::Terminal;

        let reason = if self.calls_emitted > 0 {
            FinishReason::ToolCalls
        } else {
            FinishReason::Stop
        };
        (events, reason)
    }

    fn flush_pending(&mut self, events: &mut Vec<ScanEvent>) {
        if !self.pending.is_empty() {
            events.push(ScanEvent::Content(std::mem::take(&mut self.pending)));
        }
    }

    fn emit(events: &mut Vec<ScanEvent>, text: &str) {
        if !text.is_empty() {
            events.push(ScanEvent::Content(text.to_string()));
        }
    }

    fn drain(&mut self, events: &mut Vec<ScanEvent>, at_eof: bool) {
        loop {
            match self.state {
                State::Prose => {
                    let trig = self.pending.find(&self.trigger);
                    let think = self.pending.find(THINK_OPEN);
                    match (trig, think) {
                        (Some(t), None) => {
                            Self::emit(events, &self.pending[..t]);
                            self.pending.drain(..t + self.trigger.len());
                            self.state = State::InEnvelope;
                        }
                        (Some(t), Some(k)) if t <= k => {
                            Self::emit(events, &self.pending[..t]);
                            self.pending.drain(..t + self.trigger.len());
                            self.state = State::InEnvelope;
                        }
                        (_, Some(k)) => {
                            let cut = k + THINK_OPEN.len();
                            if self.opts.strip_think {
                                Self::emit(events, &self.pending[..k]);
                            } else {
                                Self::emit(events, &self.pending[..cut]);
                            }
                            self.pending.drain(..cut);
                            self.state = State::InThink;
                        }
                        (None, None) => {
                            let hold = if at_eof {
                                0
                            } else {
                                holdback(&self.pending, &[&self.trigger, THINK_OPEN])
                            };
                            let flush = self.pending.len() - hold;
                            Self::emit(events, &self.pending[..flush]);
                            self.pending.drain(..flush);
                            return;
                        }
                    }
                }
                State::InThink => match self.pending.find(THINK_CLOSE) {
                    Some(c) => {
                        let cut = c + THINK_CLOSE.len();
                        if !self.opts.strip_think {
                            Self::emit(events, &self.pending[..cut]);
                        }
                        self.pending.drain(..cut);
                        self.state = State::Prose;
                    }
                    None => {
                        let hold = if at_eof {
                            0
                        } else {
                            holdback(&self.pending, &[THINK_CLOSE])
                        };
                        let flush = self.pending.len() - hold;
                        if !self.opts.strip_think {
                            Self::emit(events, &self.pending[..flush]);
                            self.pending.drain(..flush);
                        } else {
                            self.pending.drain(..flush);
                        }
                        return;
                    }
                },
                State::InEnvelope => {
                    self.envelope.push_str(&self.pending);
                    self.pending.clear();
                    self.scan_envelope(events);
                    if self.state == State::InEnvelope || self.state == State::Terminal {
                        return;
                    }
                    // Degraded back to Prose; keep draining what remains.
                }
                State::Terminal => {
                    self.pending.clear();
                    return;
                }
            }
        }
    }

    fn scan_envelope(&mut self, events: &mut Vec<ScanEvent>) {
        if !self.wrapper_seen {
            match envelope::check_wrapper(&self.envelope) {
                WrapperCheck::Present { body_start } => {
                    self.envelope.drain(..body_start);
                    self.wrapper_seen = true;
                }
                WrapperCheck::Undecided => {
                    self.check_cap();
                    return;
                }
                WrapperCheck::Garbled => {
                    self.degrade();
                    return;
                }
            }
        }

        loop {
            match envelope::next_element(&self.envelope) {
                ElementStep::Complete { call, consumed } => {
                    self.envelope.drain(..consumed);
                    if let Some((name, arguments)) = call {
                        events.push(ScanEvent::Call {
                            index: self.next_index,
                            id: new_call_id(),
                            name,
                            arguments,
                        });
                        self.next_index += 1;
                        self.calls_emitted += 1;
                    }
                }
                ElementStep::Closed { .. } => {
                    self.envelope.clear();
                    self.state = State::Terminal;
                    return;
                }
                ElementStep::NeedMore => {
                    self.check_cap();
                    return;
                }
            }
        }
    }

    /// Envelope accumulation went over the cap: stop treating the buffer as
    /// an envelope and pass it downstream as content.
    fn check_cap(&mut self) {
        if self.envelope.len() > self.opts.envelope_cap {
            self.degrade();
        }
    }

    /// The buffer is not a usable envelope (garbled wrapper, cap overflow,
    /// or a dead-end tail).  Requeue it through ordinary prose scanning
    /// rather than emitting it directly: a further trigger occurrence in
    /// the garbled text must still be consumed, never relayed.
    fn degrade(&mut self) {
        let buffered = std::mem::take(&mut self.envelope);
        self.pending.insert_str(0, &buffered);
        self.wrapper_seen = false;
        self.state = State::Prose;
    }
}

/// Length of the longest suffix of `pending` that is a proper prefix of any
/// marker.  Those bytes must be held back: the next chunk may complete the
/// marker.
///
/// Marker first bytes are never UTF-8 continuation bytes, so a byte-level
/// suffix match always starts on a character boundary.
fn holdback(pending: &str, markers: &[&str]) -> usize {
    let pb = pending.as_bytes();
    let mut best = 0;
    for marker in markers {
        let mb = marker.as_bytes();
        let max = mb.len().saturating_sub(1).min(pb.len());
        for len in (best + 1..=max).rev() {
            if pb[pb.len() - len..] == mb[..len] {
                best = len;
                break;
            }
        }
    }
    best
}
