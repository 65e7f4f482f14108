// SPDX-License-Identifier: MIT OR Apache-2.0
#![doc = include_str!("../README.md")]
#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod context;
pub mod error;
pub mod wire;

pub use context::{DEFAULT_TRIGGER, RequestContext, THINK_CLOSE, THINK_OPEN};
pub use error::GatewayError;
pub use wire::{
    ChatChunk, ChatMessage, ChatRequest, ChatResponse, Choice, ChunkChoice, ChunkDelta,
    ChunkFunction, ChunkHeader, ChunkToolCall, FunctionCall, FunctionDef, ResponseMessage,
    ToolCall, ToolDef,
};
