// SPDX-License-Identifier: MIT OR Apache-2.0
#![doc = include_str!("../README.md")]
#![deny(unsafe_code)]
#![warn(missing_docs)]

mod envelope;
pub mod extract;
pub mod scanner;
pub mod transform;

pub use extract::{Extraction, FinishReason, ParsedCall, extract, strip_think_regions};
pub use scanner::{ScanEvent, ScanOptions, StreamScanner};
pub use transform::{StreamTransform, transform_response};
