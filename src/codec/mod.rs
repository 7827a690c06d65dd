//! Payload Codec Module
//!
//! This module provides the cursor types used to read and write message
//! payloads in wire format. All multi-byte values are big-endian.
//!
//! # Components
//!
//! - `PayloadReader`: bounds-checked reads of primitives, strings and byte blocks
//! - `PayloadWriter`: the matching write side, appending to a frame under construction

pub use payload::PayloadReader;
pub use payload::PayloadWriter;

mod payload;
