//! Wire Protocol Module
//!
//! This module defines how application messages travel as bytes and how
//! received bytes become messages again.
//!
//! # Components
//!
//! - `Message` / `WireMessage`: the encode and decode sides of a message kind
//! - `MessageRegistry`: id-to-decoder and type-to-handler tables, frozen at startup
//! - `Protocol` / `FramedProtocol`: framing of messages, pluggable per engine
//!
//! # Frame layout
//!
//! ```text
//! +------------+----------------+---------+------------------+
//! | id (u16)   | length (i64)   | version | payload fields   |
//! +------------+----------------+---------+------------------+
//! ```
//!
//! `length` counts the version byte plus the payload fields. All integers
//! are big-endian.

pub use frame::FramedProtocol;
pub use frame::Protocol;
pub use frame::DEFAULT_BUFFER_LEN;
pub use frame::DEFAULT_MAX_FRAME_SIZE;
pub use frame::FRAME_HEADER_LEN;
pub use message::Message;
pub use message::MessageId;
pub use message::WireMessage;
pub use registry::MessageRegistry;
pub use registry::MessageRegistryBuilder;

mod frame;
mod message;
mod registry;
