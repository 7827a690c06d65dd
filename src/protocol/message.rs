// Copyright 2025 jonefeewang@gmail.com
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::any::Any;
use std::fmt::Debug;

use crate::codec::{PayloadReader, PayloadWriter};
use crate::NetResult;

/// Identifies a message kind on the wire. Part of every frame header.
pub type MessageId = u16;

/// A unit of application traffic.
///
/// A message knows its wire identifier, its schema version and how to write
/// its payload fields. Decoding lives on [`WireMessage`] so that received
/// frames can be turned back into concrete values.
pub trait Message: Debug + Send + 'static {
    /// Wire identifier of this message kind, `WireMessage::ID` in practice.
    fn id(&self) -> MessageId;

    /// Schema version written as the first payload byte.
    fn version(&self) -> u8 {
        0
    }

    /// Writes the payload fields following the version byte.
    fn write_payload(&self, writer: &mut PayloadWriter<'_>) -> NetResult<()>;

    /// Recovers the concrete type at dispatch time. Implementations
    /// return `self`.
    fn into_any(self: Box<Self>) -> Box<dyn Any>;
}

/// The decode side of a message kind. Required to register the kind.
pub trait WireMessage: Message + Sized {
    /// Wire identifier. Exactly one registered kind per id.
    const ID: MessageId;

    /// Reads the payload fields of a frame carrying this kind.
    ///
    /// `version` is the schema version the sender wrote. Fields appended by
    /// a newer schema stay unread in the reader and are discarded with the
    /// frame, so older readers keep working.
    fn read_payload(reader: &mut PayloadReader<'_>, version: u8) -> NetResult<Self>;
}
