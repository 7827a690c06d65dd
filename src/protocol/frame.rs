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

use std::sync::Arc;

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::codec::{PayloadReader, PayloadWriter};
use crate::protocol::message::{Message, MessageId};
use crate::protocol::registry::MessageRegistry;
use crate::NetError::Incomplete;
use crate::{NetError, NetResult};

/// Frame header bytes preceding the payload: message id (u16) followed by
/// payload length (i64), both big-endian. The version byte is the first
/// payload byte and counts toward the payload length.
pub const FRAME_HEADER_LEN: usize = 10;

/// Default cap on a single frame's payload length.
pub const DEFAULT_MAX_FRAME_SIZE: usize = 1024 * 1024;

/// Default receive buffer capacity for new entities.
pub const DEFAULT_BUFFER_LEN: usize = 8 * 1024;

/// Translates between messages and raw bytes.
///
/// Implementations are shared by every entity of an engine and called from
/// their receive and send paths concurrently, hence `Send + Sync`.
pub trait Protocol: Send + Sync + 'static {
    /// Encodes one message into a self-contained frame.
    fn serialize(&self, message: &dyn Message) -> NetResult<Bytes>;

    /// Decodes every complete frame currently in `buffer`.
    ///
    /// Bytes of a trailing partial frame stay in the buffer and complete on
    /// a later call, once more data has arrived. A malformed frame is not
    /// recoverable; the caller must drop the connection on error.
    fn parse(&self, buffer: &mut BytesMut) -> NetResult<Vec<Box<dyn Message>>>;

    /// Receive buffer capacity entities allocate for this protocol.
    fn buffer_len(&self) -> usize {
        DEFAULT_BUFFER_LEN
    }
}

/// The built-in length-prefixed framing over a [`MessageRegistry`].
pub struct FramedProtocol {
    registry: Arc<MessageRegistry>,
    max_frame_size: usize,
    buffer_len: usize,
}

impl FramedProtocol {
    pub fn new(registry: Arc<MessageRegistry>) -> Self {
        Self::with_limits(registry, DEFAULT_MAX_FRAME_SIZE, DEFAULT_BUFFER_LEN)
    }

    pub fn with_limits(
        registry: Arc<MessageRegistry>,
        max_frame_size: usize,
        buffer_len: usize,
    ) -> Self {
        FramedProtocol {
            registry,
            max_frame_size,
            buffer_len,
        }
    }

    /// Checks whether `buffer` starts with one complete, plausible frame.
    fn check(&self, buffer: &mut BytesMut) -> NetResult<(MessageId, usize)> {
        if buffer.remaining() < FRAME_HEADER_LEN {
            return Err(Incomplete);
        }
        let mut header = &buffer[0..FRAME_HEADER_LEN];
        let message_id = header.get_u16();
        let payload_len = header.get_i64();
        if payload_len < 1 {
            return Err(NetError::MalformedProtocol(format!(
                "frame payload length {} less than 1",
                payload_len
            )));
        }
        if payload_len as usize > self.max_frame_size {
            return Err(NetError::MalformedProtocol(format!(
                "frame of length {} is too large",
                payload_len
            )));
        }
        if buffer.remaining() < FRAME_HEADER_LEN + payload_len as usize {
            buffer.reserve(FRAME_HEADER_LEN + payload_len as usize);
            return Err(Incomplete);
        }
        Ok((message_id, payload_len as usize))
    }

    fn parse_frame(&self, buffer: &mut BytesMut) -> NetResult<Option<Box<dyn Message>>> {
        match self.check(buffer) {
            Ok((message_id, payload_len)) => {
                buffer.advance(FRAME_HEADER_LEN);
                let mut payload = buffer.split_to(payload_len);
                let version = payload.get_u8();
                let mut reader = PayloadReader::new(&mut payload);
                let message = self.registry.decode(message_id, version, &mut reader)?;
                // fields left unread belong to a newer schema; they are
                // dropped with the payload
                Ok(Some(message))
            }
            Err(NetError::Incomplete) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

impl Protocol for FramedProtocol {
    fn serialize(&self, message: &dyn Message) -> NetResult<Bytes> {
        let mut buffer = BytesMut::with_capacity(FRAME_HEADER_LEN + 64);
        buffer.put_u16(message.id());
        let length_at = buffer.len();
        // placeholder, patched once the payload size is known
        buffer.put_i64(0);
        buffer.put_u8(message.version());
        let mut writer = PayloadWriter::new(&mut buffer);
        message.write_payload(&mut writer)?;
        let payload_len = buffer.len() - length_at - 8;
        if payload_len > self.max_frame_size {
            return Err(NetError::MalformedProtocol(format!(
                "frame of length {} is too large",
                payload_len
            )));
        }
        buffer[length_at..length_at + 8].copy_from_slice(&(payload_len as i64).to_be_bytes());
        Ok(buffer.freeze())
    }

    fn parse(&self, buffer: &mut BytesMut) -> NetResult<Vec<Box<dyn Message>>> {
        let mut messages = Vec::new();
        while let Some(message) = self.parse_frame(buffer)? {
            messages.push(message);
        }
        Ok(messages)
    }

    fn buffer_len(&self) -> usize {
        self.buffer_len
    }
}
