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

use std::any::{type_name, Any, TypeId};
use std::collections::HashMap;
use std::fmt;

use tracing::debug;

use crate::codec::PayloadReader;
use crate::network::RemoteRef;
use crate::protocol::message::{Message, MessageId, WireMessage};
use crate::{NetError, NetResult};

type DecodeFn = fn(&mut PayloadReader<'_>, u8) -> NetResult<Box<dyn Message>>;
type HandlerFn = Box<dyn Fn(Box<dyn Any>, &RemoteRef) + Send + Sync>;

fn decode_erased<M: WireMessage>(
    reader: &mut PayloadReader<'_>,
    version: u8,
) -> NetResult<Box<dyn Message>> {
    Ok(Box::new(M::read_payload(reader, version)?))
}

struct DecodeEntry {
    type_id: TypeId,
    type_name: &'static str,
    decode: DecodeFn,
}

/// Maps wire identifiers to decoders and concrete message types to handlers.
///
/// Built once through [`MessageRegistryBuilder`] before any entity starts and
/// immutable afterwards, so lookups need no locking. Handlers are keyed by
/// the message's dynamic type, independent of which transport produced it.
pub struct MessageRegistry {
    decoders: HashMap<MessageId, DecodeEntry>,
    handlers: HashMap<TypeId, HandlerFn>,
}

impl fmt::Debug for MessageRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageRegistry")
            .field("messages", &self.decoders.len())
            .field("handlers", &self.handlers.len())
            .finish()
    }
}

impl MessageRegistry {
    pub fn builder() -> MessageRegistryBuilder {
        MessageRegistryBuilder {
            decoders: HashMap::new(),
            handlers: HashMap::new(),
        }
    }

    /// Decodes the payload of a frame into the message kind registered
    /// for `id`.
    pub fn decode(
        &self,
        id: MessageId,
        version: u8,
        reader: &mut PayloadReader<'_>,
    ) -> NetResult<Box<dyn Message>> {
        match self.decoders.get(&id) {
            Some(entry) => (entry.decode)(reader, version),
            None => Err(NetError::UnknownMessageId(id)),
        }
    }

    pub fn is_registered(&self, id: MessageId) -> bool {
        self.decoders.contains_key(&id)
    }

    pub fn message_count(&self) -> usize {
        self.decoders.len()
    }

    pub fn handler_count(&self) -> usize {
        self.handlers.len()
    }

    /// Runs the handler registered for the message's concrete type.
    ///
    /// Returns `false` when no handler matches; the message is dropped in
    /// that case and the caller decides whether that is worth a log line.
    pub fn try_dispatch(&self, message: Box<dyn Message>, remote: &RemoteRef) -> bool {
        let any = message.into_any();
        let type_id = any.as_ref().type_id();
        match self.handlers.get(&type_id) {
            Some(invoke) => {
                invoke(any, remote);
                true
            }
            None => false,
        }
    }
}

/// Accumulates registrations, then freezes them into a [`MessageRegistry`].
pub struct MessageRegistryBuilder {
    decoders: HashMap<MessageId, DecodeEntry>,
    handlers: HashMap<TypeId, HandlerFn>,
}

impl MessageRegistryBuilder {
    /// Registers the message kind `M` under `M::ID`.
    ///
    /// Fails if another kind already claimed the same id, which is always a
    /// wiring mistake worth stopping at startup.
    pub fn register<M: WireMessage>(mut self) -> NetResult<Self> {
        if let Some(existing) = self.decoders.get(&M::ID) {
            return Err(NetError::RegistrationError(format!(
                "message id {} is already registered to {}",
                M::ID,
                existing.type_name
            )));
        }
        self.decoders.insert(
            M::ID,
            DecodeEntry {
                type_id: TypeId::of::<M>(),
                type_name: type_name::<M>(),
                decode: decode_erased::<M>,
            },
        );
        Ok(self)
    }

    /// Attaches the handler invoked for every received `M`.
    ///
    /// `M` must have been registered first. Attaching a second handler for
    /// the same kind silently replaces the first.
    pub fn handle<M, F>(mut self, handler: F) -> NetResult<Self>
    where
        M: WireMessage,
        F: Fn(M, &RemoteRef) + Send + Sync + 'static,
    {
        let registered = self
            .decoders
            .values()
            .any(|entry| entry.type_id == TypeId::of::<M>());
        if !registered {
            return Err(NetError::RegistrationError(format!(
                "no message registered for {}, register it before attaching a handler",
                type_name::<M>()
            )));
        }
        let invoke: HandlerFn = Box::new(move |any, remote| {
            if let Ok(message) = any.downcast::<M>() {
                handler(*message, remote);
            }
        });
        self.handlers.insert(TypeId::of::<M>(), invoke);
        Ok(self)
    }

    pub fn build(self) -> MessageRegistry {
        debug!(
            "message registry built: {} messages, {} handlers",
            self.decoders.len(),
            self.handlers.len()
        );
        MessageRegistry {
            decoders: self.decoders,
            handlers: self.handlers,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::net::SocketAddr;
    use std::sync::atomic::{AtomicI32, Ordering};
    use std::sync::Arc;

    use bytes::{Bytes, BytesMut};
    use parking_lot::Mutex;

    use super::*;
    use crate::codec::PayloadWriter;
    use crate::network::{DisconnectReason, Disconnectable, Remote, Sendable, StateSlot};

    #[derive(Debug, PartialEq)]
    struct Ping {
        seq: u32,
    }

    impl Message for Ping {
        fn id(&self) -> MessageId {
            Self::ID
        }
        fn write_payload(&self, writer: &mut PayloadWriter<'_>) -> NetResult<()> {
            writer.put_u32(self.seq);
            Ok(())
        }
        fn into_any(self: Box<Self>) -> Box<dyn Any> {
            self
        }
    }

    impl WireMessage for Ping {
        const ID: MessageId = 1;
        fn read_payload(reader: &mut PayloadReader<'_>, _version: u8) -> NetResult<Self> {
            Ok(Ping {
                seq: reader.read_u32()?,
            })
        }
    }

    #[derive(Debug)]
    struct Pong;

    impl Message for Pong {
        fn id(&self) -> MessageId {
            Self::ID
        }
        fn write_payload(&self, _writer: &mut PayloadWriter<'_>) -> NetResult<()> {
            Ok(())
        }
        fn into_any(self: Box<Self>) -> Box<dyn Any> {
            self
        }
    }

    impl WireMessage for Pong {
        const ID: MessageId = 2;
        fn read_payload(_reader: &mut PayloadReader<'_>, _version: u8) -> NetResult<Self> {
            Ok(Pong)
        }
    }

    // claims Ping's id on purpose
    #[derive(Debug)]
    struct Clash;

    impl Message for Clash {
        fn id(&self) -> MessageId {
            Self::ID
        }
        fn write_payload(&self, _writer: &mut PayloadWriter<'_>) -> NetResult<()> {
            Ok(())
        }
        fn into_any(self: Box<Self>) -> Box<dyn Any> {
            self
        }
    }

    impl WireMessage for Clash {
        const ID: MessageId = 1;
        fn read_payload(_reader: &mut PayloadReader<'_>, _version: u8) -> NetResult<Self> {
            Ok(Clash)
        }
    }

    #[derive(Debug, Default)]
    struct FakeRemote {
        sent: Mutex<Vec<Bytes>>,
        state: StateSlot,
    }

    impl Sendable for FakeRemote {
        fn send(&self, frame: Bytes) -> NetResult<()> {
            self.sent.lock().push(frame);
            Ok(())
        }
        fn send_message(&self, _message: &dyn Message) -> NetResult<()> {
            Ok(())
        }
    }

    impl Disconnectable for FakeRemote {
        fn disconnect(&self, _reason: DisconnectReason) {}
    }

    impl Remote for FakeRemote {
        fn remote_addr(&self) -> SocketAddr {
            "127.0.0.1:9".parse().unwrap()
        }
        fn connection_id(&self) -> Option<u64> {
            None
        }
        fn is_connected(&self) -> bool {
            true
        }
        fn state(&self) -> &StateSlot {
            &self.state
        }
    }

    fn fake_remote() -> RemoteRef {
        Arc::new(FakeRemote::default())
    }

    #[test]
    fn test_duplicate_message_id_is_rejected() {
        let result = MessageRegistry::builder()
            .register::<Ping>()
            .unwrap()
            .register::<Clash>();
        assert!(matches!(result, Err(NetError::RegistrationError(_))));
    }

    #[test]
    fn test_handler_requires_registered_message() {
        let result = MessageRegistry::builder().handle::<Ping, _>(|_, _| {});
        assert!(matches!(result, Err(NetError::RegistrationError(_))));
    }

    #[test]
    fn test_dispatch_runs_matching_handler() {
        let seen = Arc::new(AtomicI32::new(0));
        let seen_clone = seen.clone();
        let registry = MessageRegistry::builder()
            .register::<Ping>()
            .unwrap()
            .handle::<Ping, _>(move |ping, _remote| {
                seen_clone.store(ping.seq as i32, Ordering::SeqCst);
            })
            .unwrap()
            .build();

        let remote = fake_remote();
        let matched = registry.try_dispatch(Box::new(Ping { seq: 42 }), &remote);
        assert!(matched);
        assert_eq!(seen.load(Ordering::SeqCst), 42);
    }

    #[test]
    fn test_dispatch_without_handler_drops_message() {
        let registry = MessageRegistry::builder()
            .register::<Ping>()
            .unwrap()
            .register::<Pong>()
            .unwrap()
            .handle::<Ping, _>(|_, _| {})
            .unwrap()
            .build();

        let remote = fake_remote();
        assert!(!registry.try_dispatch(Box::new(Pong), &remote));
    }

    #[test]
    fn test_reattached_handler_replaces_previous() {
        let first = Arc::new(AtomicI32::new(0));
        let second = Arc::new(AtomicI32::new(0));
        let first_clone = first.clone();
        let second_clone = second.clone();

        let registry = MessageRegistry::builder()
            .register::<Ping>()
            .unwrap()
            .handle::<Ping, _>(move |_, _| {
                first_clone.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap()
            .handle::<Ping, _>(move |_, _| {
                second_clone.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap()
            .build();

        assert_eq!(registry.handler_count(), 1);
        let remote = fake_remote();
        registry.try_dispatch(Box::new(Ping { seq: 1 }), &remote);
        assert_eq!(first.load(Ordering::SeqCst), 0);
        assert_eq!(second.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_decode_unknown_id() {
        let registry = MessageRegistry::builder().build();
        let mut payload = BytesMut::new();
        let mut reader = PayloadReader::new(&mut payload);
        let result = registry.decode(99, 0, &mut reader);
        assert!(matches!(result, Err(NetError::UnknownMessageId(99))));
    }
}
