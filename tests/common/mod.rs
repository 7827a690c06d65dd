#![allow(dead_code)]

use std::any::Any;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use flintnet::codec::{PayloadReader, PayloadWriter};
use flintnet::network::{DisconnectReason, NetworkEvents, Remote};
use flintnet::protocol::{Message, MessageId, WireMessage};
use flintnet::NetResult;

#[derive(Debug, Clone, PartialEq)]
pub struct Chat {
    pub body: String,
}

impl Message for Chat {
    fn id(&self) -> MessageId {
        Self::ID
    }
    fn write_payload(&self, writer: &mut PayloadWriter<'_>) -> NetResult<()> {
        writer.put_string(&self.body)
    }
    fn into_any(self: Box<Self>) -> Box<dyn Any> {
        self
    }
}

impl WireMessage for Chat {
    const ID: MessageId = 1;
    fn read_payload(reader: &mut PayloadReader<'_>, _version: u8) -> NetResult<Self> {
        Ok(Chat {
            body: reader.read_string()?,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Ack {
    pub seq: u32,
}

impl Message for Ack {
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

impl WireMessage for Ack {
    const ID: MessageId = 2;
    fn read_payload(reader: &mut PayloadReader<'_>, _version: u8) -> NetResult<Self> {
        Ok(Ack {
            seq: reader.read_u32()?,
        })
    }
}

/// Observer that remembers everything it saw, for assertions.
#[derive(Clone, Default)]
pub struct Recorder {
    inner: Arc<RecorderInner>,
}

#[derive(Default)]
struct RecorderInner {
    started: AtomicUsize,
    connected: AtomicUsize,
    added: AtomicUsize,
    disconnects: Mutex<Vec<DisconnectReason>>,
}

impl Recorder {
    pub fn new() -> Recorder {
        Recorder::default()
    }

    pub fn started(&self) -> usize {
        self.inner.started.load(Ordering::SeqCst)
    }

    pub fn connected(&self) -> usize {
        self.inner.connected.load(Ordering::SeqCst)
    }

    pub fn added(&self) -> usize {
        self.inner.added.load(Ordering::SeqCst)
    }

    pub fn disconnects(&self) -> Vec<DisconnectReason> {
        self.inner.disconnects.lock().clone()
    }
}

impl NetworkEvents for Recorder {
    fn on_started(&self, _local_addr: SocketAddr) {
        self.inner.started.fetch_add(1, Ordering::SeqCst);
    }

    fn on_connected(&self, _remote: &dyn Remote) {
        self.inner.connected.fetch_add(1, Ordering::SeqCst);
    }

    fn on_connection_added(&self, _remote: &dyn Remote) {
        self.inner.added.fetch_add(1, Ordering::SeqCst);
    }

    fn on_disconnected(&self, _remote: &dyn Remote, reason: DisconnectReason) {
        self.inner.disconnects.lock().push(reason);
    }
}
