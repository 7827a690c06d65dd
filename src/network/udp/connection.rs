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

use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use bytes::{Bytes, BytesMut};
use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::net::UdpSocket;
use tracing::{debug, trace, warn};

use crate::network::events::DisconnectReason;
use crate::network::monitor::FloodMonitor;
use crate::network::remote::{
    ConnState, ConnStateCell, ConnectionId, Disconnectable, Remote, RemoteRef, Sendable, StateSlot,
};
use crate::network::udp::MAX_DATAGRAM_SIZE;
use crate::protocol::Message;
use crate::queue::QueueBinding;
use crate::service::EngineContext;
use crate::{NetError, NetResult};

/// One udp peer, as seen by a [`UdpServer`](crate::network::udp::UdpServer).
///
/// Udp has no sockets per peer. A connection here is an entry in the
/// server's endpoint table: it remembers the peer address, keeps the parse
/// buffer for frames that straddle datagrams, and routes outbound frames
/// through the server's shared socket pump. Disconnecting removes the table
/// entry, nothing on the wire tells the peer.
pub struct UdpConnection {
    id: ConnectionId,
    remote_addr: SocketAddr,
    ctx: Arc<EngineContext>,
    binding: Mutex<Option<QueueBinding>>,
    monitor: FloodMonitor,
    state: StateSlot,
    conn_state: ConnStateCell,
    disposed: AtomicBool,
    /// Frames go out through the owning server's socket pump.
    outbound: Mutex<Option<async_channel::Sender<(SocketAddr, Bytes)>>>,
    /// Bytes of a frame still waiting for the rest of its datagrams.
    buffer: Mutex<BytesMut>,
    server_table: Weak<DashMap<SocketAddr, Arc<UdpConnection>>>,
}

impl fmt::Debug for UdpConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UdpConnection")
            .field("id", &self.id)
            .field("remote_addr", &self.remote_addr)
            .field("conn_state", &self.conn_state.load())
            .finish()
    }
}

impl UdpConnection {
    /// Creates the table entry for a newly seen endpoint and announces it
    /// through `on_connection_added`.
    pub(crate) fn register(
        id: ConnectionId,
        remote_addr: SocketAddr,
        ctx: Arc<EngineContext>,
        binding: QueueBinding,
        spam_limit: u32,
        outbound: async_channel::Sender<(SocketAddr, Bytes)>,
        table: &Arc<DashMap<SocketAddr, Arc<UdpConnection>>>,
    ) -> Arc<UdpConnection> {
        let buffer_len = ctx.protocol().buffer_len();
        let conn = Arc::new(UdpConnection {
            id,
            remote_addr,
            ctx,
            binding: Mutex::new(Some(binding)),
            monitor: FloodMonitor::new(spam_limit),
            state: StateSlot::new(),
            conn_state: ConnStateCell::new(ConnState::Connected),
            disposed: AtomicBool::new(false),
            outbound: Mutex::new(Some(outbound)),
            buffer: Mutex::new(BytesMut::with_capacity(buffer_len)),
            server_table: Arc::downgrade(table),
        });
        table.insert(remote_addr, conn.clone());
        conn.ctx.events().on_connection_added(conn.as_ref());
        conn
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    /// Appends one received datagram and queues a dispatch task per decoded
    /// message, counting each against the flood monitor.
    pub(crate) fn feed(self: &Arc<Self>, data: &[u8]) -> NetResult<()> {
        let messages = {
            let mut buffer = self.buffer.lock();
            buffer.extend_from_slice(data);
            self.ctx.protocol().parse(&mut buffer)?
        };
        for message in messages {
            self.monitor.record()?;
            self.enqueue_dispatch(message);
        }
        Ok(())
    }

    fn enqueue_dispatch(self: &Arc<Self>, message: Box<dyn Message>) {
        let registry = self.ctx.registry().clone();
        let remote: RemoteRef = self.clone();
        let message_id = message.id();
        let binding = self.binding.lock();
        if let Some(binding) = binding.as_ref() {
            binding.enqueue(Box::new(move || {
                if !registry.try_dispatch(message, &remote) {
                    trace!("message id {} has no handler, dropped", message_id);
                }
            }));
        }
    }
}

impl Sendable for UdpConnection {
    fn send(&self, frame: Bytes) -> NetResult<()> {
        if self.is_disposed() {
            return Err(NetError::Disposed);
        }
        if frame.len() > MAX_DATAGRAM_SIZE {
            return Err(NetError::DatagramTooLarge(frame.len()));
        }
        let outbound = self.outbound.lock();
        match outbound.as_ref() {
            Some(tx) => tx.try_send((self.remote_addr, frame)).map_err(|_| {
                NetError::ChannelSendError("udp send channel closed".to_string())
            }),
            None => Err(NetError::Disposed),
        }
    }

    fn send_message(&self, message: &dyn Message) -> NetResult<()> {
        let frame = self.ctx.protocol().serialize(message)?;
        self.send(frame)
    }
}

impl Disconnectable for UdpConnection {
    fn disconnect(&self, reason: DisconnectReason) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.conn_state.store(ConnState::Disconnecting);
        debug!("connection {} disconnecting: {:?}", self.id, reason);

        self.binding.lock().take();
        if let Some(table) = self.server_table.upgrade() {
            table.remove(&self.remote_addr);
        }

        self.ctx.events().on_disconnected(self, reason);

        self.outbound.lock().take();
        self.buffer.lock().clear();
        self.state.clear();
        self.conn_state.store(ConnState::Disconnected);
    }
}

impl Remote for UdpConnection {
    fn remote_addr(&self) -> SocketAddr {
        self.remote_addr
    }

    fn connection_id(&self) -> Option<ConnectionId> {
        Some(self.id)
    }

    fn is_connected(&self) -> bool {
        self.conn_state.load() == ConnState::Connected
    }

    fn state(&self) -> &StateSlot {
        &self.state
    }
}

/// Owns the shared outbound lane of a udp socket: sends queued frames in
/// order until the channel closes. A failed send only loses that datagram,
/// the socket stays usable.
pub(super) async fn send_datagrams(
    outbound: async_channel::Receiver<(SocketAddr, Bytes)>,
    socket: Arc<UdpSocket>,
) {
    while let Ok((peer, frame)) = outbound.recv().await {
        if let Err(e) = socket.send_to(&frame, peer).await {
            warn!("datagram to {} failed: {}", peer, e);
        }
    }
    trace!("udp send pump exited");
}
