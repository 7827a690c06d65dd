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
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use parking_lot::Mutex;
use tokio::net::UdpSocket;
use tokio::sync::broadcast;
use tracing::{debug, error, info, trace, warn};

use crate::network::events::DisconnectReason;
use crate::network::remote::{
    ConnState, ConnStateCell, ConnectionId, Disconnectable, Remote, RemoteRef, Sendable, StateSlot,
};
use crate::network::udp::MAX_DATAGRAM_SIZE;
use crate::protocol::Message;
use crate::queue::ProcessingQueue;
use crate::service::EngineContext;
use crate::{NetError, NetResult, Shutdown};

/// Connecting side of a udp engine.
///
/// "Connecting" here means binding an ephemeral local port and fixing the
/// peer address on the socket, so sends need no address and receives only
/// accept that peer. Like its tcp sibling the client is reusable across
/// sessions and runs its handlers on a private processing queue.
pub struct UdpClient {
    remote_addr: SocketAddr,
    ctx: Arc<EngineContext>,
    queue: Arc<ProcessingQueue>,
    /// Held so the queue worker stops when the client is dropped.
    _queue_shutdown: broadcast::Sender<()>,
    conn_state: ConnStateCell,
    state: StateSlot,
    outbound: Mutex<Option<async_channel::Sender<Bytes>>>,
    notify_close: broadcast::Sender<()>,
}

impl fmt::Debug for UdpClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UdpClient")
            .field("remote_addr", &self.remote_addr)
            .field("conn_state", &self.conn_state.load())
            .finish()
    }
}

impl UdpClient {
    /// Creates a client for `remote_addr`. The client starts disconnected,
    /// [`connect`](UdpClient::connect) opens a session. Must run inside a
    /// tokio runtime.
    pub fn new(ctx: Arc<EngineContext>, remote_addr: SocketAddr) -> Arc<Self> {
        let (queue, queue_shutdown) = ProcessingQueue::standalone();
        let (notify_close, _) = broadcast::channel(1);
        Arc::new(UdpClient {
            remote_addr,
            ctx,
            queue,
            _queue_shutdown: queue_shutdown,
            conn_state: ConnStateCell::new(ConnState::Disconnected),
            state: StateSlot::new(),
            outbound: Mutex::new(None),
            notify_close,
        })
    }

    /// Binds an ephemeral port and fixes the peer address.
    ///
    /// A failed attempt reports `ConnectionFailed` through the observer
    /// exactly once and leaves the client disconnected, ready to retry.
    pub async fn connect(self: &Arc<Self>) -> NetResult<()> {
        if !self
            .conn_state
            .transition(ConnState::Disconnected, ConnState::Connecting)
        {
            return Err(NetError::IllegalStateError(format!(
                "client can not connect while {:?}",
                self.conn_state.load()
            )));
        }
        match self.open_socket().await {
            Ok(socket) => {
                let socket = Arc::new(socket);
                let (outbound_tx, outbound_rx) = async_channel::unbounded();
                *self.outbound.lock() = Some(outbound_tx);
                self.conn_state.store(ConnState::Connected);
                tokio::spawn(send_datagrams(outbound_rx, socket.clone()));
                // subscribe before the receive task runs, a disconnect from
                // inside on_connected must not be missed
                let shutdown = Shutdown::subscribe_to(&self.notify_close);
                tokio::spawn(self.clone().receive_loop(socket, shutdown));
                info!("client connected to {}", self.remote_addr);
                self.ctx.events().on_connected(self.as_ref());
                Ok(())
            }
            Err(e) => {
                self.conn_state.store(ConnState::Disconnected);
                warn!("client connect to {} failed: {}", self.remote_addr, e);
                self.ctx
                    .events()
                    .on_disconnected(self.as_ref(), DisconnectReason::ConnectionFailed);
                Err(NetError::ConnectionFailed(e.to_string()))
            }
        }
    }

    async fn open_socket(&self) -> std::io::Result<UdpSocket> {
        let local = if self.remote_addr.is_ipv4() {
            SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0)
        } else {
            SocketAddr::new(IpAddr::V6(Ipv6Addr::UNSPECIFIED), 0)
        };
        let socket = UdpSocket::bind(local).await?;
        socket.connect(self.remote_addr).await?;
        Ok(socket)
    }

    async fn receive_loop(self: Arc<Self>, socket: Arc<UdpSocket>, mut shutdown: Shutdown) {
        let mut datagram = vec![0u8; MAX_DATAGRAM_SIZE];
        let mut buffer = BytesMut::with_capacity(self.ctx.protocol().buffer_len());
        loop {
            // the session ended before this iteration, do not arm another read
            if !self.is_connected() {
                break;
            }
            tokio::select! {
                res = socket.recv(&mut datagram) => match res {
                    // a zero byte datagram is legal in udp, it does not
                    // mean the peer went away
                    Ok(n) => {
                        buffer.extend_from_slice(&datagram[..n]);
                        if let Err(e) = self.feed(&mut buffer) {
                            let reason = DisconnectReason::from(&e);
                            error!("client receive error: {}", e);
                            self.disconnect(reason);
                            break;
                        }
                    }
                    Err(e) => {
                        if self.is_connected() {
                            error!("client receive error: {}", e);
                        }
                        self.disconnect(DisconnectReason::ConnectionLost);
                        break;
                    }
                },
                _ = shutdown.recv() => {
                    break;
                }
            }
        }
        trace!("client receive loop exited");
    }

    fn feed(self: &Arc<Self>, buffer: &mut BytesMut) -> NetResult<()> {
        let messages = self.ctx.protocol().parse(buffer)?;
        for message in messages {
            let registry = self.ctx.registry().clone();
            let remote: RemoteRef = self.clone();
            let message_id = message.id();
            self.queue.enqueue(Box::new(move || {
                if !registry.try_dispatch(message, &remote) {
                    trace!("message id {} has no handler, dropped", message_id);
                }
            }));
        }
        Ok(())
    }
}

impl Sendable for UdpClient {
    fn send(&self, frame: Bytes) -> NetResult<()> {
        if self.conn_state.load() != ConnState::Connected {
            return Err(NetError::NotConnected);
        }
        if frame.len() > MAX_DATAGRAM_SIZE {
            return Err(NetError::DatagramTooLarge(frame.len()));
        }
        let outbound = self.outbound.lock();
        match outbound.as_ref() {
            Some(tx) => tx.try_send(frame).map_err(|_| NetError::NotConnected),
            None => Err(NetError::NotConnected),
        }
    }

    fn send_message(&self, message: &dyn Message) -> NetResult<()> {
        let frame = self.ctx.protocol().serialize(message)?;
        self.send(frame)
    }
}

impl Disconnectable for UdpClient {
    fn disconnect(&self, reason: DisconnectReason) {
        if !self
            .conn_state
            .transition(ConnState::Connected, ConnState::Disconnecting)
        {
            return;
        }
        debug!("client disconnecting from {}: {:?}", self.remote_addr, reason);
        self.ctx.events().on_disconnected(self, reason);

        // closing the outbound channel ends the send pump; the close signal
        // ends the receive task, which drops the socket
        self.outbound.lock().take();
        let _ = self.notify_close.send(());

        self.state.clear();
        self.conn_state.store(ConnState::Disconnected);
    }
}

impl Remote for UdpClient {
    fn remote_addr(&self) -> SocketAddr {
        self.remote_addr
    }

    /// Clients have no server-issued id.
    fn connection_id(&self) -> Option<ConnectionId> {
        None
    }

    fn is_connected(&self) -> bool {
        self.conn_state.load() == ConnState::Connected
    }

    fn state(&self) -> &StateSlot {
        &self.state
    }
}

/// The client flavor of the send pump. The peer is fixed on the socket by
/// `connect`, and `send_to` on a connected socket is rejected on bsd-derived
/// systems, so frames leave through plain `send`. A failed send only loses
/// that datagram, the socket stays usable.
async fn send_datagrams(outbound: async_channel::Receiver<Bytes>, socket: Arc<UdpSocket>) {
    while let Ok(frame) = outbound.recv().await {
        if let Err(e) = socket.send(&frame).await {
            warn!("datagram send failed: {}", e);
        }
    }
    trace!("udp client send pump exited");
}
