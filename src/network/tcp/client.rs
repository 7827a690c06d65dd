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
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use parking_lot::Mutex;
use tokio::io::AsyncReadExt;
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::TcpStream;
use tokio::sync::broadcast;
use tracing::{debug, error, info, trace, warn};

use crate::network::events::DisconnectReason;
use crate::network::remote::{
    ConnState, ConnStateCell, ConnectionId, Disconnectable, Remote, RemoteRef, Sendable, StateSlot,
};
use crate::network::tcp::connection::write_frames;
use crate::protocol::Message;
use crate::queue::ProcessingQueue;
use crate::service::EngineContext;
use crate::{NetError, NetResult, Shutdown};

/// Connecting side of a tcp engine.
///
/// A client is reusable: after a disconnect the same instance can connect
/// again. Its handlers run on a private processing queue so client traffic
/// never shares a lane with server connections.
pub struct TcpClient {
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

impl fmt::Debug for TcpClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TcpClient")
            .field("remote_addr", &self.remote_addr)
            .field("conn_state", &self.conn_state.load())
            .finish()
    }
}

impl TcpClient {
    /// Creates a client for `remote_addr`. The client starts disconnected,
    /// [`connect`](TcpClient::connect) opens a session. Must run inside a
    /// tokio runtime.
    pub fn new(ctx: Arc<EngineContext>, remote_addr: SocketAddr) -> Arc<Self> {
        let (queue, queue_shutdown) = ProcessingQueue::standalone();
        let (notify_close, _) = broadcast::channel(1);
        Arc::new(TcpClient {
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

    /// Opens a session to the configured address.
    ///
    /// A failed attempt reports `ConnectionFailed` through the observer
    /// exactly once and leaves the client disconnected, ready to retry.
    /// Connecting while a session is open or being opened is an error.
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
        match TcpStream::connect(self.remote_addr).await {
            Ok(socket) => {
                let (read_half, write_half) = socket.into_split();
                let (outbound_tx, outbound_rx) = async_channel::unbounded();
                *self.outbound.lock() = Some(outbound_tx);
                self.conn_state.store(ConnState::Connected);
                tokio::spawn(write_frames(
                    outbound_rx,
                    write_half,
                    self.clone() as RemoteRef,
                ));
                // subscribe before the receive task runs, a disconnect from
                // inside on_connected must not be missed
                let shutdown = Shutdown::subscribe_to(&self.notify_close);
                tokio::spawn(self.clone().receive_loop(read_half, shutdown));
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

    async fn receive_loop(self: Arc<Self>, mut reader: OwnedReadHalf, mut shutdown: Shutdown) {
        let mut buffer = BytesMut::with_capacity(self.ctx.protocol().buffer_len());
        loop {
            // the session ended before this iteration, do not arm another read
            if !self.is_connected() {
                break;
            }
            tokio::select! {
                res = reader.read_buf(&mut buffer) => match res {
                    Ok(0) => {
                        self.disconnect(DisconnectReason::ConnectionLost);
                        break;
                    }
                    Ok(_) => {
                        if let Err(e) = self.feed(&mut buffer) {
                            let reason = DisconnectReason::from(&e);
                            error!("client receive error: {}", e);
                            self.disconnect(reason);
                            break;
                        }
                    }
                    Err(e) => {
                        if self.is_connected() {
                            error!("client read error: {}", e);
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

impl Sendable for TcpClient {
    fn send(&self, frame: Bytes) -> NetResult<()> {
        if self.conn_state.load() != ConnState::Connected {
            return Err(NetError::NotConnected);
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

impl Disconnectable for TcpClient {
    fn disconnect(&self, reason: DisconnectReason) {
        if !self
            .conn_state
            .transition(ConnState::Connected, ConnState::Disconnecting)
        {
            return;
        }
        debug!("client disconnecting from {}: {:?}", self.remote_addr, reason);
        self.ctx.events().on_disconnected(self, reason);

        // closing the outbound channel ends the writer task; the close
        // signal ends the receive task
        self.outbound.lock().take();
        let _ = self.notify_close.send(());

        self.state.clear();
        self.conn_state.store(ConnState::Disconnected);
    }
}

impl Remote for TcpClient {
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
