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
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufWriter};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::broadcast;
use tracing::{debug, error, trace, warn};

use crate::network::events::DisconnectReason;
use crate::network::monitor::FloodMonitor;
use crate::network::remote::{
    ConnState, ConnStateCell, ConnectionId, Disconnectable, Remote, RemoteRef, Sendable, StateSlot,
};
use crate::protocol::Message;
use crate::queue::QueueBinding;
use crate::service::EngineContext;
use crate::{NetError, NetResult, Shutdown};

/// One accepted tcp peer.
///
/// The connection owns no socket directly. The read half lives in the
/// receive task, the write half in the writer task, and both tasks end when
/// the connection is torn down, releasing the socket through drop.
pub struct TcpConnection {
    id: ConnectionId,
    remote_addr: SocketAddr,
    ctx: Arc<EngineContext>,
    /// Seat on the processing queue, surrendered on disconnect.
    binding: Mutex<Option<QueueBinding>>,
    monitor: FloodMonitor,
    state: StateSlot,
    conn_state: ConnStateCell,
    disposed: AtomicBool,
    outbound: Mutex<Option<async_channel::Sender<Bytes>>>,
    notify_close: broadcast::Sender<()>,
    /// Back-reference for self-removal; weak so a dropped server does not
    /// keep connections alive, or the other way around.
    server_table: Weak<DashMap<ConnectionId, Arc<TcpConnection>>>,
}

impl fmt::Debug for TcpConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TcpConnection")
            .field("id", &self.id)
            .field("remote_addr", &self.remote_addr)
            .field("conn_state", &self.conn_state.load())
            .finish()
    }
}

impl TcpConnection {
    /// Wires up an accepted socket: registers the connection in `table`,
    /// starts its writer and receive tasks, and announces it through
    /// `on_connection_added`.
    pub(crate) fn spawn(
        id: ConnectionId,
        socket: TcpStream,
        remote_addr: SocketAddr,
        ctx: Arc<EngineContext>,
        binding: QueueBinding,
        spam_limit: u32,
        table: &Arc<DashMap<ConnectionId, Arc<TcpConnection>>>,
    ) -> Arc<TcpConnection> {
        let (outbound_tx, outbound_rx) = async_channel::unbounded();
        let (notify_close, _) = broadcast::channel(1);
        let conn = Arc::new(TcpConnection {
            id,
            remote_addr,
            ctx,
            binding: Mutex::new(Some(binding)),
            monitor: FloodMonitor::new(spam_limit),
            state: StateSlot::new(),
            conn_state: ConnStateCell::new(ConnState::Connected),
            disposed: AtomicBool::new(false),
            outbound: Mutex::new(Some(outbound_tx)),
            notify_close,
            server_table: Arc::downgrade(table),
        });
        table.insert(id, conn.clone());

        let (read_half, write_half) = socket.into_split();
        tokio::spawn(write_frames(
            outbound_rx,
            write_half,
            conn.clone() as RemoteRef,
        ));
        // subscribe before the receive task runs, a disconnect from the
        // callback below must not be missed
        let shutdown = Shutdown::subscribe_to(&conn.notify_close);
        tokio::spawn(conn.clone().receive_loop(read_half, shutdown));

        conn.ctx.events().on_connection_added(conn.as_ref());
        conn
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    async fn receive_loop(self: Arc<Self>, mut reader: OwnedReadHalf, mut shutdown: Shutdown) {
        let mut buffer = BytesMut::with_capacity(self.ctx.protocol().buffer_len());
        loop {
            // torn down before this iteration, do not arm another read
            if self.is_disposed() {
                break;
            }
            tokio::select! {
                res = reader.read_buf(&mut buffer) => match res {
                    Ok(0) => {
                        if !buffer.is_empty() {
                            // peer left mid frame
                            warn!("connection {} reset by peer", self.id);
                        }
                        self.disconnect(DisconnectReason::ConnectionLost);
                        break;
                    }
                    Ok(_) => {
                        if let Err(e) = self.feed(&mut buffer) {
                            let reason = DisconnectReason::from(&e);
                            error!("connection {} receive error: {}", self.id, e);
                            self.disconnect(reason);
                            break;
                        }
                    }
                    Err(e) => {
                        if !self.is_disposed() {
                            error!("connection {} read error: {}", self.id, e);
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
        trace!("connection {} receive loop exited", self.id);
    }

    /// Decodes everything readable in `buffer` and queues one dispatch task
    /// per message, counting each against the flood monitor.
    fn feed(self: &Arc<Self>, buffer: &mut BytesMut) -> NetResult<()> {
        let messages = self.ctx.protocol().parse(buffer)?;
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

impl Sendable for TcpConnection {
    fn send(&self, frame: Bytes) -> NetResult<()> {
        if self.is_disposed() {
            return Err(NetError::Disposed);
        }
        let outbound = self.outbound.lock();
        match outbound.as_ref() {
            Some(tx) => tx.try_send(frame).map_err(|_| NetError::Disposed),
            None => Err(NetError::Disposed),
        }
    }

    fn send_message(&self, message: &dyn Message) -> NetResult<()> {
        let frame = self.ctx.protocol().serialize(message)?;
        self.send(frame)
    }
}

impl Disconnectable for TcpConnection {
    fn disconnect(&self, reason: DisconnectReason) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.conn_state.store(ConnState::Disconnecting);
        debug!("connection {} disconnecting: {:?}", self.id, reason);

        // give up the queue seat and the table entry first, so counts are
        // right by the time the observer hears about it
        self.binding.lock().take();
        if let Some(table) = self.server_table.upgrade() {
            table.remove(&self.id);
        }

        self.ctx.events().on_disconnected(self, reason);

        // closing the outbound channel ends the writer task; the close
        // signal ends the receive task
        self.outbound.lock().take();
        let _ = self.notify_close.send(());

        self.state.clear();
        self.conn_state.store(ConnState::Disconnected);
    }
}

impl Remote for TcpConnection {
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

/// Owns the write half of a stream: writes and flushes every queued frame,
/// in order, until the channel closes or a write fails.
pub(super) async fn write_frames(
    outbound: async_channel::Receiver<Bytes>,
    write_half: OwnedWriteHalf,
    remote: RemoteRef,
) {
    let mut writer = BufWriter::new(write_half);
    while let Ok(frame) = outbound.recv().await {
        let result = async {
            writer.write_all(&frame).await?;
            writer.flush().await
        }
        .await;
        if let Err(e) = result {
            warn!("write to {} failed: {}", remote.remote_addr(), e);
            remote.disconnect(DisconnectReason::ConnectionLost);
            return;
        }
    }
    // channel closed by disconnect, let the peer see a clean fin
    let _ = writer.shutdown().await;
}
