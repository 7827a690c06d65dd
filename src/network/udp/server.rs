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

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::net::UdpSocket;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use crate::network::events::DisconnectReason;
use crate::network::remote::{ConnectionId, Disconnectable};
use crate::network::udp::connection::{send_datagrams, UdpConnection};
use crate::network::udp::MAX_DATAGRAM_SIZE;
use crate::service::{EngineContext, NetworkConfig};
use crate::{NetError, NetResult, Shutdown};

/// Listening side of a udp engine.
///
/// One socket serves every peer. The receive loop routes each datagram to
/// the [`UdpConnection`] for its source endpoint, creating the connection
/// the first time an endpoint shows up. Outbound frames from every
/// connection funnel through one send pump so they leave in send order.
pub struct UdpServer {
    config: NetworkConfig,
    ctx: Arc<EngineContext>,
    connections: Arc<DashMap<SocketAddr, Arc<UdpConnection>>>,
    /// Ids are per server, starting at 1. 0 is never handed out.
    next_connection_id: AtomicU64,
    listening: AtomicBool,
    local_addr: Mutex<Option<SocketAddr>>,
    outbound: Mutex<Option<async_channel::Sender<(SocketAddr, Bytes)>>>,
    notify_close: broadcast::Sender<()>,
}

impl UdpServer {
    pub fn new(ctx: Arc<EngineContext>, config: NetworkConfig) -> Arc<Self> {
        let (notify_close, _) = broadcast::channel(1);
        Arc::new(UdpServer {
            config,
            ctx,
            connections: Arc::new(DashMap::new()),
            next_connection_id: AtomicU64::new(1),
            listening: AtomicBool::new(false),
            local_addr: Mutex::new(None),
            outbound: Mutex::new(None),
            notify_close,
        })
    }

    /// Binds the configured address and spawns the receive loop and the
    /// send pump.
    ///
    /// Starting an already started server is an error. Must run inside a
    /// tokio runtime.
    pub async fn start(self: &Arc<Self>) -> NetResult<()> {
        let addr = self.config.socket_addr()?;
        if self.listening.swap(true, Ordering::SeqCst) {
            return Err(NetError::IllegalStateError(
                "udp server is already started".to_string(),
            ));
        }
        let socket = match UdpSocket::bind(addr).await {
            Ok(socket) => Arc::new(socket),
            Err(e) => {
                self.listening.store(false, Ordering::SeqCst);
                return Err(NetError::from(e));
            }
        };
        let local_addr = socket.local_addr()?;
        *self.local_addr.lock() = Some(local_addr);
        info!("udp server listening on {}", local_addr);
        self.ctx.events().on_started(local_addr);

        let (outbound_tx, outbound_rx) = async_channel::unbounded();
        *self.outbound.lock() = Some(outbound_tx);
        tokio::spawn(send_datagrams(outbound_rx, socket.clone()));

        // subscribe before the receive task runs, a close right after start
        // must not be missed
        let shutdown = Shutdown::subscribe_to(&self.notify_close);
        let server = self.clone();
        tokio::spawn(async move { server.receive_loop(socket, shutdown).await });
        Ok(())
    }

    async fn receive_loop(self: Arc<Self>, socket: Arc<UdpSocket>, mut shutdown: Shutdown) {
        let mut datagram = vec![0u8; MAX_DATAGRAM_SIZE];
        loop {
            // closed before this iteration, stop reading
            if !self.is_listening() {
                break;
            }
            tokio::select! {
                res = socket.recv_from(&mut datagram) => match res {
                    Ok((n, peer)) => self.feed_datagram(&datagram[..n], peer),
                    Err(e) => {
                        // often an icmp echo of an earlier send, the socket
                        // itself is still fine
                        warn!("udp server receive error: {}", e);
                    }
                },
                _ = shutdown.recv() => {
                    debug!("udp server receive loop got close signal");
                    break;
                }
            }
        }
        // the socket is released once the send pump lets go of its arc
    }

    fn feed_datagram(self: &Arc<Self>, data: &[u8], peer: SocketAddr) {
        let conn = match self.connections.get(&peer) {
            Some(entry) => entry.clone(),
            None => match self.add_connection(peer) {
                Some(conn) => conn,
                // server is closing, the datagram missed the window
                None => return,
            },
        };
        if let Err(e) = conn.feed(data) {
            let reason = DisconnectReason::from(&e);
            error!("connection {} receive error: {}", conn.id(), e);
            conn.disconnect(reason);
        }
    }

    fn add_connection(self: &Arc<Self>, peer: SocketAddr) -> Option<Arc<UdpConnection>> {
        let outbound = self.outbound.lock().clone()?;
        let id = self.next_connection_id.fetch_add(1, Ordering::Relaxed);
        let binding = self.ctx.pool().bind();
        debug!(
            "connection {} from {} assigned to queue {}",
            id,
            peer,
            binding.queue_index()
        );
        Some(UdpConnection::register(
            id,
            peer,
            self.ctx.clone(),
            binding,
            self.config.message_count_limit_before_spam,
            outbound,
            &self.connections,
        ))
    }

    /// Stops the receive loop and the send pump and releases the socket.
    /// Existing connections stay in the table until each one disconnects,
    /// but their sends start failing once the pump is gone. Closing a
    /// server that is not listening is a no-op.
    pub fn close(&self, reason: DisconnectReason) {
        if !self.listening.swap(false, Ordering::SeqCst) {
            return;
        }
        info!("udp server closing: {:?}", reason);
        *self.local_addr.lock() = None;
        // every live connection still holds a sender clone, so the channel
        // must be closed outright for the pump to exit and let go of the
        // socket
        if let Some(outbound) = self.outbound.lock().take() {
            outbound.close();
        }
        let _ = self.notify_close.send(());
    }

    pub fn is_listening(&self) -> bool {
        self.listening.load(Ordering::SeqCst)
    }

    /// The bound address, useful when the configured port was 0.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.lock()
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    pub fn get_connection(&self, peer: SocketAddr) -> Option<Arc<UdpConnection>> {
        self.connections.get(&peer).map(|entry| entry.clone())
    }

    pub fn connection_ids(&self) -> Vec<ConnectionId> {
        self.connections.iter().map(|entry| entry.id()).collect()
    }

    pub fn connection_addrs(&self) -> Vec<SocketAddr> {
        self.connections.iter().map(|entry| *entry.key()).collect()
    }
}

impl Drop for UdpServer {
    fn drop(&mut self) {
        debug!("udp server dropped");
    }
}
