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

use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::net::{TcpListener, TcpSocket, TcpStream};
use tokio::sync::broadcast;
use tokio::time::{self, Duration};
use tracing::{debug, error, info, warn};

use crate::network::events::DisconnectReason;
use crate::network::remote::ConnectionId;
use crate::network::tcp::connection::TcpConnection;
use crate::service::{EngineContext, NetworkConfig};
use crate::{NetError, NetResult, Shutdown};

/// Listening side of a tcp engine.
///
/// Accepts sockets, hands each one a connection id and a processing queue
/// seat, and tracks the resulting [`TcpConnection`]s until they disconnect
/// themselves or [`close`](TcpServer::close) stops the listener.
pub struct TcpServer {
    config: NetworkConfig,
    ctx: Arc<EngineContext>,
    connections: Arc<DashMap<ConnectionId, Arc<TcpConnection>>>,
    /// Ids are per server, starting at 1. 0 is never handed out.
    next_connection_id: AtomicU64,
    listening: AtomicBool,
    local_addr: Mutex<Option<SocketAddr>>,
    notify_close: broadcast::Sender<()>,
}

impl TcpServer {
    pub fn new(ctx: Arc<EngineContext>, config: NetworkConfig) -> Arc<Self> {
        let (notify_close, _) = broadcast::channel(1);
        Arc::new(TcpServer {
            config,
            ctx,
            connections: Arc::new(DashMap::new()),
            next_connection_id: AtomicU64::new(1),
            listening: AtomicBool::new(false),
            local_addr: Mutex::new(None),
            notify_close,
        })
    }

    /// Binds the configured address and spawns the accept loop.
    ///
    /// Starting an already started server is an error. Must run inside a
    /// tokio runtime.
    pub async fn start(self: &Arc<Self>) -> NetResult<()> {
        let addr = self.config.socket_addr()?;
        if self.listening.swap(true, Ordering::SeqCst) {
            return Err(NetError::IllegalStateError(
                "tcp server is already started".to_string(),
            ));
        }
        let listener = match Self::bind(addr, self.config.backlog) {
            Ok(listener) => listener,
            Err(e) => {
                self.listening.store(false, Ordering::SeqCst);
                return Err(e);
            }
        };
        let local_addr = listener.local_addr()?;
        *self.local_addr.lock() = Some(local_addr);
        info!("tcp server listening on {}", local_addr);
        self.ctx.events().on_started(local_addr);

        // subscribe before the accept task runs, a close right after start
        // must not be missed
        let shutdown = Shutdown::subscribe_to(&self.notify_close);
        let server = self.clone();
        tokio::spawn(async move { server.accept_loop(listener, shutdown).await });
        Ok(())
    }

    fn bind(addr: SocketAddr, backlog: u32) -> NetResult<TcpListener> {
        let socket = if addr.is_ipv4() {
            TcpSocket::new_v4()?
        } else {
            TcpSocket::new_v6()?
        };
        socket.bind(addr)?;
        Ok(socket.listen(backlog)?)
    }

    async fn accept_loop(self: Arc<Self>, listener: TcpListener, mut shutdown: Shutdown) {
        loop {
            // closed before this iteration, stop accepting
            if !self.is_listening() {
                break;
            }
            tokio::select! {
                res = Self::accept(&listener) => match res {
                    Ok(socket) => self.add_connection(socket),
                    Err(e) => {
                        error!("tcp server stopped accepting: {}", e);
                        break;
                    }
                },
                _ = shutdown.recv() => {
                    debug!("tcp server accept loop got close signal");
                    break;
                }
            }
        }
        // dropping the listener here releases the port
    }

    /// Accepts the next socket, retrying transient errors with exponential
    /// backoff. Gives up once the backoff passes 64 seconds.
    async fn accept(listener: &TcpListener) -> NetResult<TcpStream> {
        let mut backoff = 1;
        loop {
            match listener.accept().await {
                Ok((socket, _)) => return Ok(socket),
                Err(err) => {
                    if backoff > 64 {
                        return Err(NetError::ConnectionFailed(format!(
                            "accept tcp connection error: {}",
                            err
                        )));
                    }
                }
            }
            time::sleep(Duration::from_secs(backoff)).await;
            backoff *= 2;
        }
    }

    fn add_connection(self: &Arc<Self>, socket: TcpStream) {
        let remote_addr = match socket.peer_addr() {
            Ok(addr) => addr,
            Err(e) => {
                warn!("accepted socket lost before setup: {}", e);
                return;
            }
        };
        let id = self.next_connection_id.fetch_add(1, Ordering::Relaxed);
        let binding = self.ctx.pool().bind();
        debug!(
            "connection {} from {} assigned to queue {}",
            id,
            remote_addr,
            binding.queue_index()
        );
        TcpConnection::spawn(
            id,
            socket,
            remote_addr,
            self.ctx.clone(),
            binding,
            self.config.message_count_limit_before_spam,
            &self.connections,
        );
    }

    /// Stops the listener. Connections accepted so far keep running until
    /// each one disconnects. Closing a server that is not listening is a
    /// no-op.
    pub fn close(&self, reason: DisconnectReason) {
        if !self.listening.swap(false, Ordering::SeqCst) {
            return;
        }
        info!("tcp server closing: {:?}", reason);
        *self.local_addr.lock() = None;
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

    pub fn get_connection(&self, id: ConnectionId) -> Option<Arc<TcpConnection>> {
        self.connections.get(&id).map(|entry| entry.clone())
    }

    pub fn connection_ids(&self) -> Vec<ConnectionId> {
        self.connections.iter().map(|entry| *entry.key()).collect()
    }
}

impl Drop for TcpServer {
    fn drop(&mut self) {
        debug!("tcp server dropped");
    }
}
