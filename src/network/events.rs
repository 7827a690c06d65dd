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

use crate::network::remote::Remote;

/// Why an entity was torn down, reported through
/// [`NetworkEvents::on_disconnected`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    /// Requested locally through `disconnect`.
    Manual,
    /// The peer closed or the transport failed mid-session.
    ConnectionLost,
    /// The initial connect attempt never succeeded.
    ConnectionFailed,
    /// The peer stopped answering within the allowed time.
    ConnectionTimeout,
    /// An outbound message could not be encoded or transmitted.
    InvalidMessageSent,
    /// Received bytes violated the wire protocol.
    InvalidDataReceived,
    /// The transport-level authentication handshake failed.
    SslAuthenticationFailed,
    /// The peer exceeded the allowed message rate.
    Spam,
}

/// Lifecycle callbacks an application can observe.
///
/// Every method defaults to a no-op, implementors override the ones they
/// care about. Callbacks run inline on the engine's I/O tasks, so they must
/// return quickly and never block.
pub trait NetworkEvents: Send + Sync + 'static {
    /// A server began listening on `local_addr`.
    fn on_started(&self, local_addr: SocketAddr) {
        let _ = local_addr;
    }

    /// A client's connect attempt succeeded.
    fn on_connected(&self, remote: &dyn Remote) {
        let _ = remote;
    }

    /// A server accepted a connection, or first heard from a udp peer.
    fn on_connection_added(&self, remote: &dyn Remote) {
        let _ = remote;
    }

    /// An entity was torn down. Fired exactly once per session, before the
    /// transport resources are released.
    fn on_disconnected(&self, remote: &dyn Remote, reason: DisconnectReason) {
        let _ = (remote, reason);
    }
}

/// The silent observer.
impl NetworkEvents for () {}
