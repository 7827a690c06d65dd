//! Network Module Implementation
//!
//! This module provides the transport entities of the engine: servers that
//! accept or emulate connections, the per peer connection types, and the
//! reusable clients, for both tcp and udp.
//!
//! # Architecture
//!
//! The module is built on tokio's async I/O primitives and consists of:
//! - Receive loops that keep exactly one outstanding read per socket
//! - Writer tasks and send pumps that keep outbound frames in send order
//! - Connection tables that track live peers per server
//!
//! # Components
//!
//! - `tcp`: `TcpServer`, `TcpConnection`, `TcpClient`
//! - `udp`: `UdpServer`, `UdpConnection`, `UdpClient`
//! - `Remote` and friends: the capability traits handlers talk to
//! - `NetworkEvents`: lifecycle callbacks surfaced to the application
//! - `FloodMonitor`: per connection message rate limiting
//!
//! # Features
//!
//! - Graceful peer close detection on tcp
//! - Lazy connection creation per udp endpoint
//! - Idempotent disconnect with a single observer notification
//! - Per connection dispatch ordering via queue bindings

pub use events::{DisconnectReason, NetworkEvents};
pub use monitor::{FloodMonitor, FLOOD_WINDOW};
pub use remote::{
    ConnState, ConnStateCell, ConnectionId, Disconnectable, Remote, RemoteRef, Sendable, StateSlot,
};

pub mod tcp;
pub mod udp;

mod events;
mod monitor;
mod remote;
