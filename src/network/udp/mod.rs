//! Datagram transport built on tokio udp.
//!
//! # Components
//!
//! - [`UdpServer`]: one socket, one receive loop, an endpoint keyed
//!   connection table filled lazily as peers show up.
//! - [`UdpConnection`]: the per peer table entry with its parse buffer.
//! - [`UdpClient`]: reusable connecting side on an ephemeral port.

pub use client::UdpClient;
pub use connection::UdpConnection;
pub use server::UdpServer;

mod client;
mod connection;
mod server;

/// Largest frame a single datagram may carry. Sends above this fail with
/// `DatagramTooLarge` instead of leaving the os to truncate or reject.
pub const MAX_DATAGRAM_SIZE: usize = 65_535;
