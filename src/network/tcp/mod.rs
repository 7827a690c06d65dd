//! Stream transport built on tokio tcp.
//!
//! # Components
//!
//! - [`TcpServer`]: listener, accept loop and the connection table.
//! - [`TcpConnection`]: one accepted peer with its receive and writer tasks.
//! - [`TcpClient`]: reusable connecting side with a private processing queue.

pub use client::TcpClient;
pub use connection::TcpConnection;
pub use server::TcpServer;

mod client;
mod connection;
mod server;
