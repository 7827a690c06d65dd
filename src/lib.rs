//! A message oriented tcp/udp engine.
//!
//! Applications define [`WireMessage`](protocol::WireMessage) types, attach
//! handlers in a [`MessageRegistry`](protocol::MessageRegistry), wrap both
//! in an [`EngineContext`], and hand the context to the servers and clients
//! in [`network`]. The engine owns framing, dispatch ordering and
//! connection lifecycle from there.

pub mod codec;
pub mod network;
pub mod protocol;
pub mod queue;
pub mod service;

pub use service::{
    setup_file_tracing, setup_local_tracing, EngineConfig, EngineContext, EngineContextBuilder,
    NetError, NetResult, NetworkConfig, Shutdown,
};
