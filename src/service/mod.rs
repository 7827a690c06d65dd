pub use app_error::{NetError, NetResult};
pub use config::{EngineConfig, NetworkConfig, QueuePoolSettings};
pub use context::{EngineContext, EngineContextBuilder};
pub use shutdown::Shutdown;
pub use tracing_config::{setup_file_tracing, setup_local_tracing};

mod app_error;
mod config;
mod context;
mod shutdown;
mod tracing_config;
