extern crate config as _;

use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::protocol::{DEFAULT_BUFFER_LEN, DEFAULT_MAX_FRAME_SIZE};
use crate::queue::{QueuePoolConfig, DEFAULT_POLL_INTERVAL};
use crate::{NetError, NetResult};

/// Transport settings shared by servers and clients.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct NetworkConfig {
    pub ip: String,
    /// 0 lets the os pick a free port, read it back from `local_addr`.
    pub port: u16,
    pub backlog: u32,
    pub buffer_len: usize,
    pub max_frame_size: usize,
    /// Messages per window before a peer is cut off. 0 disables the
    /// flood monitor.
    pub message_count_limit_before_spam: u32,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        NetworkConfig {
            ip: "0.0.0.0".to_string(),
            port: 0,
            backlog: 1024,
            buffer_len: DEFAULT_BUFFER_LEN,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            message_count_limit_before_spam: 0,
        }
    }
}

impl NetworkConfig {
    pub fn socket_addr(&self) -> NetResult<SocketAddr> {
        format!("{}:{}", self.ip, self.port)
            .parse()
            .map_err(|_| NetError::InvalidValue(format!("socket address: {}:{}", self.ip, self.port)))
    }
}

/// Queue pool settings in file friendly units, converted to a
/// [`QueuePoolConfig`] when the pool is built.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct QueuePoolSettings {
    /// 0 means one queue per logical cpu.
    pub num_queues: usize,
    pub poll_interval_ms: u64,
    pub monitor_interval_ms: u64,
    pub worker_check_timeout_ms: u64,
}

impl Default for QueuePoolSettings {
    fn default() -> Self {
        QueuePoolSettings {
            num_queues: 0,
            poll_interval_ms: DEFAULT_POLL_INTERVAL.as_millis() as u64,
            monitor_interval_ms: 5_000,
            worker_check_timeout_ms: 200,
        }
    }
}

impl From<&QueuePoolSettings> for QueuePoolConfig {
    fn from(settings: &QueuePoolSettings) -> Self {
        QueuePoolConfig {
            num_queues: settings.num_queues,
            poll_interval: Duration::from_millis(settings.poll_interval_ms),
            monitor_interval: Duration::from_millis(settings.monitor_interval_ms),
            worker_check_timeout: Duration::from_millis(settings.worker_check_timeout_ms),
        }
    }
}

#[derive(Debug, Default, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct EngineConfig {
    pub network: NetworkConfig,
    pub queue_pool: QueuePoolSettings,
}

impl EngineConfig {
    /// Loads settings from a toml file. Missing keys keep their defaults,
    /// so a partial file is fine.
    pub fn from_file<P: AsRef<Path>>(path: P) -> NetResult<EngineConfig> {
        let path_str = path
            .as_ref()
            .to_str()
            .ok_or(NetError::InvalidValue(format!(
                "config file path: {}",
                path.as_ref().to_string_lossy()
            )))?;
        let config = config::Config::builder()
            .add_source(config::File::with_name(path_str))
            .build()?;

        let engine_config: EngineConfig = config.try_deserialize()?;

        Ok(engine_config)
    }
}
