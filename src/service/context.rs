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
use std::sync::Arc;

use tracing::info;

use crate::network::NetworkEvents;
use crate::protocol::{
    FramedProtocol, MessageRegistry, Protocol, DEFAULT_BUFFER_LEN, DEFAULT_MAX_FRAME_SIZE,
};
use crate::queue::{ProcessingPool, QueuePoolConfig};
use crate::service::EngineConfig;
use crate::{NetError, NetResult};

/// Everything entities of one engine share: the protocol, the message
/// registry, the lifecycle observer and the processing queue pool.
///
/// Each context is independent. Two contexts in one process see none of
/// each other's queues or registrations, which is what lets tests run
/// engines side by side.
pub struct EngineContext {
    protocol: Arc<dyn Protocol>,
    registry: Arc<MessageRegistry>,
    events: Arc<dyn NetworkEvents>,
    pool: Arc<ProcessingPool>,
}

impl fmt::Debug for EngineContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineContext")
            .field("registry", &self.registry)
            .field("queues", &self.pool.queue_count())
            .finish()
    }
}

impl EngineContext {
    pub fn builder() -> EngineContextBuilder {
        EngineContextBuilder::new()
    }

    /// A context with the built-in framing, silent events and a default
    /// pool. Must run inside a tokio runtime.
    pub fn new(registry: MessageRegistry) -> NetResult<Arc<EngineContext>> {
        Self::builder().registry(registry).build()
    }

    /// Builds a context from file settings, wiring the configured frame
    /// limits into the built-in protocol. Must run inside a tokio runtime.
    pub fn from_config(
        config: &EngineConfig,
        registry: MessageRegistry,
    ) -> NetResult<Arc<EngineContext>> {
        Self::builder()
            .registry(registry)
            .frame_limits(config.network.max_frame_size, config.network.buffer_len)
            .queue_pool(QueuePoolConfig::from(&config.queue_pool))
            .build()
    }

    pub fn protocol(&self) -> &Arc<dyn Protocol> {
        &self.protocol
    }

    pub fn registry(&self) -> &Arc<MessageRegistry> {
        &self.registry
    }

    pub fn events(&self) -> &Arc<dyn NetworkEvents> {
        &self.events
    }

    pub fn pool(&self) -> &Arc<ProcessingPool> {
        &self.pool
    }

    /// Stops the queue workers. Meant for process teardown, entities built
    /// from this context stop having their handlers run afterwards.
    pub fn shutdown(&self) {
        info!("engine context shutting down");
        self.pool.shutdown();
    }
}

/// Assembles an [`EngineContext`].
///
/// A registry is required. Everything else has a default: the built-in
/// [`FramedProtocol`], the silent `()` observer and a cpu-sized pool.
pub struct EngineContextBuilder {
    registry: Option<Arc<MessageRegistry>>,
    protocol: Option<Arc<dyn Protocol>>,
    events: Arc<dyn NetworkEvents>,
    pool_config: QueuePoolConfig,
    max_frame_size: usize,
    buffer_len: usize,
}

impl EngineContextBuilder {
    pub fn new() -> Self {
        EngineContextBuilder {
            registry: None,
            protocol: None,
            events: Arc::new(()),
            pool_config: QueuePoolConfig::default(),
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            buffer_len: DEFAULT_BUFFER_LEN,
        }
    }

    pub fn registry(mut self, registry: MessageRegistry) -> Self {
        self.registry = Some(Arc::new(registry));
        self
    }

    /// For callers that already hold the registry behind an arc, usually
    /// because a custom protocol shares it.
    pub fn shared_registry(mut self, registry: Arc<MessageRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Replaces the built-in framing. `frame_limits` has no effect on a
    /// custom protocol.
    pub fn protocol<P: Protocol>(mut self, protocol: P) -> Self {
        self.protocol = Some(Arc::new(protocol));
        self
    }

    pub fn events<E: NetworkEvents>(mut self, events: E) -> Self {
        self.events = Arc::new(events);
        self
    }

    pub fn queue_pool(mut self, config: QueuePoolConfig) -> Self {
        self.pool_config = config;
        self
    }

    pub fn frame_limits(mut self, max_frame_size: usize, buffer_len: usize) -> Self {
        self.max_frame_size = max_frame_size;
        self.buffer_len = buffer_len;
        self
    }

    /// Spawns the pool workers and freezes the context. Must run inside a
    /// tokio runtime.
    pub fn build(self) -> NetResult<Arc<EngineContext>> {
        let registry = self.registry.ok_or(NetError::IllegalStateError(
            "engine context needs a message registry".to_string(),
        ))?;
        let protocol = match self.protocol {
            Some(protocol) => protocol,
            None => Arc::new(FramedProtocol::with_limits(
                registry.clone(),
                self.max_frame_size,
                self.buffer_len,
            )),
        };
        let pool = ProcessingPool::new(self.pool_config);
        Ok(Arc::new(EngineContext {
            protocol,
            registry,
            events: self.events,
            pool,
        }))
    }
}

impl Default for EngineContextBuilder {
    fn default() -> Self {
        Self::new()
    }
}
