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

use std::any::type_name;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time;
use tracing::{debug, error, trace, warn};

use crate::queue::processing_queue::{ProcessingQueue, QueueTask, DEFAULT_POLL_INTERVAL};
use crate::Shutdown;

/// Pool sizing and supervision parameters.
#[derive(Debug, Clone)]
pub struct QueuePoolConfig {
    /// Number of queues, each with its own worker. Zero means one per
    /// logical cpu.
    pub num_queues: usize,
    /// How long an idle worker sleeps between polls.
    pub poll_interval: Duration,
    /// How often the monitor checks on workers.
    pub monitor_interval: Duration,
    /// How long the monitor waits for a worker handle before deciding the
    /// worker is still alive.
    pub worker_check_timeout: Duration,
}

impl Default for QueuePoolConfig {
    fn default() -> Self {
        Self {
            num_queues: 0,
            poll_interval: DEFAULT_POLL_INTERVAL,
            monitor_interval: Duration::from_secs(5),
            worker_check_timeout: Duration::from_millis(200),
        }
    }
}

/// represent a running worker
#[derive(Debug)]
struct Worker {
    index: usize,
    handle: JoinHandle<()>,
}

/// A fixed set of processing queues shared by every connection of an engine.
///
/// Connections are assigned to queues round-robin at accept time and stay
/// on their queue for life, which keeps each connection's messages on one
/// worker and therefore in order. A monitor restarts any worker that dies,
/// so a panicking handler cannot silently stall a queue forever.
#[derive(Debug)]
pub struct ProcessingPool {
    queues: Vec<Arc<ProcessingQueue>>,
    /// Round-robin cursor over `queues`.
    next: AtomicUsize,
    notify_shutdown: broadcast::Sender<()>,
    config: QueuePoolConfig,
}

impl ProcessingPool {
    /// Creates the queues, their workers and the worker monitor. Must run
    /// inside a tokio runtime.
    pub fn new(config: QueuePoolConfig) -> Arc<Self> {
        let num_queues = if config.num_queues == 0 {
            num_cpus::get()
        } else {
            config.num_queues
        };
        let (notify_shutdown, _) = broadcast::channel(1);

        let mut queues = Vec::with_capacity(num_queues);
        let mut workers = Vec::with_capacity(num_queues);
        for index in 0..num_queues {
            let queue = ProcessingQueue::new(index);
            let handle = queue.spawn_worker(config.poll_interval, &notify_shutdown);
            workers.push(Worker { index, handle });
            queues.push(queue);
        }
        debug!("processing pool started with {} queues", num_queues);

        Self::spawn_monitor(
            queues.clone(),
            workers,
            notify_shutdown.clone(),
            config.clone(),
        );

        Arc::new(ProcessingPool {
            queues,
            next: AtomicUsize::new(0),
            notify_shutdown,
            config,
        })
    }

    /// Assigns the next queue round-robin and counts the connection on it.
    ///
    /// The binding pins the connection to that queue for its whole life;
    /// dropping the binding releases the slot.
    pub fn bind(&self) -> QueueBinding {
        let index = self.next.fetch_add(1, Ordering::Relaxed) % self.queues.len();
        let queue = self.queues[index].clone();
        queue.attach_connection();
        trace!("connection bound to queue {}", index);
        QueueBinding { queue }
    }

    pub fn queue_count(&self) -> usize {
        self.queues.len()
    }

    /// Live connections per queue, indexed by queue. Diagnostic only; the
    /// numbers can change while being read.
    pub fn connection_counts(&self) -> Vec<usize> {
        self.queues.iter().map(|q| q.connection_count()).collect()
    }

    pub fn get_pool_config(&self) -> &QueuePoolConfig {
        &self.config
    }

    /// Stops every worker and the monitor. Queued tasks still waiting are
    /// dropped with the queues.
    pub fn shutdown(&self) {
        let _ = self.notify_shutdown.send(());
    }

    fn spawn_monitor(
        queues: Vec<Arc<ProcessingQueue>>,
        mut workers: Vec<Worker>,
        notify_shutdown: broadcast::Sender<()>,
        config: QueuePoolConfig,
    ) {
        tokio::spawn(async move {
            let mut interval = time::interval(config.monitor_interval);
            let mut shutdown = Shutdown::new(notify_shutdown.subscribe());

            loop {
                tokio::select! {
                    _ = shutdown.recv() => {
                        debug!("queue worker monitor received shutdown signal");
                        break;
                    }
                    _ = interval.tick() => {
                        let mut stopping = false;
                        for worker in &mut workers {
                            match time::timeout(config.worker_check_timeout, &mut worker.handle).await {
                                Ok(Ok(_)) => {
                                    // workers only return cleanly on shutdown
                                    debug!("queue worker {} stopped", worker.index);
                                    stopping = true;
                                    break;
                                }
                                Ok(Err(err)) => {
                                    if err.is_panic() {
                                        Self::log_worker_panic(worker.index, err);
                                    } else {
                                        error!("queue worker {} failed with non-panic error", worker.index);
                                    }

                                    warn!("queue worker {} failed, restarting...", worker.index);
                                    let handle = queues[worker.index]
                                        .spawn_worker(config.poll_interval, &notify_shutdown);
                                    *worker = Worker { index: worker.index, handle };
                                    debug!("queue worker {} restarted", worker.index);
                                }
                                Err(_) => {
                                    trace!("queue worker {} is running", worker.index);
                                }
                            }
                        }
                        if stopping {
                            break;
                        }
                    }
                }
            }
            debug!("queue worker monitor exiting");
        });
    }

    fn log_worker_panic(worker_index: usize, err: tokio::task::JoinError) {
        let payload = err.into_panic();
        if let Some(message) = payload.downcast_ref::<&'static str>() {
            error!("queue worker {worker_index} panicked with message: {message}");
        } else if let Some(message) = payload.downcast_ref::<String>() {
            error!("queue worker {worker_index} panicked with message: {message}");
        } else {
            error!(
                "queue worker {worker_index} panicked with an unknown type: {}",
                get_type_name(&payload)
            );
        }
    }
}

/// A connection's seat on its processing queue.
///
/// Created by [`ProcessingPool::bind`], held by the connection, and dropped
/// on disconnect, which is what keeps the per-queue connection counts
/// accurate without an explicit release call.
#[derive(Debug)]
pub struct QueueBinding {
    queue: Arc<ProcessingQueue>,
}

impl QueueBinding {
    /// Queues a task behind everything already queued for this connection's
    /// queue.
    pub fn enqueue(&self, task: QueueTask) {
        self.queue.enqueue(task);
    }

    pub fn queue_index(&self) -> usize {
        self.queue.index()
    }
}

impl Drop for QueueBinding {
    fn drop(&mut self) {
        self.queue.detach_connection();
    }
}

#[inline]
fn get_type_name<R>(_: &R) -> &'static str {
    type_name::<R>()
}
