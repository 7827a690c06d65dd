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

use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time;
use tracing::debug;

use crate::Shutdown;

/// A deferred unit of work, usually one message dispatch.
pub type QueueTask = Box<dyn FnOnce() + Send + 'static>;

/// How long an idle worker sleeps before polling its queue again.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(2);

/// An unbounded FIFO of tasks drained by one dedicated worker.
///
/// Enqueueing never blocks and never signals the worker; the worker polls,
/// runs what it finds in order, and sleeps briefly when the queue is empty.
/// Tasks leave the queue one at a time, so a panicking task takes only
/// itself, everything still queued survives for the restarted worker. One
/// worker per queue is what makes the per-connection ordering guarantee
/// hold, so workers are never shared or added.
pub struct ProcessingQueue {
    index: usize,
    pending: Mutex<VecDeque<QueueTask>>,
    /// Connections currently assigned to this queue.
    connections: AtomicUsize,
}

impl fmt::Debug for ProcessingQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessingQueue")
            .field("index", &self.index)
            .field("pending", &self.pending_len())
            .field("connections", &self.connection_count())
            .finish()
    }
}

impl ProcessingQueue {
    pub(crate) fn new(index: usize) -> Arc<Self> {
        Arc::new(ProcessingQueue {
            index,
            pending: Mutex::new(VecDeque::new()),
            connections: AtomicUsize::new(0),
        })
    }

    /// A queue with its own worker, outside any pool. Clients use one of
    /// these so their traffic never mixes with server queues. The worker
    /// stops when the returned sender signals or is dropped.
    pub(crate) fn standalone() -> (Arc<Self>, broadcast::Sender<()>) {
        let (notify_shutdown, _) = broadcast::channel(1);
        let queue = ProcessingQueue::new(0);
        queue.spawn_worker(DEFAULT_POLL_INTERVAL, &notify_shutdown);
        (queue, notify_shutdown)
    }

    /// Appends a task. Unbounded, so this never blocks and never fails.
    pub fn enqueue(&self, task: QueueTask) {
        self.pending.lock().push_back(task);
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn pending_len(&self) -> usize {
        self.pending.lock().len()
    }

    pub fn connection_count(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    pub(crate) fn attach_connection(&self) {
        self.connections.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn detach_connection(&self) {
        self.connections.fetch_sub(1, Ordering::SeqCst);
    }

    fn pop(&self) -> Option<QueueTask> {
        self.pending.lock().pop_front()
    }

    pub(crate) fn spawn_worker(
        self: &Arc<Self>,
        poll_interval: Duration,
        notify_shutdown: &broadcast::Sender<()>,
    ) -> JoinHandle<()> {
        let queue = self.clone();
        let mut shutdown = Shutdown::subscribe_to(notify_shutdown);
        tokio::spawn(async move {
            debug!("queue {} worker started", queue.index);
            loop {
                match queue.pop() {
                    Some(task) => task(),
                    None => {
                        tokio::select! {
                            _ = time::sleep(poll_interval) => {}
                            _ = shutdown.recv() => break,
                        }
                    }
                }
            }
            debug!("queue {} worker exiting", queue.index);
        })
    }
}
