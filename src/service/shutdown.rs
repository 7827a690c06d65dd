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

use tokio::sync::broadcast;

/// Listens for a close signal broadcast by the owning entity.
///
/// Servers, connections and clients each hold a `broadcast::Sender<()>` and
/// every task they spawn waits on a `Shutdown` subscribed to it. Dropping the
/// sender has the same effect as sending, so teardown also happens when the
/// owner itself is dropped.
#[derive(Debug)]
pub struct Shutdown {
    /// `true` once the signal has been received.
    is_shutdown: bool,
    notify: broadcast::Receiver<()>,
}

impl Shutdown {
    pub fn new(notify: broadcast::Receiver<()>) -> Shutdown {
        Shutdown {
            is_shutdown: false,
            notify,
        }
    }

    /// Subscribes to the given close channel.
    pub fn subscribe_to(notify: &broadcast::Sender<()>) -> Shutdown {
        Shutdown::new(notify.subscribe())
    }

    pub fn is_shutdown(&self) -> bool {
        self.is_shutdown
    }

    /// Waits for the close signal. Returns immediately if it was already
    /// received. A closed channel counts as a signal.
    pub async fn recv(&mut self) {
        if self.is_shutdown {
            return;
        }
        let _ = self.notify.recv().await;
        self.is_shutdown = true;
    }
}
