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

use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::{NetError, NetResult};

/// Length of one counting window.
pub const FLOOD_WINDOW: Duration = Duration::from_secs(1);

/// Counts messages per connection in tumbling windows.
///
/// The window is not sliding: it opens on the first message recorded after
/// the previous window expired, runs for its full length, and the counter
/// starts over with the next window. A short burst that straddles a window
/// boundary may therefore pass even though both halves together exceed the
/// limit.
#[derive(Debug)]
pub struct FloodMonitor {
    limit: u32,
    window: Duration,
    state: Mutex<WindowState>,
}

#[derive(Debug)]
struct WindowState {
    started_at: Instant,
    count: u32,
}

impl FloodMonitor {
    /// A `limit` of zero disables the monitor.
    pub fn new(limit: u32) -> Self {
        Self::with_window(limit, FLOOD_WINDOW)
    }

    pub fn with_window(limit: u32, window: Duration) -> Self {
        FloodMonitor {
            limit,
            window,
            state: Mutex::new(WindowState {
                started_at: Instant::now(),
                count: 0,
            }),
        }
    }

    /// Counts one received message.
    ///
    /// Exactly `limit` messages fit in a window; the message that pushes the
    /// count past it fails with `SpamDetected`.
    pub fn record(&self) -> NetResult<()> {
        if self.limit == 0 {
            return Ok(());
        }
        let mut state = self.state.lock();
        let now = Instant::now();
        if now.duration_since(state.started_at) >= self.window {
            // the window that expired is gone, this message opens a new one
            state.started_at = now;
            state.count = 0;
        }
        state.count += 1;
        if state.count > self.limit {
            return Err(NetError::SpamDetected);
        }
        Ok(())
    }

    /// Messages counted in the current window.
    pub fn count(&self) -> u32 {
        self.state.lock().count
    }
}
