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

use std::any::Any;
use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;

use crate::network::events::DisconnectReason;
use crate::protocol::Message;
use crate::NetResult;

/// Engine-unique identifier a server assigns to each accepted connection.
pub type ConnectionId = u64;

/// Shared handle to any peer the engine can talk to. Message handlers
/// receive one of these and never see the concrete entity type.
pub type RemoteRef = Arc<dyn Remote>;

/// The send side of an entity.
pub trait Sendable: Send + Sync {
    /// Queues one already-framed buffer for transmission. Fails fast when
    /// the entity cannot currently transmit.
    fn send(&self, frame: Bytes) -> NetResult<()>;

    /// Serializes `message` with the engine's protocol, then sends it.
    fn send_message(&self, message: &dyn Message) -> NetResult<()>;
}

/// The teardown side of an entity.
pub trait Disconnectable: Send + Sync {
    /// Tears the entity down, reporting `reason` to the observer. Calling
    /// this on an already torn-down entity is a no-op.
    fn disconnect(&self, reason: DisconnectReason);
}

/// What a message handler sees of the peer a message came from.
pub trait Remote: Sendable + Disconnectable {
    /// Address of the peer.
    fn remote_addr(&self) -> SocketAddr;

    /// Server-assigned connection id, `None` for client entities.
    fn connection_id(&self) -> Option<ConnectionId>;

    fn is_connected(&self) -> bool;

    /// Application state attached to this peer.
    fn state(&self) -> &StateSlot;
}

/// Lifecycle of a client or connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnState {
    Disconnected = 0,
    Connecting = 1,
    Connected = 2,
    Disconnecting = 3,
}

impl ConnState {
    fn from_u8(value: u8) -> ConnState {
        match value {
            1 => ConnState::Connecting,
            2 => ConnState::Connected,
            3 => ConnState::Disconnecting,
            _ => ConnState::Disconnected,
        }
    }
}

/// Holds a [`ConnState`] that several tasks read and update without a lock.
#[derive(Debug)]
pub struct ConnStateCell(AtomicU8);

impl ConnStateCell {
    pub fn new(initial: ConnState) -> Self {
        ConnStateCell(AtomicU8::new(initial as u8))
    }

    pub fn load(&self) -> ConnState {
        ConnState::from_u8(self.0.load(Ordering::SeqCst))
    }

    pub fn store(&self, state: ConnState) {
        self.0.store(state as u8, Ordering::SeqCst);
    }

    /// Moves from `from` to `to` if the cell is currently `from`. Returns
    /// whether the transition happened; racing callers see `false`.
    pub fn transition(&self, from: ConnState, to: ConnState) -> bool {
        self.0
            .compare_exchange(from as u8, to as u8, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }
}

/// One slot of caller-owned state attached to a peer.
///
/// Handlers use this to keep per-peer context, a session or a player for
/// example, without a lookup table on the side. The slot is typed at the
/// access site; reading it as a different type yields `None`.
pub struct StateSlot {
    value: Mutex<Option<Box<dyn Any + Send>>>,
}

impl StateSlot {
    pub fn new() -> Self {
        StateSlot {
            value: Mutex::new(None),
        }
    }

    /// Stores `value`, replacing whatever the slot held before.
    pub fn set<T: Any + Send>(&self, value: T) {
        *self.value.lock() = Some(Box::new(value));
    }

    /// Removes and returns the state if it is a `T`.
    pub fn take<T: Any + Send>(&self) -> Option<T> {
        let mut slot = self.value.lock();
        if slot.as_ref().is_some_and(|v| v.is::<T>()) {
            slot.take().and_then(|v| v.downcast::<T>().ok()).map(|v| *v)
        } else {
            None
        }
    }

    /// Runs `f` on the state if it is a `T`.
    pub fn with<T: Any + Send, R>(&self, f: impl FnOnce(&mut T) -> R) -> Option<R> {
        let mut slot = self.value.lock();
        slot.as_mut().and_then(|v| v.downcast_mut::<T>()).map(f)
    }

    pub fn clear(&self) {
        self.value.lock().take();
    }

    pub fn is_set(&self) -> bool {
        self.value.lock().is_some()
    }
}

impl Default for StateSlot {
    fn default() -> Self {
        StateSlot::new()
    }
}

impl fmt::Debug for StateSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StateSlot")
            .field("is_set", &self.is_set())
            .finish()
    }
}
