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

use crate::network::DisconnectReason;

pub type NetResult<T> = Result<T, NetError>;

#[derive(Debug, thiserror::Error)]
#[error("network engine error")]
pub enum NetError {
    /// general errors
    #[error("illegal state: {0}")]
    IllegalStateError(String),

    #[error("invalid value: {0}")]
    InvalidValue(String),

    /// wire protocol errors
    #[error("malformed protocol: {0}")]
    MalformedProtocol(String),

    #[error("unknown message id: {0}")]
    UnknownMessageId(u16),

    #[error("registration error: {0}")]
    RegistrationError(String),

    /// entity lifecycle errors
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    #[error("connection lost")]
    ConnectionLost,

    #[error("entity is disposed")]
    Disposed,

    #[error("entity is not connected")]
    NotConnected,

    #[error("message rate exceeded the allowed limit")]
    SpamDetected,

    #[error("datagram of {0} bytes exceeds the udp limit")]
    DatagramTooLarge(usize),

    #[error("io error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("channel send error: {0}")]
    ChannelSendError(String),

    #[error("config file error: {0}")]
    ConfigFileError(#[from] config::ConfigError),

    /// marker error
    Incomplete,
}

/// Maps a receive-path failure to the reason reported when the entity is
/// dropped because of it.
impl From<&NetError> for DisconnectReason {
    fn from(value: &NetError) -> Self {
        match value {
            NetError::SpamDetected => DisconnectReason::Spam,
            NetError::MalformedProtocol(_)
            | NetError::UnknownMessageId(_)
            | NetError::InvalidValue(_) => DisconnectReason::InvalidDataReceived,
            _ => DisconnectReason::ConnectionLost,
        }
    }
}
