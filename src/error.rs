// Copyright 2026 Daniel Pelikan
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

//! Errors surfaced to callers of the serial bridge.

use thiserror::Error;

use crate::events::NOT_CONNECTED;

/// Failure of a bridge request.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SerialError {
    /// The radio is off.
    #[error("Bluetooth is not enabled")]
    AdapterDisabled,

    /// A write was attempted without a live connection.
    #[error("Not connected")]
    NotConnected,

    /// A pending connect was replaced or cancelled before it resolved.
    #[error("Connection interrupted")]
    Interrupted,

    /// The transport could not be connected, or an established connection was lost.
    #[error("{0}")]
    ConnectFailed(String),

    /// The output stream rejected a write. The connection stays up.
    #[error("{0}")]
    WriteFailed(String),

    /// A running discovery was cancelled.
    #[error("Discovery cancelled")]
    DiscoveryCancelled,

    /// The platform adapter reported an error.
    #[error("adapter error: {0}")]
    Adapter(String),
}

impl SerialError {
    /// Classify the message of a failed `WriteResult`.
    pub fn from_write_message(message: Option<String>) -> Self {
        match message {
            Some(m) if m == NOT_CONNECTED => SerialError::NotConnected,
            Some(m) => SerialError::WriteFailed(m),
            None => SerialError::WriteFailed("Error".to_string()),
        }
    }
}

impl From<anyhow::Error> for SerialError {
    fn from(e: anyhow::Error) -> Self {
        SerialError::Adapter(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_message_classification() {
        assert_eq!(
            SerialError::from_write_message(Some("Not connected".to_string())),
            SerialError::NotConnected
        );
        assert_eq!(
            SerialError::from_write_message(Some("Broken pipe".to_string())),
            SerialError::WriteFailed("Broken pipe".to_string())
        );
    }

    #[test]
    fn test_messages() {
        assert_eq!(SerialError::AdapterDisabled.to_string(), "Bluetooth is not enabled");
        assert_eq!(
            SerialError::ConnectFailed("boom".to_string()).to_string(),
            "boom"
        );
    }
}
