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

//! Events emitted by the connection engine.

use serde::Serialize;
use tokio::sync::mpsc;
use tracing::debug;

use crate::bluetooth::{ConnectionState, DeviceInfo};

/// Message reported when the read loop fails.
pub const CONNECTION_LOST: &str = "Device connection was lost";

/// Message reported for writes attempted while not connected.
pub const NOT_CONNECTED: &str = "Not connected";

/// Message reported when the streams of a connected socket are unavailable.
pub const STREAMS_UNAVAILABLE: &str = "Could not create sockets";

/// Events emitted by an engine, in the order their operations complete.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum SerialEvent {
    /// Connection state changed.
    StateChanged {
        state: ConnectionState,
        #[serde(skip_serializing_if = "Option::is_none")]
        device: Option<DeviceInfo>,
    },
    /// Connect attempt failed or an established connection was lost.
    ConnectError { message: String },
    /// Bytes read from the remote device.
    DataReceived { bytes: Vec<u8> },
    /// Outcome of one write request.
    WriteResult {
        ok: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
}

impl SerialEvent {
    pub fn state(state: ConnectionState) -> Self {
        SerialEvent::StateChanged {
            state,
            device: None,
        }
    }

    pub fn connect_error(message: impl Into<String>) -> Self {
        SerialEvent::ConnectError {
            message: message.into(),
        }
    }

    pub fn write_ok() -> Self {
        SerialEvent::WriteResult {
            ok: true,
            message: None,
        }
    }

    pub fn write_failed(message: impl Into<String>) -> Self {
        SerialEvent::WriteResult {
            ok: false,
            message: Some(message.into()),
        }
    }
}

/// Receiving end of an engine's event stream.
pub type EventReceiver = mpsc::UnboundedReceiver<SerialEvent>;

/// Sending end of an engine's event stream.
///
/// Sending never blocks, so events can be emitted while the engine lock is
/// held.
#[derive(Debug, Clone)]
pub struct Notifier {
    tx: mpsc::UnboundedSender<SerialEvent>,
}

impl Notifier {
    pub fn channel() -> (Self, EventReceiver) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Emit an event.
    pub fn emit(&self, event: SerialEvent) {
        if let Err(e) = self.tx.send(event) {
            debug!("Event dropped, receiver gone: {:?}", e.0);
        }
    }
}
