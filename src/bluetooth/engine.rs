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

//! Connection lifecycle state machine.
//!
//! The engine owns at most one in-flight connect attempt and at most one
//! live [`Session`]. Every state assignment and every event emission happens
//! under the engine lock, so the event stream never disagrees with
//! [`ConnectionEngine::connection_state`].
//!
//! Superseded attempts and sessions are identified by an epoch counter that
//! is bumped whenever the current attempt or session is cancelled. Work that
//! completes under an old epoch is discarded without touching the engine.

use anyhow::Result;
use parking_lot::Mutex;
use std::io;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::device::DeviceInfo;
use super::session::{close_quietly, ReadOutcome, Session};
use super::state::ConnectionState;
use super::transport::{SerialAdapter, Transport};
use crate::config::SessionConfig;
use crate::events::{
    EventReceiver, Notifier, SerialEvent, CONNECTION_LOST, NOT_CONNECTED, STREAMS_UNAVAILABLE,
};

/// An in-flight connect attempt.
struct ConnectAttempt {
    epoch: u64,
    handle: JoinHandle<()>,
}

struct Core {
    state: ConnectionState,
    epoch: u64,
    /// Number of `connect` calls so far, one per `Connecting` event.
    connects: u64,
    attempt: Option<ConnectAttempt>,
    session: Option<Arc<Session>>,
}

struct Inner {
    adapter: Arc<dyn SerialAdapter>,
    config: SessionConfig,
    notifier: Notifier,
    core: Mutex<Core>,
}

impl Inner {
    /// Set the current state and report it.
    fn transition(&self, core: &mut Core, state: ConnectionState, device: Option<DeviceInfo>) {
        debug!("setState() {} -> {}", core.state, state);
        core.state = state;
        self.notifier
            .emit(SerialEvent::StateChanged { state, device });
    }

    /// Cancel the current attempt and tear down the current session.
    fn cancel_running(core: &mut Core) {
        core.epoch += 1;

        if let Some(attempt) = core.attempt.take() {
            debug!("Cancelling connect attempt (epoch {})", attempt.epoch);
            attempt.handle.abort();
        }
        if let Some(session) = core.session.take() {
            session.disconnect();
        }
    }

    /// Report a connect or read failure and return to `None`.
    fn fail(&self, core: &mut Core, message: String) {
        self.notifier.emit(SerialEvent::ConnectError { message });
        Self::cancel_running(core);
        self.transition(core, ConnectionState::None, None);
    }

    async fn run_attempt(self: Arc<Self>, epoch: u64, mut transport: Box<dyn Transport>) {
        let connected = transport.connect().await;
        if let Err(e) = connected {
            error!("Connect failed: {}", e);
            close_quietly(transport.as_mut());

            let mut core = self.core.lock();
            if core.epoch != epoch {
                warn!("Discarding failure of superseded connect attempt");
                return;
            }
            // This task is the attempt; it ends here.
            core.attempt.take();
            self.fail(&mut core, e.to_string());
            return;
        }

        info!("Connected");
        let device = transport.remote_device().await;
        self.install_session(epoch, transport, device);
    }

    fn install_session(
        self: &Arc<Self>,
        epoch: u64,
        mut transport: Box<dyn Transport>,
        device: DeviceInfo,
    ) {
        let mut core = self.core.lock();
        if core.epoch != epoch {
            warn!("Discarding superseded connection to {}", device.address);
            close_quietly(transport.as_mut());
            return;
        }
        core.attempt.take();

        let (session, reader) = match Session::open(transport, device.clone()) {
            Ok(opened) => opened,
            Err(_) => {
                self.fail(&mut core, STREAMS_UNAVAILABLE.to_string());
                return;
            }
        };

        let session = Arc::new(session);
        core.session = Some(session.clone());
        self.transition(&mut core, ConnectionState::Connected, Some(device));

        let weak = Arc::downgrade(self);
        session.start_reading(reader, self.config.read_buffer_size, move |outcome| {
            match weak.upgrade() {
                Some(inner) => inner.on_read(epoch, outcome),
                None => false,
            }
        });
    }

    fn on_read(&self, epoch: u64, outcome: ReadOutcome<'_>) -> bool {
        let mut core = self.core.lock();
        if core.epoch != epoch {
            return false;
        }

        match outcome {
            ReadOutcome::Data(bytes) => {
                self.notifier.emit(SerialEvent::DataReceived {
                    bytes: bytes.to_vec(),
                });
                true
            }
            ReadOutcome::Failed(e) => {
                error!("disconnected: {}", e);
                self.fail(&mut core, CONNECTION_LOST.to_string());
                false
            }
        }
    }
}

/// Serial connection engine over a platform adapter.
pub struct ConnectionEngine {
    inner: Arc<Inner>,
}

impl ConnectionEngine {
    /// Create an engine and the receiver for its events.
    pub fn new(adapter: Arc<dyn SerialAdapter>, config: SessionConfig) -> (Self, EventReceiver) {
        let (notifier, events) = Notifier::channel();
        let inner = Arc::new(Inner {
            adapter,
            config,
            notifier,
            core: Mutex::new(Core {
                state: ConnectionState::None,
                epoch: 0,
                connects: 0,
                attempt: None,
                session: None,
            }),
        });
        (Self { inner }, events)
    }

    /// Start connecting to `address`, replacing any attempt or session.
    ///
    /// Returns immediately; progress is reported as events. Must be called
    /// from within a tokio runtime.
    ///
    /// Returns the sequence number of this request: the `n`-th call emits
    /// the `n`-th [`ConnectionState::Connecting`] event, and every later
    /// event up to the next `Connecting` belongs to it.
    pub fn connect(&self, address: &str, secure: bool) -> u64 {
        let socket_type = if secure { "secure" } else { "insecure" };
        info!("connect to: {} ({})", address, socket_type);

        let mut core = self.inner.core.lock();
        Inner::cancel_running(&mut core);
        let epoch = core.epoch;
        core.connects += 1;
        let request = core.connects;
        self.inner
            .transition(&mut core, ConnectionState::Connecting, None);

        match self.inner.adapter.create_transport(address, secure) {
            Ok(transport) => {
                let inner = self.inner.clone();
                let handle = tokio::spawn(inner.run_attempt(epoch, transport));
                core.attempt = Some(ConnectAttempt { epoch, handle });
            }
            Err(e) => {
                error!("Socket Type: {} create() failed: {}", socket_type, e);
                self.inner.fail(&mut core, e.to_string());
            }
        }
        request
    }

    /// Write to the live session.
    ///
    /// The outcome is reported as a single [`SerialEvent::WriteResult`].
    pub async fn write(&self, bytes: &[u8]) {
        let session = {
            let core = self.inner.core.lock();
            let live = if core.state == ConnectionState::Connected {
                core.session.clone()
            } else {
                None
            };
            if live.is_none() {
                self.inner
                    .notifier
                    .emit(SerialEvent::write_failed(NOT_CONNECTED));
            }
            live
        };
        let Some(session) = session else {
            return;
        };

        let result = session.write(bytes).await;

        // Held so the result is ordered against state events.
        let _ordered = self.inner.core.lock();
        match result {
            Ok(()) => self.inner.notifier.emit(SerialEvent::write_ok()),
            Err(e) if e.kind() == io::ErrorKind::NotConnected => {
                warn!("Write interrupted: {}", e);
                self.inner
                    .notifier
                    .emit(SerialEvent::write_failed(NOT_CONNECTED));
            }
            Err(e) => {
                error!("Exception during write: {}", e);
                self.inner
                    .notifier
                    .emit(SerialEvent::write_failed(e.to_string()));
            }
        }
    }

    /// Cancel any attempt, close any session and return to `None`.
    pub fn disconnect(&self) {
        let mut core = self.inner.core.lock();
        Inner::cancel_running(&mut core);
        if core.state != ConnectionState::None {
            info!("Disconnected");
            self.inner
                .transition(&mut core, ConnectionState::None, None);
        }
    }

    /// Same as [`disconnect`](Self::disconnect).
    pub fn reset(&self) {
        self.disconnect();
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.inner.core.lock().state
    }

    pub fn is_connected(&self) -> bool {
        self.connection_state() == ConnectionState::Connected
    }

    /// The device of the live session, if any.
    pub fn connected_device(&self) -> Option<DeviceInfo> {
        let core = self.inner.core.lock();
        core.session.as_ref().map(|s| s.device().clone())
    }

    pub fn adapter(&self) -> &Arc<dyn SerialAdapter> {
        &self.inner.adapter
    }

    pub async fn is_enabled(&self) -> Result<bool> {
        self.inner.adapter.is_enabled().await
    }

    pub async fn bonded_devices(&self) -> Result<Vec<DeviceInfo>> {
        self.inner.adapter.bonded_devices().await
    }

    pub async fn start_discovery(&self) -> Result<mpsc::UnboundedReceiver<DeviceInfo>> {
        self.inner.adapter.start_discovery().await
    }

    pub async fn cancel_discovery(&self) -> Result<()> {
        self.inner.adapter.cancel_discovery().await
    }
}

impl Drop for ConnectionEngine {
    fn drop(&mut self) {
        let mut core = self.inner.core.lock();
        Inner::cancel_running(&mut core);
    }
}
