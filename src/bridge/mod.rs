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

//! Request/response facade over the connection engine.
//!
//! Turns the engine's event stream back into one result per request,
//! buffers received bytes until the caller reads them and rebroadcasts
//! connection changes to listeners.

pub mod buffer;

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::bluetooth::{ConnectionEngine, ConnectionState, DeviceInfo, SerialAdapter};
use crate::config::Config;
use crate::error::SerialError;
use crate::events::{EventReceiver, SerialEvent};
use buffer::ReadBuffer;

/// Notifications for listeners.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BridgeNotification {
    /// Connection state changed.
    ConnectionChange {
        state: ConnectionState,
        device: Option<DeviceInfo>,
    },
    /// A discovery found a new device; carries every device found so far.
    DevicesDiscovered(Vec<DeviceInfo>),
}

/// A connect request waiting for its outcome.
struct PendingConnect {
    /// Sequence number returned by [`ConnectionEngine::connect`].
    request: u64,
    /// Set once the engine has reported this request's own `Connecting`.
    armed: bool,
    reply: oneshot::Sender<Result<DeviceInfo, SerialError>>,
}

#[derive(Default)]
struct Pending {
    connect: Option<PendingConnect>,
    /// `Connecting` events handled so far.
    connecting_seen: u64,
    writes: VecDeque<oneshot::Sender<Result<(), SerialError>>>,
    discovery: Option<(u64, oneshot::Sender<()>)>,
    discovery_seq: u64,
}

struct Shared {
    buffer: ReadBuffer,
    pending: Mutex<Pending>,
    notifications: broadcast::Sender<BridgeNotification>,
}

impl Shared {
    fn notify(&self, notification: BridgeNotification) {
        // No subscribers is fine.
        let _ = self.notifications.send(notification);
    }

    fn handle(&self, event: SerialEvent) {
        match event {
            SerialEvent::StateChanged { state, device } => {
                self.notify(BridgeNotification::ConnectionChange {
                    state,
                    device: device.clone(),
                });

                let mut pending = self.pending.lock();
                match state {
                    ConnectionState::Connecting => {
                        // Anything buffered belongs to the previous connection.
                        if !self.buffer.is_empty() {
                            debug!("Discarding {} buffered bytes", self.buffer.len());
                            self.buffer.clear();
                        }

                        pending.connecting_seen += 1;
                        let seen = pending.connecting_seen;
                        if let Some(connect) = pending.connect.as_mut() {
                            if connect.request == seen {
                                connect.armed = true;
                            }
                        }
                        // An armed request replaced by a connect made directly
                        // on the engine.
                        if let Some(connect) = take_armed_before(&mut pending, seen) {
                            let _ = connect.reply.send(Err(SerialError::Interrupted));
                        }
                    }
                    ConnectionState::Connected => {
                        if let Some(connect) = take_armed(&mut pending) {
                            let result = device.ok_or_else(|| {
                                SerialError::ConnectFailed("Unknown device".to_string())
                            });
                            let _ = connect.reply.send(result);
                        }
                    }
                    ConnectionState::None => {
                        if let Some(connect) = take_armed(&mut pending) {
                            let _ = connect.reply.send(Err(SerialError::Interrupted));
                        }
                    }
                }
            }
            SerialEvent::ConnectError { message } => {
                warn!("Connection error: {}", message);
                if let Some(connect) = take_armed(&mut self.pending.lock()) {
                    let _ = connect.reply.send(Err(SerialError::ConnectFailed(message)));
                }
            }
            SerialEvent::DataReceived { bytes } => {
                self.buffer.append(&bytes);
            }
            SerialEvent::WriteResult { ok, message } => {
                let Some(reply) = self.pending.lock().writes.pop_front() else {
                    debug!("Write result without a pending write");
                    return;
                };
                let result = if ok {
                    Ok(())
                } else {
                    Err(SerialError::from_write_message(message))
                };
                let _ = reply.send(result);
            }
        }
    }
}

fn take_armed(pending: &mut Pending) -> Option<PendingConnect> {
    if pending.connect.as_ref().is_some_and(|c| c.armed) {
        pending.connect.take()
    } else {
        None
    }
}

fn take_armed_before(pending: &mut Pending, seen: u64) -> Option<PendingConnect> {
    if pending
        .connect
        .as_ref()
        .is_some_and(|c| c.armed && c.request < seen)
    {
        pending.connect.take()
    } else {
        None
    }
}

async fn pump(shared: Arc<Shared>, mut events: EventReceiver) {
    while let Some(event) = events.recv().await {
        shared.handle(event);
    }
    debug!("Engine event stream closed");
}

/// Serial port facade for host applications.
pub struct SerialBridge {
    engine: Arc<ConnectionEngine>,
    shared: Arc<Shared>,
    write_lock: Arc<tokio::sync::Mutex<()>>,
    discovery_timeout: Duration,
    pump: JoinHandle<()>,
}

impl SerialBridge {
    /// Create a bridge over `adapter`. Must be called from within a tokio runtime.
    pub fn new(adapter: Arc<dyn SerialAdapter>, config: &Config) -> Self {
        let (engine, events) = ConnectionEngine::new(adapter, config.session.clone());
        let (notifications, _) = broadcast::channel(32);
        let shared = Arc::new(Shared {
            buffer: ReadBuffer::new(),
            pending: Mutex::new(Pending::default()),
            notifications,
        });
        let pump = tokio::spawn(pump(shared.clone(), events));

        Self {
            engine: Arc::new(engine),
            shared,
            write_lock: Arc::new(tokio::sync::Mutex::new(())),
            discovery_timeout: config.discovery.timeout(),
            pump,
        }
    }

    /// The engine behind this bridge.
    pub fn engine(&self) -> &ConnectionEngine {
        &self.engine
    }

    /// Listen for connection changes and discovery results.
    pub fn subscribe(&self) -> broadcast::Receiver<BridgeNotification> {
        self.shared.notifications.subscribe()
    }

    async fn ensure_enabled(&self) -> Result<(), SerialError> {
        if self.engine.is_enabled().await? {
            Ok(())
        } else {
            Err(SerialError::AdapterDisabled)
        }
    }

    /// Connect over an authenticated, encrypted link.
    pub async fn connect(&self, address: &str) -> Result<DeviceInfo, SerialError> {
        self.connect_with(address, true).await
    }

    /// Connect without requiring link security.
    pub async fn connect_insecure(&self, address: &str) -> Result<DeviceInfo, SerialError> {
        self.connect_with(address, false).await
    }

    async fn connect_with(&self, address: &str, secure: bool) -> Result<DeviceInfo, SerialError> {
        self.ensure_enabled().await?;
        if let Err(e) = self.cancel_discovery().await {
            warn!("Could not cancel discovery: {}", e);
        }

        let reply = {
            let mut pending = self.shared.pending.lock();
            if let Some(previous) = pending.connect.take() {
                let _ = previous.reply.send(Err(SerialError::Interrupted));
            }
            // The pump cannot see this request's `Connecting` before it is
            // registered.
            let request = self.engine.connect(address, secure);
            let (tx, rx) = oneshot::channel();
            pending.connect = Some(PendingConnect {
                request,
                armed: false,
                reply: tx,
            });
            rx
        };

        reply.await.unwrap_or(Err(SerialError::Interrupted))
    }

    /// Close the connection. Always succeeds.
    pub fn disconnect(&self) {
        info!("Disconnect requested");
        self.engine.disconnect();
    }

    /// Write bytes to the connected device.
    pub async fn write(&self, bytes: &[u8]) -> Result<(), SerialError> {
        self.ensure_enabled().await?;

        let (tx, rx) = oneshot::channel();
        let engine = self.engine.clone();
        let shared = self.shared.clone();
        let lock = self.write_lock.clone();
        let data = bytes.to_vec();

        // Runs to completion even if the caller stops waiting, so results
        // stay matched to requests.
        tokio::spawn(async move {
            let _guard = lock.lock_owned().await;
            shared.pending.lock().writes.push_back(tx);
            engine.write(&data).await;
        });

        rx.await.unwrap_or(Err(SerialError::Interrupted))
    }

    /// Write text as UTF-8.
    pub async fn write_str(&self, text: &str) -> Result<(), SerialError> {
        self.write(text.as_bytes()).await
    }

    /// Take all buffered bytes.
    pub fn read(&self) -> Vec<u8> {
        self.shared.buffer.drain()
    }

    /// Take all buffered bytes as text. Invalid UTF-8 is replaced.
    pub fn read_string(&self) -> String {
        String::from_utf8_lossy(&self.read()).into_owned()
    }

    /// Number of buffered bytes.
    pub fn available(&self) -> usize {
        self.shared.buffer.len()
    }

    pub fn clear(&self) {
        self.shared.buffer.clear();
    }

    pub async fn is_enabled(&self) -> Result<bool, SerialError> {
        Ok(self.engine.is_enabled().await?)
    }

    pub fn is_connected(&self) -> bool {
        self.engine.is_connected()
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.engine.connection_state()
    }

    /// Bonded (paired) devices.
    pub async fn list(&self) -> Result<Vec<DeviceInfo>, SerialError> {
        self.ensure_enabled().await?;
        Ok(self.engine.bonded_devices().await?)
    }

    /// Scan for devices until the discovery timeout elapses.
    ///
    /// Any scan already running is cancelled first. Fails with
    /// [`SerialError::DiscoveryCancelled`] if this scan is cancelled.
    pub async fn discover_unpaired(&self) -> Result<Vec<DeviceInfo>, SerialError> {
        self.ensure_enabled().await?;
        self.cancel_discovery().await?;

        let (cancel_tx, mut cancelled) = oneshot::channel();
        let id = {
            let mut pending = self.shared.pending.lock();
            let id = pending.discovery_seq + 1;
            pending.discovery_seq = id;
            pending.discovery = Some((id, cancel_tx));
            id
        };

        let mut found = match self.engine.start_discovery().await {
            Ok(found) => found,
            Err(e) => {
                self.finish_discovery(id);
                return Err(e.into());
            }
        };

        let mut devices: Vec<DeviceInfo> = Vec::new();
        let deadline = tokio::time::sleep(self.discovery_timeout);
        tokio::pin!(deadline);

        loop {
            tokio::select! {
                _ = &mut deadline => break,
                _ = &mut cancelled => return Err(SerialError::DiscoveryCancelled),
                device = found.recv() => match device {
                    Some(device) => {
                        if devices.iter().any(|d| d.address == device.address) {
                            continue;
                        }
                        debug!("Found {}", device.display_name());
                        devices.push(device);
                        self.shared
                            .notify(BridgeNotification::DevicesDiscovered(devices.clone()));
                    }
                    None => break,
                },
            }
        }

        if self.finish_discovery(id) {
            self.engine.cancel_discovery().await?;
        }
        info!("Discovery finished, {} devices found", devices.len());
        Ok(devices)
    }

    /// Forget discovery `id` if it is still the current one.
    fn finish_discovery(&self, id: u64) -> bool {
        let mut pending = self.shared.pending.lock();
        if matches!(&pending.discovery, Some((current, _)) if *current == id) {
            pending.discovery.take();
            true
        } else {
            false
        }
    }

    /// Stop a running discovery. Does nothing if none is running.
    pub async fn cancel_discovery(&self) -> Result<(), SerialError> {
        let running = self.shared.pending.lock().discovery.take();
        if let Some((_, cancel)) = running {
            let _ = cancel.send(());
            self.engine.cancel_discovery().await?;
            info!("Discovery cancelled");
        }
        Ok(())
    }
}

impl Drop for SerialBridge {
    fn drop(&mut self) {
        self.engine.reset();
        self.pump.abort();
    }
}
