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

//! In-memory adapter and transport for tests.

use anyhow::Result;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::io::{AsyncWrite, DuplexStream};
use tokio::sync::{mpsc, Notify};

use super::device::DeviceInfo;
use super::transport::{BoxedReader, BoxedWriter, SerialAdapter, Transport};

/// How a scripted connect attempt behaves.
#[derive(Clone)]
pub enum Outcome {
    /// Connect succeeds immediately.
    Succeed,
    /// Connect fails with the given message.
    Fail(String),
    /// Connect waits for the gate, then succeeds.
    Hang(Arc<Notify>),
    /// Connect succeeds but the streams cannot be acquired.
    NoStreams,
    /// Connect succeeds; every write fails.
    BrokenWriter,
}

pub type PeerSlot = Arc<Mutex<Option<DuplexStream>>>;

pub struct MockTransport {
    address: String,
    outcome: Outcome,
    closes: Arc<AtomicUsize>,
    peer: PeerSlot,
}

impl MockTransport {
    pub fn new(address: &str, outcome: Outcome) -> Self {
        Self {
            address: address.to_string(),
            outcome,
            closes: Arc::new(AtomicUsize::new(0)),
            peer: Arc::new(Mutex::new(None)),
        }
    }

    pub fn connected() -> Self {
        Self::new("AA:BB:CC:DD:EE:FF", Outcome::Succeed)
    }

    pub fn unavailable_streams() -> Self {
        Self::new("AA:BB:CC:DD:EE:FF", Outcome::NoStreams)
    }

    pub fn close_counter(&self) -> Arc<AtomicUsize> {
        self.closes.clone()
    }

    /// Filled with the remote end of the stream once streams are acquired.
    pub fn peer_slot(&self) -> PeerSlot {
        self.peer.clone()
    }
}

impl Transport for MockTransport {
    fn connect(&mut self) -> BoxFuture<'_, io::Result<()>> {
        let outcome = self.outcome.clone();
        Box::pin(async move {
            match outcome {
                Outcome::Fail(message) => Err(io::Error::new(io::ErrorKind::Other, message)),
                Outcome::Hang(gate) => {
                    gate.notified().await;
                    Ok(())
                }
                _ => Ok(()),
            }
        })
    }

    fn streams(&mut self) -> io::Result<(BoxedReader, BoxedWriter)> {
        if let Outcome::NoStreams = self.outcome {
            return Err(io::Error::new(io::ErrorKind::Other, "streams unavailable"));
        }

        let (local, remote) = tokio::io::duplex(1024);
        let (reader, writer) = tokio::io::split(local);
        *self.peer.lock() = Some(remote);

        if let Outcome::BrokenWriter = self.outcome {
            return Ok((Box::new(reader), Box::new(BrokenWriter)));
        }
        Ok((Box::new(reader), Box::new(writer)))
    }

    fn remote_device(&self) -> BoxFuture<'_, DeviceInfo> {
        Box::pin(async move {
            DeviceInfo::new(self.address.clone())
                .with_name("Mock Device")
                .with_class(0x1f00)
        })
    }

    fn close(&mut self) -> io::Result<()> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

struct BrokenWriter;

impl AsyncWrite for BrokenWriter {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        _buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Poll::Ready(Err(io::Error::new(
            io::ErrorKind::BrokenPipe,
            "write failed",
        )))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

/// Handles to one transport handed out by the adapter.
#[derive(Clone)]
pub struct Opened {
    pub address: String,
    pub secure: bool,
    pub closes: Arc<AtomicUsize>,
    pub peer: PeerSlot,
}

impl Opened {
    pub fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    pub fn take_peer(&self) -> Option<DuplexStream> {
        self.peer.lock().take()
    }
}

/// Adapter handing out scripted transports. Unscripted attempts succeed.
pub struct MockAdapter {
    enabled: AtomicBool,
    script: Mutex<VecDeque<Outcome>>,
    opened: Mutex<Vec<Opened>>,
    bonded: Vec<DeviceInfo>,
    discovery: Mutex<Option<mpsc::UnboundedSender<DeviceInfo>>>,
}

impl MockAdapter {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            enabled: AtomicBool::new(true),
            script: Mutex::new(VecDeque::new()),
            opened: Mutex::new(Vec::new()),
            bonded: vec![DeviceInfo::new("00:11:22:33:44:55").with_name("HC-05")],
            discovery: Mutex::new(None),
        })
    }

    pub fn push(&self, outcome: Outcome) {
        self.script.lock().push_back(outcome);
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }

    pub fn opened(&self, index: usize) -> Option<Opened> {
        self.opened.lock().get(index).cloned()
    }

    pub fn opened_count(&self) -> usize {
        self.opened.lock().len()
    }

    /// Report a device to a running discovery.
    pub fn discover(&self, device: DeviceInfo) -> bool {
        match self.discovery.lock().as_ref() {
            Some(tx) => tx.send(device).is_ok(),
            None => false,
        }
    }

    pub fn is_discovering(&self) -> bool {
        self.discovery.lock().is_some()
    }
}

impl SerialAdapter for MockAdapter {
    fn backend_name(&self) -> &'static str {
        "Mock"
    }

    fn is_enabled(&self) -> BoxFuture<'_, Result<bool>> {
        Box::pin(async move { Ok(self.enabled.load(Ordering::SeqCst)) })
    }

    fn bonded_devices(&self) -> BoxFuture<'_, Result<Vec<DeviceInfo>>> {
        Box::pin(async move { Ok(self.bonded.clone()) })
    }

    fn start_discovery(&self) -> BoxFuture<'_, Result<mpsc::UnboundedReceiver<DeviceInfo>>> {
        Box::pin(async move {
            let (tx, rx) = mpsc::unbounded_channel();
            *self.discovery.lock() = Some(tx);
            Ok(rx)
        })
    }

    fn cancel_discovery(&self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            self.discovery.lock().take();
            Ok(())
        })
    }

    fn create_transport(&self, address: &str, secure: bool) -> io::Result<Box<dyn Transport>> {
        if address.is_empty() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "invalid Bluetooth address",
            ));
        }

        let outcome = self.script.lock().pop_front().unwrap_or(Outcome::Succeed);
        let transport = MockTransport::new(address, outcome);
        self.opened.lock().push(Opened {
            address: address.to_string(),
            secure,
            closes: transport.close_counter(),
            peer: transport.peer_slot(),
        });
        Ok(Box::new(transport))
    }
}
