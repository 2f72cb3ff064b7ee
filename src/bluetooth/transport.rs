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

//! Platform boundary: adapters and the sockets they create.

use anyhow::Result;
use futures::future::BoxFuture;
use std::io;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use uuid::Uuid;

use super::device::DeviceInfo;

/// Standard SPP UUID.
pub const SPP_UUID: Uuid = Uuid::from_u128(0x00001101_0000_1000_8000_00805F9B34FB);

/// Readable half of a connected transport.
pub type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;

/// Writable half of a connected transport.
pub type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// A stream socket to one remote endpoint.
pub trait Transport: Send + Sync {
    /// Perform the connect handshake. May take an unbounded amount of time.
    fn connect(&mut self) -> BoxFuture<'_, io::Result<()>>;

    /// Hand out the input and output streams of a connected socket.
    fn streams(&mut self) -> io::Result<(BoxedReader, BoxedWriter)>;

    /// Metadata about the remote end, gathered once connected.
    fn remote_device(&self) -> BoxFuture<'_, DeviceInfo>;

    /// Release the socket.
    fn close(&mut self) -> io::Result<()>;
}

/// A local radio adapter.
pub trait SerialAdapter: Send + Sync {
    /// Get the backend name (e.g., "BlueZ").
    fn backend_name(&self) -> &'static str;

    fn is_enabled(&self) -> BoxFuture<'_, Result<bool>>;

    fn bonded_devices(&self) -> BoxFuture<'_, Result<Vec<DeviceInfo>>>;

    /// Start discovery. Found devices arrive on the returned channel until
    /// discovery is cancelled.
    fn start_discovery(&self) -> BoxFuture<'_, Result<mpsc::UnboundedReceiver<DeviceInfo>>>;

    fn cancel_discovery(&self) -> BoxFuture<'_, Result<()>>;

    /// Create an unconnected socket to `address`.
    fn create_transport(&self, address: &str, secure: bool) -> io::Result<Box<dyn Transport>>;
}
