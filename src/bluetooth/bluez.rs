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

//! BlueZ adapter and RFCOMM client sockets.

use anyhow::Result;
use bluer::rfcomm::{Security, SecurityLevel, Socket, SocketAddr, Stream};
use bluer::{Address, AdapterEvent};
use futures::future::BoxFuture;
use futures::StreamExt;
use parking_lot::Mutex;
use std::io;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::device::DeviceInfo;
use super::transport::{BoxedReader, BoxedWriter, SerialAdapter, Transport, SPP_UUID};
use crate::config::BluetoothConfig;

/// Adapter backed by the BlueZ daemon.
pub struct BluezAdapter {
    _session: bluer::Session,
    adapter: bluer::Adapter,
    rfcomm_channel: u8,
    discovery: Mutex<Option<JoinHandle<()>>>,
}

impl BluezAdapter {
    /// Connect to BlueZ and pick the configured adapter.
    pub async fn new(config: &BluetoothConfig) -> Result<Self> {
        info!("Initializing Bluetooth adapter...");

        let session = bluer::Session::new().await?;
        debug!("BlueZ session created");

        let adapter = match &config.adapter {
            Some(name) => session.adapter(name)?,
            None => session.default_adapter().await?,
        };
        info!("Using Bluetooth adapter: {}", adapter.name());

        Ok(Self {
            _session: session,
            adapter,
            rfcomm_channel: config.rfcomm_channel,
            discovery: Mutex::new(None),
        })
    }

    fn stop_discovery_task(&self) {
        if let Some(task) = self.discovery.lock().take() {
            info!("Discovery stopped");
            task.abort();
        }
    }
}

impl Drop for BluezAdapter {
    fn drop(&mut self) {
        self.stop_discovery_task();
    }
}

async fn device_info(adapter: &bluer::Adapter, address: Address) -> Result<DeviceInfo> {
    let device = adapter.device(address)?;
    Ok(DeviceInfo {
        address: address.to_string(),
        name: device.name().await?,
        device_class: device.class().await?,
    })
}

impl SerialAdapter for BluezAdapter {
    fn backend_name(&self) -> &'static str {
        "BlueZ"
    }

    fn is_enabled(&self) -> BoxFuture<'_, Result<bool>> {
        Box::pin(async move { Ok(self.adapter.is_powered().await?) })
    }

    fn bonded_devices(&self) -> BoxFuture<'_, Result<Vec<DeviceInfo>>> {
        Box::pin(async move {
            let mut devices = Vec::new();

            for addr in self.adapter.device_addresses().await? {
                let device = self.adapter.device(addr)?;
                if device.is_paired().await? {
                    devices.push(device_info(&self.adapter, addr).await?);
                }
            }

            Ok(devices)
        })
    }

    fn start_discovery(&self) -> BoxFuture<'_, Result<mpsc::UnboundedReceiver<DeviceInfo>>> {
        Box::pin(async move {
            self.stop_discovery_task();

            let events = self.adapter.discover_devices().await?;
            let adapter = self.adapter.clone();
            let (tx, rx) = mpsc::unbounded_channel();
            info!("Discovery started on {}", adapter.name());

            let task = tokio::spawn(async move {
                futures::pin_mut!(events);
                while let Some(event) = events.next().await {
                    let AdapterEvent::DeviceAdded(addr) = event else {
                        continue;
                    };
                    match device_info(&adapter, addr).await {
                        Ok(info) => {
                            debug!("Discovered {}", info.address);
                            if tx.send(info).is_err() {
                                break;
                            }
                        }
                        Err(e) => warn!("Could not query discovered device {}: {}", addr, e),
                    }
                }
            });

            *self.discovery.lock() = Some(task);
            Ok(rx)
        })
    }

    fn cancel_discovery(&self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            self.stop_discovery_task();
            Ok(())
        })
    }

    fn create_transport(&self, address: &str, secure: bool) -> io::Result<Box<dyn Transport>> {
        let addr: Address = address
            .parse()
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, format!("{}", e)))?;
        let device = self.adapter.device(addr).map_err(io::Error::other)?;

        let socket = Socket::new()?;
        let level = if secure {
            SecurityLevel::Medium
        } else {
            SecurityLevel::Low
        };
        socket.set_security(Security { level, key_size: 0 })?;

        Ok(Box::new(RfcommTransport {
            device,
            target: SocketAddr::new(addr, self.rfcomm_channel),
            socket: Some(socket),
            stream: None,
        }))
    }
}

/// RFCOMM client socket to one device.
struct RfcommTransport {
    device: bluer::Device,
    target: SocketAddr,
    socket: Option<Socket>,
    stream: Option<Stream>,
}

impl Transport for RfcommTransport {
    fn connect(&mut self) -> BoxFuture<'_, io::Result<()>> {
        Box::pin(async move {
            let socket = self.socket.take().ok_or_else(|| {
                io::Error::new(io::ErrorKind::NotConnected, "socket already used")
            })?;

            match self.device.uuids().await {
                Ok(Some(uuids)) if !uuids.contains(&SPP_UUID) => {
                    warn!("{} does not advertise the serial port profile", self.target.addr);
                }
                Ok(_) => {}
                Err(e) => debug!("Could not read service UUIDs: {}", e),
            }

            info!("Connecting to {} on channel {}", self.target.addr, self.target.channel);
            let stream = socket.connect(self.target).await?;
            self.stream = Some(stream);
            Ok(())
        })
    }

    fn streams(&mut self) -> io::Result<(BoxedReader, BoxedWriter)> {
        let stream = self
            .stream
            .take()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "not connected"))?;
        let (reader, writer) = stream.into_split();
        Ok((Box::new(reader), Box::new(writer)))
    }

    fn remote_device(&self) -> BoxFuture<'_, DeviceInfo> {
        Box::pin(async move {
            let address = self.target.addr.to_string();
            let name = match self.device.name().await {
                Ok(name) => name,
                Err(e) => {
                    error!("Could not read name of {}: {}", address, e);
                    None
                }
            };
            let device_class = self.device.class().await.ok().flatten();
            DeviceInfo {
                address,
                name,
                device_class,
            }
        })
    }

    fn close(&mut self) -> io::Result<()> {
        // Dropping the socket or stream closes the file descriptor. Once the
        // streams are handed out the session owns both halves.
        self.socket.take();
        self.stream.take();
        Ok(())
    }
}
