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

//! Bluetooth serial terminal.

use anyhow::{anyhow, bail, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use bluetooth_serial::{
    BridgeNotification, Config, ConnectionState, DeviceInfo, SerialAdapter, SerialBridge,
};

const USAGE: &str = "usage: bluetooth-serial <list | scan | connect [ADDRESS] [--insecure]>";

/// Command line action.
#[derive(Debug, PartialEq)]
enum Command {
    List,
    Scan,
    Connect {
        address: Option<String>,
        insecure: bool,
    },
}

fn parse_args(mut args: impl Iterator<Item = String>) -> Result<Command> {
    let command = args.next().ok_or_else(|| anyhow!(USAGE))?;
    match command.as_str() {
        "list" => Ok(Command::List),
        "scan" => Ok(Command::Scan),
        "connect" => {
            let mut address = None;
            let mut insecure = false;
            for arg in args {
                match arg.as_str() {
                    "--insecure" => insecure = true,
                    _ if arg.starts_with("--") => bail!("unknown option {}\n{}", arg, USAGE),
                    _ => address = Some(arg),
                }
            }
            Ok(Command::Connect { address, insecure })
        }
        _ => bail!(USAGE),
    }
}

#[cfg(feature = "bluez")]
async fn create_adapter(config: &Config) -> Result<Arc<dyn SerialAdapter>> {
    let adapter = bluetooth_serial::bluetooth::BluezAdapter::new(&config.bluetooth).await?;
    Ok(Arc::new(adapter))
}

#[cfg(not(feature = "bluez"))]
async fn create_adapter(_config: &Config) -> Result<Arc<dyn SerialAdapter>> {
    bail!("built without a Bluetooth backend (enable the `bluez` feature)")
}

fn print_devices(devices: &[DeviceInfo]) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(devices)?);
    Ok(())
}

/// Pipe stdin to the device and received data to stdout until the
/// connection ends.
async fn run_terminal(bridge: &SerialBridge) -> Result<()> {
    let mut notifications = bridge.subscribe();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();
    let mut poll = tokio::time::interval(Duration::from_millis(50));

    loop {
        tokio::select! {
            line = lines.next_line() => match line? {
                Some(line) => {
                    if let Err(e) = bridge.write_str(&format!("{}\n", line)).await {
                        error!("Write failed: {}", e);
                    }
                }
                None => {
                    info!("End of input");
                    break;
                }
            },
            _ = poll.tick() => {
                let data = bridge.read();
                if !data.is_empty() {
                    stdout.write_all(&data).await?;
                    stdout.flush().await?;
                }
            }
            notification = notifications.recv() => match notification {
                Ok(BridgeNotification::ConnectionChange { state: ConnectionState::None, .. }) => {
                    warn!("Connection closed");
                    break;
                }
                Ok(BridgeNotification::ConnectionChange { state, .. }) => {
                    debug!("Connection state {} ({})", state, state.value());
                }
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => warn!("Missed {} notifications", skipped),
                Err(RecvError::Closed) => break,
            },
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown signal received");
                break;
            }
        }
    }

    let rest = bridge.read();
    if !rest.is_empty() {
        stdout.write_all(&rest).await?;
        stdout.flush().await?;
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging; stdout carries device data.
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("bluetooth_serial=info".parse()?),
        )
        .init();

    let command = parse_args(std::env::args().skip(1))?;

    let config = Config::load()?;
    info!("Configuration loaded");

    let adapter = create_adapter(&config).await?;
    info!("Bluetooth backend: {}", adapter.backend_name());
    let bridge = SerialBridge::new(adapter, &config);

    match command {
        Command::List => print_devices(&bridge.list().await?)?,
        Command::Scan => {
            info!("Scanning for {}s...", config.discovery.timeout_secs);
            print_devices(&bridge.discover_unpaired().await?)?;
        }
        Command::Connect { address, insecure } => {
            let address = address
                .or_else(|| config.bluetooth.default_address.clone())
                .ok_or_else(|| anyhow!("no address given and no default_address configured"))?;
            let secure = config.bluetooth.secure && !insecure;

            let device = if secure {
                bridge.connect(&address).await?
            } else {
                bridge.connect_insecure(&address).await?
            };
            info!("Connected to {}", device.display_name());

            run_terminal(&bridge).await?;
            bridge.disconnect();
        }
    }

    info!("Bluetooth serial stopped");
    Ok(())
}
