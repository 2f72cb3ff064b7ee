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

//! Bluetooth communication module.
//!
//! Manages a single RFCOMM serial connection: connect, read loop, writes
//! and teardown.

#[cfg(feature = "bluez")]
mod bluez;
mod device;
mod engine;
#[cfg(test)]
pub(crate) mod mock;
mod session;
mod state;
mod transport;

#[cfg(feature = "bluez")]
pub use bluez::BluezAdapter;
pub use device::DeviceInfo;
pub use engine::ConnectionEngine;
pub use session::{ReadOutcome, Session};
pub use state::ConnectionState;
pub use transport::{BoxedReader, BoxedWriter, SerialAdapter, Transport, SPP_UUID};
