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

//! Connection state of the serial engine.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Connection state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    /// No attempt in flight and no live session.
    #[default]
    None,
    /// An attempt is in flight.
    Connecting,
    /// A session is live.
    Connected,
}

impl ConnectionState {
    /// Numeric value reported to hosts.
    pub fn value(&self) -> u8 {
        match self {
            ConnectionState::None => 0,
            ConnectionState::Connecting => 1,
            ConnectionState::Connected => 2,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::None => "NONE",
            ConnectionState::Connecting => "CONNECTING",
            ConnectionState::Connected => "CONNECTED",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_values() {
        assert_eq!(ConnectionState::None.value(), 0);
        assert_eq!(ConnectionState::Connecting.value(), 1);
        assert_eq!(ConnectionState::Connected.value(), 2);
    }

    #[test]
    fn test_state_serialization() {
        let json = serde_json::to_string(&ConnectionState::Connecting).unwrap();
        assert_eq!(json, "\"connecting\"");
        assert_eq!(ConnectionState::default(), ConnectionState::None);
    }
}
