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

//! Accumulator for received bytes.

use parking_lot::Mutex;

/// Bytes received and not yet read by the caller.
#[derive(Debug, Default)]
pub struct ReadBuffer {
    data: Mutex<Vec<u8>>,
}

impl ReadBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&self, bytes: &[u8]) {
        self.data.lock().extend_from_slice(bytes);
    }

    /// Take everything buffered so far.
    pub fn drain(&self) -> Vec<u8> {
        std::mem::take(&mut *self.data.lock())
    }

    pub fn len(&self) -> usize {
        self.data.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.lock().is_empty()
    }

    pub fn clear(&self) {
        self.data.lock().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_drain_takes_everything() {
        let buffer = ReadBuffer::new();
        buffer.append(b"hel");
        buffer.append(b"lo");

        assert_eq!(buffer.len(), 5);
        assert_eq!(buffer.len(), 5);
        assert_eq!(buffer.drain(), b"hello");
        assert!(buffer.is_empty());
        assert!(buffer.drain().is_empty());
    }

    #[test]
    fn test_clear() {
        let buffer = ReadBuffer::new();
        buffer.append(b"stale");
        buffer.clear();
        assert_eq!(buffer.len(), 0);
    }
}
