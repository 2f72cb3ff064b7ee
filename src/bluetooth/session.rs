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

//! A live connection to one remote device.

use parking_lot::Mutex;
use std::io;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use super::device::DeviceInfo;
use super::transport::{BoxedReader, BoxedWriter, Transport};

/// Outcome of one read loop iteration, reported to the owner of the session.
pub enum ReadOutcome<'a> {
    Data(&'a [u8]),
    Failed(io::Error),
}

/// Handler for a connected transport.
///
/// The session exclusively owns the transport and its output stream. The
/// input stream is moved into the read loop task.
pub struct Session {
    transport: Mutex<Option<Box<dyn Transport>>>,
    writer: tokio::sync::Mutex<Option<BoxedWriter>>,
    reader_task: Mutex<Option<JoinHandle<()>>>,
    closed: watch::Sender<bool>,
    device: DeviceInfo,
}

impl Session {
    /// Take over a connected transport.
    ///
    /// Acquires both streams first. On failure the transport is closed and
    /// the error is returned; no read loop is started.
    pub fn open(
        mut transport: Box<dyn Transport>,
        device: DeviceInfo,
    ) -> io::Result<(Self, BoxedReader)> {
        let (reader, writer) = match transport.streams() {
            Ok(streams) => streams,
            Err(e) => {
                error!("Streams not available: {}", e);
                close_quietly(transport.as_mut());
                return Err(e);
            }
        };

        debug!("Session created for {}", device.address);
        let (closed, _) = watch::channel(false);
        let session = Self {
            transport: Mutex::new(Some(transport)),
            writer: tokio::sync::Mutex::new(Some(writer)),
            reader_task: Mutex::new(None),
            closed,
            device,
        };
        Ok((session, reader))
    }

    /// The remote device this session is connected to.
    pub fn device(&self) -> &DeviceInfo {
        &self.device
    }

    /// Start the read loop on its own task.
    ///
    /// `on_read` is called with every chunk read and, once, with the error
    /// that ended the loop. It returns `false` when the session is no longer
    /// wanted, which stops the loop.
    pub fn start_reading<F>(&self, mut reader: BoxedReader, buffer_size: usize, mut on_read: F)
    where
        F: FnMut(ReadOutcome<'_>) -> bool + Send + 'static,
    {
        let address = self.device.address.clone();
        let handle = tokio::spawn(async move {
            info!("Read loop started for {}", address);
            let mut buffer = vec![0u8; buffer_size.max(1)];

            loop {
                match reader.read(&mut buffer).await {
                    Ok(0) => {
                        info!("Connection closed by remote");
                        let eof = io::Error::new(io::ErrorKind::UnexpectedEof, "end of stream");
                        on_read(ReadOutcome::Failed(eof));
                        break;
                    }
                    Ok(n) => {
                        debug!("Received {} bytes", n);
                        if !on_read(ReadOutcome::Data(&buffer[..n])) {
                            debug!("Read loop for {} no longer live", address);
                            break;
                        }
                    }
                    Err(e) => {
                        error!("Read error: {}", e);
                        on_read(ReadOutcome::Failed(e));
                        break;
                    }
                }
            }
        });

        *self.reader_task.lock() = Some(handle);
    }

    /// Write the full buffer to the output stream.
    ///
    /// Concurrent writes are serialized. A failed write leaves the session
    /// open. A write still in progress when the session is disconnected
    /// fails with [`io::ErrorKind::NotConnected`] and releases the stream.
    pub async fn write(&self, bytes: &[u8]) -> io::Result<()> {
        let mut closed = self.closed.subscribe();
        let mut guard = self.writer.lock().await;
        let Some(writer) = guard.as_mut() else {
            return Err(session_closed());
        };

        let written = tokio::select! {
            result = write_and_flush(writer, bytes) => result,
            _ = closed.wait_for(|closed| *closed) => Err(session_closed()),
        };

        if *self.closed.borrow() {
            guard.take();
        }
        written?;
        debug!("Wrote {} bytes", bytes.len());
        Ok(())
    }

    /// Stop the read loop and close the transport. Idempotent.
    pub fn disconnect(&self) {
        self.closed.send_replace(true);

        if let Some(handle) = self.reader_task.lock().take() {
            handle.abort();
        }

        // A write in progress drops the output stream itself once it
        // sees the session closed.
        if let Ok(mut writer) = self.writer.try_lock() {
            writer.take();
        }

        if let Some(mut transport) = self.transport.lock().take() {
            info!("Closing connection to {}", self.device.address);
            close_quietly(transport.as_mut());
        }
    }
}

async fn write_and_flush(writer: &mut BoxedWriter, bytes: &[u8]) -> io::Result<()> {
    writer.write_all(bytes).await?;
    writer.flush().await
}

fn session_closed() -> io::Error {
    io::Error::new(io::ErrorKind::NotConnected, "session is closed")
}

impl Drop for Session {
    fn drop(&mut self) {
        self.disconnect();
    }
}

/// Close a transport, logging instead of returning failures.
pub(crate) fn close_quietly(transport: &mut dyn Transport) {
    if let Err(e) = transport.close() {
        error!("close() of connect socket failed: {}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bluetooth::mock::MockTransport;
    use std::sync::atomic::Ordering;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn test_open_failure_closes_transport() {
        let transport = MockTransport::unavailable_streams();
        let closes = transport.close_counter();

        let result = Session::open(Box::new(transport), DeviceInfo::new("AA:BB:CC:DD:EE:FF"));
        assert!(result.is_err());
        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_disconnect_closes_once() {
        let transport = MockTransport::connected();
        let closes = transport.close_counter();

        let (session, _reader) =
            Session::open(Box::new(transport), DeviceInfo::new("AA:BB:CC:DD:EE:FF")).unwrap();
        session.disconnect();
        session.disconnect();
        drop(session);

        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_write_after_disconnect_fails() {
        let transport = MockTransport::connected();
        let (session, _reader) =
            Session::open(Box::new(transport), DeviceInfo::new("AA:BB:CC:DD:EE:FF")).unwrap();

        session.disconnect();
        let err = session.write(b"hi").await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotConnected);
    }

    #[tokio::test]
    async fn test_disconnect_fails_blocked_write() {
        let transport = MockTransport::connected();
        let closes = transport.close_counter();
        let (session, _reader) =
            Session::open(Box::new(transport), DeviceInfo::new("AA:BB:CC:DD:EE:FF")).unwrap();
        let session = Arc::new(session);

        // Nobody reads the peer end, so this fills the pipe and blocks.
        let write = {
            let session = session.clone();
            tokio::spawn(async move { session.write(&[0u8; 4096]).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!write.is_finished());

        session.disconnect();
        let err = tokio::time::timeout(Duration::from_secs(1), write)
            .await
            .unwrap()
            .unwrap()
            .unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotConnected);
        assert!(session.writer.lock().await.is_none());
        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_read_loop_reports_chunks_then_eof() {
        let transport = MockTransport::connected();
        let peer = transport.peer_slot();
        let (session, reader) =
            Session::open(Box::new(transport), DeviceInfo::new("AA:BB:CC:DD:EE:FF")).unwrap();

        let (tx, mut rx) = mpsc::unbounded_channel();
        session.start_reading(reader, 16, move |outcome| {
            let item = match outcome {
                ReadOutcome::Data(bytes) => Ok(bytes.to_vec()),
                ReadOutcome::Failed(e) => Err(e.kind()),
            };
            tx.send(item).is_ok()
        });

        let mut peer = peer.lock().take().unwrap();
        peer.write_all(b"hello").await.unwrap();
        let first = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(first, Ok(b"hello".to_vec()));

        drop(peer);
        let last = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(last, Err(io::ErrorKind::UnexpectedEof));
    }
}
