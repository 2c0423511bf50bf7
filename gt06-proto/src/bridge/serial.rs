//! The serial transport seam: any byte-stream with line-termination
//! semantics suffices. One production implementation over `tokio-serial`,
//! one in-memory double for tests.

use async_trait::async_trait;
use std::io;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

/// How long `read_line` waits before reporting "no reply" again while the
/// port is closed. Without this, a closed port turns the bridge's reader
/// loop into a zero-cost select arm that resolves every iteration, pegging
/// a CPU core and flooding the event log.
const CLOSED_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Open/close, line write, and line read, as required by the bridge
/// collaborator contract.
#[async_trait]
pub trait SerialTransport: Send {
    async fn write_line(&mut self, line: &str) -> io::Result<()>;

    /// Reads the next line, trimmed of its `\n`/`\r\n` terminator.
    /// `Ok(None)` signals EOF (the link was closed).
    async fn read_line(&mut self) -> io::Result<Option<String>>;

    fn is_open(&self) -> bool;

    /// One synchronous reconnect attempt, used by the bridge when a
    /// command arrives while the link is closed. The default does
    /// nothing and reports failure; transports that can reopen
    /// themselves override it.
    async fn reconnect(&mut self) -> io::Result<()> {
        Err(io::Error::new(io::ErrorKind::NotConnected, "reconnect not supported"))
    }
}

/// Production transport: a USB/RS232 serial port opened through
/// `tokio-serial`, matching the `tokio_serial::SerialPortBuilderExt`
/// idiom used elsewhere in the retrieval pack's gateway-style repos.
pub struct TokioSerialTransport {
    path: String,
    baud_rate: u32,
    reader: Option<BufReader<tokio_serial::SerialStream>>,
    writer_path_open: bool,
}

impl TokioSerialTransport {
    pub fn new(path: impl Into<String>, baud_rate: u32) -> Self {
        Self { path: path.into(), baud_rate, reader: None, writer_path_open: false }
    }

    pub fn open(&mut self) -> io::Result<()> {
        use tokio_serial::SerialPortBuilderExt;
        let port = tokio_serial::new(&self.path, self.baud_rate).open_native_async()?;
        self.reader = Some(BufReader::new(port));
        self.writer_path_open = true;
        Ok(())
    }
}

#[async_trait]
impl SerialTransport for TokioSerialTransport {
    async fn write_line(&mut self, line: &str) -> io::Result<()> {
        let reader = self.reader.as_mut().ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "serial port not open"))?;
        let port = reader.get_mut();
        port.write_all(line.as_bytes()).await?;
        port.write_all(b"\n").await?;
        port.flush().await
    }

    async fn read_line(&mut self) -> io::Result<Option<String>> {
        let reader = match self.reader.as_mut() {
            Some(r) => r,
            None => {
                tokio::time::sleep(CLOSED_POLL_INTERVAL).await;
                return Ok(None);
            }
        };
        let mut line = String::new();
        let n = reader.read_line(&mut line).await?;
        if n == 0 {
            self.writer_path_open = false;
            return Ok(None);
        }
        Ok(Some(trim_line_terminator(&line)))
    }

    fn is_open(&self) -> bool {
        self.writer_path_open
    }

    async fn reconnect(&mut self) -> io::Result<()> {
        self.open()
    }
}

fn trim_line_terminator(line: &str) -> String {
    line.trim_end_matches('\n').trim_end_matches('\r').to_string()
}

/// In-memory double standing in for the microcontroller during tests:
/// lines written by the bridge are observable via `sent`, and test code
/// pushes canned replies into `replies` for the bridge's reader loop to
/// pick up.
#[cfg(any(test, feature = "test-util"))]
pub mod mock {
    use super::*;
    use std::collections::VecDeque;
    use tokio::sync::Mutex;

    pub struct MockSerial {
        pub sent: Vec<String>,
        pub replies: VecDeque<String>,
        pub open: bool,
        pub reconnect_ok: bool,
    }

    impl Default for MockSerial {
        fn default() -> Self {
            Self { sent: Vec::new(), replies: VecDeque::new(), open: false, reconnect_ok: true }
        }
    }

    /// Shared handle so test code can push replies while the bridge
    /// holds the other half.
    pub struct MockSerialHandle(pub std::sync::Arc<Mutex<MockSerial>>);

    impl MockSerialHandle {
        pub fn new() -> (Self, Self) {
            let shared = std::sync::Arc::new(Mutex::new(MockSerial { open: true, ..Default::default() }));
            (MockSerialHandle(shared.clone()), MockSerialHandle(shared))
        }

        pub async fn push_reply(&self, line: impl Into<String>) {
            self.0.lock().await.replies.push_back(line.into());
        }

        pub async fn sent_lines(&self) -> Vec<String> {
            self.0.lock().await.sent.clone()
        }

        pub async fn set_open(&self, open: bool) {
            self.0.lock().await.open = open;
        }

        pub async fn set_reconnect_ok(&self, ok: bool) {
            self.0.lock().await.reconnect_ok = ok;
        }
    }

    #[async_trait]
    impl SerialTransport for MockSerialHandle {
        async fn write_line(&mut self, line: &str) -> io::Result<()> {
            let mut guard = self.0.lock().await;
            if !guard.open {
                return Err(io::Error::new(io::ErrorKind::NotConnected, "mock serial closed"));
            }
            guard.sent.push(line.to_string());
            Ok(())
        }

        async fn read_line(&mut self) -> io::Result<Option<String>> {
            loop {
                {
                    let mut guard = self.0.lock().await;
                    if let Some(line) = guard.replies.pop_front() {
                        return Ok(Some(line));
                    }
                    if !guard.open {
                        return Ok(None);
                    }
                }
                tokio::time::sleep(std::time::Duration::from_millis(5)).await;
            }
        }

        fn is_open(&self) -> bool {
            self.0.try_lock().map(|g| g.open).unwrap_or(true)
        }

        async fn reconnect(&mut self) -> io::Result<()> {
            let mut guard = self.0.lock().await;
            if guard.reconnect_ok {
                guard.open = true;
                Ok(())
            } else {
                Err(io::Error::new(io::ErrorKind::NotConnected, "mock reconnect refused"))
            }
        }
    }
}
