//! Line transports: TCP streams and serial devices
//!
//! Both transports hand out complete lines with a bounded wait so the worker
//! loop can observe stop requests while the source is silent. Reads go
//! through [`LineBuffer`], which makes an interrupted wait lossless: bytes
//! already received stay buffered until their line is complete.

use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;
use serialport::{DataBits, FlowControl, Parity, SerialPort, StopBits};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;

use super::protocol::LineBuffer;

/// Bytes requested per read from the underlying handle.
const READ_CHUNK: usize = 1024;

/// Transport-level failures. Each one ends the worker's streaming state.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Connection failed: {0}")]
    ConnectFailed(String),

    #[error("Timeout while opening transport")]
    Timeout,

    #[error("Connection closed by peer")]
    Closed,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),
}

/// A bidirectional, line-oriented link to one data source.
#[async_trait]
pub trait LineTransport: Send + 'static {
    /// Wait up to `wait` for the next complete line.
    ///
    /// `Ok(None)` means the wait elapsed without a full line.
    async fn read_line(&mut self, wait: Duration) -> Result<Option<String>, TransportError>;

    /// Send one line; a trailing newline is added when missing.
    async fn write_line(&mut self, line: &str) -> Result<(), TransportError>;

    /// Release the underlying handle. Safe to call more than once.
    async fn close(&mut self);

    /// Whether the peer understands the `STOP` handshake.
    fn supports_handshake(&self) -> bool;

    /// Human-readable description for status messages.
    fn describe(&self) -> &str;
}

// ============================================================================
// Stream Transport (TCP)
// ============================================================================

/// Line transport over any async byte stream.
///
/// Production code uses `StreamTransport<TcpStream>`; tests plug in mock streams.
pub struct StreamTransport<S> {
    stream: Option<S>,
    buffer: LineBuffer,
    label: String,
    eof: bool,
}

impl<S> StreamTransport<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    pub fn new(stream: S, label: impl Into<String>) -> Self {
        Self {
            stream: Some(stream),
            buffer: LineBuffer::new(),
            label: label.into(),
            eof: false,
        }
    }
}

impl StreamTransport<TcpStream> {
    /// Connect to a line-protocol producer with a bounded timeout.
    pub async fn connect(addr: SocketAddr, timeout: Duration) -> Result<Self, TransportError> {
        tracing::info!(address = %addr, "Connecting to telemetry source");

        let stream = tokio::time::timeout(timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| TransportError::Timeout)?
            .map_err(|e| TransportError::ConnectFailed(e.to_string()))?;

        if let Err(e) = stream.set_nodelay(true) {
            tracing::debug!(address = %addr, error = %e, "Could not disable Nagle on source socket");
        }

        // Keepalive only reaps half-open sockets; liveness itself is judged
        // by record cadence in the watchdog.
        let sock_ref = socket2::SockRef::from(&stream);
        let keepalive = socket2::TcpKeepalive::new()
            .with_time(Duration::from_secs(30))
            .with_interval(Duration::from_secs(10));
        if let Err(e) = sock_ref.set_tcp_keepalive(&keepalive) {
            tracing::debug!(address = %addr, error = %e, "Could not enable TCP keepalive");
        }

        Ok(Self::new(stream, format!("tcp://{addr}")))
    }
}

#[async_trait]
impl<S> LineTransport for StreamTransport<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    async fn read_line(&mut self, wait: Duration) -> Result<Option<String>, TransportError> {
        if let Some(line) = self.buffer.next_line() {
            return Ok(Some(line));
        }

        if self.eof {
            return Err(TransportError::Closed);
        }

        let stream = self.stream.as_mut().ok_or(TransportError::Closed)?;
        let mut chunk = [0u8; READ_CHUNK];

        match tokio::time::timeout(wait, stream.read(&mut chunk)).await {
            Err(_) => Ok(self.buffer.take_stop()),
            Ok(Ok(0)) => {
                // The peer's last line may lack its terminator
                self.eof = true;
                self.buffer.take_partial().map(Some).ok_or(TransportError::Closed)
            }
            Ok(Ok(n)) => {
                self.buffer.extend(&chunk[..n]);
                Ok(self.buffer.next_line().or_else(|| self.buffer.take_stop()))
            }
            Ok(Err(e)) => Err(TransportError::Io(e)),
        }
    }

    async fn write_line(&mut self, line: &str) -> Result<(), TransportError> {
        let stream = self.stream.as_mut().ok_or(TransportError::Closed)?;
        stream.write_all(line.as_bytes()).await?;
        if !line.ends_with('\n') {
            stream.write_all(b"\n").await?;
        }
        stream.flush().await?;
        Ok(())
    }

    async fn close(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            let _ = stream.shutdown().await;
        }
    }

    fn supports_handshake(&self) -> bool {
        true
    }

    fn describe(&self) -> &str {
        &self.label
    }
}

// ============================================================================
// Serial Transport
// ============================================================================

/// Line transport over a serial device (8N1, no flow control).
///
/// `serialport` is blocking, so every read and write runs on the blocking
/// pool with the port moved in and handed back afterwards.
pub struct SerialTransport {
    port: Option<Box<dyn SerialPort>>,
    buffer: LineBuffer,
    label: String,
}

impl SerialTransport {
    /// Open a serial device.
    ///
    /// # Arguments
    /// * `path` - Device path (e.g. "/dev/ttyUSB0", "COM3")
    /// * `baud_rate` - Baud rate (stations ship at 9600)
    pub async fn open(path: &str, baud_rate: u32) -> Result<Self, TransportError> {
        let owned_path = path.to_string();
        let port = tokio::task::spawn_blocking(move || {
            serialport::new(&owned_path, baud_rate)
                .data_bits(DataBits::Eight)
                .parity(Parity::None)
                .stop_bits(StopBits::One)
                .flow_control(FlowControl::None)
                .timeout(Duration::from_millis(100))
                .open()
        })
        .await
        .map_err(|e| TransportError::ConnectFailed(e.to_string()))??;

        tracing::info!(path = %path, baud_rate, "Opened serial port");

        Ok(Self {
            port: Some(port),
            buffer: LineBuffer::new(),
            label: format!("hardware at {path}"),
        })
    }
}

#[async_trait]
impl LineTransport for SerialTransport {
    async fn read_line(&mut self, wait: Duration) -> Result<Option<String>, TransportError> {
        if let Some(line) = self.buffer.next_line() {
            return Ok(Some(line));
        }

        let mut port = self.port.take().ok_or(TransportError::Closed)?;
        let (port, result) = tokio::task::spawn_blocking(move || {
            use std::io::Read;
            let mut chunk = [0u8; READ_CHUNK];
            let result = port
                .set_timeout(wait)
                .map_err(TransportError::from)
                .and_then(|()| match port.read(&mut chunk) {
                    Ok(n) => Ok(chunk[..n].to_vec()),
                    Err(e) if e.kind() == std::io::ErrorKind::TimedOut => Ok(Vec::new()),
                    Err(e) => Err(TransportError::Io(e)),
                });
            (port, result)
        })
        .await
        .map_err(|e| TransportError::Io(std::io::Error::other(e.to_string())))?;

        self.port = Some(port);
        let bytes = result?;
        self.buffer.extend(&bytes);
        Ok(self.buffer.next_line().or_else(|| self.buffer.take_stop()))
    }

    async fn write_line(&mut self, line: &str) -> Result<(), TransportError> {
        let mut port = self.port.take().ok_or(TransportError::Closed)?;
        let mut payload = line.as_bytes().to_vec();
        if !line.ends_with('\n') {
            payload.push(b'\n');
        }

        let (port, result) = tokio::task::spawn_blocking(move || {
            use std::io::Write;
            let result = port.write_all(&payload).and_then(|()| port.flush());
            (port, result)
        })
        .await
        .map_err(|e| TransportError::Io(std::io::Error::other(e.to_string())))?;

        self.port = Some(port);
        result.map_err(TransportError::Io)
    }

    async fn close(&mut self) {
        // Dropping the boxed port closes the device
        self.port.take();
    }

    fn supports_handshake(&self) -> bool {
        false
    }

    fn describe(&self) -> &str {
        &self.label
    }
}
