//! # Transport Abstraction
//!
//! A minimal, async interface for moving encoded messages between peers.
//!
//! ## Philosophy
//!
//! - **Byte-Oriented**: The Transport knows nothing about requests, responses or
//!   JSON. It moves opaque buffers, one message per call.
//! - **One Reader, Many Writers**: Each channel runs a single read loop, while
//!   sends may come from any number of concurrent callers. Implementations must
//!   serialize sends so two messages never interleave on the wire.

use std::fmt;

use tokio::io::AsyncRead;
use tokio::io::AsyncWrite;
use tokio::io::ReadHalf;
use tokio::io::WriteHalf;
use tokio::sync::Mutex;

use crate::frame;

/// Errors that occur at the stream/transport layer.
#[derive(Debug, Clone)]
pub enum Error {
    /// The stream ended or was dropped while a message was in flight.
    ConnectionLost(String),
    /// A frame exceeded the configured size limit.
    FrameTooLarge { len: usize, max: usize },
    /// Generic I/O error from the underlying stream.
    Io(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConnectionLost(msg) => write!(f, "Connection lost: {}", msg),
            Self::FrameTooLarge { len, max } => {
                write!(f, "Frame of {} bytes exceeds the {} byte limit", len, max)
            }
            Self::Io(msg) => write!(f, "I/O error: {}", msg),
        }
    }
}

impl std::error::Error for Error {}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        match e.kind() {
            std::io::ErrorKind::UnexpectedEof
            | std::io::ErrorKind::BrokenPipe
            | std::io::ErrorKind::ConnectionReset
            | std::io::ErrorKind::ConnectionAborted => Self::ConnectionLost(e.to_string()),
            _ => Self::Io(e.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Any established, bidirectional byte stream a channel can own.
///
/// Blanket-implemented for everything that qualifies: `TcpStream`,
/// `UnixStream`, `tokio::io::DuplexStream`, TLS wrappers, and so on.
pub trait ByteStream: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

impl<T> ByteStream for T where T: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

/// A mechanism to send and receive whole messages.
///
/// This trait is designed to be object-safe (`Arc<dyn Transport>`).
#[async_trait::async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Sends one message.
    ///
    /// # invariants
    /// - Concurrent sends must not interleave their bytes.
    /// - Must not interpret the payload.
    async fn send(&self, payload: &[u8]) -> Result<()>;

    /// Receives the next message.
    ///
    /// Returns `Ok(None)` once the peer has closed the stream cleanly.
    async fn recv(&self) -> Result<Option<Vec<u8>>>;
}

/// Length-prefixed framing over any [`ByteStream`].
///
/// The stream is split into halves. Each half sits behind its own lock, so the
/// reader never blocks writers and writers take turns on the write-and-flush
/// sequence.
pub struct StreamTransport<S> {
    reader: Mutex<ReadHalf<S>>,
    writer: Mutex<WriteHalf<S>>,
    max_frame_len: u32,
}

impl<S: ByteStream> StreamTransport<S> {
    pub fn new(stream: S, max_frame_len: u32) -> Self {
        let (reader, writer) = tokio::io::split(stream);
        Self {
            reader: Mutex::new(reader),
            writer: Mutex::new(writer),
            max_frame_len,
        }
    }
}

#[async_trait::async_trait]
impl<S: ByteStream> Transport for StreamTransport<S> {
    async fn send(&self, payload: &[u8]) -> Result<()> {
        // fail locally instead of letting the peer tear the connection down
        if payload.len() > self.max_frame_len as usize {
            return Err(Error::FrameTooLarge {
                len: payload.len(),
                max: self.max_frame_len as usize,
            });
        }

        let mut writer = self.writer.lock().await;
        frame::write_frame(&mut *writer, payload).await
    }

    async fn recv(&self) -> Result<Option<Vec<u8>>> {
        let mut reader = self.reader.lock().await;
        frame::read_frame(&mut *reader, self.max_frame_len).await
    }
}
