//! In-process transports for the unit tests.

use tokio::sync::Mutex;
use tokio::sync::mpsc;

use crate::config::DEFAULT_MAX_FRAME_LEN;
use crate::transport;
use crate::transport::Transport;

/// One end of an in-process connection that carries whole frames.
///
/// Each end enforces its own frame limit on outgoing payloads, the same way
/// a `StreamTransport` does, so an oversized send fails locally and leaves
/// the connection usable. Dropping an end is a clean end of stream for the
/// other end.
pub struct MessageTransport {
    outbox: mpsc::UnboundedSender<Vec<u8>>,
    inbox: Mutex<mpsc::UnboundedReceiver<Vec<u8>>>,
    max_frame_len: u32,
}

impl MessageTransport {
    /// Two connected ends with the default frame limit.
    pub fn pair() -> (Self, Self) {
        Self::pair_with_limit(DEFAULT_MAX_FRAME_LEN)
    }

    /// Two connected ends. The limit applies to what either end sends.
    pub fn pair_with_limit(max_frame_len: u32) -> (Self, Self) {
        let (to_right, from_left) = mpsc::unbounded_channel();
        let (to_left, from_right) = mpsc::unbounded_channel();

        let left = Self {
            outbox: to_right,
            inbox: Mutex::new(from_right),
            max_frame_len,
        };
        let right = Self {
            outbox: to_left,
            inbox: Mutex::new(from_left),
            max_frame_len,
        };
        (left, right)
    }
}

#[async_trait::async_trait]
impl Transport for MessageTransport {
    async fn send(&self, payload: &[u8]) -> transport::Result<()> {
        if payload.len() > self.max_frame_len as usize {
            return Err(transport::Error::FrameTooLarge {
                len: payload.len(),
                max: self.max_frame_len as usize,
            });
        }
        self.outbox
            .send(payload.to_vec())
            .map_err(|_| transport::Error::ConnectionLost("peer closed the channel".into()))
    }

    async fn recv(&self) -> transport::Result<Option<Vec<u8>>> {
        Ok(self.inbox.lock().await.recv().await)
    }
}

/// A transport whose reads fail immediately and whose writes vanish.
pub struct BrokenTransport;

#[async_trait::async_trait]
impl Transport for BrokenTransport {
    async fn send(&self, _payload: &[u8]) -> transport::Result<()> {
        Ok(())
    }

    async fn recv(&self) -> transport::Result<Option<Vec<u8>>> {
        Err(transport::Error::Io("read failed".into()))
    }
}
