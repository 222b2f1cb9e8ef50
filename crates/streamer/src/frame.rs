//! # Message Framing
//!
//! Every encoded message travels as one frame:
//!
//! ```text
//! [4 bytes] payload length (big-endian u32)
//! [N bytes] payload (one UTF-8 JSON object)
//! ```
//!
//! ## Invariants
//! - A reader consumes exactly one frame per call, never more.
//! - A clean end of stream is only recognized on a frame boundary. A stream that
//!   ends inside a header or payload is a lost connection.

use tokio::io::AsyncRead;
use tokio::io::AsyncReadExt;
use tokio::io::AsyncWrite;
use tokio::io::AsyncWriteExt;

use crate::transport::Error;
use crate::transport::Result;

const HEADER_LEN: usize = 4;

/// Reads the next frame.
///
/// Returns `Ok(None)` if the stream ended before the first header byte.
pub async fn read_frame<R>(reader: &mut R, max_len: u32) -> Result<Option<Vec<u8>>>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut header = [0u8; HEADER_LEN];
    let mut filled = 0;
    while filled < HEADER_LEN {
        let n = reader.read(&mut header[filled..]).await?;
        if n == 0 {
            if filled == 0 {
                return Ok(None);
            }
            return Err(Error::ConnectionLost(format!(
                "stream ended after {} of {} header bytes",
                filled, HEADER_LEN
            )));
        }
        filled += n;
    }

    let len = u32::from_be_bytes(header);
    if len > max_len {
        return Err(Error::FrameTooLarge {
            len: len as usize,
            max: max_len as usize,
        });
    }

    let mut payload = vec![0u8; len as usize];
    reader.read_exact(&mut payload).await?;
    Ok(Some(payload))
}

/// Writes one frame and flushes it.
pub async fn write_frame<W>(writer: &mut W, payload: &[u8]) -> Result<()>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    let len = u32::try_from(payload.len()).map_err(|_| Error::FrameTooLarge {
        len: payload.len(),
        max: u32::MAX as usize,
    })?;

    writer.write_all(&len.to_be_bytes()).await?;
    writer.write_all(payload).await?;
    writer.flush().await?;
    Ok(())
}
