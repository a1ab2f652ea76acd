//! Length-prefixed framing over a byte stream.
//!
//! Each frame on the wire is a 4-byte little-endian unsigned length `N`
//! followed by exactly `N` payload bytes. Reads are resumable: partial reads
//! accumulate until the full frame arrives; a zero-read before the first
//! length byte is a clean EOF.

use std::io;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::WireError;

/// Default cap on a single frame's payload.
pub const DEFAULT_MAX_FRAME_BYTES: usize = 128 * 1024 * 1024;

/// Hard ceiling no configuration may exceed.
pub const HARD_MAX_FRAME_BYTES: usize = 1024 * 1024 * 1024;

/// Clamp a configured frame cap into `1..=`[`HARD_MAX_FRAME_BYTES`].
/// Zero selects the default.
pub fn clamp_max_frame(configured: usize) -> usize {
    match configured {
        0 => DEFAULT_MAX_FRAME_BYTES,
        n => n.min(HARD_MAX_FRAME_BYTES),
    }
}

/// Write one frame. The caller must serialize writes per connection; the
/// transport pump does this by owning the write half exclusively.
pub async fn write_frame<W>(writer: &mut W, payload: &[u8], max: usize) -> Result<(), WireError>
where
    W: AsyncWrite + Unpin,
{
    if payload.len() > max {
        return Err(WireError::FrameTooLarge { len: payload.len(), max });
    }
    writer.write_all(&(payload.len() as u32).to_le_bytes()).await?;
    writer.write_all(payload).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one frame. Returns `Ok(None)` on a clean EOF (the peer closed
/// between frames); an EOF mid-frame is an error.
pub async fn read_frame<R>(reader: &mut R, max: usize) -> Result<Option<Vec<u8>>, WireError>
where
    R: AsyncRead + Unpin,
{
    let mut len_buf = [0u8; 4];
    let mut filled = 0;
    while filled < len_buf.len() {
        let n = reader.read(&mut len_buf[filled..]).await?;
        if n == 0 {
            if filled == 0 {
                return Ok(None);
            }
            return Err(WireError::Io(io::ErrorKind::UnexpectedEof.into()));
        }
        filled += n;
    }

    let len = u32::from_le_bytes(len_buf) as usize;
    if len > max {
        return Err(WireError::FrameTooLarge { len, max });
    }

    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).await?;
    Ok(Some(payload))
}
