//! The default stream transport, surfaced as a channel pair.
//!
//! A connection is pumped by two tasks: a writer draining an outbound queue
//! (which serializes all frame writes) and a reader pushing complete frames
//! inbound. The session side holds only the [`FrameSender`] and
//! [`FrameReceiver`] halves — dropping both ends the pumps and closes the
//! stream.

use std::io;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::sync::mpsc;

use crate::frame::{read_frame, write_frame};
use crate::WireError;

const QUEUE_DEPTH: usize = 64;

/// Sending half of a connection. Cheap to clone.
#[derive(Clone)]
pub struct FrameSender {
    tx: mpsc::Sender<Vec<u8>>,
}

impl FrameSender {
    /// Queue one frame for transmission.
    ///
    /// Applies backpressure when the writer falls behind; fails with
    /// [`WireError::ChannelClosed`] once the connection is gone.
    pub async fn send(&self, frame: Vec<u8>) -> Result<(), WireError> {
        self.tx.send(frame).await.map_err(|_| WireError::ChannelClosed)
    }

    /// Whether the connection is still writable.
    pub fn is_open(&self) -> bool {
        !self.tx.is_closed()
    }
}

/// Receiving half of a connection; owned by the sole reader.
pub struct FrameReceiver {
    rx: mpsc::Receiver<Vec<u8>>,
}

impl FrameReceiver {
    /// The next complete frame, or `None` once the peer closed or the stream
    /// failed.
    pub async fn recv(&mut self) -> Option<Vec<u8>> {
        self.rx.recv().await
    }
}

/// Spawn the reader/writer pumps for `stream` and return the channel pair.
///
/// Works over any bidirectional byte stream; tests use an in-memory duplex.
pub fn spawn_stream_pump<S>(stream: S, max_frame: usize) -> (FrameSender, FrameReceiver)
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let (mut read_half, mut write_half) = tokio::io::split(stream);
    let (out_tx, mut out_rx) = mpsc::channel::<Vec<u8>>(QUEUE_DEPTH);
    let (in_tx, in_rx) = mpsc::channel::<Vec<u8>>(QUEUE_DEPTH);

    tokio::spawn(async move {
        while let Some(frame) = out_rx.recv().await {
            if let Err(e) = write_frame(&mut write_half, &frame, max_frame).await {
                log::warn!("[tether] frame write failed: {e}");
                break;
            }
        }
        // Either the session dropped its sender or the write failed; the
        // write half drops here and the peer sees EOF.
    });

    tokio::spawn(async move {
        loop {
            match read_frame(&mut read_half, max_frame).await {
                Ok(Some(frame)) => {
                    if in_tx.send(frame).await.is_err() {
                        break;
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    log::warn!("[tether] frame read failed: {e}");
                    break;
                }
            }
        }
    });

    (FrameSender { tx: out_tx }, FrameReceiver { rx: in_rx })
}

/// Dial `addr` and pump the resulting TCP stream.
pub async fn connect_tcp(addr: &str, max_frame: usize) -> io::Result<(FrameSender, FrameReceiver)> {
    let stream = TcpStream::connect(addr).await?;
    stream.set_nodelay(true)?;
    Ok(spawn_stream_pump(stream, max_frame))
}
