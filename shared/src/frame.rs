//! Newline-delimited framing over a reliable byte stream
//!
//! A frame is the run of bytes between two `\n` delimiters. The delimiter is
//! never part of a payload: reading strips it, writing appends exactly one.
//! A single read from the underlying stream may carry several frames, or a
//! fraction of one, so [`FrameReader`] keeps a per-stream buffer and hands
//! out complete payloads regardless of how the bytes arrived.

use std::io;

use bytes::{Buf, BytesMut};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Frame delimiter on the wire. Must never appear inside a payload.
pub const DELIMITER: u8 = b'\n';

/// Initial capacity of the per-stream read buffer.
const READ_BUF_CAPACITY: usize = 4 * 1024;

/// Errors surfaced by the framing layer
#[derive(Debug, Error)]
pub enum FrameError {
    /// The peer closed the stream between frames. This is the ordinary way
    /// a connection ends.
    #[error("peer closed the connection")]
    PeerClosed,

    /// The stream ended while a partial frame was buffered.
    #[error("stream closed mid-frame")]
    Truncated,

    /// Any error reported by the underlying stream.
    #[error("stream error: {0}")]
    Io(#[from] io::Error),
}

/// Buffered frame reader over one half of a byte stream
///
/// Owns the stream half and the pending-read buffer for it. The buffer
/// survives across calls, so bytes that arrive after a delimiter are kept
/// for the next frame rather than dropped.
#[derive(Debug)]
pub struct FrameReader<R> {
    stream: R,
    buf: BytesMut,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    /// Wraps a stream half with an empty pending-read buffer.
    pub fn new(stream: R) -> Self {
        Self {
            stream,
            buf: BytesMut::with_capacity(READ_BUF_CAPACITY),
        }
    }

    /// Reads the next frame, excluding the delimiter.
    ///
    /// Suspends until a full frame is buffered. Fails with
    /// [`FrameError::PeerClosed`] on end-of-file at a frame boundary and
    /// [`FrameError::Truncated`] on end-of-file mid-frame.
    pub async fn read_frame(&mut self) -> Result<Vec<u8>, FrameError> {
        loop {
            if let Some(pos) = self.buf.iter().position(|&b| b == DELIMITER) {
                let payload = self.buf.split_to(pos).to_vec();
                self.buf.advance(1);
                return Ok(payload);
            }

            let n = self.stream.read_buf(&mut self.buf).await?;
            if n == 0 {
                return Err(if self.buf.is_empty() {
                    FrameError::PeerClosed
                } else {
                    FrameError::Truncated
                });
            }
        }
    }

    /// Reads one raw, unframed byte.
    ///
    /// The connection handshake and the logout acknowledgement are single
    /// bytes outside the frame regime. Buffered bytes are consumed first so
    /// that both framings can share the stream.
    pub async fn read_byte(&mut self) -> Result<u8, FrameError> {
        if let Some(&b) = self.buf.first() {
            self.buf.advance(1);
            return Ok(b);
        }

        let mut byte = [0u8; 1];
        match self.stream.read_exact(&mut byte).await {
            Ok(_) => Ok(byte[0]),
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Err(FrameError::PeerClosed),
            Err(e) => Err(e.into()),
        }
    }
}

/// Writes one payload as a single delimited frame.
///
/// The payload and its delimiter are submitted as one `write_all`, which
/// retries short writes until every byte is delivered.
pub async fn write_frame<W: AsyncWrite + Unpin>(
    writer: &mut W,
    payload: &[u8],
) -> io::Result<()> {
    debug_assert!(
        !payload.contains(&DELIMITER),
        "frame payload must not contain the delimiter"
    );

    let mut frame = Vec::with_capacity(payload.len() + 1);
    frame.extend_from_slice(payload);
    frame.push(DELIMITER);
    writer.write_all(&frame).await?;
    writer.flush().await
}

/// Writes one raw, unframed byte (handshake status or logout ack).
pub async fn write_byte<W: AsyncWrite + Unpin>(writer: &mut W, byte: u8) -> io::Result<()> {
    writer.write_all(&[byte]).await?;
    writer.flush().await
}
