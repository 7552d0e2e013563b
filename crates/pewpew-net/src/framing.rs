//! Length-prefixed frames on a byte stream.
//!
//! ```text
//! +-------------------+--------------------+
//! | length (4 bytes)  |   payload          |
//! | u32 little-endian |   (length bytes)   |
//! +-------------------+--------------------+
//! ```
//!
//! The length counts payload bytes only. An empty frame carries no event
//! and is skipped by both ends.

use bytes::{BufMut, Bytes, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

/// Size of the length prefix.
pub const LENGTH_PREFIX: usize = 4;

/// Limits for the framing layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameConfig {
    /// Largest payload accepted in either direction. Default: 1 MiB.
    pub max_payload_size: u32,
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            max_payload_size: 1_048_576,
        }
    }
}

/// Framing failures. Any of these ends the connection it happened on.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// Payload larger than [`FrameConfig::max_payload_size`].
    #[error("payload size {size} exceeds maximum {max}")]
    PayloadTooLarge {
        /// Announced or actual payload size.
        size: u64,
        /// Configured maximum.
        max: u32,
    },

    /// Peer closed the stream, possibly mid-frame.
    #[error("connection closed")]
    ConnectionClosed,

    /// Socket error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

fn check_size(size: u64, config: &FrameConfig) -> Result<(), FrameError> {
    if size > u64::from(config.max_payload_size) {
        return Err(FrameError::PayloadTooLarge {
            size,
            max: config.max_payload_size,
        });
    }
    Ok(())
}

fn eof_as_closed(e: std::io::Error) -> FrameError {
    if e.kind() == std::io::ErrorKind::UnexpectedEof {
        FrameError::ConnectionClosed
    } else {
        FrameError::Io(e)
    }
}

/// Read one frame and return its payload.
///
/// The announced length is checked before any payload byte is read, so an
/// oversized frame is rejected without buffering it.
pub async fn read_frame<R: AsyncReadExt + Unpin>(
    reader: &mut R,
    config: &FrameConfig,
) -> Result<Bytes, FrameError> {
    let mut len_buf = [0u8; LENGTH_PREFIX];
    reader.read_exact(&mut len_buf).await.map_err(eof_as_closed)?;

    let len = u32::from_le_bytes(len_buf);
    check_size(u64::from(len), config)?;

    let mut payload = BytesMut::zeroed(len as usize);
    if len > 0 {
        reader.read_exact(&mut payload).await.map_err(eof_as_closed)?;
    }
    Ok(payload.freeze())
}

/// Build a complete frame (prefix + payload) ready to be written as is.
pub fn encode_frame(payload: &[u8], config: &FrameConfig) -> Result<Bytes, FrameError> {
    check_size(payload.len() as u64, config)?;
    let mut frame = BytesMut::with_capacity(LENGTH_PREFIX + payload.len());
    frame.put_u32_le(payload.len() as u32);
    frame.put_slice(payload);
    Ok(frame.freeze())
}

/// Write one frame and flush.
pub async fn write_frame<W: AsyncWriteExt + Unpin>(
    writer: &mut W,
    payload: &[u8],
    config: &FrameConfig,
) -> Result<(), FrameError> {
    let frame = encode_frame(payload, config)?;
    writer.write_all(&frame).await?;
    writer.flush().await?;
    Ok(())
}
