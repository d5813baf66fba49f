//! Frame codec.
//!
//! Every unit on the wire is a 5-byte header followed by the payload:
//!
//! ```text
//! kind: u8 | length: u32 (little-endian) | payload: length bytes
//! ```
//!
//! Frame kinds carry stable wire values; readers reject unknown kinds and
//! any length above [`MAX_FRAME_SIZE`].

use crate::error::{Result, TransferError};
use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Upper bound on a single frame payload (10 MiB). Data frames are far
/// smaller in practice; the bound exists to keep a corrupted or hostile
/// length field from driving an allocation.
pub const MAX_FRAME_SIZE: u32 = 10 * 1024 * 1024;

/// Size of the fixed frame header in bytes.
pub const HEADER_SIZE: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FrameKind {
    /// Authentication sub-message, exchanged before any application frame.
    Pake = 0,
    /// Payload metadata as UTF-8 JSON.
    Handshake = 1,
    /// Raw payload bytes.
    Data = 2,
    /// Acknowledgement, optionally carrying a resume offset.
    Ack = 3,
    /// Free-text diagnostic from the peer.
    Error = 4,
    /// Cooperative cancellation signal.
    Cancel = 5,
    /// Byte-range request for a parallel worker stream.
    RangeReq = 6,
}

impl FrameKind {
    pub fn from_u8(b: u8) -> Option<Self> {
        match b {
            0 => Some(Self::Pake),
            1 => Some(Self::Handshake),
            2 => Some(Self::Data),
            3 => Some(Self::Ack),
            4 => Some(Self::Error),
            5 => Some(Self::Cancel),
            6 => Some(Self::RangeReq),
            _ => None,
        }
    }
}

/// Write one frame. The payload is written verbatim after the header.
pub async fn write_frame<W: AsyncWrite + Unpin>(
    w: &mut W,
    kind: FrameKind,
    payload: &[u8],
) -> Result<()> {
    if payload.len() > MAX_FRAME_SIZE as usize {
        return Err(TransferError::Protocol(format!(
            "frame payload of {} bytes exceeds the {} byte limit",
            payload.len(),
            MAX_FRAME_SIZE
        )));
    }
    w.write_u8(kind as u8).await.map_err(write_failed)?;
    w.write_u32_le(payload.len() as u32)
        .await
        .map_err(write_failed)?;
    w.write_all(payload).await.map_err(write_failed)?;
    Ok(())
}

/// Read one frame, or `None` if the stream ended cleanly before a header
/// byte arrived. A stream that ends anywhere inside a frame is malformed.
pub async fn try_read_frame<R: AsyncRead + Unpin>(r: &mut R) -> Result<Option<(FrameKind, Bytes)>> {
    let kind = match r.read_u8().await {
        Ok(b) => b,
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(TransferError::Interrupted(e.to_string())),
    };
    let kind = FrameKind::from_u8(kind)
        .ok_or_else(|| TransferError::Protocol(format!("unknown frame kind {kind}")))?;

    let len = r
        .read_u32_le()
        .await
        .map_err(|e| truncated("frame length", e))?;
    if len > MAX_FRAME_SIZE {
        return Err(TransferError::Protocol(format!(
            "frame length {len} exceeds the {MAX_FRAME_SIZE} byte limit"
        )));
    }

    let mut payload = vec![0u8; len as usize];
    r.read_exact(&mut payload)
        .await
        .map_err(|e| truncated("frame payload", e))?;

    Ok(Some((kind, Bytes::from(payload))))
}

/// Read one frame, treating a clean end of stream as a protocol error.
/// Use where the state machine still expects traffic.
pub async fn read_frame<R: AsyncRead + Unpin>(r: &mut R) -> Result<(FrameKind, Bytes)> {
    try_read_frame(r)
        .await?
        .ok_or_else(|| TransferError::Protocol("unexpected end of stream".into()))
}

fn write_failed(e: std::io::Error) -> TransferError {
    TransferError::Interrupted(format!("frame write failed: {e}"))
}

fn truncated(what: &str, e: std::io::Error) -> TransferError {
    if e.kind() == std::io::ErrorKind::UnexpectedEof {
        TransferError::Protocol(format!("stream ended inside {what}"))
    } else {
        TransferError::Interrupted(e.to_string())
    }
}
