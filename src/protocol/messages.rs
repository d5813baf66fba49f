//! Session message vocabulary above the frame codec.
//!
//! The handshake payload is UTF-8 JSON so unknown fields from newer peers
//! pass through harmlessly; the small control payloads (`Ack`, `RangeReq`)
//! are fixed-width little-endian integers.

use crate::error::{Result, TransferError};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};

/// Fallback artifact name when the advertised one cannot be trusted.
pub const FALLBACK_NAME: &str = "received_file";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PayloadKind {
    File,
    Text,
}

/// Payload metadata, sent by the sender on every authenticated stream.
///
/// `code` echoes the session code and is informational only; peers never
/// authenticate against it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferMeta {
    pub name: String,
    pub size: i64,
    #[serde(default)]
    pub code: String,
    /// Hex SHA-256 of the payload. Required; receivers verify it on every
    /// path before reporting success.
    pub hash: String,
    #[serde(rename = "type")]
    pub kind: PayloadKind,
}

impl TransferMeta {
    pub fn encode(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self)
            .map_err(|e| TransferError::Protocol(format!("metadata encoding failed: {e}")))
    }

    /// Parse and validate a handshake payload. `max_size` is the largest
    /// payload this receiver is configured to accept.
    pub fn decode(payload: &[u8], max_size: u64) -> Result<Self> {
        let meta: TransferMeta = serde_json::from_slice(payload)
            .map_err(|e| TransferError::Protocol(format!("invalid handshake metadata: {e}")))?;
        if meta.size < 0 {
            return Err(TransferError::Protocol(format!(
                "negative payload size {}",
                meta.size
            )));
        }
        if meta.size as u64 > max_size {
            return Err(TransferError::Protocol(format!(
                "payload size {} exceeds the configured maximum {max_size}",
                meta.size
            )));
        }
        if meta.hash.len() != 64 || !meta.hash.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(TransferError::Protocol(format!(
                "malformed payload digest {:?}",
                meta.hash
            )));
        }
        Ok(meta)
    }
}

/// Acknowledgement carrying the byte offset streaming should start from.
/// The zero-length legacy form decodes as offset 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ack {
    pub offset: i64,
}

impl Ack {
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(8);
        buf.put_i64_le(self.offset);
        buf.freeze()
    }

    pub fn decode(mut payload: Bytes) -> Result<Self> {
        match payload.remaining() {
            0 => Ok(Self { offset: 0 }),
            8 => {
                let offset = payload.get_i64_le();
                if offset < 0 {
                    return Err(TransferError::Protocol(format!(
                        "negative resume offset {offset}"
                    )));
                }
                Ok(Self { offset })
            }
            n => Err(TransferError::Protocol(format!(
                "acknowledgement payload must be 0 or 8 bytes, got {n}"
            ))),
        }
    }
}

/// Request for a half-open byte interval `[start, start + length)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RangeReq {
    pub start: i64,
    pub length: i64,
}

impl RangeReq {
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(16);
        buf.put_i64_le(self.start);
        buf.put_i64_le(self.length);
        buf.freeze()
    }

    pub fn decode(mut payload: Bytes) -> Result<Self> {
        if payload.remaining() != 16 {
            return Err(TransferError::Protocol(format!(
                "range request payload must be 16 bytes, got {}",
                payload.remaining()
            )));
        }
        let start = payload.get_i64_le();
        let length = payload.get_i64_le();
        if start < 0 || length <= 0 {
            return Err(TransferError::Protocol(format!(
                "invalid range request [{start}, {start}+{length})"
            )));
        }
        Ok(Self { start, length })
    }

    /// Validate the interval against the advertised payload size.
    pub fn check_within(&self, size: u64) -> Result<()> {
        let end = self
            .start
            .checked_add(self.length)
            .ok_or_else(|| TransferError::Protocol("range request overflows".into()))?;
        if end as u64 > size {
            return Err(TransferError::Protocol(format!(
                "range request [{}, {end}) exceeds payload size {size}",
                self.start
            )));
        }
        Ok(())
    }
}

/// Reduce an advertised payload name to a basename safe to create inside
/// the output directory. Anything empty, absolute, or carrying path
/// components is replaced with [`FALLBACK_NAME`].
pub fn sanitize_name(name: &str) -> String {
    let trimmed = name.trim();
    let base = trimmed
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or_default()
        .trim();
    if base.is_empty() || base == "." || base == ".." {
        FALLBACK_NAME.to_string()
    } else {
        base.to_string()
    }
}
