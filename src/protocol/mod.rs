//! Wire protocol: frame codec and the session message vocabulary.
//!
//! A transfer stream speaks, in order: Pake frames (authentication), one
//! Handshake frame (metadata), one Ack or RangeReq (mode selection), then
//! Data frames until the requested extent is delivered. Cancel and Error
//! frames may interleave with Data.

pub mod frame;
pub mod messages;

pub use frame::{read_frame, try_read_frame, write_frame, FrameKind, HEADER_SIZE, MAX_FRAME_SIZE};
pub use messages::{sanitize_name, Ack, PayloadKind, RangeReq, TransferMeta, FALLBACK_NAME};
