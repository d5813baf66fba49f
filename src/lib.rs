//! ferry — peer-to-peer payload transfer authenticated by a short code.
//!
//! Two endpoints that share nothing but a short human-readable code move
//! one payload between them over a multiplexed QUIC connection. Every
//! stream is gated by a memory-hard mutual authentication handshake, data
//! travels as length-prefixed frames, large payloads fan out across
//! parallel byte-range streams, and a persisted journal lets an
//! interrupted parallel transfer resume where it stopped.
//!
//! The crate is a library: discovery, archiving, and any user interface
//! live with the caller. The entry points are [`run_sender`] /
//! [`run_receiver`] for callers that bring their own connection, and
//! [`serve`] / [`receive`] for the bundled QUIC transport.

pub mod auth;
pub mod error;
pub mod payload;
pub mod protocol;
pub mod session;
pub mod sink;
pub mod transport;

pub use error::TransferError;
pub use payload::{FilePayload, PayloadKind, PayloadSource, StagedPayload, TextPayload};
pub use session::{
    receive, run_receiver, run_sender, serve, Progress, Received, SessionEvent, SessionOptions,
    TransferMode,
};

/// Largest Data frame payload a sender produces.
pub const DATA_CHUNK_SIZE: usize = 64 * 1024;

/// Payload size above which receivers switch to parallel range streams.
pub const PARALLEL_THRESHOLD: u64 = 100 * 1024 * 1024;

/// Parallel worker count when the caller does not pick one.
pub const DEFAULT_CONCURRENCY: usize = 4;

/// Largest accepted text payload.
pub const TEXT_SIZE_LIMIT: u64 = 1024 * 1024;

/// Largest payload size a receiver accepts at all.
pub const MAX_PAYLOAD_SIZE: u64 = 4 << 40;

/// Overall session deadline when the caller does not pick one.
pub const DEFAULT_SESSION_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(600);
