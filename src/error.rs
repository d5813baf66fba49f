//! Error taxonomy for transfer sessions.
//!
//! Every failure a session can surface collapses into one of these kinds.
//! `Interrupted` and `Cancelled` leave the partial artifact and journal on
//! disk, so callers may re-run the session to resume.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, TransferError>;

#[derive(Debug, Error)]
pub enum TransferError {
    /// Malformed frame, unexpected frame kind, or a length outside the
    /// bounds the wire format allows. Fatal to the stream it occurred on.
    #[error("protocol violation: {0}")]
    Protocol(String),

    /// The peer failed our authentication challenge.
    #[error("authentication failed: wrong code")]
    WrongCode,

    /// We failed the peer's authentication challenge, or the peer walked
    /// away mid-handshake.
    #[error("peer authentication failed")]
    PeerAuthFailed,

    /// Idle or overall session deadline exceeded.
    #[error("session timed out")]
    Timeout,

    /// The transport broke mid-transfer. Partial artifact and journal are
    /// preserved; the session can be re-run to resume.
    #[error("transfer interrupted: {0}")]
    Interrupted(String),

    /// The finalized payload does not hash to the digest the sender
    /// advertised. The partial artifact is kept for inspection.
    #[error("integrity check failed: expected {expected}, got {actual}")]
    IntegrityFailed { expected: String, actual: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Cooperative cancellation, either end. Partial state is preserved.
    #[error("transfer cancelled")]
    Cancelled,
}

impl TransferError {
    /// Whether re-running the session can pick up where this one stopped.
    pub fn is_resumable(&self) -> bool {
        matches!(self, Self::Interrupted(_) | Self::Cancelled)
    }
}

pub(crate) fn task_panic(err: tokio::task::JoinError) -> TransferError {
    TransferError::Io(std::io::Error::other(err))
}
