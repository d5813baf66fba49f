//! Transfer sessions.
//!
//! A session pairs one sender and one receiver over a multiplexed
//! connection. Every stream is individually authenticated by the code
//! handshake; the receiver picks sequential or parallel mode from the
//! advertised payload size and drives the transfer to a verified artifact.

mod parallel;
mod progress;
pub mod receiver;
pub mod sender;

pub use progress::{Progress, SessionEvent, TransferMode};
pub use receiver::{receive, run_receiver};
pub use sender::{run_sender, serve};

use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// What a completed receive session produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Received {
    /// A payload written, verified, and renamed into the output directory.
    File(PathBuf),
    /// A text payload, surfaced in memory only.
    Text(String),
}

#[derive(Clone)]
pub struct SessionOptions {
    /// Overall wall-clock budget for the session.
    pub timeout: Duration,
    /// Requested parallel worker count. A persisted journal layout from an
    /// earlier run takes precedence on resume.
    pub concurrency: usize,
    /// Payload size above which the receiver goes parallel.
    pub parallel_threshold: u64,
    /// Largest Data frame payload the sender produces.
    pub chunk_size: usize,
    /// Where progress and status events go, if anywhere.
    pub events: Option<mpsc::Sender<SessionEvent>>,
    /// Cooperative cancellation signal shared with the caller.
    pub cancel: CancellationToken,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            timeout: crate::DEFAULT_SESSION_TIMEOUT,
            concurrency: crate::DEFAULT_CONCURRENCY,
            parallel_threshold: crate::PARALLEL_THRESHOLD,
            chunk_size: crate::DATA_CHUNK_SIZE,
            events: None,
            cancel: CancellationToken::new(),
        }
    }
}

impl SessionOptions {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    pub fn with_parallel_threshold(mut self, threshold: u64) -> Self {
        self.parallel_threshold = threshold;
        self
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    pub fn with_events(mut self, tx: mpsc::Sender<SessionEvent>) -> Self {
        self.events = Some(tx);
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }
}
