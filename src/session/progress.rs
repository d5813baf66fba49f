//! Session events and progress accounting.
//!
//! Events flow over a bounded channel with lossy sends; a slow or absent
//! consumer never stalls the data plane.

use std::time::{Duration, Instant};
use tokio::sync::mpsc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferMode {
    Sequential,
    Parallel(usize),
}

impl std::fmt::Display for TransferMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sequential => write!(f, "sequential"),
            Self::Parallel(n) => write!(f, "parallel x{n}"),
        }
    }
}

/// A point-in-time snapshot of a running transfer.
#[derive(Debug, Clone)]
pub struct Progress {
    pub bytes_done: u64,
    pub total: u64,
    /// Bytes per second, measured over this session only (resumed bytes
    /// count toward `bytes_done` but not the rate).
    pub throughput: f64,
    pub eta: Duration,
    pub mode: TransferMode,
}

#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// Human-readable milestone.
    Status(String),
    Progress(Progress),
    /// A received text payload, surfaced instead of an artifact.
    Text(String),
}

#[derive(Clone)]
pub(crate) struct Reporter {
    tx: Option<mpsc::Sender<SessionEvent>>,
}

impl Reporter {
    pub fn new(tx: Option<mpsc::Sender<SessionEvent>>) -> Self {
        Self { tx }
    }

    pub fn status(&self, msg: impl Into<String>) {
        self.event(SessionEvent::Status(msg.into()));
    }

    pub fn event(&self, event: SessionEvent) {
        if let Some(tx) = &self.tx {
            let _ = tx.try_send(event);
        }
    }
}

pub(crate) struct ProgressMeter {
    started: Instant,
    baseline: u64,
    total: u64,
    mode: TransferMode,
}

impl ProgressMeter {
    pub fn new(baseline: u64, total: u64, mode: TransferMode) -> Self {
        Self {
            started: Instant::now(),
            baseline,
            total,
            mode,
        }
    }

    pub fn snapshot(&self, bytes_done: u64) -> Progress {
        let elapsed = self.started.elapsed().as_secs_f64();
        let fresh = bytes_done.saturating_sub(self.baseline);
        let throughput = if elapsed > 0.0 {
            fresh as f64 / elapsed
        } else {
            0.0
        };
        let remaining = self.total.saturating_sub(bytes_done);
        let eta = if throughput > 1.0 {
            Duration::from_secs_f64(remaining as f64 / throughput)
        } else {
            Duration::ZERO
        };
        Progress {
            bytes_done,
            total: self.total,
            throughput,
            eta,
            mode: self.mode,
        }
    }
}
