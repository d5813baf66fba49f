//! Resumable range journal.
//!
//! A JSON side-car next to the parallel partial artifact records which
//! byte ranges have landed on disk. The partition is fixed at creation:
//! resuming with a different worker count adopts the persisted layout
//! rather than re-slicing ranges that are already complete.

use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// One contiguous half-open interval `[start, start + length)` of the
/// artifact, owned by a single worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RangeEntry {
    pub id: usize,
    pub start: u64,
    pub length: u64,
    pub done: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct JournalState {
    total_size: u64,
    chunks: Vec<RangeEntry>,
}

pub struct RangeJournal {
    path: PathBuf,
    state: JournalState,
}

impl RangeJournal {
    /// Load the journal at `path` if it exists and matches `total_size`,
    /// otherwise create a fresh partition of `[0, total_size)` into
    /// `workers` near-equal ranges (the last absorbs the remainder) and
    /// persist it immediately. The boolean reports whether an existing
    /// journal was adopted.
    pub fn open_or_init(path: &Path, total_size: u64, workers: usize) -> io::Result<(Self, bool)> {
        if let Ok(data) = fs::read(path) {
            if let Ok(state) = serde_json::from_slice::<JournalState>(&data) {
                if state.total_size == total_size && partition_is_valid(&state) {
                    return Ok((
                        Self {
                            path: path.to_path_buf(),
                            state,
                        },
                        true,
                    ));
                }
            }
        }

        let state = JournalState {
            total_size,
            chunks: partition(total_size, workers),
        };
        let journal = Self {
            path: path.to_path_buf(),
            state,
        };
        journal.persist()?;
        Ok((journal, false))
    }

    pub fn total_size(&self) -> u64 {
        self.state.total_size
    }

    pub fn ranges(&self) -> &[RangeEntry] {
        &self.state.chunks
    }

    pub fn worker_count(&self) -> usize {
        self.state.chunks.len()
    }

    pub fn completed_bytes(&self) -> u64 {
        self.state
            .chunks
            .iter()
            .filter(|c| c.done)
            .map(|c| c.length)
            .sum()
    }

    pub fn is_complete(&self) -> bool {
        self.state.chunks.iter().all(|c| c.done)
    }

    pub fn incomplete(&self) -> Vec<RangeEntry> {
        self.state
            .chunks
            .iter()
            .filter(|c| !c.done)
            .cloned()
            .collect()
    }

    /// Flip range `id` to done and persist. The file is re-read first so a
    /// layout written by an earlier run is never clobbered from stale
    /// memory; callers serialize these calls behind one lock.
    pub fn mark_done(&mut self, id: usize) -> io::Result<()> {
        if let Ok(data) = fs::read(&self.path) {
            if let Ok(state) = serde_json::from_slice::<JournalState>(&data) {
                if state.total_size == self.state.total_size
                    && state.chunks.len() == self.state.chunks.len()
                {
                    self.state = state;
                }
            }
        }

        let entry = self
            .state
            .chunks
            .get_mut(id)
            .ok_or_else(|| io::Error::other(format!("journal has no range {id}")))?;
        entry.done = true;
        self.persist()
    }

    pub fn remove(&self) -> io::Result<()> {
        fs::remove_file(&self.path)
    }

    fn persist(&self) -> io::Result<()> {
        let data = serde_json::to_vec(&self.state).map_err(io::Error::other)?;
        let mut tmp = self.path.as_os_str().to_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);
        fs::write(&tmp, data)?;
        fs::rename(&tmp, &self.path)
    }
}

fn partition(total_size: u64, workers: usize) -> Vec<RangeEntry> {
    if total_size == 0 {
        return Vec::new();
    }
    let workers = (workers.max(1) as u64).min(total_size);
    let span = total_size / workers;
    (0..workers)
        .map(|i| {
            let start = i * span;
            let length = if i == workers - 1 {
                total_size - start
            } else {
                span
            };
            RangeEntry {
                id: i as usize,
                start,
                length,
                done: false,
            }
        })
        .collect()
}

/// Ranges must tile `[0, total_size)` exactly, in order, with no gaps.
fn partition_is_valid(state: &JournalState) -> bool {
    let mut cursor = 0u64;
    for (i, c) in state.chunks.iter().enumerate() {
        if c.id != i || c.start != cursor || c.length == 0 {
            return false;
        }
        cursor = match cursor.checked_add(c.length) {
            Some(v) => v,
            None => return false,
        };
    }
    cursor == state.total_size
}
