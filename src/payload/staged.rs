//! Payload staged into a temporary file before the session starts.
//!
//! This is the seam for synthesized payloads: an external archiver
//! materializes its output into a temp file, hands it over with a display
//! name, and the session treats it like any other file source. The temp
//! file is removed when the source is dropped.

use super::{hash_file, read_file_at, PayloadKind, PayloadSource};
use std::io;
use std::sync::{Mutex, PoisonError};
use tempfile::NamedTempFile;

pub struct StagedPayload {
    temp: NamedTempFile,
    name: String,
    size: u64,
    digest: Mutex<Option<String>>,
}

impl StagedPayload {
    pub fn new(name: impl Into<String>, temp: NamedTempFile) -> io::Result<Self> {
        let size = temp.as_file().metadata()?.len();
        Ok(Self {
            temp,
            name: name.into(),
            size,
            digest: Mutex::new(None),
        })
    }
}

impl PayloadSource for StagedPayload {
    fn name(&self) -> &str {
        &self.name
    }

    fn size(&self) -> u64 {
        self.size
    }

    fn kind(&self) -> PayloadKind {
        PayloadKind::File
    }

    fn digest(&self) -> io::Result<String> {
        let mut cached = self
            .digest
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(d) = cached.as_ref() {
            return Ok(d.clone());
        }
        let d = hash_file(self.temp.as_file())?;
        *cached = Some(d.clone());
        Ok(d)
    }

    fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
        read_file_at(self.temp.as_file(), offset, buf)
    }
}
