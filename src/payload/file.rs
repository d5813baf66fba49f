//! Local file payload source.

use super::{hash_file, read_file_at, PayloadKind, PayloadSource};
use std::fs::{File, TryLockError};
use std::io;
use std::path::Path;
use std::sync::{Mutex, PoisonError};

pub struct FilePayload {
    file: File,
    name: String,
    size: u64,
    digest: Mutex<Option<String>>,
}

impl FilePayload {
    /// Open `path` for the duration of a session. A shared advisory lock is
    /// taken best-effort; failure to lock only produces a warning, since
    /// plenty of filesystems refuse advisory locks entirely.
    pub fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)?;
        let size = file.metadata()?.len();
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "payload".to_string());

        match file.try_lock_shared() {
            Ok(()) => tracing::debug!(path = %path.display(), "holding shared lock on source"),
            Err(TryLockError::WouldBlock) => tracing::warn!(
                path = %path.display(),
                "source file is in use by another process; writes during the transfer may corrupt the payload"
            ),
            Err(TryLockError::Error(e)) => {
                tracing::debug!(path = %path.display(), "advisory lock unavailable: {e}")
            }
        }

        Ok(Self {
            file,
            name,
            size,
            digest: Mutex::new(None),
        })
    }
}

impl PayloadSource for FilePayload {
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
        let d = hash_file(&self.file)?;
        *cached = Some(d.clone());
        Ok(d)
    }

    fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
        read_file_at(&self.file, offset, buf)
    }
}
