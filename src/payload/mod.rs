//! Payload sources the sending side streams from.
//!
//! A source is named, sized, hashable, and supports positioned reads so
//! several range workers can pull from it concurrently. All methods are
//! synchronous; session code drives them through `spawn_blocking`.

mod file;
mod staged;
mod text;

pub use file::FilePayload;
pub use staged::StagedPayload;
pub use text::TextPayload;

pub use crate::protocol::PayloadKind;

use std::io;

pub trait PayloadSource: Send + Sync {
    /// Display name advertised to the receiver. Receivers sanitize it
    /// before touching the filesystem.
    fn name(&self) -> &str;

    /// Exact payload length in bytes.
    fn size(&self) -> u64;

    fn kind(&self) -> PayloadKind;

    /// Hex-encoded SHA-256 over the entire payload. Implementations cache
    /// the result after the first computation.
    fn digest(&self) -> io::Result<String>;

    /// Read up to `buf.len()` bytes starting at `offset`. Returns the
    /// number of bytes read; 0 past the end. Must be safe to call from
    /// multiple threads at once.
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<usize>;
}

#[cfg(unix)]
pub(crate) fn read_file_at(file: &std::fs::File, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
    use std::os::unix::fs::FileExt;
    file.read_at(buf, offset)
}

#[cfg(windows)]
pub(crate) fn read_file_at(file: &std::fs::File, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
    use std::os::windows::fs::FileExt;
    file.seek_read(buf, offset)
}

/// Hash an entire file through positioned reads, leaving any cursor state
/// untouched.
pub(crate) fn hash_file(file: &std::fs::File) -> io::Result<String> {
    use sha2::{Digest, Sha256};

    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; 64 * 1024];
    let mut offset = 0u64;
    loop {
        let n = read_file_at(file, offset, &mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
        offset += n as u64;
    }
    Ok(hex::encode(hasher.finalize()))
}
