//! Partial artifact handling on the receiving side.
//!
//! Bytes land in a `.partial` (sequential) or `.parallel.part` (parallel,
//! preallocated) file next to the eventual destination, and are renamed
//! into place only after the digest checks out.

use crate::error::{task_panic, Result};
use std::path::{Path, PathBuf};

pub fn partial_path(outdir: &Path, safe_name: &str) -> PathBuf {
    outdir.join(format!("{safe_name}.partial"))
}

pub fn parallel_data_path(outdir: &Path, safe_name: &str) -> PathBuf {
    outdir.join(format!("{safe_name}.parallel.part"))
}

pub fn journal_path(outdir: &Path, safe_name: &str) -> PathBuf {
    outdir.join(format!("{safe_name}.parallel.meta"))
}

/// Size the parallel partial to its final length so range workers can seek
/// anywhere inside it.
pub async fn preallocate(path: &Path, size: u64) -> Result<()> {
    let file = tokio::fs::OpenOptions::new()
        .write(true)
        .create(true)
        .open(path)
        .await?;
    file.set_len(size).await?;
    Ok(())
}

/// Hex-encoded SHA-256 of an on-disk file.
pub async fn file_digest(path: &Path) -> Result<String> {
    let path = path.to_path_buf();
    let digest = tokio::task::spawn_blocking(move || -> std::io::Result<String> {
        let file = std::fs::File::open(&path)?;
        crate::payload::hash_file(&file)
    })
    .await
    .map_err(task_panic)??;
    Ok(digest)
}

/// Move a verified partial into place. On name collision the suffix
/// ` (1)`, ` (2)`, … is inserted before the extension.
pub async fn finalize(partial: &Path, outdir: &Path, safe_name: &str) -> Result<PathBuf> {
    let (stem, ext) = split_extension(safe_name);
    let mut final_path = outdir.join(safe_name);
    let mut counter = 0u32;
    while tokio::fs::try_exists(&final_path).await? {
        counter += 1;
        final_path = outdir.join(format!("{stem} ({counter}){ext}"));
    }
    tokio::fs::rename(partial, &final_path).await?;
    Ok(final_path)
}

fn split_extension(name: &str) -> (&str, &str) {
    match name.rfind('.') {
        Some(i) if i > 0 => (&name[..i], &name[i..]),
        _ => (name, ""),
    }
}
