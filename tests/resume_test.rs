//! Resume behavior: sequential partials, parallel journals, and layout
//! adoption when a resume asks for a different worker count.

mod common;

use common::{dial, pattern_payload, spawn_sender};
use ferry::sink::RangeJournal;
use ferry::{FilePayload, Received, SessionEvent, SessionOptions, TransferError};
use std::fs;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

fn short_opts() -> SessionOptions {
    SessionOptions::default().with_timeout(Duration::from_secs(60))
}

#[tokio::test]
async fn test_parallel_resume_transfers_only_missing_ranges() -> anyhow::Result<()> {
    let content = pattern_payload(1_200_000);
    let src_dir = TempDir::new()?;
    let src_path = src_dir.path().join("sample.bin");
    fs::write(&src_path, &content)?;

    let outdir = TempDir::new()?;

    // Seed the state a killed four-way download would leave behind:
    // ranges 0 and 2 complete on disk, 1 and 3 untouched.
    let journal_path = outdir.path().join("sample.bin.parallel.meta");
    let (mut journal, adopted) =
        RangeJournal::open_or_init(&journal_path, content.len() as u64, 4)?;
    assert!(!adopted);
    let ranges = journal.ranges().to_vec();

    let mut part = vec![0u8; content.len()];
    for done in [&ranges[0], &ranges[2]] {
        let start = done.start as usize;
        let end = start + done.length as usize;
        part[start..end].copy_from_slice(&content[start..end]);
    }
    fs::write(outdir.path().join("sample.bin.parallel.part"), &part)?;
    journal.mark_done(0)?;
    journal.mark_done(2)?;
    let completed = journal.completed_bytes();
    assert!(completed > 0);
    drop(journal);

    let (events_tx, mut events_rx) = tokio::sync::mpsc::channel(512);
    let opts = short_opts()
        .with_parallel_threshold(128 * 1024)
        .with_concurrency(4)
        .with_events(events_tx);

    let source = Arc::new(FilePayload::open(&src_path)?);
    let (addr, sender) = spawn_sender(source, "alpha-bravo-charlie", opts.clone());

    let (_endpoint, conn) = dial(addr).await;
    let got = ferry::run_receiver(&conn, "alpha-bravo-charlie", outdir.path(), &opts).await?;
    conn.close(0u32.into(), b"done");

    let final_path = outdir.path().join("sample.bin");
    assert_eq!(got, Received::File(final_path.clone()));
    assert_eq!(fs::read(&final_path)?, content);
    assert!(!journal_path.exists());
    assert!(!outdir.path().join("sample.bin.parallel.part").exists());

    // Progress resumes from the completed baseline instead of zero.
    while let Ok(event) = events_rx.try_recv() {
        if let SessionEvent::Progress(p) = event {
            assert!(p.bytes_done >= completed);
            assert!(p.bytes_done <= content.len() as u64);
        }
    }

    sender.await??;
    Ok(())
}

#[tokio::test]
async fn test_resume_adopts_persisted_layout() -> anyhow::Result<()> {
    let content = pattern_payload(640_000);
    let src_dir = TempDir::new()?;
    let src_path = src_dir.path().join("sample.bin");
    fs::write(&src_path, &content)?;

    let outdir = TempDir::new()?;

    // A previous run partitioned into 4 ranges; this run asks for 8.
    let journal_path = outdir.path().join("sample.bin.parallel.meta");
    let (journal, _) = RangeJournal::open_or_init(&journal_path, content.len() as u64, 4)?;
    assert_eq!(journal.worker_count(), 4);
    drop(journal);

    let (events_tx, mut events_rx) = tokio::sync::mpsc::channel(512);
    let opts = short_opts()
        .with_parallel_threshold(128 * 1024)
        .with_concurrency(8)
        .with_events(events_tx);

    let source = Arc::new(FilePayload::open(&src_path)?);
    let (addr, sender) = spawn_sender(source, "alpha-bravo-charlie", opts.clone());

    let (_endpoint, conn) = dial(addr).await;
    let got = ferry::run_receiver(&conn, "alpha-bravo-charlie", outdir.path(), &opts).await?;
    conn.close(0u32.into(), b"done");

    assert!(matches!(got, Received::File(_)));
    assert_eq!(fs::read(outdir.path().join("sample.bin"))?, content);

    let mut saw_adoption = false;
    while let Ok(event) = events_rx.try_recv() {
        if let SessionEvent::Status(msg) = event {
            if msg.contains("saved layout") {
                saw_adoption = true;
            }
        }
    }
    assert!(saw_adoption, "layout adoption should be reported");

    sender.await??;
    Ok(())
}

#[tokio::test]
async fn test_sequential_resume_completes_digest_over_whole_payload() -> anyhow::Result<()> {
    let content = pattern_payload(300_000);
    let src_dir = TempDir::new()?;
    let src_path = src_dir.path().join("notes.bin");
    fs::write(&src_path, &content)?;

    let outdir = TempDir::new()?;
    // First 123456 bytes already landed in a previous attempt.
    fs::write(
        outdir.path().join("notes.bin.partial"),
        &content[..123_456],
    )?;

    let (events_tx, mut events_rx) = tokio::sync::mpsc::channel(512);
    let opts = short_opts().with_events(events_tx);

    let source = Arc::new(FilePayload::open(&src_path)?);
    let (addr, sender) = spawn_sender(source, "alpha-bravo-charlie", opts.clone());

    let (_endpoint, conn) = dial(addr).await;
    let got = ferry::run_receiver(&conn, "alpha-bravo-charlie", outdir.path(), &opts).await?;
    conn.close(0u32.into(), b"done");

    let final_path = outdir.path().join("notes.bin");
    assert_eq!(got, Received::File(final_path.clone()));
    // The digest check passed over prefix + appended bytes together.
    assert_eq!(fs::read(&final_path)?, content);
    assert!(!outdir.path().join("notes.bin.partial").exists());

    let mut saw_resume = false;
    while let Ok(event) = events_rx.try_recv() {
        if let SessionEvent::Status(msg) = event {
            if msg.contains("resuming from byte 123456") {
                saw_resume = true;
            }
        }
    }
    assert!(saw_resume, "sequential resume should be reported");

    sender.await??;
    Ok(())
}

#[tokio::test]
async fn test_complete_partial_finalizes_without_retransfer() -> anyhow::Result<()> {
    let content = pattern_payload(200_000);
    let src_dir = TempDir::new()?;
    let src_path = src_dir.path().join("notes.bin");
    fs::write(&src_path, &content)?;

    let outdir = TempDir::new()?;
    // Every byte landed in a previous run that died before the rename.
    fs::write(outdir.path().join("notes.bin.partial"), &content)?;

    let (events_tx, mut events_rx) = tokio::sync::mpsc::channel(512);
    let opts = short_opts().with_events(events_tx);

    let source = Arc::new(FilePayload::open(&src_path)?);
    let (addr, sender) = spawn_sender(source, "alpha-bravo-charlie", opts.clone());

    let (_endpoint, conn) = dial(addr).await;
    let got = ferry::run_receiver(&conn, "alpha-bravo-charlie", outdir.path(), &opts).await?;
    conn.close(0u32.into(), b"done");

    let final_path = outdir.path().join("notes.bin");
    assert_eq!(got, Received::File(final_path.clone()));
    assert_eq!(fs::read(&final_path)?, content);
    assert!(!outdir.path().join("notes.bin.partial").exists());

    let mut saw_verify = false;
    while let Ok(event) = events_rx.try_recv() {
        if let SessionEvent::Status(msg) = event {
            if msg.contains("complete partial") {
                saw_verify = true;
            }
        }
    }
    assert!(saw_verify, "completed partial should skip straight to verification");

    sender.await??;
    Ok(())
}

#[tokio::test]
async fn test_corrupted_partial_fails_integrity_check() {
    let content = pattern_payload(300_000);
    let src_dir = TempDir::new().unwrap();
    let src_path = src_dir.path().join("notes.bin");
    fs::write(&src_path, &content).unwrap();

    let outdir = TempDir::new().unwrap();
    // A stale partial whose bytes do not match the payload being resumed.
    let mut bogus = content[..123_456].to_vec();
    bogus[1000] ^= 0xFF;
    fs::write(outdir.path().join("notes.bin.partial"), &bogus).unwrap();

    let opts = short_opts();
    let source = Arc::new(FilePayload::open(&src_path).unwrap());
    let (addr, _sender) = spawn_sender(source, "alpha-bravo-charlie", opts.clone());

    let (_endpoint, conn) = dial(addr).await;
    let err = ferry::run_receiver(&conn, "alpha-bravo-charlie", outdir.path(), &opts)
        .await
        .unwrap_err();
    assert!(matches!(err, TransferError::IntegrityFailed { .. }));
    conn.close(0u32.into(), b"bye");

    // The suspect partial is preserved for inspection.
    assert!(outdir.path().join("notes.bin.partial").exists());
}
