//! End-to-end sessions over loopback QUIC: sequential, parallel, wrong
//! code, cancellation, and text mode.

mod common;

use common::{dial, pattern_payload, spawn_sender, SlowSource};
use ferry::{
    FilePayload, Received, SessionEvent, SessionOptions, TextPayload, TransferError,
};
use std::fs;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

fn short_opts() -> SessionOptions {
    SessionOptions::default().with_timeout(Duration::from_secs(60))
}

fn dir_entries(dir: &std::path::Path) -> Vec<String> {
    let mut names: Vec<String> = fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}

#[tokio::test]
async fn test_small_file_sequential() -> anyhow::Result<()> {
    let content = b"Hello! This is a robust little test payload.".to_vec();
    let src_dir = TempDir::new()?;
    let src_path = src_dir.path().join("payload.txt");
    fs::write(&src_path, &content)?;

    let opts = short_opts();
    let source = Arc::new(FilePayload::open(&src_path)?);
    let (addr, sender) = spawn_sender(source, "alpha-bravo-charlie", opts.clone());

    let outdir = TempDir::new()?;
    let (_endpoint, conn) = dial(addr).await;
    let got = ferry::run_receiver(&conn, "alpha-bravo-charlie", outdir.path(), &opts).await?;
    conn.close(0u32.into(), b"done");

    let final_path = outdir.path().join("payload.txt");
    assert_eq!(got, Received::File(final_path.clone()));
    assert_eq!(fs::read(&final_path)?, content);
    // Nothing partial survives a successful transfer.
    assert_eq!(dir_entries(outdir.path()), vec!["payload.txt"]);

    sender.await??;
    Ok(())
}

#[tokio::test]
async fn test_large_payload_parallel() -> anyhow::Result<()> {
    let content = pattern_payload(2 * 1024 * 1024 + 12_345);
    let src_dir = TempDir::new()?;
    let src_path = src_dir.path().join("sample.bin");
    fs::write(&src_path, &content)?;

    let opts = short_opts()
        .with_parallel_threshold(256 * 1024)
        .with_concurrency(4);
    let source = Arc::new(FilePayload::open(&src_path)?);
    let (addr, sender) = spawn_sender(source, "alpha-bravo-charlie", opts.clone());

    let outdir = TempDir::new()?;
    let (_endpoint, conn) = dial(addr).await;
    let got = ferry::run_receiver(&conn, "alpha-bravo-charlie", outdir.path(), &opts).await?;
    conn.close(0u32.into(), b"done");

    let final_path = outdir.path().join("sample.bin");
    assert_eq!(got, Received::File(final_path.clone()));
    assert_eq!(fs::read(&final_path)?, content);
    // Both the preallocated part file and the journal are gone.
    assert_eq!(dir_entries(outdir.path()), vec!["sample.bin"]);

    sender.await??;
    Ok(())
}

#[tokio::test]
async fn test_wrong_code_fails_both_sides() {
    let source = Arc::new(TextPayload::new("never delivered"));
    let opts = short_opts();
    let (addr, sender) = spawn_sender(source, "right-code-x", opts.clone());

    let outdir = TempDir::new().unwrap();
    let (_endpoint, conn) = dial(addr).await;
    let err = ferry::run_receiver(&conn, "wrong-code-y", outdir.path(), &opts)
        .await
        .unwrap_err();
    assert!(matches!(err, TransferError::PeerAuthFailed));
    conn.close(0u32.into(), b"bye");

    let sender_err = sender.await.unwrap().unwrap_err();
    assert!(matches!(sender_err, TransferError::WrongCode));

    // No metadata crossed, so nothing was written.
    assert!(dir_entries(outdir.path()).is_empty());
}

#[tokio::test]
async fn test_sender_cancel_preserves_partial() {
    // 256 chunks at >= 5ms each keeps the stream busy for over a second,
    // so the cancel below always lands mid-transfer.
    let content = pattern_payload(2 * 1024 * 1024);
    let cancel = CancellationToken::new();
    let sender_opts = short_opts()
        .with_chunk_size(8 * 1024)
        .with_cancel(cancel.clone());
    let receiver_opts = short_opts();

    let source = Arc::new(SlowSource::new(content, Duration::from_millis(5)));
    let (addr, sender) = spawn_sender(source, "alpha-bravo-charlie", sender_opts);

    let outdir = TempDir::new().unwrap();
    let (_endpoint, conn) = dial(addr).await;
    let receiver = {
        let outdir = outdir.path().to_path_buf();
        let conn = conn.clone();
        tokio::spawn(async move {
            ferry::run_receiver(&conn, "alpha-bravo-charlie", &outdir, &receiver_opts).await
        })
    };

    // Let a few chunks through, then pull the plug on the sender.
    tokio::time::sleep(Duration::from_millis(700)).await;
    cancel.cancel();

    let receiver_err = receiver.await.unwrap().unwrap_err();
    assert!(matches!(receiver_err, TransferError::Cancelled));
    conn.close(0u32.into(), b"bye");

    let sender_err = sender.await.unwrap().unwrap_err();
    assert!(matches!(sender_err, TransferError::Cancelled));

    // The partial artifact stays on disk for a later resume.
    assert!(outdir.path().join("slow.bin.partial").exists());
}

#[tokio::test]
async fn test_text_mode_surfaces_without_artifact() -> anyhow::Result<()> {
    let source = Arc::new(TextPayload::new("https://example.com/x"));
    let (events_tx, mut events_rx) = tokio::sync::mpsc::channel(128);
    let opts = short_opts().with_events(events_tx);
    let (addr, sender) = spawn_sender(source, "alpha-bravo-charlie", opts.clone());

    let outdir = TempDir::new()?;
    let (_endpoint, conn) = dial(addr).await;
    let got = ferry::run_receiver(&conn, "alpha-bravo-charlie", outdir.path(), &opts).await?;
    conn.close(0u32.into(), b"done");

    assert_eq!(got, Received::Text("https://example.com/x".to_string()));
    // Text mode never touches the output directory.
    assert!(dir_entries(outdir.path()).is_empty());

    let mut saw_text = false;
    while let Ok(event) = events_rx.try_recv() {
        if let SessionEvent::Text(text) = event {
            assert_eq!(text, "https://example.com/x");
            saw_text = true;
        }
    }
    assert!(saw_text, "text payload should be surfaced through events");

    sender.await??;
    Ok(())
}

#[tokio::test]
async fn test_oversized_text_rejected() {
    let big = "x".repeat(2 * 1024 * 1024);
    let source = Arc::new(TextPayload::new(big));
    let opts = short_opts();
    let (addr, _sender) = spawn_sender(source, "alpha-bravo-charlie", opts.clone());

    let outdir = TempDir::new().unwrap();
    let (_endpoint, conn) = dial(addr).await;
    let err = ferry::run_receiver(&conn, "alpha-bravo-charlie", outdir.path(), &opts)
        .await
        .unwrap_err();
    assert!(matches!(err, TransferError::Protocol(_)));
    conn.close(0u32.into(), b"bye");
}
