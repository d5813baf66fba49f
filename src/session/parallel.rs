//! Parallel range scheduler.
//!
//! Large payloads are split into a fixed partition of byte ranges, one
//! worker stream per incomplete range. The control stream has already
//! paid for authentication and metadata, so it serves the first range;
//! every other worker opens a fresh stream, authenticates, discards the
//! repeated handshake, and requests its own range. Positioned writes make
//! ordering between workers irrelevant, and the journal makes a killed
//! session resumable.

use crate::auth;
use crate::error::{task_panic, Result, TransferError};
use crate::protocol::{read_frame, try_read_frame, write_frame, FrameKind, RangeReq, TransferMeta};
use crate::session::progress::{ProgressMeter, Reporter, SessionEvent, TransferMode};
use crate::session::{Received, SessionOptions};
use crate::sink::artifact;
use crate::sink::{RangeEntry, RangeJournal};
use crate::transport::Connection;
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncSeekExt, AsyncWriteExt};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

#[allow(clippy::too_many_arguments)]
pub(crate) async fn download<C: Connection>(
    conn: &C,
    control: C::Stream,
    meta: &TransferMeta,
    outdir: &Path,
    safe_name: &str,
    code: &str,
    opts: &SessionOptions,
    reporter: &Reporter,
) -> Result<Received> {
    let size = meta.size as u64;
    let data_path = artifact::parallel_data_path(outdir, safe_name);
    let journal_file = artifact::journal_path(outdir, safe_name);

    let (journal, adopted) = RangeJournal::open_or_init(&journal_file, size, opts.concurrency)?;
    if adopted && journal.worker_count() != opts.concurrency {
        reporter.status(format!(
            "resuming with saved layout of {} ranges (requested {})",
            journal.worker_count(),
            opts.concurrency
        ));
        tracing::info!(
            saved = journal.worker_count(),
            requested = opts.concurrency,
            "adopting persisted range layout"
        );
    }

    artifact::preallocate(&data_path, size).await?;

    let completed = journal.completed_bytes();
    if completed > 0 {
        reporter.status(format!(
            "resuming parallel download ({}% done)",
            completed * 100 / size.max(1)
        ));
    }

    let pending = journal.incomplete();
    let mode = TransferMode::Parallel(journal.worker_count());
    let journal = Arc::new(Mutex::new(journal));

    // Workers push raw byte counts; one task folds them into progress
    // events. Dropped counts only make the progress view lag.
    let (bytes_tx, mut bytes_rx) = mpsc::channel::<u64>(256);
    let monitor = {
        let reporter = reporter.clone();
        let meter = ProgressMeter::new(completed, size, mode);
        tokio::spawn(async move {
            let mut done = completed;
            while let Some(n) = bytes_rx.recv().await {
                done += n;
                reporter.event(SessionEvent::Progress(meter.snapshot(done)));
            }
        })
    };

    let mut workers: JoinSet<Result<()>> = JoinSet::new();
    let mut control = Some(control);
    for range in pending {
        let stream = control.take();
        let conn = conn.clone();
        let code = code.to_owned();
        let data_path = data_path.clone();
        let journal = Arc::clone(&journal);
        let bytes_tx = bytes_tx.clone();
        let cancel = opts.cancel.clone();
        workers.spawn(async move {
            run_range_worker(conn, stream, range, data_path, &code, journal, bytes_tx, cancel)
                .await
        });
    }
    drop(bytes_tx);
    drop(control);

    let mut failure: Option<TransferError> = None;
    while let Some(finished) = workers.join_next().await {
        match finished.map_err(task_panic).and_then(|r| r) {
            Ok(()) => {}
            Err(err) => {
                tracing::warn!("range worker failed: {err}");
                failure = Some(pick_failure(failure.take(), err));
            }
        }
    }
    monitor.await.map_err(task_panic)?;

    let complete = journal.lock().await.is_complete();
    if let Some(err) = failure {
        if !complete {
            return Err(err);
        }
        // Every range landed anyway; treat the stray error as noise.
        tracing::debug!("ignoring worker error after full completion: all ranges done");
    }
    if !complete {
        let remaining = journal.lock().await.incomplete().len();
        return Err(TransferError::Interrupted(format!(
            "{remaining} ranges incomplete"
        )));
    }

    // The rolling hash only exists in sequential mode, so the assembled
    // artifact is re-hashed in full before it may take its final name.
    reporter.status("verifying payload digest");
    let actual = artifact::file_digest(&data_path).await?;
    if actual != meta.hash {
        tracing::error!(expected = %meta.hash, %actual, "digest mismatch after parallel download");
        return Err(TransferError::IntegrityFailed {
            expected: meta.hash.clone(),
            actual,
        });
    }

    let final_path = artifact::finalize(&data_path, outdir, safe_name).await?;
    journal.lock().await.remove()?;
    reporter.event(SessionEvent::Progress(
        ProgressMeter::new(completed, size, mode).snapshot(size),
    ));
    reporter.status(format!("saved to {}", final_path.display()));
    tracing::info!(path = %final_path.display(), "parallel download complete");
    Ok(Received::File(final_path))
}

/// Fetch one range over one stream. `stream` is `Some` only for the
/// worker that inherits the already-authenticated control stream.
#[allow(clippy::too_many_arguments)]
async fn run_range_worker<C: Connection>(
    conn: C,
    stream: Option<C::Stream>,
    range: RangeEntry,
    data_path: PathBuf,
    code: &str,
    journal: Arc<Mutex<RangeJournal>>,
    bytes_tx: mpsc::Sender<u64>,
    cancel: CancellationToken,
) -> Result<()> {
    let mut stream = match stream {
        Some(stream) => stream,
        None => {
            let mut stream = conn.open_stream().await?;
            auth::prove(&mut stream, code).await?;
            // The sender repeats the handshake on every stream; this
            // worker already knows the metadata, so discard it.
            let (kind, _) = read_frame(&mut stream).await?;
            if kind != FrameKind::Handshake {
                return Err(TransferError::Protocol(format!(
                    "expected handshake, got {kind:?} frame"
                )));
            }
            stream
        }
    };

    let req = RangeReq {
        start: range.start as i64,
        length: range.length as i64,
    };
    write_frame(&mut stream, FrameKind::RangeReq, &req.encode()).await?;
    stream.flush().await?;

    let mut file = tokio::fs::OpenOptions::new()
        .write(true)
        .open(&data_path)
        .await?;
    file.seek(SeekFrom::Start(range.start)).await?;

    let mut received = 0u64;
    let outcome = loop {
        tokio::select! {
            () = cancel.cancelled() => break Err(TransferError::Cancelled),
            frame = try_read_frame(&mut stream) => match frame {
                Ok(None) => break Ok(()),
                Ok(Some((FrameKind::Data, payload))) => {
                    if received + payload.len() as u64 > range.length {
                        break Err(TransferError::Protocol(format!(
                            "range {} overran its {} byte extent",
                            range.id, range.length
                        )));
                    }
                    file.write_all(&payload).await?;
                    received += payload.len() as u64;
                    let _ = bytes_tx.try_send(payload.len() as u64);
                }
                Ok(Some((FrameKind::Cancel, _))) => break Err(TransferError::Cancelled),
                Ok(Some((FrameKind::Error, payload))) => break Err(TransferError::Interrupted(
                    String::from_utf8_lossy(&payload).into_owned(),
                )),
                Ok(Some((kind, _))) => break Err(TransferError::Protocol(format!(
                    "unexpected {kind:?} frame in range stream"
                ))),
                Err(e) => break Err(e),
            }
        }
    };

    file.flush().await?;
    file.sync_all().await?;
    outcome?;

    if received != range.length {
        return Err(TransferError::Interrupted(format!(
            "range {} received {received} of {} bytes",
            range.id, range.length
        )));
    }

    journal.lock().await.mark_done(range.id)?;
    tracing::debug!(range = range.id, bytes = received, "range complete");
    Ok(())
}

/// Keep the most decisive of two worker failures: auth failures end the
/// session outright, cancellation beats transient interruptions.
fn pick_failure(current: Option<TransferError>, new: TransferError) -> TransferError {
    fn rank(e: &TransferError) -> u8 {
        match e {
            TransferError::WrongCode | TransferError::PeerAuthFailed => 4,
            TransferError::Cancelled => 3,
            TransferError::Protocol(_) | TransferError::Io(_) => 2,
            _ => 1,
        }
    }
    match current {
        None => new,
        Some(cur) if rank(&new) > rank(&cur) => new,
        Some(cur) => cur,
    }
}
