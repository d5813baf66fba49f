//! Receiving side of a session.
//!
//! The receiver opens the control stream, proves the code, reads the
//! payload offer, and picks a mode: in-memory for text, append-and-resume
//! for ordinary payloads, parallel range streams for large ones.

use crate::auth;
use crate::error::{task_panic, Result, TransferError};
use crate::protocol::{
    read_frame, sanitize_name, try_read_frame, write_frame, Ack, FrameKind, PayloadKind,
    TransferMeta,
};
use crate::session::parallel;
use crate::session::progress::{ProgressMeter, Reporter, SessionEvent, TransferMode};
use crate::session::{Received, SessionOptions};
use crate::sink::artifact;
use crate::transport::{quic, Connection};
use sha2::{Digest, Sha256};
use std::net::SocketAddr;
use std::path::Path;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};

const DIAL_RETRIES: u32 = 10;

/// Run one receive session over an established connection.
pub async fn run_receiver<C: Connection>(
    conn: &C,
    code: &str,
    outdir: &Path,
    opts: &SessionOptions,
) -> Result<Received> {
    let mut control = conn.open_stream().await?;
    auth::prove(&mut control, code).await?;

    let (kind, payload) = read_frame(&mut control).await?;
    if kind != FrameKind::Handshake {
        return Err(TransferError::Protocol(format!(
            "expected handshake, got {kind:?} frame"
        )));
    }
    let meta = TransferMeta::decode(&payload, crate::MAX_PAYLOAD_SIZE)?;
    let reporter = Reporter::new(opts.events.clone());

    if meta.kind == PayloadKind::Text {
        return receive_text(control, &meta, opts, &reporter).await;
    }

    let safe_name = sanitize_name(&meta.name);
    tracing::info!(name = %safe_name, size = meta.size, "incoming payload");
    tokio::fs::create_dir_all(outdir).await?;

    if meta.size as u64 > opts.parallel_threshold {
        reporter.status(format!(
            "large payload ({} MiB); using {} parallel streams",
            meta.size / (1024 * 1024),
            opts.concurrency
        ));
        parallel::download(conn, control, &meta, outdir, &safe_name, code, opts, &reporter).await
    } else {
        receive_sequential(control, &meta, outdir, &safe_name, opts, &reporter).await
    }
}

/// Text payloads stay in memory and never create an artifact.
async fn receive_text<S: AsyncRead + AsyncWrite + Unpin>(
    mut stream: S,
    meta: &TransferMeta,
    opts: &SessionOptions,
    reporter: &Reporter,
) -> Result<Received> {
    let size = meta.size as u64;
    if size > crate::TEXT_SIZE_LIMIT {
        return Err(TransferError::Protocol(format!(
            "text payload of {size} bytes exceeds the {} byte limit",
            crate::TEXT_SIZE_LIMIT
        )));
    }

    write_frame(&mut stream, FrameKind::Ack, &Ack { offset: 0 }.encode()).await?;
    stream.flush().await?;

    let meter = ProgressMeter::new(0, size, TransferMode::Sequential);
    let mut buf: Vec<u8> = Vec::with_capacity(size as usize);
    loop {
        tokio::select! {
            () = opts.cancel.cancelled() => return Err(TransferError::Cancelled),
            frame = try_read_frame(&mut stream) => match frame? {
                None => break,
                Some((FrameKind::Data, payload)) => {
                    if buf.len() + payload.len() > size as usize {
                        return Err(TransferError::Protocol("more data than advertised".into()));
                    }
                    buf.extend_from_slice(&payload);
                    reporter.event(SessionEvent::Progress(meter.snapshot(buf.len() as u64)));
                }
                Some((FrameKind::Cancel, _)) => return Err(TransferError::Cancelled),
                Some((FrameKind::Error, payload)) => {
                    return Err(TransferError::Interrupted(
                        String::from_utf8_lossy(&payload).into_owned(),
                    ))
                }
                Some((kind, _)) => {
                    return Err(TransferError::Protocol(format!(
                        "unexpected {kind:?} frame in text transfer"
                    )))
                }
            }
        }
    }

    if (buf.len() as u64) < size {
        return Err(TransferError::Interrupted(format!(
            "received {} of {size} bytes",
            buf.len()
        )));
    }

    let actual = hex::encode(Sha256::digest(&buf));
    if actual != meta.hash {
        return Err(TransferError::IntegrityFailed {
            expected: meta.hash.clone(),
            actual,
        });
    }

    let text = String::from_utf8_lossy(&buf).into_owned();
    reporter.event(SessionEvent::Text(text.clone()));
    tracing::info!(bytes = text.len(), "text payload received");
    Ok(Received::Text(text))
}

async fn receive_sequential<S: AsyncRead + AsyncWrite + Unpin>(
    mut stream: S,
    meta: &TransferMeta,
    outdir: &Path,
    safe_name: &str,
    opts: &SessionOptions,
    reporter: &Reporter,
) -> Result<Received> {
    let size = meta.size as u64;
    let partial = artifact::partial_path(outdir, safe_name);

    let mut offset = 0u64;
    if let Ok(info) = tokio::fs::metadata(&partial).await {
        if info.len() > 0 && info.len() < size {
            offset = info.len();
            reporter.status(format!("partial download found; resuming from byte {offset}"));
            tracing::info!(offset, "resuming sequential download");
        } else if info.len() == size && size > 0 {
            // A previous run got every byte but died before the rename.
            // Ack the full offset (the sender will send nothing) and go
            // straight to digest verification instead of truncating a
            // complete download.
            offset = size;
            reporter.status("complete partial found; verifying digest");
            tracing::info!("previous download complete; verifying before finalize");
        }
        // Longer than the payload: not a partial of this transfer, start over.
    }

    write_frame(
        &mut stream,
        FrameKind::Ack,
        &Ack {
            offset: offset as i64,
        }
        .encode(),
    )
    .await?;
    stream.flush().await?;

    // The final digest covers the whole payload, so fold the bytes already
    // on disk back into the hash before appending new ones.
    let mut hasher = Sha256::new();
    if offset > 0 {
        let path = partial.clone();
        hasher = tokio::task::spawn_blocking(move || -> std::io::Result<Sha256> {
            let mut hasher = Sha256::new();
            let file = std::fs::File::open(&path)?;
            let mut prefix = std::io::Read::take(file, offset);
            std::io::copy(&mut prefix, &mut hasher)?;
            Ok(hasher)
        })
        .await
        .map_err(task_panic)??;
    }

    let mut file = if offset > 0 {
        tokio::fs::OpenOptions::new().append(true).open(&partial).await?
    } else {
        tokio::fs::File::create(&partial).await?
    };

    let meter = ProgressMeter::new(offset, size, TransferMode::Sequential);
    let mut received = offset;
    let outcome = loop {
        tokio::select! {
            () = opts.cancel.cancelled() => break Err(TransferError::Cancelled),
            frame = try_read_frame(&mut stream) => match frame {
                Ok(None) => break Ok(()),
                Ok(Some((FrameKind::Data, payload))) => {
                    if received + payload.len() as u64 > size {
                        break Err(TransferError::Protocol("more data than advertised".into()));
                    }
                    file.write_all(&payload).await?;
                    hasher.update(&payload);
                    received += payload.len() as u64;
                    reporter.event(SessionEvent::Progress(meter.snapshot(received)));
                }
                Ok(Some((FrameKind::Cancel, _))) => break Err(TransferError::Cancelled),
                Ok(Some((FrameKind::Error, payload))) => break Err(TransferError::Interrupted(
                    String::from_utf8_lossy(&payload).into_owned(),
                )),
                Ok(Some((kind, _))) => break Err(TransferError::Protocol(format!(
                    "unexpected {kind:?} frame during data transfer"
                ))),
                Err(e) => break Err(e),
            }
        }
    };

    file.flush().await?;
    file.sync_all().await?;
    drop(file);

    // Partial and journal state stay on disk for resume.
    outcome?;

    if received < size {
        return Err(TransferError::Interrupted(format!(
            "received {received} of {size} bytes"
        )));
    }

    let actual = hex::encode(hasher.finalize());
    if actual != meta.hash {
        tracing::error!(expected = %meta.hash, %actual, "digest mismatch");
        return Err(TransferError::IntegrityFailed {
            expected: meta.hash.clone(),
            actual,
        });
    }

    let final_path = artifact::finalize(&partial, outdir, safe_name).await?;
    reporter.event(SessionEvent::Progress(meter.snapshot(size)));
    reporter.status(format!("saved to {}", final_path.display()));
    tracing::info!(path = %final_path.display(), "sequential download complete");
    Ok(Received::File(final_path))
}

/// Dial `addr` and drive receive sessions until the payload lands, an
/// error is fatal, or the overall budget runs out. Interrupted sessions
/// reconnect and resume from persisted state.
pub async fn receive(
    addr: SocketAddr,
    code: &str,
    outdir: &Path,
    opts: &SessionOptions,
) -> Result<Received> {
    let endpoint = quic::client_endpoint()?;
    let reporter = Reporter::new(opts.events.clone());
    let started = tokio::time::Instant::now();

    loop {
        if started.elapsed() > opts.timeout {
            return Err(TransferError::Timeout);
        }

        let conn = quic::dial_with_backoff(&endpoint, addr, DIAL_RETRIES).await?;
        match run_receiver(&conn, code, outdir, opts).await {
            Err(TransferError::Interrupted(reason)) => {
                reporter.status(format!("transfer interrupted ({reason}); reconnecting"));
                tracing::warn!(%reason, "transfer interrupted; reconnecting");
                Connection::close(&conn, "interrupted");
                tokio::time::sleep(std::time::Duration::from_secs(1)).await;
            }
            outcome => {
                Connection::close(&conn, "session over");
                endpoint.wait_idle().await;
                return outcome;
            }
        }
    }
}
