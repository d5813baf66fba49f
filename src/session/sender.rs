//! Sending side of a session.
//!
//! The sender is passive: it accepts streams, authenticates each one,
//! advertises the payload, and then serves whatever extent the peer asks
//! for. Sequential receivers ask once with an offset; parallel receivers
//! show up as several streams each asking for one range.

use crate::auth;
use crate::error::{task_panic, Result, TransferError};
use crate::payload::PayloadSource;
use crate::protocol::{read_frame, write_frame, Ack, FrameKind, RangeReq, TransferMeta};
use crate::session::SessionOptions;
use crate::transport::{quic, Connection};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

/// Serve `source` to the peer on `conn` until the peer closes the
/// connection, the idle deadline passes, or the caller cancels.
pub async fn run_sender<C: Connection>(
    conn: &C,
    source: Arc<dyn PayloadSource>,
    code: &str,
    opts: &SessionOptions,
) -> Result<()> {
    let deadline = tokio::time::Instant::now() + opts.timeout;
    let mut streams: JoinSet<Result<()>> = JoinSet::new();
    let mut served = 0usize;
    let mut fatal: Option<TransferError> = None;

    loop {
        tokio::select! {
            () = opts.cancel.cancelled() => break,
            Some(finished) = streams.join_next(), if !streams.is_empty() => {
                match finished.map_err(task_panic).and_then(|r| r) {
                    Ok(()) => served += 1,
                    Err(TransferError::WrongCode) => {
                        // No retry on a failed code; tear the whole session down.
                        conn.close("authentication failed");
                        fatal = Some(TransferError::WrongCode);
                        break;
                    }
                    Err(TransferError::Cancelled) => {}
                    Err(err) => tracing::warn!("stream ended with error: {err}"),
                }
            }
            accepted = tokio::time::timeout_at(deadline, conn.accept_stream()) => match accepted {
                Err(_) => {
                    if served == 0 && streams.is_empty() {
                        return Err(TransferError::Timeout);
                    }
                    break;
                }
                Ok(Err(err)) => {
                    tracing::debug!("stream accept ended: {err}");
                    break;
                }
                Ok(Ok(stream)) => {
                    let source = Arc::clone(&source);
                    let code = code.to_owned();
                    let chunk_size = opts.chunk_size;
                    let cancel = opts.cancel.clone();
                    streams.spawn(async move {
                        serve_stream(stream, source, &code, chunk_size, cancel).await
                    });
                }
            }
        }
    }

    while let Some(finished) = streams.join_next().await {
        match finished.map_err(task_panic).and_then(|r| r) {
            Ok(()) => served += 1,
            Err(TransferError::WrongCode) => fatal = Some(TransferError::WrongCode),
            Err(TransferError::Cancelled) => {}
            Err(err) => tracing::warn!("stream ended with error: {err}"),
        }
    }

    if let Some(err) = fatal {
        return Err(err);
    }
    if opts.cancel.is_cancelled() {
        return Err(TransferError::Cancelled);
    }
    tracing::info!(streams = served, "sender session finished");
    Ok(())
}

/// One accepted stream: authenticate, advertise, serve the requested extent.
async fn serve_stream<S: AsyncRead + AsyncWrite + Unpin>(
    mut stream: S,
    source: Arc<dyn PayloadSource>,
    code: &str,
    chunk_size: usize,
    cancel: CancellationToken,
) -> Result<()> {
    auth::verify(&mut stream, code).await?;

    // Cached after the first stream computes it.
    let digest = {
        let source = Arc::clone(&source);
        tokio::task::spawn_blocking(move || source.digest())
            .await
            .map_err(task_panic)??
    };

    let size = source.size();
    let meta = TransferMeta {
        name: source.name().to_owned(),
        size: size as i64,
        code: code.to_owned(),
        hash: digest,
        kind: source.kind(),
    };
    write_frame(&mut stream, FrameKind::Handshake, &meta.encode()?).await?;
    stream.flush().await?;

    let (kind, payload) = read_frame(&mut stream).await?;
    let (start, length) = match kind {
        FrameKind::Ack => {
            let ack = Ack::decode(payload)?;
            let offset = ack.offset as u64;
            if offset > size {
                return Err(TransferError::Protocol(format!(
                    "resume offset {offset} beyond payload size {size}"
                )));
            }
            if offset > 0 {
                tracing::debug!(offset, "peer resumes sequential transfer");
            }
            (offset, size - offset)
        }
        FrameKind::RangeReq => {
            let req = RangeReq::decode(payload)?;
            req.check_within(size)?;
            tracing::debug!(start = req.start, length = req.length, "peer requested range");
            (req.start as u64, req.length as u64)
        }
        other => {
            return Err(TransferError::Protocol(format!(
                "expected Ack or RangeReq after handshake, got {other:?} frame"
            )))
        }
    };

    stream_extent(&mut stream, source, start, length, chunk_size, &cancel).await?;
    let _ = stream.shutdown().await;
    Ok(())
}

async fn stream_extent<S: AsyncRead + AsyncWrite + Unpin>(
    stream: &mut S,
    source: Arc<dyn PayloadSource>,
    start: u64,
    length: u64,
    chunk_size: usize,
    cancel: &CancellationToken,
) -> Result<()> {
    let mut offset = start;
    let mut remaining = length;

    while remaining > 0 {
        if cancel.is_cancelled() {
            let _ = write_frame(stream, FrameKind::Cancel, &[]).await;
            let _ = stream.flush().await;
            return Err(TransferError::Cancelled);
        }

        let want = remaining.min(chunk_size as u64) as usize;
        let chunk = {
            let source = Arc::clone(&source);
            tokio::task::spawn_blocking(move || -> std::io::Result<Vec<u8>> {
                let mut buf = vec![0u8; want];
                let n = source.read_at(offset, &mut buf)?;
                buf.truncate(n);
                Ok(buf)
            })
            .await
            .map_err(task_panic)??
        };

        if chunk.is_empty() {
            return Err(TransferError::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                format!("payload ended {remaining} bytes short at offset {offset}"),
            )));
        }

        write_frame(stream, FrameKind::Data, &chunk).await?;
        offset += chunk.len() as u64;
        remaining -= chunk.len() as u64;
    }

    stream.flush().await?;
    Ok(())
}

/// Bind a QUIC endpoint, accept one peer connection, and serve the payload.
pub async fn serve(
    bind: SocketAddr,
    source: Arc<dyn PayloadSource>,
    code: &str,
    opts: &SessionOptions,
) -> Result<()> {
    let endpoint = quic::server_endpoint(bind)?;
    tracing::info!(addr = %endpoint.local_addr()?, "waiting for receiver");

    let incoming = tokio::time::timeout(opts.timeout, endpoint.accept())
        .await
        .map_err(|_| TransferError::Timeout)?
        .ok_or_else(|| TransferError::Interrupted("endpoint closed".into()))?;
    let conn = incoming
        .await
        .map_err(|e| TransferError::Interrupted(e.to_string()))?;

    let result = run_sender(&conn, source, code, opts).await;
    Connection::close(&conn, "session over");
    endpoint.wait_idle().await;
    result
}
