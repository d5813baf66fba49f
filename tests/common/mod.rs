//! Shared scaffolding for end-to-end tests: loopback QUIC endpoints, a
//! deterministic payload pattern, and a deliberately slow source for
//! cancellation timing.

#![allow(dead_code)]

use ferry::payload::{PayloadKind, PayloadSource};
use ferry::transport::quic;
use ferry::{SessionOptions, TransferError};
use sha2::{Digest, Sha256};
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

/// The byte pattern used for bulk payloads: `byte[i] = (i * 37) mod 256`.
pub fn pattern_payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| ((i * 37) % 256) as u8).collect()
}

/// Bind a loopback sender endpoint, accept one connection, and run the
/// sender session on a background task.
pub fn spawn_sender(
    source: Arc<dyn PayloadSource>,
    code: &str,
    opts: SessionOptions,
) -> (SocketAddr, JoinHandle<Result<(), TransferError>>) {
    let endpoint = quic::server_endpoint((Ipv4Addr::LOCALHOST, 0).into()).unwrap();
    let addr = endpoint.local_addr().unwrap();
    let code = code.to_string();
    let handle = tokio::spawn(async move {
        let incoming = endpoint
            .accept()
            .await
            .ok_or_else(|| TransferError::Interrupted("endpoint closed".into()))?;
        let conn = incoming
            .await
            .map_err(|e| TransferError::Interrupted(e.to_string()))?;
        ferry::run_sender(&conn, source, &code, &opts).await
    });
    (addr, handle)
}

/// Dial a loopback sender. The endpoint must outlive the connection.
pub async fn dial(addr: SocketAddr) -> (quinn::Endpoint, quinn::Connection) {
    let endpoint = quic::client_endpoint().unwrap();
    let conn = quic::dial(&endpoint, addr).await.unwrap();
    (endpoint, conn)
}

/// An in-memory payload that sleeps on every read, so cancellation tests
/// have a window to hit a transfer mid-flight.
pub struct SlowSource {
    data: Vec<u8>,
    digest: String,
    delay: Duration,
}

impl SlowSource {
    pub fn new(data: Vec<u8>, delay: Duration) -> Self {
        let digest = hex::encode(Sha256::digest(&data));
        Self {
            data,
            digest,
            delay,
        }
    }
}

impl PayloadSource for SlowSource {
    fn name(&self) -> &str {
        "slow.bin"
    }

    fn size(&self) -> u64 {
        self.data.len() as u64
    }

    fn kind(&self) -> PayloadKind {
        PayloadKind::File
    }

    fn digest(&self) -> std::io::Result<String> {
        Ok(self.digest.clone())
    }

    fn read_at(&self, offset: u64, buf: &mut [u8]) -> std::io::Result<usize> {
        std::thread::sleep(self.delay);
        if offset >= self.data.len() as u64 {
            return Ok(0);
        }
        let start = offset as usize;
        let n = buf.len().min(self.data.len() - start);
        buf[..n].copy_from_slice(&self.data[start..start + n]);
        Ok(n)
    }
}
