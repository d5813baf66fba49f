//! Code-authenticated stream handshake.
//!
//! Both peers prove possession of the shared session code without putting
//! it on the wire. The key is derived with a memory-hard KDF so each guess
//! against a short code costs real CPU and memory, then both sides exchange
//! HMAC tags over a fresh nonce:
//!
//! ```text
//! Prover   -> Verifier   Hello (empty)
//! Verifier -> Prover     Salt (16 bytes)
//!          both          K = Argon2id(code, salt)
//! Verifier -> Prover     Nonce (32 bytes)
//! Prover   -> Verifier   HMAC-SHA256(K, "client" || nonce)
//! Verifier -> Prover     HMAC-SHA256(K, "server" || nonce)
//! ```
//!
//! Every step is a `Pake` frame with a fixed payload length; any deviation
//! aborts the stream. The handshake runs once per stream, and the derived
//! key is dropped afterwards since the transport already encrypts.

use crate::error::{task_panic, Result, TransferError};
use crate::protocol::{try_read_frame, write_frame, FrameKind};
use argon2::{Algorithm, Argon2, Params, Version};
use bytes::Bytes;
use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::Sha256;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};

type HmacSha256 = Hmac<Sha256>;

pub const SALT_LEN: usize = 16;
pub const NONCE_LEN: usize = 32;
pub const TAG_LEN: usize = 32;
const KEY_LEN: usize = 32;

const KDF_MEMORY_KIB: u32 = 64 * 1024;
const KDF_PASSES: u32 = 3;
const KDF_LANES: u32 = 4;

const PROVER_LABEL: &[u8] = b"client";
const VERIFIER_LABEL: &[u8] = b"server";

/// Derive the per-stream authentication key from the code and salt.
fn derive_key(code: &str, salt: &[u8; SALT_LEN]) -> [u8; KEY_LEN] {
    let params = Params::new(KDF_MEMORY_KIB, KDF_PASSES, KDF_LANES, Some(KEY_LEN))
        .expect("fixed Argon2 parameters are in range");
    let kdf = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);
    let mut key = [0u8; KEY_LEN];
    kdf.hash_password_into(code.as_bytes(), salt, &mut key)
        .expect("16-byte salt and 32-byte output are in range");
    key
}

/// The KDF is deliberately expensive; keep it off the async workers.
async fn derive_key_blocking(code: &str, salt: [u8; SALT_LEN]) -> Result<[u8; KEY_LEN]> {
    let code = code.to_owned();
    tokio::task::spawn_blocking(move || derive_key(&code, &salt))
        .await
        .map_err(task_panic)
}

fn auth_tag(key: &[u8; KEY_LEN], label: &[u8], nonce: &[u8]) -> [u8; TAG_LEN] {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC accepts any key length");
    mac.update(label);
    mac.update(nonce);
    mac.finalize().into_bytes().into()
}

/// Constant-time tag comparison.
fn tag_matches(key: &[u8; KEY_LEN], label: &[u8], nonce: &[u8], candidate: &[u8]) -> bool {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC accepts any key length");
    mac.update(label);
    mac.update(nonce);
    mac.verify_slice(candidate).is_ok()
}

/// Read one fixed-length Pake frame on the verifier side.
async fn read_pake_verifier<R: AsyncRead + Unpin>(
    stream: &mut R,
    expect_len: usize,
    what: &str,
) -> Result<Bytes> {
    match try_read_frame(stream).await? {
        None => Err(TransferError::Interrupted(format!(
            "peer closed the stream while awaiting {what}"
        ))),
        Some((FrameKind::Pake, payload)) if payload.len() == expect_len => Ok(payload),
        Some((FrameKind::Pake, payload)) => Err(TransferError::Protocol(format!(
            "{what} must be {expect_len} bytes, got {}",
            payload.len()
        ))),
        Some((kind, _)) => Err(TransferError::Protocol(format!(
            "expected {what}, got {kind:?} frame"
        ))),
    }
}

/// Read one fixed-length Pake frame on the prover side. A verifier that
/// rejects us either sends an Error frame or just tears the stream down;
/// both surface as [`TransferError::PeerAuthFailed`].
async fn read_pake_prover<R: AsyncRead + Unpin>(
    stream: &mut R,
    expect_len: usize,
    what: &str,
) -> Result<Bytes> {
    match try_read_frame(stream).await {
        Ok(None) | Err(TransferError::Interrupted(_)) => Err(TransferError::PeerAuthFailed),
        Ok(Some((FrameKind::Pake, payload))) if payload.len() == expect_len => Ok(payload),
        Ok(Some((FrameKind::Pake, payload))) => Err(TransferError::Protocol(format!(
            "{what} must be {expect_len} bytes, got {}",
            payload.len()
        ))),
        Ok(Some((FrameKind::Error, _))) => Err(TransferError::PeerAuthFailed),
        Ok(Some((kind, _))) => Err(TransferError::Protocol(format!(
            "expected {what}, got {kind:?} frame"
        ))),
        Err(e) => Err(e),
    }
}

/// Run the handshake as the verifier (sending side). Returns only once the
/// peer has proven knowledge of `code` and we have proven ours back.
pub async fn verify<S: AsyncRead + AsyncWrite + Unpin>(stream: &mut S, code: &str) -> Result<()> {
    // The prover speaks first; its empty hello also makes the fresh stream
    // visible to the accepting side of the transport.
    read_pake_verifier(stream, 0, "hello").await?;

    let mut salt = [0u8; SALT_LEN];
    rand::thread_rng().fill_bytes(&mut salt);
    write_frame(stream, FrameKind::Pake, &salt).await?;
    stream.flush().await?;

    // Both sides grind through the KDF concurrently from here.
    let key = derive_key_blocking(code, salt).await?;

    let mut nonce = [0u8; NONCE_LEN];
    rand::thread_rng().fill_bytes(&mut nonce);
    write_frame(stream, FrameKind::Pake, &nonce).await?;
    stream.flush().await?;

    let prover_tag = read_pake_verifier(stream, TAG_LEN, "prover tag").await?;
    if !tag_matches(&key, PROVER_LABEL, &nonce, &prover_tag) {
        let _ = write_frame(stream, FrameKind::Error, b"authentication failed").await;
        let _ = stream.flush().await;
        return Err(TransferError::WrongCode);
    }

    let tag = auth_tag(&key, VERIFIER_LABEL, &nonce);
    write_frame(stream, FrameKind::Pake, &tag).await?;
    stream.flush().await?;

    tracing::debug!("stream authenticated as verifier");
    Ok(())
}

/// Run the handshake as the prover (receiving side).
pub async fn prove<S: AsyncRead + AsyncWrite + Unpin>(stream: &mut S, code: &str) -> Result<()> {
    write_frame(stream, FrameKind::Pake, &[]).await?;
    stream.flush().await?;

    let salt_frame = read_pake_prover(stream, SALT_LEN, "salt").await?;
    let mut salt = [0u8; SALT_LEN];
    salt.copy_from_slice(&salt_frame);

    let key = derive_key_blocking(code, salt).await?;

    let nonce = read_pake_prover(stream, NONCE_LEN, "nonce").await?;

    let tag = auth_tag(&key, PROVER_LABEL, &nonce);
    write_frame(stream, FrameKind::Pake, &tag).await?;
    stream.flush().await?;

    let verifier_tag = read_pake_prover(stream, TAG_LEN, "verifier tag").await?;
    if !tag_matches(&key, VERIFIER_LABEL, &nonce, &verifier_tag) {
        return Err(TransferError::PeerAuthFailed);
    }

    tracing::debug!("stream authenticated as prover");
    Ok(())
}
