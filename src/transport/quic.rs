//! QUIC transport over quinn.
//!
//! One UDP socket carries the whole session; every payload stream is a
//! QUIC bidirectional stream. The server presents a throwaway self-signed
//! certificate and dialers skip certificate verification: transport
//! encryption comes from TLS, but peer identity is established by the code
//! handshake, not the certificate.

use super::Connection;
use crate::error::{Result, TransferError};
use quinn::{ClientConfig, Endpoint, RecvStream, SendStream, ServerConfig, TransportConfig, VarInt};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer, ServerName, UnixTime};
use std::future::Future;
use std::net::{Ipv4Addr, SocketAddr};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

const ALPN: &[u8] = b"ferry/1";
const IDLE_TIMEOUT_MS: u32 = 10_000;
const KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(2);
const DIAL_RETRY_BASE: Duration = Duration::from_millis(500);

fn transport_config() -> TransportConfig {
    let mut tc = TransportConfig::default();
    tc.max_idle_timeout(Some(VarInt::from_u32(IDLE_TIMEOUT_MS).into()));
    tc.keep_alive_interval(Some(KEEP_ALIVE_INTERVAL));
    tc
}

/// Build a listening endpoint with a fresh self-signed certificate.
pub fn server_endpoint(bind: SocketAddr) -> Result<Endpoint> {
    let issued = rcgen::generate_simple_self_signed(vec!["localhost".to_string()])
        .map_err(|e| setup_error(format!("certificate generation failed: {e}")))?;
    let cert_der = issued.cert.der().clone();
    let key_der = PrivateKeyDer::from(PrivatePkcs8KeyDer::from(issued.key_pair.serialize_der()));

    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let mut crypto = rustls::ServerConfig::builder_with_provider(provider)
        .with_protocol_versions(&[&rustls::version::TLS13])
        .map_err(|e| setup_error(format!("tls server config: {e}")))?
        .with_no_client_auth()
        .with_single_cert(vec![cert_der], key_der)
        .map_err(|e| setup_error(format!("tls server config: {e}")))?;
    crypto.alpn_protocols = vec![ALPN.to_vec()];

    let crypto = quinn::crypto::rustls::QuicServerConfig::try_from(crypto)
        .map_err(|e| setup_error(format!("quic server config: {e}")))?;
    let mut config = ServerConfig::with_crypto(Arc::new(crypto));
    config.transport_config(Arc::new(transport_config()));

    Ok(Endpoint::server(config, bind)?)
}

/// Build a dialing endpoint bound to an ephemeral local port.
pub fn client_endpoint() -> Result<Endpoint> {
    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let mut crypto = rustls::ClientConfig::builder_with_provider(provider.clone())
        .with_protocol_versions(&[&rustls::version::TLS13])
        .map_err(|e| setup_error(format!("tls client config: {e}")))?
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(AcceptAnyServerCert { provider }))
        .with_no_client_auth();
    crypto.alpn_protocols = vec![ALPN.to_vec()];

    let crypto = quinn::crypto::rustls::QuicClientConfig::try_from(crypto)
        .map_err(|e| setup_error(format!("quic client config: {e}")))?;
    let mut config = ClientConfig::new(Arc::new(crypto));
    config.transport_config(Arc::new(transport_config()));

    let mut endpoint = Endpoint::client((Ipv4Addr::UNSPECIFIED, 0).into())?;
    endpoint.set_default_client_config(config);
    Ok(endpoint)
}

pub async fn dial(endpoint: &Endpoint, addr: SocketAddr) -> Result<quinn::Connection> {
    let connecting = endpoint
        .connect(addr, "localhost")
        .map_err(|e| setup_error(format!("dial {addr}: {e}")))?;
    connecting
        .await
        .map_err(|e| setup_error(format!("dial {addr}: {e}")))
}

/// Dial with exponential backoff; each failed attempt doubles the delay.
pub async fn dial_with_backoff(
    endpoint: &Endpoint,
    addr: SocketAddr,
    max_retries: u32,
) -> Result<quinn::Connection> {
    let mut attempt = 0u32;
    loop {
        match dial(endpoint, addr).await {
            Ok(conn) => return Ok(conn),
            Err(err) => {
                attempt += 1;
                if attempt > max_retries {
                    return Err(err);
                }
                let delay = DIAL_RETRY_BASE * 2u32.saturating_pow(attempt - 1);
                tracing::debug!(%addr, attempt, ?delay, "connect failed: {err}; retrying");
                tokio::time::sleep(delay).await;
            }
        }
    }
}

/// Both halves of a QUIC bidirectional stream as one duplex pipe.
pub struct QuicStream {
    send: SendStream,
    recv: RecvStream,
}

impl AsyncRead for QuicStream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.recv).poll_read(cx, buf)
    }
}

impl AsyncWrite for QuicStream {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        AsyncWrite::poll_write(Pin::new(&mut self.send), cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        AsyncWrite::poll_flush(Pin::new(&mut self.send), cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        AsyncWrite::poll_shutdown(Pin::new(&mut self.send), cx)
    }
}

impl Connection for quinn::Connection {
    type Stream = QuicStream;

    fn open_stream(&self) -> impl Future<Output = Result<QuicStream>> + Send {
        async move {
            let (send, recv) = self.open_bi().await.map_err(broken)?;
            Ok(QuicStream { send, recv })
        }
    }

    fn accept_stream(&self) -> impl Future<Output = Result<QuicStream>> + Send {
        async move {
            let (send, recv) = self.accept_bi().await.map_err(broken)?;
            Ok(QuicStream { send, recv })
        }
    }

    fn close(&self, reason: &str) {
        quinn::Connection::close(self, VarInt::from_u32(0), reason.as_bytes());
    }
}

fn broken(e: quinn::ConnectionError) -> TransferError {
    TransferError::Interrupted(e.to_string())
}

fn setup_error(msg: String) -> TransferError {
    TransferError::Io(std::io::Error::other(msg))
}

/// Accepts whatever certificate the server presents. Peer authenticity is
/// established by the code handshake that gates every stream.
#[derive(Debug)]
struct AcceptAnyServerCert {
    provider: Arc<rustls::crypto::CryptoProvider>,
}

impl rustls::client::danger::ServerCertVerifier for AcceptAnyServerCert {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> std::result::Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::danger::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &rustls::DigitallySignedStruct,
    ) -> std::result::Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls12_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &rustls::DigitallySignedStruct,
    ) -> std::result::Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        self.provider
            .signature_verification_algorithms
            .supported_schemes()
    }
}
