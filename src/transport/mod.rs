//! Transport contract.
//!
//! The session layer needs very little from a transport: a connection that
//! can open and accept bidirectional byte pipes, and a way to close it.
//! Anything reliable, ordered, multiplexed, and encrypted qualifies; the
//! bundled implementation is QUIC.

pub mod quic;

use crate::error::Result;
use std::future::Future;
use tokio::io::{AsyncRead, AsyncWrite};

pub trait Connection: Clone + Send + Sync + 'static {
    type Stream: AsyncRead + AsyncWrite + Send + Unpin + 'static;

    /// Open a fresh bidirectional stream. The stream becomes visible to
    /// the peer's `accept_stream` once the first bytes are written.
    fn open_stream(&self) -> impl Future<Output = Result<Self::Stream>> + Send;

    /// Wait for the peer to open a stream.
    fn accept_stream(&self) -> impl Future<Output = Result<Self::Stream>> + Send;

    /// Close the connection, releasing all streams.
    fn close(&self, reason: &str);
}
