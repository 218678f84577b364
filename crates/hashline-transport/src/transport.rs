//! Transport trait abstraction over datagram backends.

use async_trait::async_trait;
use std::io;
use std::net::SocketAddr;

/// Transport layer errors.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// I/O error from the underlying socket
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Transport has been closed
    #[error("transport is closed")]
    Closed,

    /// Address binding failed
    #[error("failed to bind: {0}")]
    BindFailed(String),
}

/// Result type for transport operations.
pub type TransportResult<T> = Result<T, TransportError>;

/// Async datagram transport.
///
/// The core stack treats this as fire-and-forget datagram delivery; it
/// never assumes ordering, reliability or connection state. `recv_from`
/// must be safe to call concurrently from several ingress workers.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send a datagram to `addr`. Returns the number of bytes sent.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Closed`] after `close`, or an I/O error.
    async fn send_to(&self, buf: &[u8], addr: SocketAddr) -> TransportResult<usize>;

    /// Receive one datagram into `buf`, returning its length and sender.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Closed`] after `close`, or an I/O error.
    async fn recv_from(&self, buf: &mut [u8]) -> TransportResult<(usize, SocketAddr)>;

    /// Local address this transport answers on.
    ///
    /// # Errors
    ///
    /// Returns an error when the address cannot be determined.
    fn local_addr(&self) -> TransportResult<SocketAddr>;

    /// Close the transport; subsequent operations fail with `Closed`.
    async fn close(&self) -> TransportResult<()>;

    /// Whether `close` has been called.
    fn is_closed(&self) -> bool;

    /// Counters for sent/received traffic.
    fn stats(&self) -> TransportStats {
        TransportStats::default()
    }
}

/// Transport statistics counters.
#[derive(Debug, Clone, Default)]
pub struct TransportStats {
    /// Total bytes sent
    pub bytes_sent: u64,
    /// Total bytes received
    pub bytes_received: u64,
    /// Total datagrams sent
    pub packets_sent: u64,
    /// Total datagrams received
    pub packets_received: u64,
}
