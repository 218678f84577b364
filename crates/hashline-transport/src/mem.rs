//! In-memory paired transport for tests.
//!
//! A [`MemNetwork`] is a routing table from fake socket addresses to
//! unbounded queues. Each [`MemTransport`] endpoint gets a distinct
//! address; datagrams sent to an unknown address vanish, exactly like
//! UDP. Outbound loss can be injected deterministically with
//! [`MemTransport::drop_next`].

use crate::transport::{Transport, TransportError, TransportResult};
use async_trait::async_trait;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

type Datagram = (Vec<u8>, SocketAddr);

/// Shared routing fabric connecting [`MemTransport`] endpoints.
#[derive(Clone, Default)]
pub struct MemNetwork {
    routes: Arc<Mutex<HashMap<SocketAddr, mpsc::UnboundedSender<Datagram>>>>,
    next_port: Arc<AtomicU64>,
}

impl MemNetwork {
    /// Create an empty network.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a new endpoint with a fresh fake address.
    #[must_use]
    pub fn endpoint(&self) -> MemTransport {
        let port = 40_000 + self.next_port.fetch_add(1, Ordering::Relaxed) as u16;
        let addr: SocketAddr = format!("127.0.0.1:{port}").parse().expect("fake addr");
        let (tx, rx) = mpsc::unbounded_channel();
        self.routes
            .lock()
            .expect("mem network lock")
            .insert(addr, tx);

        MemTransport {
            network: self.clone(),
            addr,
            inbox: Arc::new(tokio::sync::Mutex::new(rx)),
            closed: Arc::new(AtomicBool::new(false)),
            drop_outbound: Arc::new(AtomicU64::new(0)),
        }
    }

    fn deliver(&self, from: SocketAddr, to: SocketAddr, payload: Vec<u8>) {
        let routes = self.routes.lock().expect("mem network lock");
        if let Some(tx) = routes.get(&to) {
            // A full/closed inbox behaves like network loss.
            let _ = tx.send((payload, from));
        }
    }
}

/// One endpoint of a [`MemNetwork`].
#[derive(Clone)]
pub struct MemTransport {
    network: MemNetwork,
    addr: SocketAddr,
    inbox: Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<Datagram>>>,
    closed: Arc<AtomicBool>,
    drop_outbound: Arc<AtomicU64>,
}

impl MemTransport {
    /// Silently drop the next `n` outbound datagrams (loss injection).
    pub fn drop_next(&self, n: u64) {
        self.drop_outbound.store(n, Ordering::Release);
    }
}

#[async_trait]
impl Transport for MemTransport {
    async fn send_to(&self, buf: &[u8], addr: SocketAddr) -> TransportResult<usize> {
        if self.closed.load(Ordering::Acquire) {
            return Err(TransportError::Closed);
        }
        if self
            .drop_outbound
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
            .is_ok()
        {
            tracing::trace!(len = buf.len(), "mem transport dropped datagram");
            return Ok(buf.len());
        }
        self.network.deliver(self.addr, addr, buf.to_vec());
        Ok(buf.len())
    }

    async fn recv_from(&self, buf: &mut [u8]) -> TransportResult<(usize, SocketAddr)> {
        if self.closed.load(Ordering::Acquire) {
            return Err(TransportError::Closed);
        }
        let mut inbox = self.inbox.lock().await;
        let (payload, from) = inbox.recv().await.ok_or(TransportError::Closed)?;
        let n = payload.len().min(buf.len());
        buf[..n].copy_from_slice(&payload[..n]);
        Ok((n, from))
    }

    fn local_addr(&self) -> TransportResult<SocketAddr> {
        Ok(self.addr)
    }

    async fn close(&self) -> TransportResult<()> {
        self.closed.store(true, Ordering::Release);
        self.network
            .routes
            .lock()
            .expect("mem network lock")
            .remove(&self.addr);
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}
