//! # Hashline Transport
//!
//! Datagram transport abstraction consumed by the hashline core. The
//! protocol only needs unreliable, unordered datagrams: `send_to` and
//! `recv_from` against opaque socket addresses. Two backends ship here:
//!
//! - [`udp::UdpTransport`] - async UDP via tokio, the production path;
//! - [`mem::MemTransport`] - an in-process paired transport with optional
//!   loss/reorder injection, used by the integration tests.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod mem;
pub mod transport;
pub mod udp;

pub use mem::{MemNetwork, MemTransport};
pub use transport::{Transport, TransportError, TransportResult, TransportStats};
pub use udp::UdpTransport;
