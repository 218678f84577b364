//! # Hashline Core
//!
//! The protocol engine of hashline: a peer-to-peer stack where every
//! node is addressed by the hash of its public keys (its *hashname*),
//! pairs of nodes establish encrypted sessions (*lines*) over plain
//! datagrams, and each line multiplexes any number of logical streams
//! (*channels*) with per-channel reliability.
//!
//! The moving parts:
//!
//! - [`packet`] - the `[len][json header][body]` wire framing;
//! - [`identity`] / [`hashname`] - long-term keys and the names derived
//!   from them;
//! - [`handshake`] - open packets: sealed ephemeral keys, signatures,
//!   freshness;
//! - [`line`] - the per-peer session state machine and traffic crypto;
//! - [`channel`] - reliable and unreliable stream engines plus the
//!   application-facing [`channel::Channel`] handle;
//! - [`switch`] - the node itself: a reactor task owning all state,
//!   fed by ingress workers and a command queue.
//!
//! ```no_run
//! use hashline_core::{Identity, Reliability, Switch, SwitchConfig};
//! use hashline_transport::UdpTransport;
//! use std::sync::Arc;
//!
//! # async fn demo() -> hashline_core::Result<()> {
//! let identity = Identity::generate(&mut rand_core::OsRng);
//! let transport = Arc::new(UdpTransport::bind("0.0.0.0:42424".parse().unwrap()).await?);
//! let switch = Switch::spawn(identity, transport, SwitchConfig::default());
//!
//! while let Ok(channel) = switch.accept().await {
//!     while let Some(body) = channel.recv().await? {
//!         channel.send(body).await?;
//!     }
//! }
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod channel;
pub mod config;
pub mod error;
pub mod handshake;
pub mod hashname;
pub mod identity;
pub mod line;
pub mod packet;
pub mod pool;
mod reactor;
pub mod switch;

pub use channel::{Channel, ChannelInspect, ChannelState, Reliability};
pub use config::SwitchConfig;
pub use error::{Error, Result};
pub use hashname::Hashname;
pub use identity::{Identity, PeerInfo, PublicKeys};
pub use line::LineState;
pub use packet::{Header, Packet, PacketHeader};
pub use switch::{Switch, SwitchStats};
