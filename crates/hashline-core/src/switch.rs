//! The switch: one node's packet engine.
//!
//! All mutable protocol state (lines, tokens, channels) is owned by a
//! single reactor task that drains a command queue; everything else
//! talks to it through [`Command`] messages with oneshot replies. A
//! small pool of ingress workers reads datagrams, does the stateless
//! decode and open-packet crypto, and forwards the result as commands,
//! so handshake verification never stalls the reactor.

use crate::channel::{Channel, Reliability};
use crate::config::SwitchConfig;
use crate::error::{Error, Result};
use crate::handshake::{OPEN_TYPE, RemoteHalf, decompose_open};
use crate::hashname::Hashname;
use crate::identity::{Identity, PeerInfo, PublicKeys};
use crate::line::LINE_TYPE;
use crate::packet::Packet;
use crate::pool::BufferPool;
use crate::reactor::Reactor;
use hashline_crypto::LINE_ID_SIZE;
use hashline_transport::{Transport, TransportError};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};

/// Everything the reactor can be asked to do.
///
/// The enum is closed on purpose: the full behavior of the switch is
/// readable from this one type and the reactor's match over it.
pub(crate) enum Command {
    /// Register a peer's keys and address.
    AddPeer {
        info: PeerInfo,
    },
    /// Ensure a line to `hashname` is open.
    Open {
        hashname: Hashname,
        reply: oneshot::Sender<Result<()>>,
    },
    /// Open an outgoing channel, opening the line first if needed.
    OpenChannel {
        hashname: Hashname,
        typ: String,
        reliability: Reliability,
        reply: oneshot::Sender<Result<Channel>>,
    },
    /// Encrypt and send a channel packet on its line.
    Transmit {
        hashname: Hashname,
        packet: Packet,
        reply: Option<oneshot::Sender<Result<()>>>,
    },
    /// A delayed ack timer fired for this channel.
    SendAck {
        hashname: Hashname,
        channel: u32,
    },
    /// An ingress worker verified an inbound open packet.
    Handshake {
        remote: RemoteHalf,
        from: SocketAddr,
    },
    /// An ingress worker decoded an inbound line packet.
    LineInbound {
        token: [u8; LINE_ID_SIZE],
        packet: Packet,
        from: SocketAddr,
    },
    /// The open timeout fired for the attempt started at `at`.
    OpenDeadline {
        hashname: Hashname,
        at: i64,
    },
    /// Snapshot the counters.
    Stats {
        reply: oneshot::Sender<SwitchStats>,
    },
    /// Tear everything down.
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

/// Point-in-time switch counters.
#[derive(Debug, Clone, Default)]
pub struct SwitchStats {
    /// Lines currently opened.
    pub lines: usize,
    /// Channels currently live across all lines.
    pub channels: usize,
    /// Line packets that reached the reactor.
    pub packets_received: u64,
    /// Packets discarded at any stage the reactor sees.
    pub packets_dropped: u64,
    /// Open packets accepted since startup.
    pub handshakes_accepted: u64,
}

/// A running switch instance.
///
/// Dropping the `Switch` does not stop the node; call
/// [`Switch::shutdown`] for an orderly teardown.
pub struct Switch {
    hashname: Hashname,
    commands: mpsc::UnboundedSender<Command>,
    accept: tokio::sync::Mutex<mpsc::Receiver<Channel>>,
}

impl Switch {
    /// Start a switch on `transport` under `identity`.
    ///
    /// Spawns the reactor and the configured number of ingress workers
    /// onto the current tokio runtime.
    #[must_use]
    pub fn spawn(
        identity: Identity,
        transport: Arc<dyn Transport>,
        config: SwitchConfig,
    ) -> Switch {
        let identity = Arc::new(identity);
        let hashname = identity.hashname();
        let (commands, command_rx) = mpsc::unbounded_channel();
        let (accept_tx, accept_rx) = mpsc::channel(config.accept_backlog);
        let pool = BufferPool::new(config.pool_capacity, config.max_datagram);

        for worker in 0..config.ingress_workers {
            tokio::spawn(ingress_loop(
                worker,
                transport.clone(),
                identity.clone(),
                pool.clone(),
                commands.clone(),
            ));
        }

        let reactor = Reactor::new(identity, transport, config, commands.clone(), accept_tx);
        tokio::spawn(reactor.run(command_rx));

        tracing::info!(hashname = %hashname.short(), "switch started");
        Switch {
            hashname,
            commands,
            accept: tokio::sync::Mutex::new(accept_rx),
        }
    }

    /// This node's hashname.
    #[must_use]
    pub fn hashname(&self) -> Hashname {
        self.hashname
    }

    /// Register a peer we may open lines to.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SwitchClosed`] after shutdown.
    pub fn add_peer(&self, keys: PublicKeys, addr: SocketAddr) -> Result<Hashname> {
        let info = PeerInfo { keys, addr };
        let hashname = info.hashname();
        self.commands
            .send(Command::AddPeer { info })
            .map_err(|_| Error::SwitchClosed)?;
        Ok(hashname)
    }

    /// Open (or confirm) a line to `hashname`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownPeer`] for unregistered peers and
    /// [`Error::BrokenLine`] when the handshake times out.
    pub async fn open(&self, hashname: Hashname) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(Command::Open { hashname, reply })
            .map_err(|_| Error::SwitchClosed)?;
        rx.await.map_err(|_| Error::SwitchClosed)?
    }

    /// Open an outgoing channel of `typ` to `hashname`, establishing
    /// the line first when necessary.
    ///
    /// # Errors
    ///
    /// Same failure modes as [`Switch::open`].
    pub async fn open_channel(
        &self,
        hashname: Hashname,
        typ: &str,
        reliability: Reliability,
    ) -> Result<Channel> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(Command::OpenChannel {
                hashname,
                typ: typ.to_string(),
                reliability,
                reply,
            })
            .map_err(|_| Error::SwitchClosed)?;
        rx.await.map_err(|_| Error::SwitchClosed)?
    }

    /// Wait for the next inbound channel.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SwitchClosed`] after shutdown.
    pub async fn accept(&self) -> Result<Channel> {
        self.accept
            .lock()
            .await
            .recv()
            .await
            .ok_or(Error::SwitchClosed)
    }

    /// Snapshot the switch counters.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SwitchClosed`] after shutdown.
    pub async fn stats(&self) -> Result<SwitchStats> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(Command::Stats { reply })
            .map_err(|_| Error::SwitchClosed)?;
        rx.await.map_err(|_| Error::SwitchClosed)
    }

    /// Tear down all lines and stop the reactor and workers.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SwitchClosed`] when already shut down.
    pub async fn shutdown(&self) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(Command::Shutdown { reply })
            .map_err(|_| Error::SwitchClosed)?;
        rx.await.map_err(|_| Error::SwitchClosed)
    }
}

/// One ingress worker: datagram in, command out.
async fn ingress_loop(
    worker: usize,
    transport: Arc<dyn Transport>,
    identity: Arc<Identity>,
    pool: BufferPool,
    commands: mpsc::UnboundedSender<Command>,
) {
    loop {
        let mut buf = pool.acquire();
        let (n, from) = match transport.recv_from(&mut buf).await {
            Ok(x) => x,
            Err(TransportError::Closed) => break,
            Err(e) => {
                tracing::warn!(worker, error = %e, "ingress receive failed");
                continue;
            }
        };
        let pkt = match Packet::decode(&buf[..n]) {
            Ok(p) => p,
            Err(e) => {
                tracing::debug!(worker, %from, error = %e, "dropping undecodable datagram");
                continue;
            }
        };
        drop(buf);

        let cmd = match pkt.header().and_then(|h| h.typ.as_deref()) {
            Some(OPEN_TYPE) => match decompose_open(&identity, &pkt) {
                Ok(remote) => Command::Handshake { remote, from },
                Err(e) => {
                    tracing::debug!(worker, %from, error = %e, "dropping open packet");
                    continue;
                }
            },
            Some(LINE_TYPE) => {
                let token = pkt
                    .header()
                    .and_then(|h| h.line.as_deref())
                    .and_then(parse_token);
                let Some(token) = token else {
                    tracing::debug!(worker, %from, "dropping line packet without token");
                    continue;
                };
                Command::LineInbound {
                    token,
                    packet: pkt,
                    from,
                }
            }
            _ => {
                tracing::trace!(worker, %from, "dropping packet of unknown type");
                continue;
            }
        };
        if commands.send(cmd).is_err() {
            break;
        }
    }
    tracing::debug!(worker, "ingress worker stopped");
}

fn parse_token(hex_str: &str) -> Option<[u8; LINE_ID_SIZE]> {
    let mut out = [0u8; LINE_ID_SIZE];
    hex::decode_to_slice(hex_str, &mut out).ok()?;
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_token() {
        assert_eq!(parse_token(&"ab".repeat(16)), Some([0xAB; 16]));
        assert_eq!(parse_token("abcd"), None);
        assert_eq!(parse_token(&"zz".repeat(16)), None);
    }
}
