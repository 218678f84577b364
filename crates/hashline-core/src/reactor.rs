//! The reactor task: single owner of all line and channel state.
//!
//! The reactor never blocks on application code. Anything that can
//! wait (window room, readable data) waits inside the channel handles;
//! anything timed (delayed acks, open deadlines, idle sweeps) is a
//! spawned sleep that reports back through the command queue.

use crate::channel::{AckAction, Channel, ChannelShared, Reliability};
use crate::config::SwitchConfig;
use crate::error::{Error, Result};
use crate::handshake::{LocalHalf, RemoteHalf, compose_open, unix_millis};
use crate::hashname::Hashname;
use crate::identity::{Identity, PeerInfo};
use crate::line::{Line, LineState};
use crate::packet::Packet;
use crate::switch::{Command, SwitchStats};
use hashline_crypto::LINE_ID_SIZE;
use hashline_transport::Transport;
use rand_core::OsRng;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, oneshot};

/// A line plus everything the reactor keeps around it.
struct LineEntry {
    line: Line,
    channels: HashMap<u32, Arc<ChannelShared>>,
    open_waiters: Vec<oneshot::Sender<Result<()>>>,
    chan_waiters: Vec<(String, Reliability, oneshot::Sender<Result<Channel>>)>,
}

impl LineEntry {
    fn new(hashname: Hashname) -> Self {
        Self {
            line: Line::new(hashname),
            channels: HashMap::new(),
            open_waiters: Vec::new(),
            chan_waiters: Vec::new(),
        }
    }
}

pub(crate) struct Reactor {
    identity: Arc<Identity>,
    transport: Arc<dyn Transport>,
    config: SwitchConfig,
    commands: mpsc::UnboundedSender<Command>,
    accept_tx: mpsc::Sender<Channel>,
    lines: HashMap<Hashname, LineEntry>,
    tokens: HashMap<[u8; LINE_ID_SIZE], Hashname>,
    peers: HashMap<Hashname, PeerInfo>,
    packets_received: u64,
    packets_dropped: u64,
    handshakes_accepted: u64,
}

impl Reactor {
    pub(crate) fn new(
        identity: Arc<Identity>,
        transport: Arc<dyn Transport>,
        config: SwitchConfig,
        commands: mpsc::UnboundedSender<Command>,
        accept_tx: mpsc::Sender<Channel>,
    ) -> Self {
        Self {
            identity,
            transport,
            config,
            commands,
            accept_tx,
            lines: HashMap::new(),
            tokens: HashMap::new(),
            peers: HashMap::new(),
            packets_received: 0,
            packets_dropped: 0,
            handshakes_accepted: 0,
        }
    }

    pub(crate) async fn run(mut self, mut rx: mpsc::UnboundedReceiver<Command>) {
        let mut sweep = tokio::time::interval(self.config.sweep_interval);
        sweep.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                cmd = rx.recv() => {
                    let Some(cmd) = cmd else { break };
                    if self.handle(cmd).await {
                        break;
                    }
                }
                _ = sweep.tick() => self.sweep(),
            }
        }
        tracing::debug!("reactor stopped");
    }

    /// Returns true on shutdown.
    async fn handle(&mut self, cmd: Command) -> bool {
        match cmd {
            Command::AddPeer { info } => {
                self.peers.insert(info.hashname(), info);
            }
            Command::Open { hashname, reply } => self.handle_open(hashname, reply).await,
            Command::OpenChannel {
                hashname,
                typ,
                reliability,
                reply,
            } => self.handle_open_channel(hashname, typ, reliability, reply).await,
            Command::Transmit {
                hashname,
                packet,
                reply,
            } => {
                let res = self.transmit(hashname, &packet).await;
                if let Some(reply) = reply {
                    let _ = reply.send(res);
                }
            }
            Command::SendAck { hashname, channel } => {
                self.handle_send_ack(hashname, channel).await;
            }
            Command::Handshake { remote, from } => self.handle_handshake(remote, from).await,
            Command::LineInbound {
                token,
                packet,
                from,
            } => self.handle_line_inbound(token, packet, from).await,
            Command::OpenDeadline { hashname, at } => self.handle_open_deadline(hashname, at),
            Command::Stats { reply } => {
                let _ = reply.send(self.stats());
            }
            Command::Shutdown { reply } => {
                self.shutdown().await;
                let _ = reply.send(());
                return true;
            }
        }
        false
    }

    /// Make sure a non-terminal entry exists for `hashname`.
    fn entry_slot(&mut self, hashname: Hashname) {
        let stale = self
            .lines
            .get(&hashname)
            .is_some_and(|e| e.line.state().is_terminal());
        if stale {
            if let Some(entry) = self.lines.remove(&hashname) {
                if let Some(token) = entry.line.local_token() {
                    self.tokens.remove(&token);
                }
            }
        }
        self.lines
            .entry(hashname)
            .or_insert_with(|| LineEntry::new(hashname));
    }

    async fn handle_open(&mut self, hashname: Hashname, reply: oneshot::Sender<Result<()>>) {
        self.entry_slot(hashname);
        let Some(entry) = self.lines.get_mut(&hashname) else {
            let _ = reply.send(Err(Error::BrokenLine));
            return;
        };
        if entry.line.is_open() {
            let _ = reply.send(Ok(()));
            return;
        }
        entry.open_waiters.push(reply);
        self.kick_open(hashname).await;
    }

    async fn handle_open_channel(
        &mut self,
        hashname: Hashname,
        typ: String,
        reliability: Reliability,
        reply: oneshot::Sender<Result<Channel>>,
    ) {
        self.entry_slot(hashname);
        let is_open = self
            .lines
            .get(&hashname)
            .is_some_and(|e| e.line.is_open());
        if is_open {
            let res = self
                .create_channel(hashname, typ, reliability, true)
                .ok_or(Error::BrokenLine);
            let _ = reply.send(res);
            return;
        }
        if let Some(entry) = self.lines.get_mut(&hashname) {
            entry.chan_waiters.push((typ, reliability, reply));
        }
        self.kick_open(hashname).await;
    }

    /// Send our open packet if this line is still pending.
    async fn kick_open(&mut self, hashname: Hashname) {
        let state = match self.lines.get(&hashname) {
            Some(e) => e.line.state(),
            None => return,
        };
        if state != LineState::Pending {
            return;
        }
        let Some(peer) = self.peers.get(&hashname).cloned() else {
            self.fail_line(hashname, "no route", LineState::Broken, || {
                Error::UnknownPeer(hashname)
            });
            return;
        };

        let now = unix_millis();
        let local = LocalHalf::new(&mut OsRng, now);
        let open = compose_open(&mut OsRng, &self.identity, &peer.keys, &local)
            .and_then(|p| p.encode());
        let open = match open {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::warn!(peer = %hashname.short(), error = %e, "composing open failed");
                self.fail_line(hashname, "compose failed", LineState::Broken, || {
                    Error::BrokenLine
                });
                return;
            }
        };

        self.tokens.insert(local.line_id, hashname);
        if let Some(entry) = self.lines.get_mut(&hashname) {
            entry.line.local = Some(local);
            entry.line.addr = Some(peer.addr);
            let _ = entry.line.transition_to(LineState::Opening);
        }
        tracing::debug!(peer = %hashname.short(), "line opening");
        if let Err(e) = self.transport.send_to(&open, peer.addr).await {
            tracing::warn!(peer = %hashname.short(), error = %e, "sending open failed");
        }

        let commands = self.commands.clone();
        let timeout = self.config.open_timeout;
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            let _ = commands.send(Command::OpenDeadline { hashname, at: now });
        });
    }

    async fn handle_handshake(&mut self, remote: RemoteHalf, from: SocketAddr) {
        let hashname = remote.hashname;
        self.entry_slot(hashname);

        let accepted_at = self.lines.get(&hashname).and_then(|e| e.line.accepted_at);
        let verdict = remote.verify(
            self.identity.hashname(),
            accepted_at,
            unix_millis(),
            self.config.max_clock_skew_millis(),
        );
        if let Err(e) = verdict {
            tracing::debug!(peer = %hashname.short(), error = %e, "dropping open packet");
            self.packets_dropped += 1;
            return;
        }

        // Learn (or refresh) how to reach this peer.
        self.peers.insert(
            hashname,
            PeerInfo {
                keys: remote.keys,
                addr: from,
            },
        );

        // Reply with our own open unless this packet answers one we
        // already sent and are still waiting on. A fresh open from an
        // already-opened line means the peer restarted and lost our
        // half, so a rekeying reply is needed there too.
        let awaiting_reply = self.lines.get(&hashname).is_some_and(|e| {
            e.line.state() == LineState::Opening && e.line.local.is_some()
        });
        if !awaiting_reply {
            if let Some(stale) = self.lines.get(&hashname).and_then(|e| e.line.local_token()) {
                self.tokens.remove(&stale);
            }
            let local = LocalHalf::new(&mut OsRng, unix_millis());
            let open = compose_open(&mut OsRng, &self.identity, &remote.keys, &local)
                .and_then(|p| p.encode());
            let open = match open {
                Ok(bytes) => bytes,
                Err(e) => {
                    tracing::warn!(peer = %hashname.short(), error = %e, "composing open reply failed");
                    return;
                }
            };
            self.tokens.insert(local.line_id, hashname);
            if let Some(entry) = self.lines.get_mut(&hashname) {
                entry.line.local = Some(local);
            }
            if let Err(e) = self.transport.send_to(&open, from).await {
                tracing::warn!(peer = %hashname.short(), error = %e, "sending open reply failed");
            }
        }

        let Some(entry) = self.lines.get_mut(&hashname) else {
            return;
        };
        entry.line.addr = Some(from);
        if let Err(e) = entry.line.establish(remote) {
            tracing::warn!(peer = %hashname.short(), error = %e, "line establishment failed");
            self.fail_line(hashname, "establishment failed", LineState::Broken, || {
                Error::BrokenLine
            });
            return;
        }
        entry.line.touch();
        self.handshakes_accepted += 1;
        tracing::info!(peer = %hashname.short(), "line opened");

        let open_waiters = std::mem::take(&mut entry.open_waiters);
        let chan_waiters = std::mem::take(&mut entry.chan_waiters);
        for waiter in open_waiters {
            let _ = waiter.send(Ok(()));
        }
        for (typ, reliability, waiter) in chan_waiters {
            let res = self
                .create_channel(hashname, typ, reliability, true)
                .ok_or(Error::BrokenLine);
            let _ = waiter.send(res);
        }
    }

    async fn handle_line_inbound(
        &mut self,
        token: [u8; LINE_ID_SIZE],
        packet: Packet,
        from: SocketAddr,
    ) {
        self.packets_received += 1;
        let Some(&hashname) = self.tokens.get(&token) else {
            tracing::debug!(%from, error = %Error::UnknownLine, "line packet dropped");
            self.packets_dropped += 1;
            return;
        };
        let Some(entry) = self.lines.get_mut(&hashname) else {
            self.packets_dropped += 1;
            return;
        };
        if !entry.line.is_open() {
            tracing::debug!(peer = %hashname.short(), "dropping line packet, line not open");
            self.packets_dropped += 1;
            return;
        }
        let inner = match entry.line.decrypt(&packet) {
            Ok(p) => p,
            Err(e) => {
                tracing::debug!(peer = %hashname.short(), error = %e, "dropping undecryptable line packet");
                self.packets_dropped += 1;
                return;
            }
        };
        entry.line.touch();
        // Follow the peer across address changes; traffic authenticated.
        entry.line.addr = Some(from);
        self.dispatch_channel(hashname, inner).await;
    }

    async fn dispatch_channel(&mut self, hashname: Hashname, inner: Packet) {
        let Some(header) = inner.header() else {
            self.packets_dropped += 1;
            return;
        };
        let Some(c) = header.c else {
            let err = Error::InvalidPacket("channel packet without id");
            tracing::debug!(peer = %hashname.short(), error = %err, "channel packet dropped");
            self.packets_dropped += 1;
            return;
        };

        let existing = self
            .lines
            .get(&hashname)
            .and_then(|e| e.channels.get(&c))
            .cloned();
        let shared = match existing {
            Some(s) => s,
            None => match self.accept_channel(hashname, c, header.typ.clone(), header.seq) {
                Some(s) => s,
                None => {
                    self.packets_dropped += 1;
                    return;
                }
            },
        };

        let dispatch = shared.receive(inner, Instant::now());
        if let Some(reason) = dispatch.dropped {
            tracing::trace!(channel = c, error = %reason, "channel packet dropped");
            self.packets_dropped += 1;
        }
        for pkt in dispatch.retransmit {
            if let Err(e) = self.transmit(hashname, &pkt).await {
                tracing::debug!(channel = c, error = %e, "retransmit failed");
            }
        }
        match dispatch.ack {
            AckAction::Now => {
                if let Some(pkt) = shared.take_ack() {
                    if let Err(e) = self.transmit(hashname, &pkt).await {
                        tracing::debug!(channel = c, error = %e, "ack transmit failed");
                    }
                }
            }
            AckAction::Delay => {
                let commands = self.commands.clone();
                let delay = self.config.ack_delay;
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    let _ = commands.send(Command::SendAck {
                        hashname,
                        channel: c,
                    });
                });
            }
            AckAction::None => {}
        }
        if dispatch.done {
            if let Some(entry) = self.lines.get_mut(&hashname) {
                entry.channels.remove(&c);
            }
        }
    }

    /// First packet of an unknown channel: create and queue for accept.
    fn accept_channel(
        &mut self,
        hashname: Hashname,
        c: u32,
        typ: Option<String>,
        seq: Option<u32>,
    ) -> Option<Arc<ChannelShared>> {
        let Some(typ) = typ else {
            tracing::debug!(error = %Error::UnknownChannel(c), "channel packet dropped");
            return None;
        };
        // A seq above zero is mid-stream traffic for a channel we no
        // longer (or never did) know; recreating it would corrupt order.
        if seq.is_some_and(|s| s != 0) {
            tracing::debug!(error = %Error::UnknownChannel(c), "mid-stream packet dropped");
            return None;
        }
        let reliability = if seq.is_some() {
            Reliability::Reliable
        } else {
            Reliability::Unreliable
        };

        let shared = ChannelShared::new(c, typ, hashname, reliability, false, &self.config);
        let channel = Channel::new(shared.clone(), self.commands.clone());
        if self.accept_tx.try_send(channel).is_err() {
            tracing::warn!(channel = c, "accept backlog full, dropping inbound channel");
            return None;
        }
        let entry = self.lines.get_mut(&hashname)?;
        entry.channels.insert(c, shared.clone());
        tracing::debug!(peer = %hashname.short(), channel = c, "inbound channel accepted");
        Some(shared)
    }

    /// Outgoing channel with a fresh random id.
    fn create_channel(
        &mut self,
        hashname: Hashname,
        typ: String,
        reliability: Reliability,
        initiator: bool,
    ) -> Option<Channel> {
        let entry = self.lines.get_mut(&hashname)?;
        let mut id = hashline_crypto::random::channel_id(&mut OsRng);
        while entry.channels.contains_key(&id) {
            id = hashline_crypto::random::channel_id(&mut OsRng);
        }
        let shared = ChannelShared::new(id, typ, hashname, reliability, initiator, &self.config);
        entry.channels.insert(id, shared.clone());
        tracing::debug!(peer = %hashname.short(), channel = id, "channel opened");
        Some(Channel::new(shared, self.commands.clone()))
    }

    /// Encrypt a channel packet and put it on the wire.
    async fn transmit(&self, hashname: Hashname, inner: &Packet) -> Result<()> {
        let Some(entry) = self.lines.get(&hashname) else {
            return Err(Error::BrokenLine);
        };
        if !entry.line.is_open() {
            return Err(Error::BrokenLine);
        }
        let addr = entry.line.addr.ok_or(Error::BrokenLine)?;
        let outer = entry.line.encrypt(&mut OsRng, inner)?;
        self.transport.send_to(&outer.encode()?, addr).await?;
        Ok(())
    }

    async fn handle_send_ack(&mut self, hashname: Hashname, c: u32) {
        let shared = self
            .lines
            .get(&hashname)
            .and_then(|e| e.channels.get(&c))
            .cloned();
        let Some(shared) = shared else { return };
        if let Some(pkt) = shared.take_ack() {
            if let Err(e) = self.transmit(hashname, &pkt).await {
                tracing::debug!(channel = c, error = %e, "delayed ack failed");
            }
        }
    }

    fn handle_open_deadline(&mut self, hashname: Hashname, at: i64) {
        let timed_out = self.lines.get(&hashname).is_some_and(|e| {
            !e.line.is_open()
                && !e.line.state().is_terminal()
                && e.line.local.as_ref().is_some_and(|l| l.at == at)
        });
        if timed_out {
            tracing::warn!(peer = %hashname.short(), "line open timed out");
            self.fail_line(hashname, "open timed out", LineState::Broken, || {
                Error::BrokenLine
            });
        }
    }

    /// Tear a line down, waking and failing everything attached to it.
    fn fail_line<F: Fn() -> Error>(
        &mut self,
        hashname: Hashname,
        reason: &'static str,
        terminal: LineState,
        make_err: F,
    ) {
        let Some(mut entry) = self.lines.remove(&hashname) else {
            return;
        };
        if let Some(token) = entry.line.local_token() {
            self.tokens.remove(&token);
        }
        let _ = entry.line.transition_to(terminal);
        tracing::debug!(peer = %hashname.short(), reason, "line torn down");

        for waiter in entry.open_waiters.drain(..) {
            let _ = waiter.send(Err(make_err()));
        }
        for (_, _, waiter) in entry.chan_waiters.drain(..) {
            let _ = waiter.send(Err(make_err()));
        }
        for (_, shared) in entry.channels.drain() {
            shared.break_now();
        }
    }

    fn sweep(&mut self) {
        let idle: Vec<Hashname> = self
            .lines
            .iter()
            .filter(|(_, e)| e.line.is_open() && e.line.idle_for() > self.config.idle_timeout)
            .map(|(h, _)| *h)
            .collect();
        for hashname in idle {
            tracing::info!(peer = %hashname.short(), "closing idle line");
            self.fail_line(hashname, "idle", LineState::Closed, || Error::BrokenLine);
        }
    }

    fn stats(&self) -> SwitchStats {
        SwitchStats {
            lines: self.lines.values().filter(|e| e.line.is_open()).count(),
            channels: self.lines.values().map(|e| e.channels.len()).sum(),
            packets_received: self.packets_received,
            packets_dropped: self.packets_dropped,
            handshakes_accepted: self.handshakes_accepted,
        }
    }

    async fn shutdown(&mut self) {
        let all: Vec<Hashname> = self.lines.keys().copied().collect();
        for hashname in all {
            self.fail_line(hashname, "shutdown", LineState::Closed, || {
                Error::SwitchClosed
            });
        }
        if let Err(e) = self.transport.close().await {
            tracing::debug!(error = %e, "transport close failed");
        }
        tracing::info!("switch shut down");
    }
}
