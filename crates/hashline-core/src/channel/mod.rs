//! Channels: logical streams multiplexed over a line.
//!
//! A [`Channel`] is the application-facing handle; all of its methods
//! talk to a [`ChannelShared`] state block that the switch reactor also
//! feeds inbound packets into. Blocking semantics (send against a full
//! window, receive against an empty buffer) are implemented with a
//! mutex-protected engine plus two [`Notify`] wakers, so application
//! tasks never block the reactor.

mod reliable;
mod unreliable;

pub(crate) use reliable::ReliableState;
pub(crate) use unreliable::UnreliableState;

use crate::config::SwitchConfig;
use crate::error::{Error, Result};
use crate::hashname::Hashname;
use crate::packet::{Header, Packet};
use crate::switch::Command;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;
use tokio::sync::{Notify, mpsc, oneshot};

/// Delivery mode of a channel, fixed at creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reliability {
    /// Ordered, retransmitted, exactly-once delivery.
    Reliable,
    /// Datagram semantics: best effort, arrival order.
    Unreliable,
}

/// Channel lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    /// Both directions flowing.
    Open,
    /// We sent our end; still draining inbound.
    EndSent,
    /// Peer sent its end; we can still send.
    EndReceived,
    /// Both ends exchanged, channel complete.
    Ended,
    /// Terminated abnormally (peer error or line failure).
    Broken,
}

impl ChannelState {
    /// Whether moving to `next` is a legal transition.
    #[must_use]
    pub fn can_transition(self, next: ChannelState) -> bool {
        use ChannelState::{Broken, EndReceived, EndSent, Ended, Open};
        matches!(
            (self, next),
            (Open, EndSent | EndReceived | Broken)
                | (EndSent, Ended | Broken)
                | (EndReceived, Ended | Broken)
        )
    }

    /// Whether this state can never be left.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, ChannelState::Ended | ChannelState::Broken)
    }

    /// Static name, for logs.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            ChannelState::Open => "open",
            ChannelState::EndSent => "end-sent",
            ChannelState::EndReceived => "end-received",
            ChannelState::Ended => "ended",
            ChannelState::Broken => "broken",
        }
    }
}

/// What the reactor should do about acking after an inbound packet.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub(crate) enum AckAction {
    /// Nothing; an ack is already pending or not needed.
    #[default]
    None,
    /// Schedule a delayed dedicated ack.
    Delay,
    /// Send a dedicated ack immediately.
    Now,
}

/// Engine-level result of absorbing one inbound packet.
#[derive(Default)]
pub(crate) struct RcvOutcome {
    /// New in-order data became readable.
    pub delivered: bool,
    /// An ack freed send-window room.
    pub window_opened: bool,
    /// Packets to resend, with refreshed ack fields.
    pub retransmit: Vec<Packet>,
    /// Ack decision for this packet.
    pub ack: AckAction,
    /// Set when the packet was discarded, with the reason.
    pub dropped: Option<Error>,
}

/// Reactor-level result of [`ChannelShared::receive`].
#[derive(Default)]
pub(crate) struct Dispatch {
    pub retransmit: Vec<Packet>,
    pub ack: AckAction,
    /// Channel is protocol-complete and can leave the line's table.
    pub done: bool,
    pub dropped: Option<Error>,
}

pub(crate) enum Engine {
    Reliable(ReliableState),
    Unreliable(UnreliableState),
}

impl Engine {
    fn receive(&mut self, pkt: Packet, now: Instant) -> RcvOutcome {
        match self {
            Engine::Reliable(r) => r.receive(pkt, now),
            Engine::Unreliable(u) => u.receive(pkt),
        }
    }

    fn pop(&mut self) -> Option<Packet> {
        match self {
            Engine::Reliable(r) => r.pop(),
            Engine::Unreliable(u) => u.pop(),
        }
    }

    fn all_done(&self) -> bool {
        match self {
            Engine::Reliable(r) => r.all_done(),
            Engine::Unreliable(u) => u.all_done(),
        }
    }
}

pub(crate) struct ChannelInner {
    state: ChannelState,
    engine: Engine,
    peer_error: Option<String>,
    end_delivered: bool,
    type_sent: bool,
    deadline_hit: bool,
    deadline_gen: u64,
}

impl ChannelInner {
    /// Transition with table enforcement; invalid moves are ignored,
    /// which happens when both sides end simultaneously.
    fn transition(&mut self, next: ChannelState) {
        if self.state.can_transition(next) {
            self.state = next;
        }
    }

    fn force_break(&mut self) {
        if !self.state.is_terminal() {
            self.state = ChannelState::Broken;
        }
    }

    fn note_end_sent(&mut self) {
        match self.state {
            ChannelState::Open => self.transition(ChannelState::EndSent),
            ChannelState::EndReceived => self.transition(ChannelState::Ended),
            _ => {}
        }
    }

    fn note_end_received(&mut self) {
        match self.state {
            ChannelState::Open => self.transition(ChannelState::EndReceived),
            ChannelState::EndSent => self.transition(ChannelState::Ended),
            _ => {}
        }
    }
}

/// Receive-side reliability snapshot, for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelInspect {
    /// Highest in-order sequence received, if any.
    pub acked: Option<u32>,
    /// Sequences above `acked` not yet received.
    pub missing: Vec<u32>,
}

/// State shared between a [`Channel`] handle and the switch reactor.
pub(crate) struct ChannelShared {
    id: u32,
    typ: String,
    hashname: Hashname,
    reliability: Reliability,
    initiator: bool,
    inner: Mutex<ChannelInner>,
    readers: Notify,
    writers: Notify,
}

impl ChannelShared {
    pub(crate) fn new(
        id: u32,
        typ: String,
        hashname: Hashname,
        reliability: Reliability,
        initiator: bool,
        config: &SwitchConfig,
    ) -> Arc<Self> {
        let engine = match reliability {
            Reliability::Reliable => Engine::Reliable(ReliableState::new(config)),
            Reliability::Unreliable => Engine::Unreliable(UnreliableState::new(config)),
        };
        Arc::new(Self {
            id,
            typ,
            hashname,
            reliability,
            initiator,
            inner: Mutex::new(ChannelInner {
                state: ChannelState::Open,
                engine,
                peer_error: None,
                end_delivered: false,
                type_sent: false,
                deadline_hit: false,
                deadline_gen: 0,
            }),
            readers: Notify::new(),
            writers: Notify::new(),
        })
    }

    pub(crate) fn id(&self) -> u32 {
        self.id
    }

    fn lock(&self) -> MutexGuard<'_, ChannelInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Build the next outgoing packet if state and window allow.
    ///
    /// `body` is taken only on success, so callers can retry the same
    /// buffer after waiting on the writers waker.
    fn try_prepare(
        &self,
        body: &mut Option<Vec<u8>>,
        end: bool,
        err: Option<String>,
    ) -> Result<Option<Packet>> {
        let mut inner = self.lock();
        match inner.state {
            ChannelState::Broken => {
                return Err(match inner.peer_error.clone() {
                    Some(msg) => Error::PeerError(msg),
                    None => Error::BrokenChannel,
                });
            }
            ChannelState::EndSent | ChannelState::Ended => {
                return Err(Error::ChannelClosed);
            }
            ChannelState::Open | ChannelState::EndReceived => {}
        }

        let mut header = Header::channel(self.id);
        if self.initiator && !inner.type_sent {
            header.typ = Some(self.typ.clone());
        }
        header.end = end;

        if let Some(reason) = err {
            // Error packets skip the reliability engine entirely; they
            // are a last word, never retransmitted.
            header.err = Some(reason);
            inner.force_break();
            return Ok(Some(Packet::new(header, body.take().unwrap_or_default())));
        }

        let pkt = match &mut inner.engine {
            Engine::Reliable(r) => {
                if !r.can_send() {
                    return Ok(None);
                }
                r.send(header, body.take().unwrap_or_default())
            }
            Engine::Unreliable(u) => u.send(header, body.take().unwrap_or_default()),
        };
        inner.type_sent = true;
        if end {
            inner.note_end_sent();
        }
        Ok(Some(pkt))
    }

    /// Absorb an inbound channel packet; called by the reactor.
    pub(crate) fn receive(&self, pkt: Packet, now: Instant) -> Dispatch {
        let mut inner = self.lock();

        if let Some(msg) = pkt.header().and_then(|h| h.err.clone()) {
            tracing::debug!(
                channel = self.id,
                err = %msg,
                "channel failed by peer"
            );
            inner.peer_error = Some(msg);
            inner.force_break();
            drop(inner);
            self.wake_all();
            return Dispatch {
                done: true,
                ..Dispatch::default()
            };
        }

        let end = pkt.header().is_some_and(|h| h.end);
        let out = inner.engine.receive(pkt, now);
        if end && out.dropped.is_none() {
            inner.note_end_received();
        }
        let done = inner.engine.all_done() && inner.state.is_terminal();
        drop(inner);

        if out.delivered || done {
            self.readers.notify_one();
        }
        if out.window_opened {
            self.writers.notify_one();
        }
        Dispatch {
            retransmit: out.retransmit,
            ack: out.ack,
            done,
            dropped: out.dropped,
        }
    }

    /// Dedicated ack packet, if the receive side still owes one.
    pub(crate) fn take_ack(&self) -> Option<Packet> {
        let mut inner = self.lock();
        match &mut inner.engine {
            Engine::Reliable(r) => {
                if r.needs_ack() {
                    Some(r.build_ack(self.id))
                } else {
                    None
                }
            }
            Engine::Unreliable(_) => None,
        }
    }

    /// Mark the channel broken because the line underneath it died.
    pub(crate) fn break_now(&self) {
        let mut inner = self.lock();
        inner.force_break();
        drop(inner);
        self.wake_all();
    }

    fn wake_all(&self) {
        self.readers.notify_waiters();
        self.readers.notify_one();
        self.writers.notify_waiters();
        self.writers.notify_one();
    }
}

/// Application handle to one channel.
///
/// Cloning is cheap and yields another handle onto the same stream,
/// so one task can read while another writes.
#[derive(Clone)]
pub struct Channel {
    shared: Arc<ChannelShared>,
    commands: mpsc::UnboundedSender<Command>,
}

impl Channel {
    pub(crate) fn new(
        shared: Arc<ChannelShared>,
        commands: mpsc::UnboundedSender<Command>,
    ) -> Self {
        Self { shared, commands }
    }

    /// Channel identifier, unique per line.
    #[must_use]
    pub fn id(&self) -> u32 {
        self.shared.id
    }

    /// Application type tag from the first packet.
    #[must_use]
    pub fn channel_type(&self) -> &str {
        &self.shared.typ
    }

    /// Delivery mode.
    #[must_use]
    pub fn reliability(&self) -> Reliability {
        self.shared.reliability
    }

    /// Hashname of the peer this channel reaches.
    #[must_use]
    pub fn remote(&self) -> Hashname {
        self.shared.hashname
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> ChannelState {
        self.shared.lock().state
    }

    /// Receive-side reliability snapshot.
    #[must_use]
    pub fn inspect(&self) -> ChannelInspect {
        let inner = self.shared.lock();
        let (acked, missing) = match &inner.engine {
            Engine::Reliable(r) => r.ack_fields(),
            Engine::Unreliable(_) => (None, Vec::new()),
        };
        ChannelInspect { acked, missing }
    }

    /// Send one packet body, waiting for send-window room on reliable
    /// channels.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ChannelClosed`] after `close`,
    /// [`Error::BrokenChannel`] or [`Error::PeerError`] on a dead
    /// channel, and [`Error::BrokenLine`] when the line cannot carry it.
    pub async fn send(&self, body: impl Into<Vec<u8>>) -> Result<()> {
        self.send_packet(body.into(), false, None).await
    }

    /// End this direction cleanly. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns [`Error::BrokenLine`] when the end packet cannot be sent.
    pub async fn close(&self) -> Result<()> {
        match self.send_packet(Vec::new(), true, None).await {
            Ok(()) | Err(Error::ChannelClosed) => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Terminate the channel abnormally, telling the peer why.
    ///
    /// # Errors
    ///
    /// Returns [`Error::BrokenLine`] when the error packet cannot be
    /// sent; the local channel is broken either way.
    pub async fn fail(&self, reason: &str) -> Result<()> {
        self.send_packet(Vec::new(), false, Some(reason.to_string()))
            .await
    }

    async fn send_packet(&self, body: Vec<u8>, end: bool, err: Option<String>) -> Result<()> {
        let mut body = Some(body);
        let pkt = loop {
            let notified = self.shared.writers.notified();
            tokio::pin!(notified);
            if let Some(pkt) = self.shared.try_prepare(&mut body, end, err.clone())? {
                break pkt;
            }
            notified.as_mut().await;
        };

        let (reply_tx, reply_rx) = oneshot::channel();
        self.commands
            .send(Command::Transmit {
                hashname: self.shared.hashname,
                packet: pkt,
                reply: Some(reply_tx),
            })
            .map_err(|_| Error::SwitchClosed)?;
        reply_rx.await.map_err(|_| Error::SwitchClosed)?
    }

    /// Receive the next packet body.
    ///
    /// Returns `Ok(None)` once the peer's end has been delivered.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Timeout`] while a read deadline is expired,
    /// [`Error::PeerError`] when the peer failed the channel, and
    /// [`Error::BrokenChannel`] when the line died underneath it.
    pub async fn recv(&self) -> Result<Option<Vec<u8>>> {
        loop {
            let notified = self.shared.readers.notified();
            tokio::pin!(notified);
            {
                let mut inner = self.shared.lock();
                if inner.deadline_hit {
                    return Err(Error::Timeout);
                }
                if inner.end_delivered {
                    return Ok(None);
                }
                if let Some(pkt) = inner.engine.pop() {
                    let end = pkt.header().is_some_and(|h| h.end);
                    if end {
                        inner.end_delivered = true;
                    }
                    drop(inner);
                    // Chain the wakeup in case another reader waits.
                    self.shared.readers.notify_one();
                    if end && pkt.body.is_empty() {
                        return Ok(None);
                    }
                    return Ok(Some(pkt.body));
                }
                if let Some(msg) = inner.peer_error.clone() {
                    return Err(Error::PeerError(msg));
                }
                match inner.state {
                    ChannelState::Broken => return Err(Error::BrokenChannel),
                    ChannelState::Ended | ChannelState::EndReceived => {
                        // End is buffered but not yet poppable only on
                        // reliable channels with gaps; keep waiting.
                        if inner.engine.all_done() {
                            return Ok(None);
                        }
                    }
                    _ => {}
                }
            }
            notified.as_mut().await;
        }
    }

    /// Set or clear the read deadline.
    ///
    /// While an expired deadline is in place every `recv` returns
    /// [`Error::Timeout`]; setting a new deadline (or `None`) clears the
    /// expired state.
    pub fn set_read_deadline(&self, deadline: Option<Instant>) {
        let generation = {
            let mut inner = self.shared.lock();
            inner.deadline_gen += 1;
            inner.deadline_hit = false;
            inner.deadline_gen
        };
        if let Some(at) = deadline {
            let shared = self.shared.clone();
            tokio::spawn(async move {
                tokio::time::sleep_until(tokio::time::Instant::from_std(at)).await;
                let mut inner = shared.lock();
                if inner.deadline_gen == generation {
                    inner.deadline_hit = true;
                    drop(inner);
                    shared.readers.notify_waiters();
                    shared.readers.notify_one();
                }
            });
        } else {
            // Clearing may unblock a reader stuck on Timeout returns.
            self.shared.readers.notify_one();
        }
    }

}

impl std::fmt::Debug for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Channel")
            .field("id", &self.shared.id)
            .field("type", &self.shared.typ)
            .field("remote", &self.shared.hashname.short())
            .finish()
    }
}
