//! Lines: encrypted point-to-point sessions between two hashnames.
//!
//! A line is established by exchanging open packets (see
//! [`crate::handshake`]) and then carries channel packets wrapped in
//! outer `line` packets. The [`Line`] struct is the reactor's record of
//! one peer relationship; it owns the handshake halves, the traffic
//! keys and an explicit state machine.

use crate::error::{Error, Result};
use crate::handshake::{LocalHalf, RemoteHalf, derive_line_keys};
use crate::hashname::Hashname;
use crate::packet::{Header, Packet};
use hashline_crypto::{LINE_ID_SIZE, LineKeys, Nonce};
use rand_core::{CryptoRng, RngCore};
use std::net::SocketAddr;
use std::time::{Duration, Instant};

/// Packet type tag of outer line packets.
pub const LINE_TYPE: &str = "line";

/// Line lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineState {
    /// Created, no open packet sent yet.
    Pending,
    /// Our open is out, waiting for the peer's.
    Opening,
    /// Both opens exchanged, traffic keys derived.
    Opened,
    /// Torn down deliberately (idle or shutdown).
    Closed,
    /// Failed: open timed out or the attempt was abandoned.
    Broken,
}

impl LineState {
    /// Whether moving to `next` is a legal transition.
    #[must_use]
    pub fn can_transition(self, next: LineState) -> bool {
        use LineState::{Broken, Closed, Opened, Opening, Pending};
        matches!(
            (self, next),
            (Pending, Opening | Opened | Closed | Broken)
                | (Opening, Opened | Closed | Broken)
                // Opened to Opened covers a rekeying handshake.
                | (Opened, Opened | Closed | Broken)
        )
    }

    /// Whether this state can never be left.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, LineState::Closed | LineState::Broken)
    }

    /// Static name, for errors and logs.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            LineState::Pending => "pending",
            LineState::Opening => "opening",
            LineState::Opened => "opened",
            LineState::Closed => "closed",
            LineState::Broken => "broken",
        }
    }
}

/// One peer relationship: handshake state, traffic keys and liveness.
pub struct Line {
    hashname: Hashname,
    state: LineState,
    /// Datagram address the peer was last seen at.
    pub addr: Option<SocketAddr>,
    /// Our half of the handshake, once an attempt started.
    pub local: Option<LocalHalf>,
    /// The peer's half, once its open was accepted.
    pub remote: Option<RemoteHalf>,
    keys: Option<LineKeys>,
    /// Timestamp of the last inbound packet on this line.
    pub last_activity: Instant,
    /// `at` of the newest accepted open, for replay suppression.
    pub accepted_at: Option<i64>,
}

impl Line {
    /// Fresh line record for `hashname`.
    #[must_use]
    pub fn new(hashname: Hashname) -> Self {
        Self {
            hashname,
            state: LineState::Pending,
            addr: None,
            local: None,
            remote: None,
            keys: None,
            last_activity: Instant::now(),
            accepted_at: None,
        }
    }

    /// The peer this line reaches.
    #[must_use]
    pub fn hashname(&self) -> Hashname {
        self.hashname
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> LineState {
        self.state
    }

    /// Whether traffic can flow.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.state == LineState::Opened
    }

    /// Move to `next`, enforcing the transition table.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidTransition`] for moves the table forbids.
    pub fn transition_to(&mut self, next: LineState) -> Result<()> {
        if !self.state.can_transition(next) {
            return Err(Error::InvalidTransition {
                from: self.state.name(),
                to: next.name(),
            });
        }
        tracing::debug!(
            line = %self.hashname.short(),
            from = self.state.name(),
            to = next.name(),
            "line state transition"
        );
        self.state = next;
        Ok(())
    }

    /// Accept the peer's verified handshake half and derive traffic keys.
    ///
    /// Requires a local half; the caller creates one first when acting
    /// as responder.
    ///
    /// # Errors
    ///
    /// Returns [`Error::BrokenLine`] without a local half, or
    /// [`Error::Crypto`] when key agreement degenerates.
    pub fn establish(&mut self, remote: RemoteHalf) -> Result<()> {
        let local = self.local.as_ref().ok_or(Error::BrokenLine)?;
        let keys = derive_line_keys(local, &remote)?;
        self.accepted_at = Some(remote.at);
        self.keys = Some(keys);
        self.remote = Some(remote);
        self.transition_to(LineState::Opened)
    }

    /// The token we generated; inbound line packets are routed by it.
    #[must_use]
    pub fn local_token(&self) -> Option<[u8; LINE_ID_SIZE]> {
        self.local.as_ref().map(|l| l.line_id)
    }

    /// Record inbound traffic for idle accounting.
    pub fn touch(&mut self) {
        self.last_activity = Instant::now();
    }

    /// Time since the last inbound packet.
    #[must_use]
    pub fn idle_for(&self) -> Duration {
        self.last_activity.elapsed()
    }

    /// Wrap a channel packet in an encrypted outer line packet.
    ///
    /// # Errors
    ///
    /// Returns [`Error::BrokenLine`] unless the line is opened.
    pub fn encrypt<R: RngCore + CryptoRng>(&self, rng: &mut R, inner: &Packet) -> Result<Packet> {
        let keys = self.keys.as_ref().ok_or(Error::BrokenLine)?;
        let remote = self.remote.as_ref().ok_or(Error::BrokenLine)?;

        let nonce = Nonce::generate(rng);
        let body = keys.encrypt.encrypt(&nonce, &inner.encode()?)?;
        let header = Header {
            line: Some(hex::encode(remote.line_id)),
            iv: Some(hex::encode(nonce.as_bytes())),
            ..Header::of_type(LINE_TYPE)
        };
        Ok(Packet::new(header, body))
    }

    /// Unwrap an outer line packet into the channel packet it carries.
    ///
    /// # Errors
    ///
    /// Returns [`Error::BrokenLine`] unless the line is opened,
    /// [`Error::InvalidPacket`] on framing problems and
    /// [`Error::Crypto`] when authentication fails.
    pub fn decrypt(&self, outer: &Packet) -> Result<Packet> {
        let keys = self.keys.as_ref().ok_or(Error::BrokenLine)?;
        let header = outer
            .header()
            .ok_or(Error::InvalidPacket("missing line header"))?;
        let iv = header.iv.as_ref().ok_or(Error::InvalidPacket("missing iv"))?;

        let mut nonce_bytes = [0u8; hashline_crypto::NONCE_SIZE];
        hex::decode_to_slice(iv, &mut nonce_bytes)
            .map_err(|_| Error::InvalidPacket("malformed iv"))?;

        let inner = keys
            .decrypt
            .decrypt(&Nonce::from_bytes(nonce_bytes), &outer.body)?;
        Packet::decode(&inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handshake::{compose_open, decompose_open};
    use crate::identity::Identity;
    use rand_core::OsRng;

    fn open_pair() -> (Line, Line) {
        let alice = Identity::generate(&mut OsRng);
        let bob = Identity::generate(&mut OsRng);

        let mut a_line = Line::new(bob.hashname());
        let mut b_line = Line::new(alice.hashname());
        a_line.local = Some(LocalHalf::new(&mut OsRng, 1_000));
        b_line.local = Some(LocalHalf::new(&mut OsRng, 1_001));

        let a_open =
            compose_open(&mut OsRng, &alice, bob.keys(), a_line.local.as_ref().unwrap()).unwrap();
        let b_open =
            compose_open(&mut OsRng, &bob, alice.keys(), b_line.local.as_ref().unwrap()).unwrap();

        a_line.establish(decompose_open(&alice, &b_open).unwrap()).unwrap();
        b_line.establish(decompose_open(&bob, &a_open).unwrap()).unwrap();
        (a_line, b_line)
    }

    #[test]
    fn test_transition_table() {
        use LineState::*;
        assert!(Pending.can_transition(Opening));
        assert!(Pending.can_transition(Opened));
        assert!(Opening.can_transition(Opened));
        assert!(Opened.can_transition(Opened));
        assert!(Opened.can_transition(Closed));
        assert!(!Closed.can_transition(Opened));
        assert!(!Broken.can_transition(Opening));
        assert!(!Opened.can_transition(Pending));
        assert!(Closed.is_terminal());
        assert!(!Opened.is_terminal());
    }

    #[test]
    fn test_invalid_transition_rejected() {
        let mut line = Line::new(Hashname::from_bytes([1u8; 32]));
        line.transition_to(LineState::Closed).unwrap();
        assert!(matches!(
            line.transition_to(LineState::Opened).unwrap_err(),
            Error::InvalidTransition { .. }
        ));
    }

    #[test]
    fn test_line_packet_roundtrip() {
        let (a, b) = open_pair();
        let inner = Packet::new(Header::channel(5), b"payload".to_vec());

        let outer = a.encrypt(&mut OsRng, &inner).unwrap();
        assert_eq!(outer.header().unwrap().typ.as_deref(), Some(LINE_TYPE));
        // Routed by the token B generated.
        assert_eq!(
            outer.header().unwrap().line.as_deref(),
            Some(hex::encode(b.local_token().unwrap()).as_str())
        );

        let wire = outer.encode().unwrap();
        let back = b.decrypt(&Packet::decode(&wire).unwrap()).unwrap();
        assert_eq!(back, inner);
    }

    #[test]
    fn test_decrypt_rejects_foreign_traffic() {
        let (a, _) = open_pair();
        let (_, other_b) = open_pair();
        let inner = Packet::new(Header::channel(1), b"x".to_vec());

        let outer = a.encrypt(&mut OsRng, &inner).unwrap();
        assert!(other_b.decrypt(&outer).is_err());
    }

    #[test]
    fn test_unopened_line_cannot_carry_traffic() {
        let line = Line::new(Hashname::from_bytes([2u8; 32]));
        let inner = Packet::new(Header::channel(1), Vec::new());
        assert!(matches!(
            line.encrypt(&mut OsRng, &inner).unwrap_err(),
            Error::BrokenLine
        ));
    }
}
