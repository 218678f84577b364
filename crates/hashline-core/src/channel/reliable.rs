//! Reliability engine for ordered channels.
//!
//! Pure state machine, no I/O: the reactor and the channel handle feed
//! it packets and it answers with what to deliver, retransmit and ack.
//!
//! Sender side keeps every unacknowledged packet in a window-bounded
//! buffer; an incoming `ack` purges everything at or below it except
//! sequences the peer lists in `miss`, which are retransmitted with a
//! per-channel holdoff. Receiver side buffers out-of-order packets,
//! releases them strictly in sequence order exactly once, and answers
//! with `ack`/`miss` piggybacked on outgoing data or, failing that, a
//! dedicated ack packet after a delay or an unacked-count threshold.

use crate::channel::{AckAction, RcvOutcome};
use crate::config::SwitchConfig;
use crate::error::Error;
use crate::packet::{Header, Packet};
use std::collections::VecDeque;
use std::time::{Duration, Instant};

fn seq_of(pkt: &Packet) -> u32 {
    pkt.header().and_then(|h| h.seq).unwrap_or(0)
}

pub(crate) struct ReliableState {
    window: u32,
    backlog: usize,
    ack_threshold: u32,
    holdoff: Duration,

    // Send side.
    next_seq: u32,
    snd_buf: VecDeque<Packet>,
    end_sent: bool,
    last_retransmit: Option<Instant>,

    // Receive side.
    next_read: u32,
    max_seen: Option<u32>,
    rcv_buf: Vec<Packet>,
    end_rcvd: Option<u32>,
    unacked: u32,
    ack_armed: bool,
    last_ack_sent: Option<u32>,
}

impl ReliableState {
    pub(crate) fn new(config: &SwitchConfig) -> Self {
        Self {
            window: config.send_window,
            backlog: config.recv_backlog,
            ack_threshold: config.ack_threshold,
            holdoff: config.retransmit_holdoff,
            next_seq: 0,
            snd_buf: VecDeque::new(),
            end_sent: false,
            last_retransmit: None,
            next_read: 0,
            max_seen: None,
            rcv_buf: Vec::new(),
            end_rcvd: None,
            unacked: 0,
            ack_armed: false,
            last_ack_sent: None,
        }
    }

    /// Whether the send window has room for another packet.
    pub(crate) fn can_send(&self) -> bool {
        !self.end_sent && (self.snd_buf.len() as u32) < self.window
    }

    /// Assign the next sequence, piggyback ack state and buffer a copy.
    ///
    /// Callers must check [`Self::can_send`] first.
    pub(crate) fn send(&mut self, mut header: Header, body: Vec<u8>) -> Packet {
        header.seq = Some(self.next_seq);
        self.next_seq += 1;

        let (ack, miss) = self.ack_fields();
        header.ack = ack;
        header.miss = miss;
        if header.end {
            self.end_sent = true;
        }

        let pkt = Packet::new(header, body);
        self.snd_buf.push_back(pkt.clone());
        self.mark_ack_sent();
        pkt
    }

    /// Absorb an incoming channel packet.
    pub(crate) fn receive(&mut self, pkt: Packet, now: Instant) -> RcvOutcome {
        let mut out = RcvOutcome::default();
        let Some(header) = pkt.header() else {
            out.dropped = Some(Error::InvalidPacket("no structured header"));
            return out;
        };

        let seq = header.seq;
        let end = header.end;
        if header.ack.is_some() || !header.miss.is_empty() {
            let miss = header.miss.clone();
            let (opened, retransmit) = self.process_ack(header.ack, &miss, now);
            out.window_opened = opened;
            out.retransmit = retransmit;
        }

        let Some(seq) = seq else {
            // Pure ack packet, nothing to buffer.
            return out;
        };

        if seq < self.next_read || self.contains(seq) {
            // Re-ack so a sender that lost our ack can purge.
            out.dropped = Some(Error::DuplicatePacket);
            out.ack = self.arm_ack();
            return out;
        }
        if (seq - self.next_read) as usize >= self.backlog {
            out.dropped = Some(Error::InvalidPacket("beyond receive window"));
            return out;
        }

        let pos = self.rcv_buf.partition_point(|p| seq_of(p) < seq);
        self.rcv_buf.insert(pos, pkt);
        self.max_seen = Some(self.max_seen.map_or(seq, |m| m.max(seq)));
        if end {
            self.end_rcvd = Some(self.end_rcvd.map_or(seq, |e| e.min(seq)));
        }

        self.unacked += 1;
        out.delivered = self.readable();
        out.ack = if self.unacked >= self.ack_threshold {
            AckAction::Now
        } else {
            self.arm_ack()
        };
        out
    }

    /// Release the next in-order packet, if it has arrived.
    pub(crate) fn pop(&mut self) -> Option<Packet> {
        if !self.readable() {
            return None;
        }
        self.next_read += 1;
        Some(self.rcv_buf.remove(0))
    }

    fn readable(&self) -> bool {
        self.rcv_buf.first().is_some_and(|p| seq_of(p) == self.next_read)
    }

    fn contains(&self, seq: u32) -> bool {
        self.rcv_buf
            .binary_search_by_key(&seq, seq_of)
            .is_ok()
    }

    /// Highest sequence received with no gap below it. Acks confirm
    /// receipt, not application reads, so a slow reader never stalls
    /// the peer's send window.
    fn contiguous_end(&self) -> Option<u32> {
        let mut next = self.next_read;
        for p in &self.rcv_buf {
            if seq_of(p) == next {
                next += 1;
            } else {
                break;
            }
        }
        next.checked_sub(1)
    }

    /// Current ack value and missing list, as they would go on the wire.
    pub(crate) fn ack_fields(&self) -> (Option<u32>, Vec<u32>) {
        let ack = self.contiguous_end();
        let mut miss = Vec::new();
        if let Some(max) = self.max_seen {
            let mut have = self.rcv_buf.iter().map(seq_of).peekable();
            for seq in self.next_read..=max {
                while have.peek().is_some_and(|&s| s < seq) {
                    have.next();
                }
                if have.peek() == Some(&seq) {
                    have.next();
                } else {
                    miss.push(seq);
                }
                if miss.len() >= self.backlog {
                    break;
                }
            }
        }
        (ack, miss)
    }

    fn arm_ack(&mut self) -> AckAction {
        if self.ack_armed {
            AckAction::None
        } else {
            self.ack_armed = true;
            AckAction::Delay
        }
    }

    /// Whether a fired ack timer still has something to say.
    pub(crate) fn needs_ack(&self) -> bool {
        self.unacked > 0 || self.last_ack_sent != self.ack_fields().0
    }

    /// Build a dedicated ack-only packet for channel `c`.
    pub(crate) fn build_ack(&mut self, c: u32) -> Packet {
        let (ack, miss) = self.ack_fields();
        let header = Header {
            ack,
            miss,
            ..Header::channel(c)
        };
        self.mark_ack_sent();
        Packet::new(header, Vec::new())
    }

    fn mark_ack_sent(&mut self) {
        self.unacked = 0;
        self.ack_armed = false;
        self.last_ack_sent = self.contiguous_end();
    }

    /// Purge acknowledged packets; collect retransmissions for `miss`.
    ///
    /// `ack` is absent on miss reports sent before anything arrived in
    /// order; those still drive retransmission, just no purge.
    fn process_ack(&mut self, ack: Option<u32>, miss: &[u32], now: Instant) -> (bool, Vec<Packet>) {
        let before = self.snd_buf.len();
        if let Some(ack) = ack {
            self.snd_buf
                .retain(|p| seq_of(p) > ack || miss.contains(&seq_of(p)));
        }
        let opened = self.snd_buf.len() < before;

        let mut retransmit = Vec::new();
        if !miss.is_empty() {
            let due = self
                .last_retransmit
                .is_none_or(|t| now.duration_since(t) >= self.holdoff);
            if due {
                let (cur_ack, cur_miss) = self.ack_fields();
                for p in &self.snd_buf {
                    if miss.contains(&seq_of(p)) {
                        let mut r = p.clone();
                        if let Some(h) = r.header_mut() {
                            h.ack = cur_ack;
                            h.miss = cur_miss.clone();
                        }
                        retransmit.push(r);
                    }
                }
                if !retransmit.is_empty() {
                    self.last_retransmit = Some(now);
                }
            }
        }
        (opened, retransmit)
    }

    /// Whether both directions have finished and been acknowledged.
    pub(crate) fn all_done(&self) -> bool {
        if !self.snd_buf.is_empty() {
            return false;
        }
        if self.end_sent {
            return true;
        }
        self.end_rcvd.is_some()
            && self.rcv_buf.is_empty()
            && self.max_seen.is_some_and(|m| self.next_read > m)
            && self.last_ack_sent == self.max_seen
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state() -> ReliableState {
        let config = SwitchConfig {
            send_window: 4,
            recv_backlog: 8,
            ack_threshold: 3,
            retransmit_holdoff: Duration::from_millis(500),
            ..SwitchConfig::default()
        };
        ReliableState::new(&config)
    }

    fn data(seq: u32) -> Packet {
        let header = Header {
            seq: Some(seq),
            ..Header::channel(1)
        };
        Packet::new(header, format!("pkt-{seq}").into_bytes())
    }

    fn ack(ack: u32, miss: Vec<u32>) -> Packet {
        let header = Header {
            ack: Some(ack),
            miss,
            ..Header::channel(1)
        };
        Packet::new(header, Vec::new())
    }

    #[test]
    fn test_in_order_delivery() {
        let mut s = state();
        let now = Instant::now();
        for seq in 0..3 {
            let out = s.receive(data(seq), now);
            assert!(out.delivered);
            assert!(out.dropped.is_none());
        }
        for seq in 0..3 {
            assert_eq!(s.pop().unwrap().body, format!("pkt-{seq}").into_bytes());
        }
        assert!(s.pop().is_none());
    }

    #[test]
    fn test_out_of_order_held_back() {
        let mut s = state();
        let now = Instant::now();

        assert!(!s.receive(data(2), now).delivered);
        assert!(s.pop().is_none());
        assert_eq!(s.ack_fields(), (None, vec![0, 1]));

        s.receive(data(0), now);
        s.receive(data(1), now);
        assert_eq!(seq_of(&s.pop().unwrap()), 0);
        assert_eq!(seq_of(&s.pop().unwrap()), 1);
        assert_eq!(seq_of(&s.pop().unwrap()), 2);
        assert_eq!(s.ack_fields(), (Some(2), vec![]));
    }

    #[test]
    fn test_duplicates_dropped() {
        let mut s = state();
        let now = Instant::now();

        s.receive(data(0), now);
        assert!(matches!(
            s.receive(data(0), now).dropped,
            Some(Error::DuplicatePacket)
        ));
        assert_eq!(seq_of(&s.pop().unwrap()), 0);
        // Already delivered: still a duplicate.
        assert!(matches!(
            s.receive(data(0), now).dropped,
            Some(Error::DuplicatePacket)
        ));
        assert!(s.pop().is_none());
    }

    #[test]
    fn test_window_bounds_sender() {
        let mut s = state();
        for _ in 0..4 {
            assert!(s.can_send());
            s.send(Header::channel(1), Vec::new());
        }
        assert!(!s.can_send());

        // Acking the first two reopens the window.
        let (opened, _) = s.process_ack(Some(1), &[], Instant::now());
        assert!(opened);
        assert!(s.can_send());
    }

    #[test]
    fn test_ack_purges_and_miss_retains() {
        let mut s = state();
        let now = Instant::now();
        for _ in 0..4 {
            s.send(Header::channel(1), Vec::new());
        }

        let out = s.receive(ack(2, vec![1]), now);
        assert!(out.window_opened);
        // Seq 1 was missed: retransmitted and kept buffered.
        assert_eq!(out.retransmit.len(), 1);
        assert_eq!(seq_of(&out.retransmit[0]), 1);
        let buffered: Vec<u32> = s.snd_buf.iter().map(seq_of).collect();
        assert_eq!(buffered, vec![1, 3]);
    }

    #[test]
    fn test_miss_without_ack_still_retransmits() {
        let mut s = state();
        let now = Instant::now();
        s.send(Header::channel(1), Vec::new());
        s.send(Header::channel(1), Vec::new());

        // Peer got seq 1 but not seq 0, so it has nothing to ack yet.
        let header = Header {
            miss: vec![0],
            ..Header::channel(1)
        };
        let out = s.receive(Packet::new(header, Vec::new()), now);
        assert_eq!(out.retransmit.len(), 1);
        assert_eq!(seq_of(&out.retransmit[0]), 0);
        // Nothing was purged.
        assert_eq!(s.snd_buf.len(), 2);
    }

    #[test]
    fn test_retransmit_holdoff() {
        let mut s = state();
        let now = Instant::now();
        for _ in 0..3 {
            s.send(Header::channel(1), Vec::new());
        }

        let first = s.receive(ack(2, vec![0]), now);
        assert_eq!(first.retransmit.len(), 1);

        // Second miss report inside the holdoff is not answered.
        let again = s.receive(ack(2, vec![0]), now + Duration::from_millis(100));
        assert!(again.retransmit.is_empty());

        // After the holdoff it is.
        let later = s.receive(ack(2, vec![0]), now + Duration::from_millis(600));
        assert_eq!(later.retransmit.len(), 1);
    }

    #[test]
    fn test_ack_threshold_forces_immediate_ack() {
        let mut s = state();
        let now = Instant::now();

        assert!(matches!(s.receive(data(0), now).ack, AckAction::Delay));
        assert!(matches!(s.receive(data(1), now).ack, AckAction::None));
        // Third unacked packet hits the threshold of 3.
        assert!(matches!(s.receive(data(2), now).ack, AckAction::Now));
    }

    #[test]
    fn test_build_ack_resets_bookkeeping() {
        let mut s = state();
        let now = Instant::now();
        s.receive(data(0), now);
        s.receive(data(1), now);
        s.pop();
        s.pop();

        assert!(s.needs_ack());
        let pkt = s.build_ack(1);
        let h = pkt.header().unwrap();
        assert_eq!(h.ack, Some(1));
        assert!(h.miss.is_empty());
        assert!(!s.needs_ack());
    }

    #[test]
    fn test_piggyback_counts_as_ack() {
        let mut s = state();
        let now = Instant::now();
        s.receive(data(0), now);

        let pkt = s.send(Header::channel(1), b"reply".to_vec());
        assert_eq!(pkt.header().unwrap().ack, Some(0));
        assert!(!s.needs_ack());
    }

    #[test]
    fn test_receive_window_bound() {
        let mut s = state();
        let now = Instant::now();
        // Backlog is 8; seq 8 with nothing delivered is out of range.
        assert!(matches!(
            s.receive(data(8), now).dropped,
            Some(Error::InvalidPacket("beyond receive window"))
        ));
        assert!(s.receive(data(7), now).dropped.is_none());
    }

    #[test]
    fn test_all_done_after_clean_shutdown() {
        let mut s = state();
        let now = Instant::now();
        assert!(!s.all_done());

        // We send an end; done once it is acked.
        let header = Header {
            end: true,
            ..Header::channel(1)
        };
        s.send(header, Vec::new());
        assert!(!s.all_done());
        s.process_ack(Some(0), &[], now);
        assert!(s.all_done());
    }

    #[test]
    fn test_all_done_after_remote_end() {
        let mut s = state();
        let now = Instant::now();

        let end = Packet::new(
            Header {
                seq: Some(0),
                end: true,
                ..Header::channel(1)
            },
            Vec::new(),
        );
        s.receive(end, now);
        assert!(!s.all_done());
        s.pop();
        assert!(!s.all_done());
        // Done once our ack for the end is out.
        s.build_ack(1);
        assert!(s.all_done());
    }
}
