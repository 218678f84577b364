//! Datagram-style channels: no ordering, no retransmission.
//!
//! Packets go out as built and arrive in whatever order the network
//! picks. The only state is a bounded receive backlog; packets past the
//! bound are dropped the way a full socket buffer drops datagrams.

use crate::channel::RcvOutcome;
use crate::config::SwitchConfig;
use crate::error::Error;
use crate::packet::{Header, Packet};
use std::collections::VecDeque;

pub(crate) struct UnreliableState {
    backlog: usize,
    rcv_buf: VecDeque<Packet>,
    end_sent: bool,
    end_rcvd: bool,
}

impl UnreliableState {
    pub(crate) fn new(config: &SwitchConfig) -> Self {
        Self {
            backlog: config.recv_backlog,
            rcv_buf: VecDeque::new(),
            end_sent: false,
            end_rcvd: false,
        }
    }

    pub(crate) fn send(&mut self, header: Header, body: Vec<u8>) -> Packet {
        if header.end {
            self.end_sent = true;
        }
        Packet::new(header, body)
    }

    pub(crate) fn receive(&mut self, pkt: Packet) -> RcvOutcome {
        let mut out = RcvOutcome::default();
        if self.rcv_buf.len() >= self.backlog {
            out.dropped = Some(Error::InvalidPacket("receive backlog full"));
            return out;
        }
        if pkt.header().is_some_and(|h| h.end) {
            self.end_rcvd = true;
        }
        self.rcv_buf.push_back(pkt);
        out.delivered = true;
        out
    }

    pub(crate) fn pop(&mut self) -> Option<Packet> {
        self.rcv_buf.pop_front()
    }

    pub(crate) fn all_done(&self) -> bool {
        self.end_sent || (self.end_rcvd && self.rcv_buf.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state() -> UnreliableState {
        UnreliableState::new(&SwitchConfig {
            recv_backlog: 3,
            ..SwitchConfig::default()
        })
    }

    fn pkt(n: u8) -> Packet {
        Packet::new(Header::channel(1), vec![n])
    }

    #[test]
    fn test_arrival_order_preserved() {
        let mut s = state();
        s.receive(pkt(2));
        s.receive(pkt(0));
        assert_eq!(s.pop().unwrap().body, vec![2]);
        assert_eq!(s.pop().unwrap().body, vec![0]);
        assert!(s.pop().is_none());
    }

    #[test]
    fn test_backlog_drops_overflow() {
        let mut s = state();
        for n in 0..3 {
            assert!(s.receive(pkt(n)).dropped.is_none());
        }
        assert!(matches!(
            s.receive(pkt(9)).dropped,
            Some(Error::InvalidPacket("receive backlog full"))
        ));

        // Draining makes room again.
        s.pop();
        assert!(s.receive(pkt(9)).dropped.is_none());
    }

    #[test]
    fn test_done_after_end() {
        let mut s = state();
        assert!(!s.all_done());

        let end = Packet::new(
            Header {
                end: true,
                ..Header::channel(1)
            },
            Vec::new(),
        );
        s.receive(end);
        assert!(!s.all_done());
        s.pop();
        assert!(s.all_done());
    }
}
