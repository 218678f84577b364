//! Switch configuration.

use std::time::Duration;

/// Tunable policy constants for a switch instance.
///
/// The defaults match the protocol's interoperable behavior; deployments
/// mostly adjust the timers and the worker count.
#[derive(Debug, Clone)]
pub struct SwitchConfig {
    /// Maximum unacknowledged packets in flight per reliable channel.
    pub send_window: u32,
    /// Maximum out-of-order packets buffered per channel; also the
    /// backlog bound for unreliable channels.
    pub recv_backlog: usize,
    /// Received packets without an outgoing ack before one is forced.
    pub ack_threshold: u32,
    /// How long a received packet may wait for a piggybacked ack before
    /// a dedicated ack packet is emitted.
    pub ack_delay: Duration,
    /// Minimum spacing between retransmission bursts on one channel.
    pub retransmit_holdoff: Duration,
    /// Maximum accepted difference between an open packet's timestamp
    /// and the local clock.
    pub max_clock_skew: Duration,
    /// How long an outgoing open may remain unanswered before the line
    /// attempt is abandoned.
    pub open_timeout: Duration,
    /// Lines with no inbound traffic for this long are torn down.
    pub idle_timeout: Duration,
    /// Interval between idle-line sweeps.
    pub sweep_interval: Duration,
    /// Number of ingress workers decoding datagrams concurrently.
    pub ingress_workers: usize,
    /// Bound on inbound channels awaiting `accept`.
    pub accept_backlog: usize,
    /// Number of receive buffers kept in the ingress pool.
    pub pool_capacity: usize,
    /// Size of each receive buffer; datagrams above this are truncated
    /// by the transport and will fail to decode.
    pub max_datagram: usize,
}

impl Default for SwitchConfig {
    fn default() -> Self {
        Self {
            send_window: 100,
            recv_backlog: 100,
            ack_threshold: 30,
            ack_delay: Duration::from_secs(1),
            retransmit_holdoff: Duration::from_secs(1),
            max_clock_skew: Duration::from_secs(15 * 60),
            open_timeout: Duration::from_secs(30),
            idle_timeout: Duration::from_secs(60),
            sweep_interval: Duration::from_secs(15),
            ingress_workers: 4,
            accept_backlog: 32,
            pool_capacity: 64,
            max_datagram: 1472,
        }
    }
}

impl SwitchConfig {
    /// Clock skew bound in milliseconds, the unit open timestamps use.
    #[must_use]
    pub fn max_clock_skew_millis(&self) -> i64 {
        self.max_clock_skew.as_millis() as i64
    }
}
