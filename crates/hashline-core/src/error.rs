//! Error types for the hashline core.

use crate::hashname::Hashname;
use hashline_crypto::CryptoError;
use hashline_transport::TransportError;
use thiserror::Error;

/// Errors produced by the core protocol stack.
#[derive(Debug, Error)]
pub enum Error {
    /// Packet violated framing or header rules, or could not be buffered
    #[error("invalid packet: {0}")]
    InvalidPacket(&'static str),

    /// Line packet carried a token no live line answers to
    #[error("unknown line token")]
    UnknownLine,

    /// Channel packet referenced a channel id with no live channel
    #[error("unknown channel {0}")]
    UnknownChannel(u32),

    /// Sequence number was already delivered or buffered
    #[error("duplicate packet")]
    DuplicatePacket,

    /// Open packet failed authentication or freshness checks
    #[error("handshake rejected: {0}")]
    HandshakeRejected(&'static str),

    /// Channel entered the broken state (line died underneath it)
    #[error("channel is broken")]
    BrokenChannel,

    /// Channel was already ended locally
    #[error("channel is closed")]
    ChannelClosed,

    /// Remote peer failed the channel with an error header
    #[error("channel failed by peer: {0}")]
    PeerError(String),

    /// Line is not in a state that can carry traffic
    #[error("line is broken")]
    BrokenLine,

    /// A blocking operation hit its deadline
    #[error("operation timed out")]
    Timeout,

    /// No keys or address are known for this hashname
    #[error("no route to peer {0}")]
    UnknownPeer(Hashname),

    /// The switch reactor has shut down
    #[error("switch is closed")]
    SwitchClosed,

    /// State machine rejected a transition
    #[error("invalid transition from {from} to {to}")]
    InvalidTransition {
        /// State the machine was in
        from: &'static str,
        /// State that was requested
        to: &'static str,
    },

    /// Cryptographic operation failed
    #[error(transparent)]
    Crypto(#[from] CryptoError),

    /// Transport layer failure
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Header serialization failed
    #[error("header encoding failed: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type for core protocol operations.
pub type Result<T> = std::result::Result<T, Error>;
