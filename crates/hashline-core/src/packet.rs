//! Packet framing and header codec.
//!
//! Every datagram is `[length: u16 BE][header: length bytes][body]`.
//! A header of 7 or more bytes is a JSON object; a shorter non-empty
//! header is opaque binary and carries no protocol fields. The body is
//! always raw bytes, never inspected by the codec.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Minimum length of a structured (JSON) header.
pub const MIN_STRUCTURED_HEADER: usize = 7;

/// Well-known header fields plus a bag for anything the application adds.
///
/// Optional fields are omitted from the wire entirely when unset, which
/// keeps ack-only and keepalive packets small.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Header {
    /// Packet or channel type tag (`open`, `line`, or an application tag
    /// on the first packet of a channel).
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub typ: Option<String>,

    /// Channel identifier.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub c: Option<u32>,

    /// Sequence number, present on every reliable data packet.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seq: Option<u32>,

    /// Highest sequence the sender has received with no gap below it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ack: Option<u32>,

    /// Sequence numbers above `ack` not yet received.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub miss: Vec<u32>,

    /// Marks the final packet of a channel direction.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub end: bool,

    /// Abnormal channel termination reason.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub err: Option<String>,

    /// Recipient hashname, hex (inner open packets).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<String>,

    /// Sender clock at open composition, unix milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub at: Option<i64>,

    /// Line identifier, hex. On outer line packets this is the token the
    /// recipient generated; on inner open packets the sender's own token.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<String>,

    /// AEAD nonce, hex.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iv: Option<String>,

    /// Sealed ephemeral key, base64 (outer open packets).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub open: Option<String>,

    /// Encrypted handshake signature, base64 (outer open packets).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sig: Option<String>,

    /// Application-defined fields, preserved verbatim.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Header {
    /// Header addressed to channel `c`.
    #[must_use]
    pub fn channel(c: u32) -> Self {
        Self {
            c: Some(c),
            ..Self::default()
        }
    }

    /// Header announcing packet type `typ`.
    #[must_use]
    pub fn of_type(typ: &str) -> Self {
        Self {
            typ: Some(typ.to_string()),
            ..Self::default()
        }
    }
}

/// The decoded header region of a packet.
#[derive(Debug, Clone, PartialEq)]
pub enum PacketHeader {
    /// JSON header with protocol fields.
    Fields(Box<Header>),
    /// Short opaque binary header (0 to 6 bytes), no protocol fields.
    Opaque(Vec<u8>),
}

/// A decoded packet: header region plus raw body.
#[derive(Debug, Clone, PartialEq)]
pub struct Packet {
    /// Decoded header region.
    pub header: PacketHeader,
    /// Raw body bytes.
    pub body: Vec<u8>,
}

impl Packet {
    /// Packet with a structured header.
    #[must_use]
    pub fn new(header: Header, body: Vec<u8>) -> Self {
        Self {
            header: PacketHeader::Fields(Box::new(header)),
            body,
        }
    }

    /// Packet with a short opaque header.
    #[must_use]
    pub fn opaque(header: Vec<u8>, body: Vec<u8>) -> Self {
        Self {
            header: PacketHeader::Opaque(header),
            body,
        }
    }

    /// The structured header, if this packet has one.
    #[must_use]
    pub fn header(&self) -> Option<&Header> {
        match &self.header {
            PacketHeader::Fields(h) => Some(h),
            PacketHeader::Opaque(_) => None,
        }
    }

    /// Mutable access to the structured header, if present.
    pub fn header_mut(&mut self) -> Option<&mut Header> {
        match &mut self.header {
            PacketHeader::Fields(h) => Some(h),
            PacketHeader::Opaque(_) => None,
        }
    }

    /// Serialize to wire bytes.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidPacket`] when a structured header would
    /// serialize below the 7-byte floor or an opaque header reaches it,
    /// since either would be mis-framed by the receiver.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let header_bytes = match &self.header {
            PacketHeader::Fields(h) => {
                let json = serde_json::to_vec(h)?;
                if json.len() < MIN_STRUCTURED_HEADER {
                    return Err(Error::InvalidPacket("structured header below 7 bytes"));
                }
                json
            }
            PacketHeader::Opaque(bytes) => {
                if bytes.len() >= MIN_STRUCTURED_HEADER {
                    return Err(Error::InvalidPacket("opaque header above 6 bytes"));
                }
                bytes.clone()
            }
        };
        if header_bytes.len() > usize::from(u16::MAX) {
            return Err(Error::InvalidPacket("header exceeds length prefix"));
        }

        let mut out = Vec::with_capacity(2 + header_bytes.len() + self.body.len());
        out.extend_from_slice(&(header_bytes.len() as u16).to_be_bytes());
        out.extend_from_slice(&header_bytes);
        out.extend_from_slice(&self.body);
        Ok(out)
    }

    /// Parse wire bytes into a packet.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidPacket`] when the length prefix is missing
    /// or overruns the datagram, or a structured header is not valid JSON.
    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() < 2 {
            return Err(Error::InvalidPacket("missing length prefix"));
        }
        let len = usize::from(u16::from_be_bytes([buf[0], buf[1]]));
        if 2 + len > buf.len() {
            return Err(Error::InvalidPacket("header length overruns packet"));
        }

        let header_bytes = &buf[2..2 + len];
        let body = buf[2 + len..].to_vec();

        if len >= MIN_STRUCTURED_HEADER {
            let header: Header = serde_json::from_slice(header_bytes)
                .map_err(|_| Error::InvalidPacket("malformed header json"))?;
            Ok(Self::new(header, body))
        } else {
            Ok(Self::opaque(header_bytes.to_vec(), body))
        }
    }
}
