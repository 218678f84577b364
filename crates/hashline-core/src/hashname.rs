//! Hashnames: stable peer identifiers derived from public key material.

use crate::error::{Error, Result};
use hashline_crypto::hash;
use std::fmt;
use std::str::FromStr;

/// A 32-byte peer identifier, the BLAKE3 hash of the peer's public keys.
///
/// Hashnames are the only peer addressing the protocol understands; a
/// peer proves ownership of its hashname during the line handshake by
/// presenting keys that hash to it and signing with them.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Hashname([u8; Self::SIZE]);

impl Hashname {
    /// Hashname length in bytes.
    pub const SIZE: usize = 32;

    /// Wrap raw digest bytes.
    #[must_use]
    pub fn from_bytes(bytes: [u8; Self::SIZE]) -> Self {
        Self(bytes)
    }

    /// Derive a hashname from serialized public key material.
    #[must_use]
    pub fn of_key_material(material: &[u8]) -> Self {
        Self(hash(material))
    }

    /// Raw digest bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; Self::SIZE] {
        &self.0
    }

    /// First four bytes as hex, for log lines.
    #[must_use]
    pub fn short(&self) -> String {
        hex::encode(&self.0[..4])
    }
}

impl fmt::Display for Hashname {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for Hashname {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hashname({})", self.short())
    }
}

impl FromStr for Hashname {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let mut bytes = [0u8; Self::SIZE];
        hex::decode_to_slice(s, &mut bytes)
            .map_err(|_| Error::InvalidPacket("malformed hashname"))?;
        Ok(Self(bytes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_parse_roundtrip() {
        let hn = Hashname::of_key_material(b"some key material");
        let parsed: Hashname = hn.to_string().parse().unwrap();
        assert_eq!(parsed, hn);
    }

    #[test]
    fn test_distinct_material_distinct_names() {
        assert_ne!(
            Hashname::of_key_material(b"alice"),
            Hashname::of_key_material(b"bob")
        );
    }

    #[test]
    fn test_short_is_prefix_of_display() {
        let hn = Hashname::of_key_material(b"peer");
        assert!(hn.to_string().starts_with(&hn.short()));
        assert_eq!(hn.short().len(), 8);
    }

    #[test]
    fn test_bad_hex_rejected() {
        assert!("zz".parse::<Hashname>().is_err());
        assert!("abcd".parse::<Hashname>().is_err());
    }
}
