//! # Hashline Crypto
//!
//! Cryptographic primitives for the hashline protocol stack:
//! - X25519 key agreement (line establishment)
//! - Ed25519 identity signatures (open-packet authentication)
//! - `XChaCha20-Poly1305` AEAD (inner packets, signatures, line traffic)
//! - BLAKE3 hashing and context-separated key derivation
//! - Sealed keys (public-key encryption of ephemeral key material)
//!
//! All key derivation steps of the line handshake live here so that the
//! core crate never touches raw secret bytes directly.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod aead;
pub mod agreement;
pub mod error;
pub mod hash;
pub mod random;
pub mod sealed;
pub mod signatures;

pub use aead::{AeadKey, KEY_SIZE, NONCE_SIZE, Nonce, TAG_SIZE};
pub use agreement::{AgreementPublic, AgreementSecret, SharedSecret};
pub use error::CryptoError;
pub use hash::{HashOutput, hash};
pub use sealed::{SEALED_KEY_OVERHEAD, SealedKey};
pub use signatures::{SIGNATURE_SIZE, Signature, SigningKey, VerifyingKey};

/// Size of a line identifier token in bytes.
pub const LINE_ID_SIZE: usize = 16;

/// Direction-asymmetric symmetric keys for an established line.
///
/// `encrypt` protects outbound channel packets, `decrypt` opens inbound
/// ones. The two are derived from the same shared secret with the line
/// identifier order swapped, so they are never equal.
pub struct LineKeys {
    /// Key for outbound line traffic.
    pub encrypt: AeadKey,
    /// Key for inbound line traffic.
    pub decrypt: AeadKey,
}

impl LineKeys {
    /// Derive both line keys from an X25519 shared secret and the two
    /// 16-byte line identifiers.
    ///
    /// `local_id` is the token we generated, `remote_id` the one the peer
    /// sent in its open packet. Both sides call this with their own view,
    /// which makes A's encrypt key equal B's decrypt key and vice versa.
    #[must_use]
    pub fn derive(
        secret: &SharedSecret,
        local_id: &[u8; LINE_ID_SIZE],
        remote_id: &[u8; LINE_ID_SIZE],
    ) -> Self {
        Self {
            encrypt: AeadKey::new(hash::derive_line_key(secret.as_bytes(), local_id, remote_id)),
            decrypt: AeadKey::new(hash::derive_line_key(secret.as_bytes(), remote_id, local_id)),
        }
    }
}
