//! X25519 key agreement for line establishment.
//!
//! Each open packet carries a fresh ephemeral public key; once both sides
//! hold each other's ephemeral key the shared secret feeds the line key
//! derivation (see [`crate::LineKeys`]). The same types also back the
//! static agreement key inside a long-term identity, which the sealed-key
//! construction encrypts against.

use crate::CryptoError;
use rand_core::{CryptoRng, RngCore};
use zeroize::{Zeroize, ZeroizeOnDrop};

/// X25519 secret key (32 bytes), zeroized on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct AgreementSecret(x25519_dalek::StaticSecret);

/// X25519 public key (32 bytes).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AgreementPublic(x25519_dalek::PublicKey);

/// X25519 shared secret (32 bytes), zeroized on drop.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct SharedSecret([u8; 32]);

impl core::fmt::Debug for SharedSecret {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str("SharedSecret(..)")
    }
}

impl AgreementSecret {
    /// Generate a new random secret key with RFC 7748 clamping.
    pub fn generate<R: RngCore + CryptoRng>(rng: &mut R) -> Self {
        Self(x25519_dalek::StaticSecret::random_from_rng(rng))
    }

    /// Import from raw bytes.
    #[must_use]
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(x25519_dalek::StaticSecret::from(bytes))
    }

    /// Derive the matching public key.
    #[must_use]
    pub fn public(&self) -> AgreementPublic {
        AgreementPublic(x25519_dalek::PublicKey::from(&self.0))
    }

    /// Perform Diffie-Hellman agreement with a peer's public key.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::DegenerateSecret`] when the peer key is a
    /// low-order point; such a handshake must be dropped.
    pub fn agree(&self, peer: &AgreementPublic) -> Result<SharedSecret, CryptoError> {
        let shared = self.0.diffie_hellman(&peer.0);
        if shared.as_bytes() == &[0u8; 32] {
            return Err(CryptoError::DegenerateSecret);
        }
        Ok(SharedSecret(*shared.as_bytes()))
    }
}

impl AgreementPublic {
    /// Import a public key from raw bytes.
    #[must_use]
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(x25519_dalek::PublicKey::from(bytes))
    }

    /// Import from a slice.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::InvalidPublicKey`] unless the slice is
    /// exactly 32 bytes.
    pub fn from_slice(slice: &[u8]) -> Result<Self, CryptoError> {
        let bytes: [u8; 32] = slice.try_into().map_err(|_| CryptoError::InvalidPublicKey)?;
        Ok(Self::from_bytes(bytes))
    }

    /// Raw key bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; 32] {
        self.0.as_bytes()
    }
}

impl SharedSecret {
    /// Raw secret bytes, input to the line key derivation.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}
