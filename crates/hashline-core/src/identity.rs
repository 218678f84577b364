//! Long-term node identities and peer key material.

use crate::error::{Error, Result};
use crate::hashname::Hashname;
use hashline_crypto::{AgreementPublic, AgreementSecret, SigningKey, VerifyingKey};
use rand_core::{CryptoRng, RngCore};
use std::net::SocketAddr;

/// A peer's long-term public keys: Ed25519 for handshake signatures and
/// X25519 for sealed-key encryption.
///
/// The wire form is the 64-byte concatenation `verifying || agreement`;
/// its hash is the peer's [`Hashname`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PublicKeys {
    /// Signature verification key.
    pub verifying: VerifyingKey,
    /// Key agreement public key.
    pub agreement: AgreementPublic,
}

impl PublicKeys {
    /// Serialized size in bytes.
    pub const SIZE: usize = 64;

    /// Serialize to the wire form.
    #[must_use]
    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut out = [0u8; Self::SIZE];
        out[..32].copy_from_slice(self.verifying.as_bytes());
        out[32..].copy_from_slice(self.agreement.as_bytes());
        out
    }

    /// Parse the wire form.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidPacket`] on a wrong length and
    /// [`Error::Crypto`] when the signing key bytes are not a valid
    /// curve point.
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != Self::SIZE {
            return Err(Error::InvalidPacket("key material must be 64 bytes"));
        }
        let mut verifying_bytes = [0u8; 32];
        verifying_bytes.copy_from_slice(&bytes[..32]);
        Ok(Self {
            verifying: VerifyingKey::from_bytes(&verifying_bytes)?,
            agreement: AgreementPublic::from_slice(&bytes[32..])?,
        })
    }

    /// The hashname these keys hash to.
    #[must_use]
    pub fn hashname(&self) -> Hashname {
        Hashname::of_key_material(&self.to_bytes())
    }
}

/// A node's long-term identity: both secret keys plus the derived
/// hashname.
pub struct Identity {
    signing: SigningKey,
    agreement: AgreementSecret,
    keys: PublicKeys,
    hashname: Hashname,
}

impl Identity {
    /// Generate a fresh identity.
    pub fn generate<R: RngCore + CryptoRng>(rng: &mut R) -> Self {
        Self::from_keys(SigningKey::generate(rng), AgreementSecret::generate(rng))
    }

    /// Assemble an identity from existing secret keys.
    #[must_use]
    pub fn from_keys(signing: SigningKey, agreement: AgreementSecret) -> Self {
        let keys = PublicKeys {
            verifying: signing.verifying_key(),
            agreement: agreement.public(),
        };
        let hashname = keys.hashname();
        Self {
            signing,
            agreement,
            keys,
            hashname,
        }
    }

    /// This identity's hashname.
    #[must_use]
    pub fn hashname(&self) -> Hashname {
        self.hashname
    }

    /// Public half of the identity.
    #[must_use]
    pub fn keys(&self) -> &PublicKeys {
        &self.keys
    }

    pub(crate) fn signing(&self) -> &SigningKey {
        &self.signing
    }

    pub(crate) fn agreement(&self) -> &AgreementSecret {
        &self.agreement
    }
}

/// Everything needed to reach a peer: its keys and a datagram address.
#[derive(Clone, Debug)]
pub struct PeerInfo {
    /// The peer's long-term public keys.
    pub keys: PublicKeys,
    /// Last known datagram address.
    pub addr: SocketAddr,
}

impl PeerInfo {
    /// The peer's hashname.
    #[must_use]
    pub fn hashname(&self) -> Hashname {
        self.keys.hashname()
    }
}
