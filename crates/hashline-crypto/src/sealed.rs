//! Sealed keys: public-key encryption of ephemeral key material.
//!
//! The `open` field of a handshake packet carries the sender's ephemeral
//! agreement key encrypted to the recipient's long-term agreement key.
//! This is a sealed-box construction: a single-use X25519 keypair is
//! generated per seal, its public half travels in the clear in front of
//! the ciphertext, and the AEAD key is derived from the DH of that
//! single-use key with the recipient's static key.
//!
//! Wire layout: `seal_public(32) || nonce(24) || ciphertext+tag`.

use crate::aead::{AeadKey, NONCE_SIZE, Nonce, TAG_SIZE};
use crate::agreement::{AgreementPublic, AgreementSecret, SharedSecret};
use crate::CryptoError;
use rand_core::{CryptoRng, RngCore};

/// Bytes added to the payload by sealing.
pub const SEALED_KEY_OVERHEAD: usize = 32 + NONCE_SIZE + TAG_SIZE;

/// Context string for the seal key derivation.
const CONTEXT_SEAL: &str = "hashline v1 sealed key";

/// An encrypted blob only the holder of the recipient's static
/// agreement key can open.
pub struct SealedKey(Vec<u8>);

impl core::fmt::Debug for SealedKey {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str("SealedKey(..)")
    }
}

impl SealedKey {
    /// Seal `payload` to `recipient`.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::DegenerateSecret`] if the recipient key is
    /// a low-order point.
    pub fn seal<R: RngCore + CryptoRng>(
        rng: &mut R,
        recipient: &AgreementPublic,
        payload: &[u8],
    ) -> Result<Self, CryptoError> {
        let seal_secret = AgreementSecret::generate(rng);
        let seal_public = seal_secret.public();
        let shared = seal_secret.agree(recipient)?;

        let key = AeadKey::new(derive_seal_key(&shared, &seal_public, recipient));
        let nonce = Nonce::generate(rng);
        let ciphertext = key.encrypt(&nonce, payload)?;

        let mut out = Vec::with_capacity(SEALED_KEY_OVERHEAD + payload.len());
        out.extend_from_slice(seal_public.as_bytes());
        out.extend_from_slice(nonce.as_bytes());
        out.extend_from_slice(&ciphertext);
        Ok(Self(out))
    }

    /// Reconstruct a sealed key from wire bytes.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::TooShort`] when the blob cannot contain a
    /// seal key, nonce and tag.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        if bytes.len() < SEALED_KEY_OVERHEAD {
            return Err(CryptoError::TooShort {
                expected: SEALED_KEY_OVERHEAD,
                actual: bytes.len(),
            });
        }
        Ok(Self(bytes.to_vec()))
    }

    /// Open the seal with the recipient's static secret key.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::DecryptionFailed`] when the blob was not
    /// sealed to `recipient_secret`, or was tampered with.
    pub fn unseal(&self, recipient_secret: &AgreementSecret) -> Result<Vec<u8>, CryptoError> {
        let seal_public = AgreementPublic::from_slice(&self.0[..32])?;
        let nonce = Nonce::from_slice(&self.0[32..32 + NONCE_SIZE])?;
        let shared = recipient_secret.agree(&seal_public)?;

        let key = AeadKey::new(derive_seal_key(
            &shared,
            &seal_public,
            &recipient_secret.public(),
        ));
        key.decrypt(&nonce, &self.0[32 + NONCE_SIZE..])
    }

    /// Wire bytes of the seal.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

/// Bind the AEAD key to both public halves, not just the DH output.
fn derive_seal_key(
    shared: &SharedSecret,
    seal_public: &AgreementPublic,
    recipient: &AgreementPublic,
) -> [u8; 32] {
    let mut material = [0u8; 96];
    material[..32].copy_from_slice(shared.as_bytes());
    material[32..64].copy_from_slice(seal_public.as_bytes());
    material[64..].copy_from_slice(recipient.as_bytes());
    blake3::derive_key(CONTEXT_SEAL, &material)
}
