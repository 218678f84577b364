//! `XChaCha20-Poly1305` AEAD encryption.
//!
//! Used three ways by the handshake and line transport:
//! - the inner open packet, under a key derived from the ephemeral key;
//! - the handshake signature, under a key derived from the ephemeral key
//!   plus the line identifier;
//! - every channel packet on an established line, under the line keys.
//!
//! The 192-bit nonce is generated randomly per packet and travels in the
//! `iv` header field; at that size random collisions are negligible.

use crate::CryptoError;
use chacha20poly1305::{
    XChaCha20Poly1305,
    aead::{Aead, KeyInit},
};
use rand_core::{CryptoRng, RngCore};
use zeroize::ZeroizeOnDrop;

/// AEAD key size (32 bytes).
pub const KEY_SIZE: usize = 32;

/// Nonce size (24 bytes).
pub const NONCE_SIZE: usize = 24;

/// Authentication tag size (16 bytes).
pub const TAG_SIZE: usize = 16;

/// XChaCha20-Poly1305 nonce (24 bytes).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Nonce([u8; NONCE_SIZE]);

impl Nonce {
    /// Create a nonce from raw bytes.
    #[must_use]
    pub fn from_bytes(bytes: [u8; NONCE_SIZE]) -> Self {
        Self(bytes)
    }

    /// Create a nonce from a slice.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::TooShort`] unless the slice is exactly 24 bytes.
    pub fn from_slice(slice: &[u8]) -> Result<Self, CryptoError> {
        let bytes: [u8; NONCE_SIZE] = slice.try_into().map_err(|_| CryptoError::TooShort {
            expected: NONCE_SIZE,
            actual: slice.len(),
        })?;
        Ok(Self(bytes))
    }

    /// Generate a random nonce.
    #[must_use]
    pub fn generate<R: RngCore + CryptoRng>(rng: &mut R) -> Self {
        let mut bytes = [0u8; NONCE_SIZE];
        rng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    /// Raw nonce bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; NONCE_SIZE] {
        &self.0
    }
}

/// AEAD encryption key (32 bytes), zeroized on drop.
#[derive(Clone, ZeroizeOnDrop)]
pub struct AeadKey([u8; KEY_SIZE]);

impl AeadKey {
    /// Create a key from raw bytes.
    #[must_use]
    pub fn new(bytes: [u8; KEY_SIZE]) -> Self {
        Self(bytes)
    }

    /// Generate a random key.
    #[must_use]
    pub fn generate<R: RngCore + CryptoRng>(rng: &mut R) -> Self {
        let mut bytes = [0u8; KEY_SIZE];
        rng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    /// Encrypt `plaintext`, returning ciphertext with the tag appended.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::DecryptionFailed`] only on internal cipher
    /// failure, which does not happen for valid key/nonce sizes.
    pub fn encrypt(&self, nonce: &Nonce, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let cipher = XChaCha20Poly1305::new(chacha20poly1305::Key::from_slice(&self.0));
        cipher
            .encrypt(chacha20poly1305::XNonce::from_slice(&nonce.0), plaintext)
            .map_err(|_| CryptoError::DecryptionFailed)
    }

    /// Decrypt and authenticate `ciphertext`.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::DecryptionFailed`] on tag mismatch or a
    /// truncated ciphertext.
    pub fn decrypt(&self, nonce: &Nonce, ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let cipher = XChaCha20Poly1305::new(chacha20poly1305::Key::from_slice(&self.0));
        cipher
            .decrypt(chacha20poly1305::XNonce::from_slice(&nonce.0), ciphertext)
            .map_err(|_| CryptoError::DecryptionFailed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand_core::OsRng;

    #[test]
    fn test_encrypt_decrypt_roundtrip() {
        let key = AeadKey::generate(&mut OsRng);
        let nonce = Nonce::generate(&mut OsRng);

        let ct = key.encrypt(&nonce, b"channel packet").unwrap();
        assert_eq!(ct.len(), b"channel packet".len() + TAG_SIZE);
        assert_eq!(key.decrypt(&nonce, &ct).unwrap(), b"channel packet");
    }

    #[test]
    fn test_tamper_detected() {
        let key = AeadKey::generate(&mut OsRng);
        let nonce = Nonce::generate(&mut OsRng);

        let mut ct = key.encrypt(&nonce, b"payload").unwrap();
        ct[0] ^= 0x01;
        assert_eq!(
            key.decrypt(&nonce, &ct).unwrap_err(),
            CryptoError::DecryptionFailed
        );
    }

    #[test]
    fn test_wrong_nonce_fails() {
        let key = AeadKey::generate(&mut OsRng);
        let ct = key.encrypt(&Nonce::from_bytes([1u8; 24]), b"x").unwrap();
        assert!(key.decrypt(&Nonce::from_bytes([2u8; 24]), &ct).is_err());
    }

    #[test]
    fn test_nonce_from_slice_length() {
        assert!(Nonce::from_slice(&[0u8; 16]).is_err());
        assert!(Nonce::from_slice(&[0u8; 24]).is_ok());
    }
}
