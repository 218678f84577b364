//! Error types for cryptographic operations.

use thiserror::Error;

/// Errors produced by the hashline crypto primitives.
///
/// Deliberately coarse: callers at the protocol layer treat any crypto
/// failure as "drop the packet", so the variants only need to support
/// logging, never recovery logic.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CryptoError {
    /// AEAD decryption failed (wrong key, corrupted ciphertext, or tag mismatch)
    #[error("decryption failed")]
    DecryptionFailed,

    /// Input was too short to contain the expected structure
    #[error("input too short: expected at least {expected}, got {actual}")]
    TooShort {
        /// Minimum length required
        expected: usize,
        /// Length actually supplied
        actual: usize,
    },

    /// Signature verification failed
    #[error("invalid signature")]
    InvalidSignature,

    /// Public key bytes did not describe a usable key
    #[error("invalid public key")]
    InvalidPublicKey,

    /// Key agreement produced a degenerate (low-order) shared secret
    #[error("degenerate shared secret")]
    DegenerateSecret,
}
