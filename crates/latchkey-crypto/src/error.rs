//! Error types for cryptographic operations.
//!
//! Failures here never carry key material. Authentication failures are
//! deliberately opaque: distinguishing a wrong key from a tampered
//! ciphertext would hand an oracle to an attacker.

use thiserror::Error;

/// Errors that can occur during cryptographic operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CryptoError {
    /// AEAD authentication failed (wrong key or tampered ciphertext)
    #[error("authentication failed")]
    AuthenticationFailed,

    /// Wrapped key blob has the wrong size or structure
    #[error("malformed wrapped key: {reason}")]
    MalformedWrappedKey {
        /// What was wrong with the blob
        reason: &'static str,
    },

    /// X25519 produced an all-zero shared secret (low-order peer key)
    #[error("degenerate shared secret from encapsulation")]
    DegenerateSharedSecret,
}
