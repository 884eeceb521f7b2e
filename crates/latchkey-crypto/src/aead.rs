//! Authenticated encryption (XChaCha20-Poly1305).
//!
//! Thin seal/open wrapper. Nonces are caller-supplied so that higher
//! layers can source them from the injected environment and tests stay
//! deterministic.

use chacha20poly1305::{
    XChaCha20Poly1305, XNonce,
    aead::{Aead, KeyInit, Payload},
};

use crate::error::CryptoError;

/// Size of the XChaCha20-Poly1305 nonce in bytes.
pub const NONCE_SIZE: usize = 24;

/// Size of the Poly1305 authentication tag in bytes.
pub const TAG_SIZE: usize = 16;

/// Encrypt and authenticate `plaintext` under `key`.
///
/// The associated data is authenticated but not encrypted; `open` with a
/// different `aad` fails. Output length is `plaintext.len() + TAG_SIZE`.
pub fn seal(key: &[u8; 32], nonce: &[u8; NONCE_SIZE], aad: &[u8], plaintext: &[u8]) -> Vec<u8> {
    let cipher = XChaCha20Poly1305::new(key.into());

    let Ok(ciphertext) = cipher.encrypt(XNonce::from_slice(nonce), Payload {
        msg: plaintext,
        aad,
    }) else {
        // Encryption with a valid key and nonce cannot fail; the aead
        // crate only errors on decryption or absurd plaintext lengths.
        unreachable!("XChaCha20-Poly1305 encryption is infallible for in-memory payloads");
    };

    ciphertext
}

/// Decrypt and verify `ciphertext` under `key`.
///
/// # Errors
///
/// - [`CryptoError::AuthenticationFailed`] if the tag does not verify
///   (wrong key, wrong nonce, wrong aad, or tampered ciphertext)
pub fn open(
    key: &[u8; 32],
    nonce: &[u8; NONCE_SIZE],
    aad: &[u8],
    ciphertext: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    let cipher = XChaCha20Poly1305::new(key.into());

    cipher
        .decrypt(XNonce::from_slice(nonce), Payload { msg: ciphertext, aad })
        .map_err(|_| CryptoError::AuthenticationFailed)
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: [u8; 32] = [0x11; 32];
    const NONCE: [u8; NONCE_SIZE] = [0x22; NONCE_SIZE];

    #[test]
    fn seal_then_open_round_trips() {
        let sealed = seal(&KEY, &NONCE, b"context", b"vault key material");
        assert_eq!(sealed.len(), b"vault key material".len() + TAG_SIZE);

        let opened = open(&KEY, &NONCE, b"context", &sealed).unwrap();
        assert_eq!(opened, b"vault key material");
    }

    #[test]
    fn wrong_key_fails_authentication() {
        let sealed = seal(&KEY, &NONCE, b"", b"secret");

        let result = open(&[0x99; 32], &NONCE, b"", &sealed);
        assert_eq!(result.unwrap_err(), CryptoError::AuthenticationFailed);
    }

    #[test]
    fn wrong_aad_fails_authentication() {
        let sealed = seal(&KEY, &NONCE, b"device-7", b"secret");

        let result = open(&KEY, &NONCE, b"device-8", &sealed);
        assert_eq!(result.unwrap_err(), CryptoError::AuthenticationFailed);
    }

    #[test]
    fn flipped_bit_fails_authentication() {
        let mut sealed = seal(&KEY, &NONCE, b"", b"secret");
        sealed[0] ^= 0x01;

        let result = open(&KEY, &NONCE, b"", &sealed);
        assert_eq!(result.unwrap_err(), CryptoError::AuthenticationFailed);
    }
}
