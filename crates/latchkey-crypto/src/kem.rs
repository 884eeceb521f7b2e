//! X25519 key encapsulation.
//!
//! Ephemeral-static Diffie-Hellman over Curve25519, with the raw shared
//! point run through HKDF-SHA256 bound to both public values. The
//! encapsulation ciphertext is the 32-byte ephemeral public key.

use curve25519_dalek::{
    constants::X25519_BASEPOINT,
    montgomery::MontgomeryPoint,
    scalar::{Scalar, clamp_integer},
};
use hkdf::Hkdf;
use sha2::Sha256;
use zeroize::Zeroize;

use crate::error::CryptoError;

/// Size of an encapsulation (public) key in bytes.
pub const ENCAPSULATION_KEY_SIZE: usize = 32;

/// HKDF info label binding derived secrets to this protocol version.
const KEM_LABEL: &[u8] = b"latchkey kem v1";

/// A device's public encapsulation capability (X25519 public key).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncapsulationKey {
    bytes: [u8; ENCAPSULATION_KEY_SIZE],
}

impl EncapsulationKey {
    /// Construct from raw public key bytes.
    pub fn from_bytes(bytes: [u8; ENCAPSULATION_KEY_SIZE]) -> Self {
        Self { bytes }
    }

    /// Raw public key bytes.
    pub fn as_bytes(&self) -> &[u8; ENCAPSULATION_KEY_SIZE] {
        &self.bytes
    }
}

/// A device's private decapsulation capability (clamped X25519 scalar).
///
/// Zeroized on drop.
pub struct DecapsulationKey {
    scalar: [u8; 32],
}

impl DecapsulationKey {
    /// Public encapsulation key corresponding to this private key.
    pub fn encapsulation_key(&self) -> EncapsulationKey {
        let scalar = Scalar::from_bytes_mod_order(clamp_integer(self.scalar));
        EncapsulationKey::from_bytes((scalar * X25519_BASEPOINT).to_bytes())
    }
}

impl Drop for DecapsulationKey {
    fn drop(&mut self) {
        self.scalar.zeroize();
    }
}

impl std::fmt::Debug for DecapsulationKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("DecapsulationKey(..)")
    }
}

/// Shared secret produced by encapsulation/decapsulation.
///
/// Zeroized on drop.
pub struct SharedSecret {
    bytes: [u8; 32],
}

impl SharedSecret {
    /// Raw secret bytes, consumed by AEAD key setup.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.bytes
    }
}

impl std::fmt::Debug for SharedSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SharedSecret(..)")
    }
}

impl Drop for SharedSecret {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

/// Derive an X25519 keypair from 32 bytes of entropy.
///
/// The entropy is clamped per the X25519 specification; any 32-byte input
/// yields a valid keypair. Deterministic, so tests can use fixed seeds.
pub fn keypair_from_entropy(entropy: [u8; 32]) -> (DecapsulationKey, EncapsulationKey) {
    let private = DecapsulationKey { scalar: entropy };
    let public = private.encapsulation_key();
    (private, public)
}

/// Encapsulate to a recipient's public key.
///
/// Returns the 32-byte encapsulation ciphertext (ephemeral public key) and
/// the derived shared secret. `ephemeral_entropy` must come from a secure
/// generator; reusing it across calls links the resulting ciphertexts.
///
/// # Errors
///
/// - [`CryptoError::DegenerateSharedSecret`] if the recipient key is a
///   low-order point and the exchange collapses to zero
pub fn encapsulate(
    recipient: &EncapsulationKey,
    ephemeral_entropy: [u8; 32],
) -> Result<([u8; 32], SharedSecret), CryptoError> {
    let ephemeral = Scalar::from_bytes_mod_order(clamp_integer(ephemeral_entropy));
    let ciphertext = (ephemeral * X25519_BASEPOINT).to_bytes();

    let raw = ephemeral * MontgomeryPoint(*recipient.as_bytes());
    let secret = derive_shared(raw.to_bytes(), &ciphertext, recipient.as_bytes())?;

    Ok((ciphertext, secret))
}

/// Decapsulate a ciphertext with the recipient's private key.
///
/// # Errors
///
/// - [`CryptoError::DegenerateSharedSecret`] if the ciphertext is a
///   low-order point
pub fn decapsulate(
    private: &DecapsulationKey,
    ciphertext: &[u8; 32],
) -> Result<SharedSecret, CryptoError> {
    let scalar = Scalar::from_bytes_mod_order(clamp_integer(private.scalar));
    let raw = scalar * MontgomeryPoint(*ciphertext);

    let public = private.encapsulation_key();
    derive_shared(raw.to_bytes(), ciphertext, public.as_bytes())
}

/// HKDF the raw DH output, binding it to both public values.
fn derive_shared(
    mut raw: [u8; 32],
    ciphertext: &[u8; 32],
    recipient: &[u8; 32],
) -> Result<SharedSecret, CryptoError> {
    // All-zero output means the peer supplied a low-order point; the
    // exchange is non-contributory and must be rejected.
    if raw == [0u8; 32] {
        return Err(CryptoError::DegenerateSharedSecret);
    }

    let hk = Hkdf::<Sha256>::new(None, &raw);
    let mut info = Vec::with_capacity(KEM_LABEL.len() + 64);
    info.extend_from_slice(KEM_LABEL);
    info.extend_from_slice(ciphertext);
    info.extend_from_slice(recipient);

    let mut okm = [0u8; 32];
    let Ok(()) = hk.expand(&info, &mut okm) else {
        unreachable!("32-byte HKDF-SHA256 output is always valid");
    };

    raw.zeroize();
    Ok(SharedSecret { bytes: okm })
}
