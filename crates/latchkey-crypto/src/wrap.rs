//! Fixed-size wrapped key blobs.
//!
//! A wrapped key is the vault key encapsulated to one device:
//!
//! ```text
//! ┌────────────────┬──────────┬───────────────────┬─────────────┐
//! │ kem ciphertext │  nonce   │ aead ciphertext   │ random fill │
//! │    32 bytes    │ 24 bytes │ 48 bytes (32+tag) │  24 bytes   │
//! └────────────────┴──────────┴───────────────────┴─────────────┘
//!                        total: 128 bytes, always
//! ```
//!
//! Every blob is exactly [`WRAPPED_KEY_SIZE`] bytes regardless of
//! recipient, so the physical-recovery slot is indistinguishable from an
//! ordinary device slot by size. The trailing fill is random, not zero,
//! so the padding region carries no recognizable structure either.

use serde::{Deserialize, Serialize};

use crate::{
    aead::{self, NONCE_SIZE, TAG_SIZE},
    error::CryptoError,
    kem::{self, DecapsulationKey, ENCAPSULATION_KEY_SIZE, EncapsulationKey},
    keys::{KEY_SIZE, VaultKey},
};

/// Size of every wrapped key blob in bytes.
pub const WRAPPED_KEY_SIZE: usize = 128;

/// Size of the random fill region at the end of each blob.
pub const FILL_SIZE: usize =
    WRAPPED_KEY_SIZE - ENCAPSULATION_KEY_SIZE - NONCE_SIZE - KEY_SIZE - TAG_SIZE;

/// AEAD associated-data label for wrapped vault keys.
const WRAP_LABEL: &[u8] = b"latchkey header v1";

/// Entropy consumed by one wrap operation.
///
/// Sourced from the injected environment so that wrapping is
/// deterministic under test.
pub struct WrapEntropy {
    /// Seed for the ephemeral KEM keypair.
    pub ephemeral_seed: [u8; 32],
    /// AEAD nonce.
    pub nonce: [u8; NONCE_SIZE],
    /// Random fill for the padding region.
    pub fill: [u8; FILL_SIZE],
}

/// An opaque, fixed-size wrapped copy of the vault key.
///
/// The size invariant is enforced at every construction site, including
/// deserialization, so a blob read back from storage is always exactly
/// [`WRAPPED_KEY_SIZE`] bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<u8>", into = "Vec<u8>")]
pub struct WrappedKey {
    bytes: Vec<u8>,
}

impl WrappedKey {
    /// Blob contents.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Blob length; always [`WRAPPED_KEY_SIZE`].
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Always false; present for completeness of the slice-like API.
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

impl TryFrom<Vec<u8>> for WrappedKey {
    type Error = CryptoError;

    fn try_from(bytes: Vec<u8>) -> Result<Self, Self::Error> {
        if bytes.len() != WRAPPED_KEY_SIZE {
            return Err(CryptoError::MalformedWrappedKey { reason: "wrong blob size" });
        }
        Ok(Self { bytes })
    }
}

impl From<WrappedKey> for Vec<u8> {
    fn from(wrapped: WrappedKey) -> Self {
        wrapped.bytes
    }
}

/// Wrap the vault key for one recipient device.
///
/// # Errors
///
/// - [`CryptoError::DegenerateSharedSecret`] if the recipient public key
///   is a low-order point
pub fn wrap_vault_key(
    recipient: &EncapsulationKey,
    vault_key: &VaultKey,
    entropy: &WrapEntropy,
) -> Result<WrappedKey, CryptoError> {
    let (kem_ciphertext, shared) = kem::encapsulate(recipient, entropy.ephemeral_seed)?;

    let aad = wrap_aad(recipient);
    let sealed = aead::seal(shared.as_bytes(), &entropy.nonce, &aad, vault_key.as_bytes());
    debug_assert_eq!(sealed.len(), KEY_SIZE + TAG_SIZE);

    let mut bytes = Vec::with_capacity(WRAPPED_KEY_SIZE);
    bytes.extend_from_slice(&kem_ciphertext);
    bytes.extend_from_slice(&entropy.nonce);
    bytes.extend_from_slice(&sealed);
    bytes.extend_from_slice(&entropy.fill);
    debug_assert_eq!(bytes.len(), WRAPPED_KEY_SIZE);

    Ok(WrappedKey { bytes })
}

/// Unwrap a blob with the recipient's private key.
///
/// # Errors
///
/// - [`CryptoError::AuthenticationFailed`] if the blob was not wrapped
///   for this key
/// - [`CryptoError::DegenerateSharedSecret`] on a malformed KEM ciphertext
pub fn unwrap_vault_key(
    private: &DecapsulationKey,
    wrapped: &WrappedKey,
) -> Result<VaultKey, CryptoError> {
    let bytes = wrapped.as_bytes();

    let kem_ciphertext: [u8; ENCAPSULATION_KEY_SIZE] = bytes[..ENCAPSULATION_KEY_SIZE]
        .try_into()
        .map_err(|_| CryptoError::MalformedWrappedKey { reason: "short kem ciphertext" })?;
    let nonce: [u8; NONCE_SIZE] = bytes
        [ENCAPSULATION_KEY_SIZE..ENCAPSULATION_KEY_SIZE + NONCE_SIZE]
        .try_into()
        .map_err(|_| CryptoError::MalformedWrappedKey { reason: "short nonce" })?;
    let sealed_start = ENCAPSULATION_KEY_SIZE + NONCE_SIZE;
    let sealed = &bytes[sealed_start..sealed_start + KEY_SIZE + TAG_SIZE];

    let shared = kem::decapsulate(private, &kem_ciphertext)?;
    let aad = wrap_aad(&private.encapsulation_key());
    let plaintext = aead::open(shared.as_bytes(), &nonce, &aad, sealed)?;

    let key_bytes: [u8; KEY_SIZE] = plaintext
        .as_slice()
        .try_into()
        .map_err(|_| CryptoError::MalformedWrappedKey { reason: "wrong key length" })?;

    Ok(VaultKey::from_entropy(key_bytes))
}

/// Associated data binding a blob to its recipient.
fn wrap_aad(recipient: &EncapsulationKey) -> Vec<u8> {
    let mut aad = Vec::with_capacity(WRAP_LABEL.len() + ENCAPSULATION_KEY_SIZE);
    aad.extend_from_slice(WRAP_LABEL);
    aad.extend_from_slice(recipient.as_bytes());
    aad
}
