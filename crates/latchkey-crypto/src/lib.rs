//! Latchkey Cryptographic Primitives
//!
//! Cryptographic building blocks for the Latchkey vault protocol. Pure
//! functions with deterministic outputs. Callers provide random bytes for
//! deterministic testing.
//!
//! # Key Lifecycle
//!
//! Every vault epoch owns one symmetric data-encryption key. On each epoch
//! advance a fresh vault key is generated and wrapped separately for every
//! enrolled device, so revoking a device and moving the epoch forward
//! removes that device's ability to decrypt anything written afterwards.
//!
//! ```text
//! Vault Key (per epoch)
//!        │
//!        ▼
//! X25519 Encapsulation → per-device shared secret
//!        │
//!        ▼
//! XChaCha20-Poly1305 → wrapped key blob (fixed 128 bytes)
//!        │
//!        ▼
//! DeviceHeader (one per device, uniform size)
//! ```
//!
//! # Security
//!
//! Forward secrecy across epochs:
//! - Epoch advance generates an entirely fresh vault key
//! - Revoked devices receive no header at the new epoch
//! - Old vault keys are zeroized when replaced
//!
//! Slot indistinguishability:
//! - Every wrapped key blob is exactly [`WRAPPED_KEY_SIZE`] bytes
//! - The recovery ("shadow") slot uses the identical construction and is
//!   re-wrapped in the same batch as every real device, so neither size
//!   nor update timing reveals which slot it is
//!
//! Authenticity:
//! - XChaCha20-Poly1305 AEAD binds each blob to its recipient key
//! - A forged or reassigned blob fails to open

#![forbid(unsafe_code)]
#![deny(missing_docs)]

mod aead;
mod credentials;
mod error;
mod kem;
mod keys;
mod wrap;

pub use aead::{NONCE_SIZE, TAG_SIZE, open, seal};
pub use credentials::{RecoverySecret, RootSecret};
pub use error::CryptoError;
pub use kem::{
    DecapsulationKey, ENCAPSULATION_KEY_SIZE, EncapsulationKey, SharedSecret, decapsulate,
    encapsulate, keypair_from_entropy,
};
pub use keys::{KEY_SIZE, VaultKey};
pub use wrap::{
    FILL_SIZE, WRAPPED_KEY_SIZE, WrapEntropy, WrappedKey, unwrap_vault_key, wrap_vault_key,
};
