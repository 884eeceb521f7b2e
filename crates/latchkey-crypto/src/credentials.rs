//! Root and recovery credential derivation.
//!
//! Both credentials enter the protocol as opaque secret bytes produced by
//! the out-of-scope authentication layer (password KDF, hardware token,
//! printed recovery code). This module deterministically expands them
//! into KEM keypairs so the vault key can be wrapped to them exactly like
//! it is wrapped to a device.

use hkdf::Hkdf;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use zeroize::Zeroize;

use crate::kem::{DecapsulationKey, EncapsulationKey, keypair_from_entropy};

type HmacSha256 = Hmac<Sha256>;

/// HKDF label for the root authority keypair.
const ROOT_LABEL: &[u8] = b"latchkey root v1";

/// HKDF label for the physical-recovery keypair.
const RECOVERY_LABEL: &[u8] = b"latchkey recovery v1";

/// HMAC label for the shadow slot identifier.
const SHADOW_ID_LABEL: &[u8] = b"latchkey shadow id v1";

/// HKDF label for the shadow slot's signing seed.
const SHADOW_SIG_LABEL: &[u8] = b"latchkey shadow sig v1";

/// The root authority secret.
///
/// Holds the expanded seed; zeroized on drop. Sessions unlocked with this
/// credential carry the `Authorized` role.
pub struct RootSecret {
    seed: [u8; 32],
}

impl RootSecret {
    /// Expand opaque credential bytes into the root secret.
    pub fn from_credential(credential: &[u8]) -> Self {
        Self { seed: expand(ROOT_LABEL, credential) }
    }

    /// Derive the root KEM keypair.
    pub fn keypair(&self) -> (DecapsulationKey, EncapsulationKey) {
        keypair_from_entropy(self.seed)
    }
}

impl Drop for RootSecret {
    fn drop(&mut self) {
        self.seed.zeroize();
    }
}

impl std::fmt::Debug for RootSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("RootSecret(..)")
    }
}

/// The physical recovery secret.
///
/// Backs the always-present shadow slot. Sessions unlocked with this
/// credential carry the `Recovery` role and can never rotate root
/// authority.
pub struct RecoverySecret {
    seed: [u8; 32],
}

impl RecoverySecret {
    /// Expand opaque recovery-code bytes into the recovery secret.
    pub fn from_credential(credential: &[u8]) -> Self {
        Self { seed: expand(RECOVERY_LABEL, credential) }
    }

    /// Derive the shadow slot's KEM keypair.
    pub fn keypair(&self) -> (DecapsulationKey, EncapsulationKey) {
        keypair_from_entropy(self.seed)
    }

    /// Seed for the shadow slot's Ed25519 signing key.
    ///
    /// The shadow entry carries a verifying key like every real device,
    /// so its public record is structurally indistinguishable.
    pub fn signing_seed(&self) -> [u8; 32] {
        let hk = Hkdf::<Sha256>::new(Some(SHADOW_SIG_LABEL), &self.seed);
        let mut okm = [0u8; 32];
        let Ok(()) = hk.expand(SHADOW_SIG_LABEL, &mut okm) else {
            unreachable!("32-byte HKDF-SHA256 output is always valid");
        };
        okm
    }

    /// Identifier of the shadow slot in the device-header set.
    ///
    /// Derived from the public key, never stored alongside a marker: the
    /// persisted metadata carries no indication of which slot this is.
    pub fn shadow_device_id(&self) -> u64 {
        let (_, public) = self.keypair();

        let Ok(mut mac) = HmacSha256::new_from_slice(SHADOW_ID_LABEL) else {
            unreachable!("HMAC-SHA256 accepts any key size");
        };
        mac.update(public.as_bytes());
        let digest = mac.finalize().into_bytes();

        let mut id_bytes = [0u8; 8];
        id_bytes.copy_from_slice(&digest[..8]);
        u64::from_be_bytes(id_bytes)
    }
}

impl Drop for RecoverySecret {
    fn drop(&mut self) {
        self.seed.zeroize();
    }
}

impl std::fmt::Debug for RecoverySecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("RecoverySecret(..)")
    }
}

/// HKDF-SHA256 expansion of opaque credential bytes under a fixed label.
fn expand(label: &[u8], credential: &[u8]) -> [u8; 32] {
    let hk = Hkdf::<Sha256>::new(Some(label), credential);
    let mut okm = [0u8; 32];
    let Ok(()) = hk.expand(label, &mut okm) else {
        unreachable!("32-byte HKDF-SHA256 output is always valid");
    };
    okm
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        keys::VaultKey,
        wrap::{WrapEntropy, unwrap_vault_key, wrap_vault_key},
    };

    #[test]
    fn same_credential_derives_same_keypair() {
        let a = RootSecret::from_credential(b"correct horse battery staple");
        let b = RootSecret::from_credential(b"correct horse battery staple");

        assert_eq!(a.keypair().1, b.keypair().1);
    }

    #[test]
    fn root_and_recovery_expansions_differ() {
        let root = RootSecret::from_credential(b"shared bytes");
        let recovery = RecoverySecret::from_credential(b"shared bytes");

        assert_ne!(root.keypair().1, recovery.keypair().1);
    }

    #[test]
    fn shadow_id_is_stable() {
        let recovery = RecoverySecret::from_credential(b"recovery code 1234");

        assert_eq!(recovery.shadow_device_id(), recovery.shadow_device_id());
        assert_ne!(
            recovery.shadow_device_id(),
            RecoverySecret::from_credential(b"different code").shadow_device_id()
        );
    }

    #[test]
    fn recovery_keypair_can_unwrap_vault_key() {
        let recovery = RecoverySecret::from_credential(b"printed recovery code");
        let (private, public) = recovery.keypair();
        let vault_key = VaultKey::from_entropy([0x42; 32]);

        let entropy = WrapEntropy {
            ephemeral_seed: [5; 32],
            nonce: [6; crate::aead::NONCE_SIZE],
            fill: [7; crate::wrap::FILL_SIZE],
        };
        let wrapped = wrap_vault_key(&public, &vault_key, &entropy).unwrap();

        assert_eq!(unwrap_vault_key(&private, &wrapped).unwrap(), vault_key);
    }

    #[test]
    fn debug_output_redacts_secrets() {
        let root = RootSecret::from_credential(b"x");
        let recovery = RecoverySecret::from_credential(b"y");

        assert_eq!(format!("{root:?}"), "RootSecret(..)");
        assert_eq!(format!("{recovery:?}"), "RecoverySecret(..)");
    }
}
