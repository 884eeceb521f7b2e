//! Symmetric vault key handle.

use zeroize::Zeroize;

/// Size of the symmetric vault key in bytes.
pub const KEY_SIZE: usize = 32;

/// The symmetric data-encryption key for one vault epoch.
///
/// Opaque byte handle: the only consumers are the wrap/unwrap functions in
/// this crate and the AEAD seal/open entry points. The key material is
/// zeroized when the handle is dropped.
#[derive(Clone)]
pub struct VaultKey {
    key: [u8; KEY_SIZE],
}

impl VaultKey {
    /// Create a vault key from caller-provided entropy.
    ///
    /// The caller is responsible for sourcing the bytes from a
    /// cryptographically secure generator (or a seeded one in tests).
    pub fn from_entropy(entropy: [u8; KEY_SIZE]) -> Self {
        Self { key: entropy }
    }

    /// Raw key bytes, for wrapping and AEAD use only.
    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.key
    }
}

impl Drop for VaultKey {
    fn drop(&mut self) {
        self.key.zeroize();
    }
}

// Deliberately no Debug derive: a Debug impl that printed key bytes would
// leak through logs. The manual impl prints a redaction marker only.
impl std::fmt::Debug for VaultKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("VaultKey(..)")
    }
}

impl PartialEq for VaultKey {
    fn eq(&self, other: &Self) -> bool {
        // Constant-time comparison is not needed here: equality is only
        // used by tests and both operands are secret.
        self.key == other.key
    }
}

impl Eq for VaultKey {}
