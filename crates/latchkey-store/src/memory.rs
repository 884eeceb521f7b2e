//! In-memory storage implementation for testing and simulation.

use std::sync::{Arc, Mutex};

use latchkey_core::{ShadowHandle, StorageError, VaultMetadata, VaultStorage};

/// In-memory vault storage.
///
/// Holds the committed document and at most one pending shadow. All state
/// is wrapped in `Arc<Mutex<>>` so clones share the same underlying
/// store, matching the contract that storage handles are cheap to pass
/// around. Uses `lock().expect()`, which panics if the mutex is poisoned;
/// acceptable for test and simulation code.
#[derive(Clone, Default)]
pub struct MemoryVaultStorage {
    inner: Arc<Mutex<MemoryInner>>,
}

#[derive(Default)]
struct MemoryInner {
    committed: Option<VaultMetadata>,
    shadow: Option<(u64, VaultMetadata)>,
    next_token: u64,
    commit_count: u64,
}

impl MemoryVaultStorage {
    /// Create an empty store (no committed document, no shadow).
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of successful atomic commits, for test assertions.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned. Acceptable for test
    /// code.
    #[allow(clippy::expect_used)]
    pub fn commit_count(&self) -> u64 {
        self.inner.lock().expect("storage mutex poisoned").commit_count
    }

    /// Whether a shadow copy is currently pending, for test assertions.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned. Acceptable for test
    /// code.
    #[allow(clippy::expect_used)]
    pub fn has_pending_shadow(&self) -> bool {
        self.inner.lock().expect("storage mutex poisoned").shadow.is_some()
    }

}

impl VaultStorage for MemoryVaultStorage {
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned. Acceptable for test
    /// code.
    #[allow(clippy::expect_used)]
    fn shadow_write(&self, metadata: &VaultMetadata) -> Result<ShadowHandle, StorageError> {
        let mut inner = self.inner.lock().expect("storage mutex poisoned");

        inner.next_token += 1;
        let token = inner.next_token;
        // A new shadow supersedes any previous pending one.
        inner.shadow = Some((token, metadata.clone()));

        Ok(ShadowHandle::new(token))
    }

    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned. Acceptable for test
    /// code.
    #[allow(clippy::expect_used)]
    fn atomic_commit(&self, handle: ShadowHandle) -> Result<(), StorageError> {
        let mut inner = self.inner.lock().expect("storage mutex poisoned");

        match inner.shadow.take() {
            Some((token, metadata)) if token == handle.token() => {
                inner.committed = Some(metadata);
                inner.commit_count += 1;
                Ok(())
            },
            Some(other) => {
                inner.shadow = Some(other);
                Err(StorageError::StaleShadow { token: handle.token() })
            },
            None => Err(StorageError::NoPendingShadow),
        }
    }

    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned. Acceptable for test
    /// code.
    #[allow(clippy::expect_used)]
    fn discard_shadow(&self, handle: ShadowHandle) -> Result<(), StorageError> {
        let mut inner = self.inner.lock().expect("storage mutex poisoned");

        match inner.shadow.take() {
            Some((token, _)) if token == handle.token() => Ok(()),
            Some(other) => {
                inner.shadow = Some(other);
                Err(StorageError::StaleShadow { token: handle.token() })
            },
            None => Err(StorageError::NoPendingShadow),
        }
    }

    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned. Acceptable for test
    /// code.
    #[allow(clippy::expect_used)]
    fn read_committed(&self) -> Result<Option<VaultMetadata>, StorageError> {
        Ok(self.inner.lock().expect("storage mutex poisoned").committed.clone())
    }

    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned. Acceptable for test
    /// code.
    #[allow(clippy::expect_used)]
    fn pending_shadow(&self) -> Result<Option<(ShadowHandle, VaultMetadata)>, StorageError> {
        let inner = self.inner.lock().expect("storage mutex poisoned");

        Ok(inner
            .shadow
            .as_ref()
            .map(|(token, metadata)| (ShadowHandle::new(*token), metadata.clone())))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;

    fn metadata(epoch: u64) -> VaultMetadata {
        let (_, public) = latchkey_crypto::keypair_from_entropy([1; 32]);
        let entropy = latchkey_crypto::WrapEntropy {
            ephemeral_seed: [2; 32],
            nonce: [3; latchkey_crypto::NONCE_SIZE],
            fill: [4; latchkey_crypto::FILL_SIZE],
        };
        let wrapped = latchkey_crypto::wrap_vault_key(
            &public,
            &latchkey_crypto::VaultKey::from_entropy([5; 32]),
            &entropy,
        )
        .unwrap();

        VaultMetadata {
            current_epoch: epoch,
            headers: BTreeMap::new(),
            device_keys: BTreeMap::new(),
            root_encapsulation_key: *public.as_bytes(),
            wrapped_root_key: wrapped,
        }
    }

    #[test]
    fn empty_store_has_nothing() {
        let storage = MemoryVaultStorage::new();

        assert_eq!(storage.read_committed().unwrap(), None);
        assert!(storage.pending_shadow().unwrap().is_none());
    }

    #[test]
    fn shadow_then_commit_becomes_committed() {
        let storage = MemoryVaultStorage::new();

        let handle = storage.shadow_write(&metadata(1)).unwrap();
        // Not yet committed
        assert_eq!(storage.read_committed().unwrap(), None);

        storage.atomic_commit(handle).unwrap();
        assert_eq!(storage.read_committed().unwrap().unwrap().current_epoch, 1);
        assert!(!storage.has_pending_shadow());
        assert_eq!(storage.commit_count(), 1);
    }

    #[test]
    fn stale_handle_cannot_commit() {
        let storage = MemoryVaultStorage::new();

        let old = storage.shadow_write(&metadata(1)).unwrap();
        let new = storage.shadow_write(&metadata(2)).unwrap();

        assert!(matches!(
            storage.atomic_commit(old),
            Err(StorageError::StaleShadow { .. })
        ));

        // The superseding shadow still commits.
        storage.atomic_commit(new).unwrap();
        assert_eq!(storage.read_committed().unwrap().unwrap().current_epoch, 2);
    }

    #[test]
    fn discard_leaves_committed_untouched() {
        let storage = MemoryVaultStorage::new();

        let first = storage.shadow_write(&metadata(1)).unwrap();
        storage.atomic_commit(first).unwrap();

        let second = storage.shadow_write(&metadata(2)).unwrap();
        storage.discard_shadow(second).unwrap();

        assert_eq!(storage.read_committed().unwrap().unwrap().current_epoch, 1);
        assert!(!storage.has_pending_shadow());
    }

    #[test]
    fn clones_share_state() {
        let storage = MemoryVaultStorage::new();
        let clone = storage.clone();

        let handle = storage.shadow_write(&metadata(3)).unwrap();
        clone.atomic_commit(handle).unwrap();

        assert_eq!(storage.read_committed().unwrap().unwrap().current_epoch, 3);
    }
}
