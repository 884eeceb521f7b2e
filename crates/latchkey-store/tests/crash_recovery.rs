//! Crash recovery tests for `FsVaultStorage`.
//!
//! Simulate a crash at every point of the two-phase commit and verify
//! that after reopening, the vault is either fully at the old epoch
//! (shadow discarded) or fully at the new epoch (rename completed),
//! never a mixture.

use std::{collections::BTreeMap, fs, io::Write};

use latchkey_core::{
    DeviceHeader, DevicePublicKeys, EpochUpgradeCoordinator, VaultMetadata, VaultStorage,
};
use latchkey_crypto::{VaultKey, WrapEntropy, wrap_vault_key};
use latchkey_store::{FsVaultStorage, SystemEnv};
use tempfile::tempdir;

fn wrap_for(device_seed: u8, key: &VaultKey) -> (DevicePublicKeys, Vec<u8>) {
    let (_, public) = latchkey_crypto::keypair_from_entropy([device_seed; 32]);
    let entropy = WrapEntropy {
        ephemeral_seed: [device_seed.wrapping_add(1); 32],
        nonce: [device_seed.wrapping_add(2); latchkey_crypto::NONCE_SIZE],
        fill: [device_seed.wrapping_add(3); latchkey_crypto::FILL_SIZE],
    };
    let wrapped = wrap_vault_key(&public, key, &entropy).unwrap();

    let keys = DevicePublicKeys {
        encapsulation_key: *public.as_bytes(),
        verifying_key: [device_seed; 32],
    };
    (keys, wrapped.as_bytes().to_vec())
}

/// Build complete metadata for the given devices at the given epoch.
fn metadata(epoch: u64, devices: &[u64]) -> VaultMetadata {
    let key = VaultKey::from_entropy([epoch as u8; 32]);

    let mut headers = BTreeMap::new();
    let mut device_keys = BTreeMap::new();
    for &device_id in devices {
        let (keys, wrapped_bytes) = wrap_for(device_id as u8, &key);
        let wrapped = latchkey_crypto::WrappedKey::try_from(wrapped_bytes).unwrap();
        headers.insert(device_id, DeviceHeader { device_id, epoch, wrapped_key: wrapped });
        device_keys.insert(device_id, keys);
    }

    let (root_keys, root_wrapped) = wrap_for(0xEE, &key);
    VaultMetadata {
        current_epoch: epoch,
        headers,
        device_keys,
        root_encapsulation_key: root_keys.encapsulation_key,
        wrapped_root_key: latchkey_crypto::WrappedKey::try_from(root_wrapped).unwrap(),
    }
}

#[test]
fn committed_metadata_survives_restart() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("vault.meta");

    {
        let storage = FsVaultStorage::open(&path).unwrap();
        let handle = storage.shadow_write(&metadata(5, &[1, 2, 3])).unwrap();
        storage.atomic_commit(handle).unwrap();
    }

    // Reopen and verify
    {
        let storage = FsVaultStorage::open(&path).unwrap();
        let loaded = storage.read_committed().unwrap().unwrap();
        assert_eq!(loaded.current_epoch, 5);
        assert_eq!(loaded.device_count(), 3);
        assert!(storage.pending_shadow().unwrap().is_none());
    }
}

#[test]
fn crash_before_rename_leaves_old_epoch_live() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("vault.meta");

    // Commit epoch 5, then crash with an epoch-6 shadow pending.
    {
        let storage = FsVaultStorage::open(&path).unwrap();
        let handle = storage.shadow_write(&metadata(5, &[1, 2, 3])).unwrap();
        storage.atomic_commit(handle).unwrap();

        let _abandoned = storage.shadow_write(&metadata(6, &[1, 2])).unwrap();
        // Process "crashes" here: no atomic_commit.
    }

    // On restart the committed document is still epoch 5, the shadow is
    // discoverable, and startup recovery re-drives it to completion
    // because it is provably complete and strictly ahead.
    let storage = FsVaultStorage::open(&path).unwrap();
    assert_eq!(storage.read_committed().unwrap().unwrap().current_epoch, 5);
    assert!(storage.pending_shadow().unwrap().is_some());

    let coordinator = EpochUpgradeCoordinator::new(SystemEnv::new(), storage.clone());
    let live = coordinator.recover_on_startup().unwrap().unwrap();
    assert_eq!(live.current_epoch, 6);
    assert_eq!(live.device_count(), 2);

    // And the re-drive is durable.
    assert_eq!(storage.read_committed().unwrap().unwrap().current_epoch, 6);
    assert!(storage.pending_shadow().unwrap().is_none());
}

#[test]
fn incomplete_shadow_is_discarded_on_recovery() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("vault.meta");

    let storage = FsVaultStorage::open(&path).unwrap();
    let handle = storage.shadow_write(&metadata(5, &[1, 2, 3])).unwrap();
    storage.atomic_commit(handle).unwrap();

    // Shadow with a hole: device 2 is active but has no header.
    let mut torn = metadata(6, &[1, 2]);
    torn.headers.remove(&2);
    let _abandoned = storage.shadow_write(&torn).unwrap();

    let reopened = FsVaultStorage::open(&path).unwrap();
    let coordinator = EpochUpgradeCoordinator::new(SystemEnv::new(), reopened.clone());
    let live = coordinator.recover_on_startup().unwrap().unwrap();

    // The unprovable shadow must not be rolled forward.
    assert_eq!(live.current_epoch, 5);
    assert!(reopened.pending_shadow().unwrap().is_none());
}

#[test]
fn regressive_shadow_is_discarded_on_recovery() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("vault.meta");

    let storage = FsVaultStorage::open(&path).unwrap();
    let handle = storage.shadow_write(&metadata(5, &[1, 2])).unwrap();
    storage.atomic_commit(handle).unwrap();

    // A shadow at the same epoch cannot be proven to be the newer write.
    let _abandoned = storage.shadow_write(&metadata(5, &[1])).unwrap();

    let reopened = FsVaultStorage::open(&path).unwrap();
    let coordinator = EpochUpgradeCoordinator::new(SystemEnv::new(), reopened);
    let live = coordinator.recover_on_startup().unwrap().unwrap();

    assert_eq!(live.current_epoch, 5);
    assert_eq!(live.device_count(), 2);
}

#[test]
fn corrupt_shadow_file_is_removed() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("vault.meta");

    let storage = FsVaultStorage::open(&path).unwrap();
    let handle = storage.shadow_write(&metadata(5, &[1])).unwrap();
    storage.atomic_commit(handle).unwrap();

    // Torn write: garbage where the shadow should be.
    let shadow_path = dir.path().join("vault.meta.shadow");
    let mut file = fs::File::create(&shadow_path).unwrap();
    file.write_all(b"\xFF\xFF not cbor").unwrap();
    drop(file);

    let reopened = FsVaultStorage::open(&path).unwrap();
    assert!(reopened.pending_shadow().unwrap().is_none());
    assert!(!shadow_path.exists());

    // Committed document untouched.
    assert_eq!(reopened.read_committed().unwrap().unwrap().current_epoch, 5);
}

#[test]
fn stale_handle_cannot_commit_after_supersede() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("vault.meta");

    let storage = FsVaultStorage::open(&path).unwrap();
    let old = storage.shadow_write(&metadata(5, &[1])).unwrap();
    let new = storage.shadow_write(&metadata(6, &[1])).unwrap();

    assert!(storage.atomic_commit(old).is_err());
    storage.atomic_commit(new).unwrap();

    assert_eq!(storage.read_committed().unwrap().unwrap().current_epoch, 6);
}
