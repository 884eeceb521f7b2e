//! In-memory view of the committed device-header set.
//!
//! Thin wrapper over the maps persisted in `VaultMetadata`. The vault
//! facade guards it with a read-write lock: reads (listing devices,
//! looking up keys for veto verification) far outnumber writes (one per
//! committed epoch upgrade or registration).

use std::collections::{BTreeMap, BTreeSet};

use ed25519_dalek::VerifyingKey;

use crate::types::{DeviceHeader, DeviceId, DevicePublicKeys, VaultMetadata};

/// The current epoch's device-to-header map plus the active key set.
#[derive(Debug, Clone, Default)]
pub struct DeviceHeaderStore {
    headers: BTreeMap<DeviceId, DeviceHeader>,
    device_keys: BTreeMap<DeviceId, DevicePublicKeys>,
}

impl DeviceHeaderStore {
    /// Build the store from committed metadata.
    pub fn from_metadata(metadata: &VaultMetadata) -> Self {
        Self { headers: metadata.headers.clone(), device_keys: metadata.device_keys.clone() }
    }

    /// Header map for the current epoch.
    pub fn headers(&self) -> &BTreeMap<DeviceId, DeviceHeader> {
        &self.headers
    }

    /// Active devices' public capabilities.
    pub fn device_keys(&self) -> &BTreeMap<DeviceId, DevicePublicKeys> {
        &self.device_keys
    }

    /// Identifiers of every active device (shadow slot included).
    pub fn device_ids(&self) -> BTreeSet<DeviceId> {
        self.device_keys.keys().copied().collect()
    }

    /// Whether a device is in the active set.
    pub fn is_active(&self, device_id: DeviceId) -> bool {
        self.device_keys.contains_key(&device_id)
    }

    /// Number of active devices.
    pub fn device_count(&self) -> usize {
        self.device_keys.len()
    }

    /// One device's header, if present.
    pub fn header(&self, device_id: DeviceId) -> Option<&DeviceHeader> {
        self.headers.get(&device_id)
    }

    /// A device's Ed25519 verifying key for veto authentication.
    /// `None` if the device is unknown or the stored bytes are invalid.
    pub fn verifying_key(&self, device_id: DeviceId) -> Option<VerifyingKey> {
        self.device_keys.get(&device_id).and_then(DevicePublicKeys::verifying_key)
    }

    /// Add a device to the active set with its header.
    ///
    /// Callers check for duplicates first; inserting over an existing
    /// device replaces both entries.
    pub fn insert_device(
        &mut self,
        device_id: DeviceId,
        keys: DevicePublicKeys,
        header: DeviceHeader,
    ) {
        self.device_keys.insert(device_id, keys);
        self.headers.insert(device_id, header);
    }

    /// Remove a device from the active set. Returns its public keys if it
    /// was present.
    pub fn remove_device(&mut self, device_id: DeviceId) -> Option<DevicePublicKeys> {
        self.headers.remove(&device_id);
        self.device_keys.remove(&device_id)
    }

    /// Replace the whole header map after a committed epoch upgrade.
    pub fn replace_headers(&mut self, headers: BTreeMap<DeviceId, DeviceHeader>) {
        self.headers = headers;
    }
}
