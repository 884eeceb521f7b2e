//! The atomic epoch-upgrade coordinator.
//!
//! Orchestrates generation of a new key epoch, re-wrapping for every
//! active device, and the crash-consistent two-phase commit to disk.
//! Partial failures roll the whole batch back: no path leaves some
//! devices at the new epoch and others behind, and nothing is committed
//! until the single atomic rename succeeds.

use std::collections::{BTreeMap, BTreeSet};

use tracing::{info, warn};

use latchkey_crypto::{VaultKey, WrapEntropy, wrap_vault_key};

use crate::{
    env::Environment,
    error::ProtocolError,
    state::RekeyingContext,
    storage::{ShadowHandle, VaultStorage},
    types::{DeviceHeader, DeviceId, DevicePublicKeys, Epoch, VaultMetadata},
    validator::InvariantValidator,
};

/// Drives epoch upgrades against the storage collaborator.
///
/// Holds no protocol state of its own; the state machine gates every use
/// and the vault facade serializes calls.
pub struct EpochUpgradeCoordinator<E: Environment, S: VaultStorage> {
    env: E,
    storage: S,
}

impl<E: Environment, S: VaultStorage> EpochUpgradeCoordinator<E, S> {
    /// Create a coordinator over the given environment and storage.
    pub fn new(env: E, storage: S) -> Self {
        Self { env, storage }
    }

    /// The underlying storage collaborator.
    pub fn storage(&self) -> &S {
        &self.storage
    }

    /// Invariant-check the attempted epoch and generate a fresh vault
    /// key for it.
    ///
    /// # Errors
    ///
    /// - `EpochRegression` if `new_epoch <= current_epoch`
    pub fn prepare(
        &self,
        current_epoch: Epoch,
        new_epoch: Epoch,
        devices: BTreeSet<DeviceId>,
    ) -> Result<(RekeyingContext, VaultKey), ProtocolError> {
        InvariantValidator::check_epoch_monotonicity(current_epoch, new_epoch)?;

        let key = VaultKey::from_entropy(self.env.random_array());
        Ok((RekeyingContext::new(current_epoch, new_epoch, devices), key))
    }

    /// Re-wrap the new vault key under every active device's public
    /// capability at the new epoch.
    ///
    /// The shadow slot is not special-cased anywhere in this path: it
    /// sits in `device_keys` like any other entry, so it is re-wrapped in
    /// the same batch with the same blob size and timing.
    ///
    /// All-or-nothing: a failure for any single device drops the whole
    /// batch and returns an error; the caller aborts the rekeying and the
    /// committed header set is untouched.
    ///
    /// # Errors
    ///
    /// - `HeaderUpdateFailed` naming the first device whose wrap failed
    pub fn update_all_device_headers(
        &self,
        context: &mut RekeyingContext,
        new_key: &VaultKey,
        device_keys: &BTreeMap<DeviceId, DevicePublicKeys>,
    ) -> Result<BTreeMap<DeviceId, DeviceHeader>, ProtocolError> {
        let mut headers = BTreeMap::new();

        for (&device_id, keys) in device_keys {
            let wrapped = wrap_vault_key(&keys.encapsulation_key(), new_key, &self.wrap_entropy())
                .map_err(|source| ProtocolError::HeaderUpdateFailed { device_id, source })?;

            headers.insert(device_id, DeviceHeader {
                device_id,
                epoch: context.new_epoch,
                wrapped_key: wrapped,
            });
            context.complete(device_id);
        }

        InvariantValidator::check_header_completeness(
            device_keys,
            headers.values(),
            context.new_epoch,
        )?;

        Ok(headers)
    }

    /// Write the fully-formed new metadata to the shadow location.
    ///
    /// The committed document is untouched; a crash after this point is
    /// resolved by [`recover_on_startup`](Self::recover_on_startup).
    pub fn shadow_write(&self, metadata: &VaultMetadata) -> Result<ShadowHandle, ProtocolError> {
        self.storage.shadow_write(metadata).map_err(ProtocolError::ShadowWriteFailed)
    }

    /// Atomically make the shadow copy the committed document.
    pub fn atomic_commit(&self, handle: ShadowHandle) -> Result<(), ProtocolError> {
        self.storage.atomic_commit(handle).map_err(ProtocolError::AtomicCommitFailed)
    }

    /// Discard a shadow copy whose upgrade was abandoned. Best-effort;
    /// a leftover shadow is also cleaned up on the next startup.
    pub fn discard_shadow(&self, handle: ShadowHandle) {
        if let Err(err) = self.storage.discard_shadow(handle) {
            warn!(%err, "failed to discard abandoned shadow");
        }
    }

    /// Resolve any upgrade interrupted by a crash.
    ///
    /// A pending shadow is re-driven to completion only when it can be
    /// proven fully written: it parses, its epoch is strictly ahead of
    /// the committed one, and its header set is complete at that epoch.
    /// Anything unprovable is discarded, leaving the committed document
    /// live. The epoch never decreases on this path.
    ///
    /// Returns the metadata that is live after resolution (`None` if the
    /// vault has never been created).
    pub fn recover_on_startup(&self) -> Result<Option<VaultMetadata>, ProtocolError> {
        let committed = self.storage.read_committed()?;

        let Some((handle, shadow)) = self.storage.pending_shadow()? else {
            return Ok(committed);
        };

        let ahead_of_committed =
            committed.as_ref().is_none_or(|live| shadow.current_epoch > live.current_epoch);
        let complete = InvariantValidator::check_header_completeness(
            &shadow.device_keys,
            shadow.headers.values(),
            shadow.current_epoch,
        )
        .is_ok();

        if ahead_of_committed && complete {
            info!(epoch = shadow.current_epoch, "re-driving interrupted epoch upgrade");
            self.storage.atomic_commit(handle).map_err(ProtocolError::AtomicCommitFailed)?;
            return Ok(Some(shadow));
        }

        warn!("discarding shadow that cannot be proven complete");
        self.storage.discard_shadow(handle)?;
        Ok(committed)
    }

    /// Entropy for one wrap operation, drawn from the environment.
    fn wrap_entropy(&self) -> WrapEntropy {
        WrapEntropy {
            ephemeral_seed: self.env.random_array(),
            nonce: self.env.random_array(),
            fill: self.env.random_array(),
        }
    }
}
