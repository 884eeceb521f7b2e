//! The per-vault context object.
//!
//! One `Vault` exists per open vault, constructed once and passed by
//! reference to all operations; there is no process-wide singleton.
//! External callers (device management, recovery requests, veto
//! submissions) enter only through this facade, which consults the
//! invariant validator, drives the epoch-upgrade coordinator or the
//! recovery-window manager as needed, and persists through the storage
//! collaborator.
//!
//! # Concurrency
//!
//! Single-writer per vault, with independent synchronization per concern:
//! a mutex over the state machine (which also owns the open recovery
//! window), a read-write lock over the header store (reads dominate), and
//! an atomic counter mirroring the committed epoch so validators get a
//! lock-free monotonic read. Lock order is always machine, then headers.
//!
//! # Meltdown
//!
//! An invariant violation detected in committed state is never locally
//! retried: the vault halts decrypt operations, zeroizes the in-memory
//! vault key, forces the state machine into `Degraded`, and raises one
//! high-priority alert. Trust is re-established by a successful integrity
//! re-check followed by a root-credential unlock.

use std::{
    collections::{BTreeMap, BTreeSet},
    sync::{
        Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    time::Duration,
};

use ed25519_dalek::SigningKey;
use tracing::{debug, error, info, warn};

use latchkey_crypto::{
    EncapsulationKey, RecoverySecret, RootSecret, VaultKey, WrapEntropy, WrappedKey,
    unwrap_vault_key, wrap_vault_key,
};

use crate::{
    env::Environment,
    error::{InvariantViolation, ProtocolError},
    headers::DeviceHeaderStore,
    machine::{ProtocolStateMachine, TransitionCtx},
    recovery::{
        DEFAULT_DRIFT_TOLERANCE, DEFAULT_RECOVERY_WINDOW, RecoveryOutcome, RecoveryWindow,
        RecoveryWindowManager,
    },
    state::{ProtocolState, StateKind},
    storage::VaultStorage,
    transport::HeaderBroadcast,
    types::{DeviceHeader, DeviceId, DevicePublicKeys, Epoch, Role, SessionHandle, VaultMetadata},
    upgrade::EpochUpgradeCoordinator,
    validator::InvariantValidator,
};

/// Tunable parameters for one vault instance.
#[derive(Debug, Clone)]
pub struct VaultConfig {
    /// Length of the recovery veto window
    pub recovery_window: Duration,

    /// Clock drift accepted on both ends of the window
    pub drift_tolerance: Duration,
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            recovery_window: DEFAULT_RECOVERY_WINDOW,
            drift_tolerance: DEFAULT_DRIFT_TOLERANCE,
        }
    }
}

/// Credential presented at unlock time.
///
/// The credential kind fixes the session's role: root credentials open
/// `Authorized` sessions, the physical recovery path opens `Recovery`
/// sessions that the causal entropy barrier keeps away from
/// root-authority operations.
pub enum Credential<'a> {
    /// The root authority credential
    Root(&'a RootSecret),

    /// The physical recovery secret backing the shadow slot
    Recovery(&'a RecoverySecret),
}

/// One open vault.
pub struct Vault<E: Environment, S: VaultStorage, B: HeaderBroadcast> {
    env: E,
    machine: Mutex<ProtocolStateMachine<E::Instant>>,
    headers: RwLock<DeviceHeaderStore>,
    epoch: AtomicU64,
    root_wrap: Mutex<RootWrap>,
    vault_key: Mutex<Option<VaultKey>>,
    coordinator: EpochUpgradeCoordinator<E, S>,
    recovery: RecoveryWindowManager<E>,
    broadcast: B,
    decrypt_halted: AtomicBool,
    state_version: AtomicU64,
}

/// The root authority's wrap state, updated together on every upgrade.
struct RootWrap {
    encapsulation_key: [u8; 32],
    wrapped_key: WrappedKey,
}

impl<E: Environment, S: VaultStorage, B: HeaderBroadcast> Vault<E, S, B> {
    /// Create a brand-new vault and persist its genesis metadata.
    ///
    /// The genesis header set contains the first real device and the
    /// shadow slot derived from the recovery secret; both are written in
    /// the same two-phase commit. The returned vault is unlocked.
    pub fn create(
        env: E,
        storage: S,
        broadcast: B,
        config: VaultConfig,
        root: &RootSecret,
        recovery_secret: &RecoverySecret,
        first_device: DeviceId,
        first_device_keys: DevicePublicKeys,
    ) -> Result<Self, ProtocolError> {
        let vault_key = VaultKey::from_entropy(env.random_array());
        let (_, root_pk) = root.keypair();

        let shadow_id = recovery_secret.shadow_device_id();
        let (_, shadow_pk) = recovery_secret.keypair();
        let shadow_verifying =
            SigningKey::from_bytes(&recovery_secret.signing_seed()).verifying_key();
        let shadow_keys = DevicePublicKeys {
            encapsulation_key: *shadow_pk.as_bytes(),
            verifying_key: shadow_verifying.to_bytes(),
        };

        let mut device_keys = BTreeMap::new();
        device_keys.insert(first_device, first_device_keys);
        device_keys.insert(shadow_id, shadow_keys);

        let mut headers = BTreeMap::new();
        for (&device_id, keys) in &device_keys {
            let wrapped = wrap_vault_key(
                &keys.encapsulation_key(),
                &vault_key,
                &wrap_entropy(&env),
            )
            .map_err(|source| ProtocolError::HeaderUpdateFailed { device_id, source })?;
            headers.insert(device_id, DeviceHeader { device_id, epoch: 0, wrapped_key: wrapped });
        }

        let wrapped_root_key = wrap_vault_key(&root_pk, &vault_key, &wrap_entropy(&env))?;
        let metadata = VaultMetadata {
            current_epoch: 0,
            headers,
            device_keys,
            root_encapsulation_key: *root_pk.as_bytes(),
            wrapped_root_key,
        };

        // Genesis goes through the same two-phase path as every upgrade.
        let coordinator = EpochUpgradeCoordinator::new(env.clone(), storage);
        let handle = coordinator.shadow_write(&metadata)?;
        coordinator.atomic_commit(handle)?;
        info!(devices = metadata.device_count(), "vault created");

        let recovery =
            RecoveryWindowManager::new(env.clone(), config.recovery_window, config.drift_tolerance);

        Ok(Self {
            machine: Mutex::new(ProtocolStateMachine::new(config.drift_tolerance)),
            headers: RwLock::new(DeviceHeaderStore::from_metadata(&metadata)),
            epoch: AtomicU64::new(metadata.current_epoch),
            root_wrap: Mutex::new(RootWrap {
                encapsulation_key: metadata.root_encapsulation_key,
                wrapped_key: metadata.wrapped_root_key,
            }),
            vault_key: Mutex::new(Some(vault_key)),
            coordinator,
            recovery,
            broadcast,
            decrypt_halted: AtomicBool::new(false),
            state_version: AtomicU64::new(0),
            env,
        })
    }

    /// Open an existing vault from committed storage.
    ///
    /// Resolves any crash-interrupted upgrade first, then verifies the
    /// committed header set. An integrity violation does not fail the
    /// open: the vault comes up in `Degraded` safe mode with decrypt
    /// halted, per the meltdown policy.
    pub fn open(
        env: E,
        storage: S,
        broadcast: B,
        config: VaultConfig,
    ) -> Result<Self, ProtocolError> {
        let coordinator = EpochUpgradeCoordinator::new(env.clone(), storage);
        let Some(metadata) = coordinator.recover_on_startup()? else {
            return Err(ProtocolError::VaultNotFound);
        };

        let integrity = InvariantValidator::check_header_completeness(
            &metadata.device_keys,
            metadata.headers.values(),
            metadata.current_epoch,
        );

        let recovery =
            RecoveryWindowManager::new(env.clone(), config.recovery_window, config.drift_tolerance);

        let vault = Self {
            machine: Mutex::new(ProtocolStateMachine::new(config.drift_tolerance)),
            headers: RwLock::new(DeviceHeaderStore::from_metadata(&metadata)),
            epoch: AtomicU64::new(metadata.current_epoch),
            root_wrap: Mutex::new(RootWrap {
                encapsulation_key: metadata.root_encapsulation_key,
                wrapped_key: metadata.wrapped_root_key,
            }),
            vault_key: Mutex::new(None),
            coordinator,
            recovery,
            broadcast,
            decrypt_halted: AtomicBool::new(false),
            state_version: AtomicU64::new(0),
            env,
        };

        if let Err(violation) = integrity {
            let mut machine = vault.lock_machine();
            vault.meltdown_locked(&mut machine, &violation);
        }

        Ok(vault)
    }

    /// Unlock the vault with a credential, opening a session.
    ///
    /// The session's role is fixed by the credential kind and never
    /// changes. A successful root unlock after an integrity re-check
    /// clears the decrypt halt: trust has been re-established from the
    /// strongest available credential.
    pub fn unlock(&self, credential: Credential<'_>) -> Result<SessionHandle, ProtocolError> {
        let kind = self.current_state();
        if kind == StateKind::Revoked {
            return Err(ProtocolError::VaultRevoked);
        }

        let (key, role) = match credential {
            Credential::Root(secret) => {
                let (private, public) = secret.keypair();
                let root_wrap = self.lock_root_wrap();
                if *public.as_bytes() != root_wrap.encapsulation_key {
                    return Err(ProtocolError::CredentialRejected);
                }
                let key = unwrap_vault_key(&private, &root_wrap.wrapped_key)
                    .map_err(|_| ProtocolError::CredentialRejected)?;
                (key, Role::Authorized)
            },
            Credential::Recovery(secret) => {
                let shadow_id = secret.shadow_device_id();
                let headers = self.read_headers();
                let Some(header) = headers.header(shadow_id) else {
                    return Err(ProtocolError::CredentialRejected);
                };
                let (private, _) = secret.keypair();
                let key = unwrap_vault_key(&private, &header.wrapped_key)
                    .map_err(|_| ProtocolError::CredentialRejected)?;
                (key, Role::Recovery)
            },
        };

        *self.lock_vault_key() = Some(key);

        if role == Role::Authorized && kind == StateKind::Idle {
            self.decrypt_halted.store(false, Ordering::SeqCst);
        }

        let session = SessionHandle::new(self.env.random_u64(), role, self.current_epoch());
        debug!(role = ?role, "session opened");
        Ok(session)
    }

    /// Highest committed epoch.
    pub fn current_epoch(&self) -> Epoch {
        self.epoch.load(Ordering::SeqCst)
    }

    /// Coarse protocol state.
    pub fn current_state(&self) -> StateKind {
        self.lock_machine().kind()
    }

    /// Identifiers of all active devices (the shadow slot included,
    /// indistinguishably).
    pub fn device_ids(&self) -> BTreeSet<DeviceId> {
        self.read_headers().device_ids()
    }

    /// Snapshot of the current header set, for observers and invariant
    /// checks. Headers are wrapped key material, safe to expose.
    pub fn export_headers(&self) -> BTreeMap<DeviceId, DeviceHeader> {
        self.read_headers().headers().clone()
    }

    /// Snapshot of the active devices' public capabilities.
    pub fn export_device_keys(&self) -> BTreeMap<DeviceId, DevicePublicKeys> {
        self.read_headers().device_keys().clone()
    }

    /// Register a device at the current epoch.
    ///
    /// Adds a header wrapped under the device's public capability without
    /// changing the epoch; persisted through the two-phase commit.
    pub fn register(
        &self,
        device_id: DeviceId,
        keys: DevicePublicKeys,
    ) -> Result<(), ProtocolError> {
        let machine = self.lock_machine();
        self.ensure_idle(&machine)?;

        let key_guard = self.lock_vault_key();
        let Some(vault_key) = key_guard.as_ref() else {
            return Err(ProtocolError::VaultLocked);
        };

        let mut headers = self.write_headers();
        if headers.is_active(device_id) {
            return Err(ProtocolError::DuplicateDevice(device_id));
        }

        let epoch = self.current_epoch();
        let wrapped = wrap_vault_key(&keys.encapsulation_key(), vault_key, &wrap_entropy(&self.env))
            .map_err(|source| ProtocolError::HeaderUpdateFailed { device_id, source })?;
        let header = DeviceHeader { device_id, epoch, wrapped_key: wrapped };

        let mut new_device_keys = headers.device_keys().clone();
        new_device_keys.insert(device_id, keys.clone());
        let mut new_headers = headers.headers().clone();
        new_headers.insert(device_id, header.clone());

        let metadata = self.assemble_metadata(epoch, new_headers, new_device_keys)?;
        let handle = self.coordinator.shadow_write(&metadata)?;
        if let Err(err) = self.coordinator.atomic_commit(handle) {
            self.coordinator.discard_shadow(handle);
            return Err(err);
        }

        headers.insert_device(device_id, keys, header.clone());
        drop(headers);
        drop(key_guard);
        drop(machine);

        info!(device_id, epoch, "device registered");
        self.bump_version();

        if let Err(err) = self.broadcast.broadcast(device_id, &header) {
            warn!(%err, "header broadcast failed; peers will catch up on next sync");
        }
        Ok(())
    }

    /// Revoke a device.
    ///
    /// Removes the device from the active set and drives a full epoch
    /// upgrade before reporting success: the device is not safely revoked
    /// until the key has moved forward and its header no longer exists in
    /// the new epoch's header set.
    pub fn revoke(&self, device_id: DeviceId) -> Result<(), ProtocolError> {
        let mut machine = self.lock_machine();
        self.ensure_idle(&machine)?;

        {
            let headers = self.read_headers();
            if !headers.is_active(device_id) {
                return Err(ProtocolError::UnknownDevice(device_id));
            }
        }

        let root_pk = self.lock_root_wrap().encapsulation_key;
        let remaining: BTreeMap<DeviceId, DevicePublicKeys> = {
            let headers = self.read_headers();
            headers
                .device_keys()
                .iter()
                .filter(|(id, _)| **id != device_id)
                .map(|(&id, keys)| (id, keys.clone()))
                .collect()
        };

        self.drive_epoch_upgrade(&mut machine, remaining, root_pk)?;
        info!(device_id, epoch = self.current_epoch(), "device revoked");
        Ok(())
    }

    /// Rotate the root authority to a new credential.
    ///
    /// Gated by the causal entropy barrier: a `Recovery` session's
    /// attempt returns `CausalEntropyBarrier` and changes nothing. The
    /// rotation drives a full epoch upgrade so material wrapped to the
    /// old authority never covers future data.
    pub fn rotate_root(
        &self,
        session: &SessionHandle,
        new_root: &RootSecret,
    ) -> Result<(), ProtocolError> {
        InvariantValidator::check_causal_barrier(session.role())?;

        let mut machine = self.lock_machine();
        self.ensure_idle(&machine)?;

        let (_, new_root_pk) = new_root.keypair();
        let devices = self.read_headers().device_keys().clone();

        self.drive_epoch_upgrade(&mut machine, devices, *new_root_pk.as_bytes())?;
        info!(epoch = self.current_epoch(), "root authority rotated");
        Ok(())
    }

    /// Mark this session's own device as revoked, terminally.
    ///
    /// No further key operations are accepted afterwards; the in-memory
    /// vault key is zeroized.
    pub fn revoke_self(&self) -> Result<(), ProtocolError> {
        let mut machine = self.lock_machine();
        let headers = self.read_headers();
        let ctx = TransitionCtx {
            current_epoch: self.current_epoch(),
            active_devices: headers.device_keys(),
            headers: headers.headers(),
        };
        machine.transition(ProtocolState::Revoked, &ctx, self.env.now())?;
        drop(headers);
        drop(machine);

        self.decrypt_halted.store(true, Ordering::SeqCst);
        *self.lock_vault_key() = None;
        self.bump_version();
        info!("session revoked");
        Ok(())
    }

    /// Initiate "lost all devices" recovery.
    ///
    /// Opens a veto window; any active device may reject the request
    /// before the window (plus drift tolerance) closes. A second
    /// concurrent request is rejected, not queued.
    pub fn initiate_recovery(
        &self,
        role: Role,
    ) -> Result<RecoveryWindow<E::Instant>, ProtocolError> {
        let mut machine = self.lock_machine();
        let headers = self.read_headers();
        let ctx = TransitionCtx {
            current_epoch: self.current_epoch(),
            active_devices: headers.device_keys(),
            headers: headers.headers(),
        };

        let window = self.recovery.initiate(&mut machine, &ctx, role)?;
        drop(headers);
        drop(machine);
        self.bump_version();
        Ok(window)
    }

    /// Submit a signed veto against an open recovery window.
    ///
    /// The only path that ends a window early. The veto is authenticated
    /// against the device's stored verifying key, recorded, and the
    /// window is rejected in the same operation — serialized under the
    /// state lock, so a veto recorded before a concurrent finalize always
    /// wins.
    pub fn submit_veto(
        &self,
        request_id: u64,
        device_id: DeviceId,
        signature: &[u8; 64],
        reason: Option<String>,
    ) -> Result<(), ProtocolError> {
        let mut machine = self.lock_machine();
        let headers = self.read_headers();
        let ctx = TransitionCtx {
            current_epoch: self.current_epoch(),
            active_devices: headers.device_keys(),
            headers: headers.headers(),
        };

        self.recovery.add_veto(
            &mut machine,
            &ctx,
            headers.device_keys(),
            request_id,
            device_id,
            signature,
            reason,
        )?;
        drop(headers);
        drop(machine);
        self.bump_version();
        Ok(())
    }

    /// Apply the veto-supremacy check to an open window and finalize it
    /// if due. Called on any access (polling or event).
    pub fn check_and_finalize_recovery(
        &self,
        request_id: u64,
    ) -> Result<RecoveryOutcome, ProtocolError> {
        let mut machine = self.lock_machine();
        let headers = self.read_headers();
        let ctx = TransitionCtx {
            current_epoch: self.current_epoch(),
            active_devices: headers.device_keys(),
            headers: headers.headers(),
        };

        let outcome = self.recovery.check_and_finalize(&mut machine, &ctx, request_id)?;
        drop(headers);
        drop(machine);

        if outcome != RecoveryOutcome::Pending {
            self.bump_version();
        }
        Ok(outcome)
    }

    /// Re-verify the committed header set.
    ///
    /// On success from `Degraded`, returns the vault to `Idle` (trust
    /// still requires a root unlock to resume decryption). On failure
    /// from `Idle`, runs the meltdown sequence; on persistent failure
    /// from `Degraded`, falls to terminal `Revoked`.
    pub fn verify_integrity(&self) -> Result<(), ProtocolError> {
        let committed = self
            .coordinator
            .storage()
            .read_committed()?
            .ok_or(ProtocolError::VaultNotFound)?;

        let result = InvariantValidator::check_header_completeness(
            &committed.device_keys,
            committed.headers.values(),
            committed.current_epoch,
        );

        let mut machine = self.lock_machine();
        match result {
            Ok(()) => {
                if machine.kind() == StateKind::Degraded {
                    let ctx = TransitionCtx {
                        current_epoch: committed.current_epoch,
                        active_devices: &committed.device_keys,
                        headers: &committed.headers,
                    };
                    machine.transition(ProtocolState::Idle, &ctx, self.env.now())?;
                    drop(machine);
                    self.bump_version();
                    info!("integrity re-verified");
                }
                Ok(())
            },
            Err(violation) => {
                if machine.kind() == StateKind::Degraded {
                    // Failure persists: the safe mode was not enough.
                    let ctx = TransitionCtx {
                        current_epoch: committed.current_epoch,
                        active_devices: &committed.device_keys,
                        headers: &committed.headers,
                    };
                    machine.transition(ProtocolState::Revoked, &ctx, self.env.now())?;
                    drop(machine);
                    *self.lock_vault_key() = None;
                    self.bump_version();
                } else {
                    self.meltdown_locked(&mut machine, &violation);
                }
                Err(violation.into())
            },
        }
    }

    /// Encrypt application data under the current vault key.
    ///
    /// Output is `nonce ‖ ciphertext`. Requires an idle, unlocked vault.
    pub fn seal_data(&self, aad: &[u8], plaintext: &[u8]) -> Result<Vec<u8>, ProtocolError> {
        {
            let machine = self.lock_machine();
            self.ensure_idle(&machine)?;
        }

        let key_guard = self.lock_vault_key();
        let Some(vault_key) = key_guard.as_ref() else {
            return Err(ProtocolError::VaultLocked);
        };

        let nonce: [u8; latchkey_crypto::NONCE_SIZE] = self.env.random_array();
        let sealed = latchkey_crypto::seal(vault_key.as_bytes(), &nonce, aad, plaintext);

        let mut out = Vec::with_capacity(nonce.len() + sealed.len());
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&sealed);
        Ok(out)
    }

    /// Decrypt application data sealed with [`seal_data`](Self::seal_data).
    ///
    /// Refused while decryption is halted by the meltdown sequence.
    pub fn open_data(&self, aad: &[u8], blob: &[u8]) -> Result<Vec<u8>, ProtocolError> {
        if self.decrypt_halted.load(Ordering::SeqCst) {
            return Err(ProtocolError::VaultLocked);
        }

        let key_guard = self.lock_vault_key();
        let Some(vault_key) = key_guard.as_ref() else {
            return Err(ProtocolError::VaultLocked);
        };

        if blob.len() < latchkey_crypto::NONCE_SIZE {
            return Err(latchkey_crypto::CryptoError::AuthenticationFailed.into());
        }
        let (nonce_bytes, sealed) = blob.split_at(latchkey_crypto::NONCE_SIZE);
        let mut nonce = [0u8; latchkey_crypto::NONCE_SIZE];
        nonce.copy_from_slice(nonce_bytes);

        Ok(latchkey_crypto::open(vault_key.as_bytes(), &nonce, aad, sealed)?)
    }

    /// Subscribe to state changes via polling.
    pub fn subscribe(&self) -> StateObserver<'_, E, S, B> {
        StateObserver { vault: self, last_seen: self.state_version.load(Ordering::SeqCst) }
    }

    /// Drive a full epoch upgrade for the given surviving device set.
    ///
    /// The caller holds the machine lock. On any failure the machine is
    /// restored to `Idle` and committed state is untouched, so the caller
    /// can safely retry.
    fn drive_epoch_upgrade(
        &self,
        machine: &mut MutexGuard<'_, ProtocolStateMachine<E::Instant>>,
        devices: BTreeMap<DeviceId, DevicePublicKeys>,
        root_pk: [u8; 32],
    ) -> Result<(), ProtocolError> {
        let current_epoch = self.current_epoch();
        let new_epoch = current_epoch + 1;

        let (mut context, new_key) =
            self.coordinator.prepare(current_epoch, new_epoch, devices.keys().copied().collect())?;

        {
            let headers = self.read_headers();
            let ctx = TransitionCtx {
                current_epoch,
                active_devices: headers.device_keys(),
                headers: headers.headers(),
            };
            machine.transition(
                ProtocolState::Rekeying(context.clone()),
                &ctx,
                self.env.now(),
            )?;
        }

        let new_headers =
            match self.coordinator.update_all_device_headers(&mut context, &new_key, &devices) {
                Ok(headers) => headers,
                Err(err) => {
                    machine.abort_rekeying();
                    return Err(err);
                },
            };

        let wrapped_root_key = match wrap_vault_key(
            &EncapsulationKey::from_bytes(root_pk),
            &new_key,
            &wrap_entropy(&self.env),
        ) {
            Ok(wrapped) => wrapped,
            Err(err) => {
                machine.abort_rekeying();
                return Err(err.into());
            },
        };

        let metadata = VaultMetadata {
            current_epoch: new_epoch,
            headers: new_headers.clone(),
            device_keys: devices.clone(),
            root_encapsulation_key: root_pk,
            wrapped_root_key: wrapped_root_key.clone(),
        };

        let handle = match self.coordinator.shadow_write(&metadata) {
            Ok(handle) => handle,
            Err(err) => {
                machine.abort_rekeying();
                return Err(err);
            },
        };
        if let Err(err) = self.coordinator.atomic_commit(handle) {
            self.coordinator.discard_shadow(handle);
            machine.abort_rekeying();
            return Err(err);
        }

        // Committed: fold the new epoch into the in-memory views.
        {
            let mut headers = self.write_headers();
            *headers = DeviceHeaderStore::from_metadata(&metadata);
        }
        self.epoch.store(new_epoch, Ordering::SeqCst);
        {
            let mut root_wrap = self.lock_root_wrap();
            root_wrap.encapsulation_key = root_pk;
            root_wrap.wrapped_key = wrapped_root_key;
        }
        *self.lock_vault_key() = Some(new_key);

        {
            let headers = self.read_headers();
            let ctx = TransitionCtx {
                current_epoch: new_epoch,
                active_devices: headers.device_keys(),
                headers: headers.headers(),
            };
            machine.transition(ProtocolState::Idle, &ctx, self.env.now())?;
        }

        self.bump_version();
        info!(old_epoch = current_epoch, new_epoch, "epoch upgraded");

        for (device_id, header) in &new_headers {
            if let Err(err) = self.broadcast.broadcast(*device_id, header) {
                warn!(%err, "header broadcast failed; peers will catch up on next sync");
            }
        }
        Ok(())
    }

    /// Persist an epoch-preserving metadata change (registration).
    fn assemble_metadata(
        &self,
        epoch: Epoch,
        headers: BTreeMap<DeviceId, DeviceHeader>,
        device_keys: BTreeMap<DeviceId, DevicePublicKeys>,
    ) -> Result<VaultMetadata, ProtocolError> {
        InvariantValidator::check_header_completeness(&device_keys, headers.values(), epoch)?;

        let root_wrap = self.lock_root_wrap();
        Ok(VaultMetadata {
            current_epoch: epoch,
            headers,
            device_keys,
            root_encapsulation_key: root_wrap.encapsulation_key,
            wrapped_root_key: root_wrap.wrapped_key.clone(),
        })
    }

    /// The meltdown sequence, under the caller's machine lock.
    ///
    /// Never retried or locally corrected: halt decryption, zeroize the
    /// in-memory vault key, force `Degraded`, raise one alert.
    fn meltdown_locked(
        &self,
        machine: &mut MutexGuard<'_, ProtocolStateMachine<E::Instant>>,
        violation: &InvariantViolation,
    ) {
        self.decrypt_halted.store(true, Ordering::SeqCst);
        *self.lock_vault_key() = None;
        machine.force_degraded(meltdown_reason(violation).to_string());
        self.bump_version();

        // One high-priority, sanitized alert: category only, no device
        // identifiers, epochs, or key material.
        error!(
            reason = meltdown_reason(violation),
            "vault integrity violation; re-establish trust from the root credential"
        );
    }

    /// Require the machine to be idle for a mutating operation.
    fn ensure_idle(
        &self,
        machine: &MutexGuard<'_, ProtocolStateMachine<E::Instant>>,
    ) -> Result<(), ProtocolError> {
        match machine.kind() {
            StateKind::Idle => Ok(()),
            StateKind::Revoked => Err(ProtocolError::VaultRevoked),
            from => Err(ProtocolError::InvalidTransition { from, to: StateKind::Idle }),
        }
    }

    fn bump_version(&self) {
        self.state_version.fetch_add(1, Ordering::SeqCst);
    }

    /// # Panics
    ///
    /// Panics if the state mutex is poisoned (a thread panicked while
    /// holding it); the vault's single-writer discipline makes every
    /// guarded section panic-free in non-test code.
    #[allow(clippy::expect_used)]
    fn lock_machine(&self) -> MutexGuard<'_, ProtocolStateMachine<E::Instant>> {
        self.machine.lock().expect("state mutex poisoned")
    }

    /// # Panics
    ///
    /// Panics if the header lock is poisoned.
    #[allow(clippy::expect_used)]
    fn read_headers(&self) -> RwLockReadGuard<'_, DeviceHeaderStore> {
        self.headers.read().expect("header lock poisoned")
    }

    /// # Panics
    ///
    /// Panics if the header lock is poisoned.
    #[allow(clippy::expect_used)]
    fn write_headers(&self) -> RwLockWriteGuard<'_, DeviceHeaderStore> {
        self.headers.write().expect("header lock poisoned")
    }

    /// # Panics
    ///
    /// Panics if the vault-key mutex is poisoned.
    #[allow(clippy::expect_used)]
    fn lock_vault_key(&self) -> MutexGuard<'_, Option<VaultKey>> {
        self.vault_key.lock().expect("vault key mutex poisoned")
    }

    /// # Panics
    ///
    /// Panics if the root-wrap mutex is poisoned.
    #[allow(clippy::expect_used)]
    fn lock_root_wrap(&self) -> MutexGuard<'_, RootWrap> {
        self.root_wrap.lock().expect("root wrap mutex poisoned")
    }
}

/// Poll-based observer of protocol state changes.
///
/// Returned by [`Vault::subscribe`]. Each `poll` reports the coarse state
/// once per change; payload detail stays inside the vault.
pub struct StateObserver<'a, E: Environment, S: VaultStorage, B: HeaderBroadcast> {
    vault: &'a Vault<E, S, B>,
    last_seen: u64,
}

impl<E: Environment, S: VaultStorage, B: HeaderBroadcast> StateObserver<'_, E, S, B> {
    /// The current state, if it changed since the last poll.
    pub fn poll(&mut self) -> Option<StateKind> {
        let version = self.vault.state_version.load(Ordering::SeqCst);
        if version == self.last_seen {
            return None;
        }
        self.last_seen = version;
        Some(self.vault.current_state())
    }
}

/// Entropy for one wrap operation, drawn from the environment.
fn wrap_entropy<E: Environment>(env: &E) -> WrapEntropy {
    WrapEntropy {
        ephemeral_seed: env.random_array(),
        nonce: env.random_array(),
        fill: env.random_array(),
    }
}

/// Sanitized, category-only description of a violation for the alert and
/// the degraded-state reason.
fn meltdown_reason(violation: &InvariantViolation) -> &'static str {
    match violation {
        InvariantViolation::EpochRegression { .. } => "epoch regression",
        InvariantViolation::MissingHeader(_)
        | InvariantViolation::MultipleHeaders { .. }
        | InvariantViolation::StaleHeader { .. }
        | InvariantViolation::StrayHeader(_) => "header integrity failure",
        InvariantViolation::CausalEntropyBarrier => "causal entropy barrier",
        InvariantViolation::VetoSupremacy
        | InvariantViolation::VetoWindowActive
        | InvariantViolation::VetoWindowExpired => "veto window violation",
    }
}
