//! End-to-end vault lifecycle tests.
//!
//! Drive the full facade — create, unlock, register, revoke, recovery,
//! veto, root rotation — over in-memory storage and a virtual clock.

use std::time::Duration;

use latchkey_core::{
    Credential, InvariantViolation, ProtocolError, RecoveryOutcome, Role, StateKind, Vault,
    VaultConfig, VaultStorage,
};
use latchkey_crypto::{RecoverySecret, RootSecret};
use latchkey_harness::{SimDevice, SimEnv};
use latchkey_store::MemoryVaultStorage;

type TestVault = Vault<SimEnv, MemoryVaultStorage, latchkey_core::NullBroadcast>;

const WINDOW: Duration = Duration::from_secs(48 * 3600);
const TOLERANCE: Duration = Duration::from_secs(5 * 60);

struct Fixture {
    env: SimEnv,
    storage: MemoryVaultStorage,
    vault: TestVault,
    root: RootSecret,
    recovery: RecoverySecret,
    devices: Vec<SimDevice>,
}

fn fixture(seed: u64) -> Fixture {
    let env = SimEnv::new(seed);
    let storage = MemoryVaultStorage::new();
    let root = RootSecret::from_credential(b"root credential bytes");
    let recovery = RecoverySecret::from_credential(b"printed recovery code");

    let first = SimDevice::generate(100, &env);
    let vault = Vault::create(
        env.clone(),
        storage.clone(),
        latchkey_core::NullBroadcast,
        VaultConfig::default(),
        &root,
        &recovery,
        first.device_id(),
        first.public_keys(),
    )
    .unwrap();

    Fixture { env, storage, vault, root, recovery, devices: vec![first] }
}

impl Fixture {
    fn add_device(&mut self, device_id: u64) -> &SimDevice {
        let device = SimDevice::generate(device_id, &self.env);
        self.vault.register(device.device_id(), device.public_keys()).unwrap();
        self.devices.push(device);
        self.devices.last().unwrap()
    }

    fn device(&self, device_id: u64) -> &SimDevice {
        self.devices.iter().find(|d| d.device_id() == device_id).unwrap()
    }
}

#[test]
fn creation_includes_the_shadow_slot() {
    let fx = fixture(1);

    // First device plus the indistinguishable recovery slot.
    assert_eq!(fx.vault.device_ids().len(), 2);
    assert!(fx.vault.device_ids().contains(&fx.recovery.shadow_device_id()));
    assert_eq!(fx.vault.current_epoch(), 0);
    assert_eq!(fx.vault.current_state(), StateKind::Idle);
}

#[test]
fn register_adds_header_without_epoch_change() {
    let mut fx = fixture(2);
    fx.add_device(200);
    fx.add_device(300);

    assert_eq!(fx.vault.current_epoch(), 0);
    let headers = fx.vault.export_headers();
    assert_eq!(headers.len(), 4);
    assert!(headers.values().all(|h| h.epoch == 0));

    // Registered devices can unwrap the vault key.
    let key_200 = fx.device(200).unwrap_header(&headers[&200]).unwrap();
    let key_300 = fx.device(300).unwrap_header(&headers[&300]).unwrap();
    assert_eq!(key_200, key_300);
}

#[test]
fn duplicate_registration_is_rejected() {
    let mut fx = fixture(3);
    fx.add_device(200);

    let duplicate = SimDevice::generate(200, &fx.env);
    let result = fx.vault.register(duplicate.device_id(), duplicate.public_keys());
    assert!(matches!(result, Err(ProtocolError::DuplicateDevice(200))));
}

#[test]
fn revoke_drives_epoch_forward_and_cuts_the_device_off() {
    let mut fx = fixture(4);
    fx.add_device(200);
    fx.add_device(300);

    fx.vault.revoke(200).unwrap();

    assert_eq!(fx.vault.current_epoch(), 1);
    assert_eq!(fx.vault.current_state(), StateKind::Idle);

    let headers = fx.vault.export_headers();
    // Revoked device's header no longer exists in the new epoch's set.
    assert!(!headers.contains_key(&200));
    assert_eq!(headers.len(), 3);
    assert!(headers.values().all(|h| h.epoch == 1));

    // Survivors unwrap to the new key; the revoked device cannot open
    // any surviving header.
    let new_key = fx.device(300).unwrap_header(&headers[&300]).unwrap();
    let survivor_key = fx.device(100).unwrap_header(&headers[&100]).unwrap();
    assert_eq!(new_key, survivor_key);

    assert!(fx.device(200).unwrap_header(&headers[&300]).is_err());
    assert!(fx.device(200).unwrap_header(&headers[&100]).is_err());
}

#[test]
fn revoking_unknown_device_fails_cleanly() {
    let fx = fixture(5);
    let epoch_before = fx.vault.current_epoch();

    let result = fx.vault.revoke(999);
    assert!(matches!(result, Err(ProtocolError::UnknownDevice(999))));
    assert_eq!(fx.vault.current_epoch(), epoch_before);
    assert_eq!(fx.vault.current_state(), StateKind::Idle);
}

#[test]
fn unlock_roles_follow_credentials() {
    let fx = fixture(6);

    let root_session = fx.vault.unlock(Credential::Root(&fx.root)).unwrap();
    assert_eq!(root_session.role(), Role::Authorized);

    let recovery_session = fx.vault.unlock(Credential::Recovery(&fx.recovery)).unwrap();
    assert_eq!(recovery_session.role(), Role::Recovery);

    let wrong = RootSecret::from_credential(b"wrong password");
    assert!(matches!(
        fx.vault.unlock(Credential::Root(&wrong)),
        Err(ProtocolError::CredentialRejected)
    ));
}

#[test]
fn recovery_role_cannot_rotate_root() {
    let fx = fixture(7);
    let session = fx.vault.unlock(Credential::Recovery(&fx.recovery)).unwrap();

    let epoch_before = fx.vault.current_epoch();
    let new_root = RootSecret::from_credential(b"new root");
    let result = fx.vault.rotate_root(&session, &new_root);

    assert!(matches!(
        result,
        Err(ProtocolError::Invariant(InvariantViolation::CausalEntropyBarrier))
    ));
    // No field of the protocol state changed.
    assert_eq!(fx.vault.current_epoch(), epoch_before);
    assert_eq!(fx.vault.current_state(), StateKind::Idle);

    // The old root credential still unlocks.
    assert!(fx.vault.unlock(Credential::Root(&fx.root)).is_ok());
}

#[test]
fn authorized_root_rotation_moves_epoch_and_credentials() {
    let fx = fixture(8);
    let session = fx.vault.unlock(Credential::Root(&fx.root)).unwrap();

    let new_root = RootSecret::from_credential(b"new root");
    fx.vault.rotate_root(&session, &new_root).unwrap();

    assert_eq!(fx.vault.current_epoch(), 1);
    assert!(matches!(
        fx.vault.unlock(Credential::Root(&fx.root)),
        Err(ProtocolError::CredentialRejected)
    ));
    assert!(fx.vault.unlock(Credential::Root(&new_root)).is_ok());
}

#[test]
fn veto_mid_window_rejects_recovery() {
    let mut fx = fixture(9);
    fx.add_device(200);

    let window = fx.vault.initiate_recovery(Role::Authorized).unwrap();
    assert_eq!(fx.vault.current_state(), StateKind::RecoveryInitiated);

    // Ten hours in, a surviving device vetoes.
    fx.env.advance(Duration::from_secs(10 * 3600));
    let signature = fx.device(200).sign_veto(window.request_id());
    fx.vault.submit_veto(window.request_id(), 200, &signature, None).unwrap();

    // The window terminated in the same operation.
    assert_eq!(fx.vault.current_state(), StateKind::Idle);
    assert!(matches!(
        fx.vault.check_and_finalize_recovery(window.request_id()),
        Err(ProtocolError::UnknownRecoveryRequest(_))
    ));
}

#[test]
fn unvetoed_window_commits_exactly_once() {
    let fx = fixture(10);

    let window = fx.vault.initiate_recovery(Role::Authorized).unwrap();

    // Mid-window polls stay pending.
    fx.env.advance(Duration::from_secs(3600));
    assert_eq!(
        fx.vault.check_and_finalize_recovery(window.request_id()).unwrap(),
        RecoveryOutcome::Pending
    );

    // One minute past the deadline: commit.
    fx.env.advance(WINDOW - Duration::from_secs(3600) + Duration::from_secs(60));
    assert_eq!(
        fx.vault.check_and_finalize_recovery(window.request_id()).unwrap(),
        RecoveryOutcome::Committed
    );
    assert_eq!(fx.vault.current_state(), StateKind::Idle);

    // No double-commit: the window is gone.
    assert!(matches!(
        fx.vault.check_and_finalize_recovery(window.request_id()),
        Err(ProtocolError::UnknownRecoveryRequest(_))
    ));
}

#[test]
fn late_veto_within_tolerance_still_wins() {
    let mut fx = fixture(11);
    fx.add_device(200);

    let window = fx.vault.initiate_recovery(Role::Authorized).unwrap();

    // Four minutes past the deadline, inside the drift tolerance.
    fx.env.advance(WINDOW + Duration::from_secs(4 * 60));
    let signature = fx.device(200).sign_veto(window.request_id());
    fx.vault.submit_veto(window.request_id(), 200, &signature, None).unwrap();

    assert_eq!(fx.vault.current_state(), StateKind::Idle);
}

#[test]
fn veto_after_tolerance_is_refused() {
    let mut fx = fixture(12);
    fx.add_device(200);

    let window = fx.vault.initiate_recovery(Role::Authorized).unwrap();

    fx.env.advance(WINDOW + TOLERANCE + Duration::from_secs(1));
    let signature = fx.device(200).sign_veto(window.request_id());
    let result = fx.vault.submit_veto(window.request_id(), 200, &signature, None);

    assert!(matches!(
        result,
        Err(ProtocolError::Invariant(InvariantViolation::VetoWindowExpired))
    ));
    // The window is still open for the finalize path.
    assert_eq!(fx.vault.current_state(), StateKind::RecoveryInitiated);
}

#[test]
fn forged_and_foreign_vetoes_are_refused() {
    let mut fx = fixture(13);
    fx.add_device(200);

    let window = fx.vault.initiate_recovery(Role::Authorized).unwrap();

    // Signature from a key the vault never saw.
    let outsider = SimDevice::generate(999, &fx.env);
    let result =
        fx.vault.submit_veto(window.request_id(), 999, &outsider.sign_veto(window.request_id()), None);
    assert!(matches!(result, Err(ProtocolError::InvalidVeto { .. })));

    // Valid device id, signature by someone else.
    let result = fx.vault.submit_veto(
        window.request_id(),
        200,
        &outsider.sign_veto(window.request_id()),
        None,
    );
    assert!(matches!(result, Err(ProtocolError::InvalidVeto { .. })));

    // Window unaffected by refused vetoes.
    assert_eq!(fx.vault.current_state(), StateKind::RecoveryInitiated);
}

#[test]
fn recovery_role_cannot_initiate_recovery() {
    let fx = fixture(14);

    let result = fx.vault.initiate_recovery(Role::Recovery);
    assert!(matches!(
        result,
        Err(ProtocolError::Invariant(InvariantViolation::CausalEntropyBarrier))
    ));
    assert_eq!(fx.vault.current_state(), StateKind::Idle);
}

#[test]
fn second_concurrent_recovery_is_rejected() {
    let fx = fixture(15);

    let _window = fx.vault.initiate_recovery(Role::Authorized).unwrap();
    let result = fx.vault.initiate_recovery(Role::Authorized);

    assert!(matches!(result, Err(ProtocolError::InvalidTransition { .. })));
    assert_eq!(fx.vault.current_state(), StateKind::RecoveryInitiated);
}

#[test]
fn revoke_self_is_terminal() {
    let fx = fixture(16);

    fx.vault.revoke_self().unwrap();
    assert_eq!(fx.vault.current_state(), StateKind::Revoked);

    // No further key operations are accepted.
    let device = SimDevice::generate(500, &fx.env);
    assert!(matches!(
        fx.vault.register(device.device_id(), device.public_keys()),
        Err(ProtocolError::VaultRevoked)
    ));
    assert!(matches!(fx.vault.revoke(100), Err(ProtocolError::VaultRevoked)));
    assert!(matches!(
        fx.vault.unlock(Credential::Root(&fx.root)),
        Err(ProtocolError::VaultRevoked)
    ));
}

#[test]
fn corrupted_committed_state_triggers_meltdown() {
    let mut fx = fixture(17);
    fx.add_device(200);
    fx.vault.unlock(Credential::Root(&fx.root)).unwrap();

    // Sanity: data operations work while idle and unlocked.
    let sealed = fx.vault.seal_data(b"note", b"attack at dawn").unwrap();
    assert_eq!(fx.vault.open_data(b"note", &sealed).unwrap(), b"attack at dawn");

    // Corrupt the committed document behind the vault's back: drop one
    // device's header.
    let mut torn = fx.storage.read_committed().unwrap().unwrap();
    torn.headers.remove(&200);
    let handle = fx.storage.shadow_write(&torn).unwrap();
    fx.storage.atomic_commit(handle).unwrap();

    let result = fx.vault.verify_integrity();
    assert!(matches!(
        result,
        Err(ProtocolError::Invariant(InvariantViolation::MissingHeader(200)))
    ));

    // Meltdown: degraded state, decryption halted, key zeroized.
    assert_eq!(fx.vault.current_state(), StateKind::Degraded);
    assert!(matches!(
        fx.vault.open_data(b"note", &sealed),
        Err(ProtocolError::VaultLocked)
    ));
    assert!(matches!(fx.vault.seal_data(b"note", b"x"), Err(ProtocolError::InvalidTransition { .. })));
}

#[test]
fn integrity_reverification_restores_idle() {
    let mut fx = fixture(18);
    fx.add_device(200);
    fx.vault.unlock(Credential::Root(&fx.root)).unwrap();

    let good = fx.storage.read_committed().unwrap().unwrap();

    // Corrupt, melt down.
    let mut torn = good.clone();
    torn.headers.remove(&200);
    let handle = fx.storage.shadow_write(&torn).unwrap();
    fx.storage.atomic_commit(handle).unwrap();
    assert!(fx.vault.verify_integrity().is_err());
    assert_eq!(fx.vault.current_state(), StateKind::Degraded);

    // Restore the document; re-verification returns the vault to idle.
    let handle = fx.storage.shadow_write(&good).unwrap();
    fx.storage.atomic_commit(handle).unwrap();
    fx.vault.verify_integrity().unwrap();
    assert_eq!(fx.vault.current_state(), StateKind::Idle);

    // Trust requires a fresh root unlock before decryption resumes.
    let sealed_after = {
        fx.vault.unlock(Credential::Root(&fx.root)).unwrap();
        fx.vault.seal_data(b"aad", b"data").unwrap()
    };
    assert_eq!(fx.vault.open_data(b"aad", &sealed_after).unwrap(), b"data");
}

#[test]
fn persistent_integrity_failure_falls_to_revoked() {
    let mut fx = fixture(19);
    fx.add_device(200);

    let mut torn = fx.storage.read_committed().unwrap().unwrap();
    torn.headers.remove(&200);
    let handle = fx.storage.shadow_write(&torn).unwrap();
    fx.storage.atomic_commit(handle).unwrap();

    assert!(fx.vault.verify_integrity().is_err());
    assert_eq!(fx.vault.current_state(), StateKind::Degraded);

    // Failure persists on the second check: terminal.
    assert!(fx.vault.verify_integrity().is_err());
    assert_eq!(fx.vault.current_state(), StateKind::Revoked);
}

#[test]
fn reopened_vault_sees_committed_state() {
    let mut fx = fixture(20);
    fx.add_device(200);
    fx.vault.revoke(100).unwrap();

    let reopened: TestVault = Vault::open(
        fx.env.clone(),
        fx.storage.clone(),
        latchkey_core::NullBroadcast,
        VaultConfig::default(),
    )
    .unwrap();

    assert_eq!(reopened.current_epoch(), 1);
    assert_eq!(reopened.current_state(), StateKind::Idle);
    assert_eq!(reopened.device_ids(), fx.vault.device_ids());

    // Both credentials still unlock the reopened instance.
    assert!(reopened.unlock(Credential::Root(&fx.root)).is_ok());
    assert!(reopened.unlock(Credential::Recovery(&fx.recovery)).is_ok());
}

#[test]
fn observer_sees_state_changes() {
    let fx = fixture(21);
    let device = SimDevice::generate(200, &fx.env);

    let mut observer = fx.vault.subscribe();
    assert_eq!(observer.poll(), None);

    fx.vault.register(device.device_id(), device.public_keys()).unwrap();
    assert_eq!(observer.poll(), Some(StateKind::Idle));
    assert_eq!(observer.poll(), None);

    let window = fx.vault.initiate_recovery(Role::Authorized).unwrap();
    assert_eq!(observer.poll(), Some(StateKind::RecoveryInitiated));

    let signature = device.sign_veto(window.request_id());
    fx.vault.submit_veto(window.request_id(), 200, &signature, None).unwrap();
    assert_eq!(observer.poll(), Some(StateKind::Idle));
}

#[test]
fn prepared_epoch_regression_is_rejected() {
    let mut fx = fixture(22);
    fx.add_device(200);
    fx.vault.revoke(200).unwrap(); // epoch now 1

    // The facade always proposes current+1; exercise the coordinator's
    // guard directly through the validator-visible surface instead.
    let err = latchkey_core::InvariantValidator::check_epoch_monotonicity(
        fx.vault.current_epoch(),
        fx.vault.current_epoch(),
    )
    .unwrap_err();
    assert!(matches!(err, InvariantViolation::EpochRegression { current: 1, attempted: 1 }));
}
