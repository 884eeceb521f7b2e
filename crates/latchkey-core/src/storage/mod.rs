//! Storage abstraction for vault metadata.
//!
//! The persisted document is written exclusively through a two-phase
//! contract: write the fully-formed new metadata to a shadow location and
//! flush it durably, then replace the committed document with one atomic
//! rename. Readers observe either the old document or the new one, never
//! a mixture; nothing is considered committed until the rename succeeds.
//!
//! The trait is synchronous. Implementations must be `Clone` (shared
//! between the vault facade and the upgrade coordinator, typically via an
//! internal `Arc`) and thread-safe.

mod error;

pub use error::StorageError;

use crate::types::VaultMetadata;

/// Handle to a durably written shadow copy awaiting commit.
///
/// Opaque token. A handle is invalidated by any later `shadow_write`;
/// committing a stale handle fails rather than resurrecting an old
/// document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShadowHandle(u64);

impl ShadowHandle {
    /// Construct a handle from an implementation's token.
    pub fn new(token: u64) -> Self {
        Self(token)
    }

    /// The implementation token.
    pub fn token(&self) -> u64 {
        self.0
    }
}

/// Storage collaborator for the single vault-metadata document.
pub trait VaultStorage: Clone + Send + Sync + 'static {
    /// Write the fully-formed new metadata to a shadow location and
    /// flush it durably. The committed document is untouched.
    fn shadow_write(&self, metadata: &VaultMetadata) -> Result<ShadowHandle, StorageError>;

    /// Atomically replace the committed document with the shadow copy.
    ///
    /// Either fully succeeds (the new metadata is now live) or fully
    /// fails (the old metadata remains live). No intermediate state is
    /// ever visible to readers.
    fn atomic_commit(&self, handle: ShadowHandle) -> Result<(), StorageError>;

    /// Discard a pending shadow copy without committing it.
    fn discard_shadow(&self, handle: ShadowHandle) -> Result<(), StorageError>;

    /// Read the committed metadata. `None` if the vault has never been
    /// created.
    fn read_committed(&self) -> Result<Option<VaultMetadata>, StorageError>;

    /// A shadow copy left behind by a crash, if one exists and parses.
    ///
    /// Implementations may delete an unparseable shadow (it can never be
    /// proven complete) and report `None`.
    fn pending_shadow(&self) -> Result<Option<(ShadowHandle, VaultMetadata)>, StorageError>;
}
