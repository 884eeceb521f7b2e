//! Filesystem storage with shadow-write/atomic-rename durability.
//!
//! The committed document lives at one path; shadow copies are written to
//! a sibling `.shadow` path, flushed with `sync_all`, and promoted with a
//! single `rename`, which POSIX guarantees atomically replaces the
//! target. The parent directory is fsynced after the rename so the
//! promotion itself is durable. Readers therefore observe either the old
//! document or the new one, never a mixture, and a crash at any point is
//! resolved by the core's startup recovery against `pending_shadow`.

use std::{
    fs::{self, File, OpenOptions},
    io::{Read, Write},
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
};

use tracing::warn;

use latchkey_core::{ShadowHandle, StorageError, VaultMetadata, VaultStorage};

/// Production vault storage over a single metadata file.
#[derive(Clone)]
pub struct FsVaultStorage {
    inner: Arc<FsInner>,
}

struct FsInner {
    committed_path: PathBuf,
    shadow_path: PathBuf,
    /// Token of the shadow file currently on disk, if this process wrote
    /// or discovered one. Guards commits against stale handles.
    pending: Mutex<PendingState>,
}

struct PendingState {
    current: Option<u64>,
    next_token: u64,
}

impl FsVaultStorage {
    /// Open storage rooted at the given metadata path.
    ///
    /// The path need not exist yet; `read_committed` reports `None` until
    /// the first commit. A shadow file left behind by a crash is picked
    /// up and exposed through `pending_shadow`.
    pub fn open(committed_path: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let committed_path = committed_path.into();
        let mut shadow_path = committed_path.clone().into_os_string();
        shadow_path.push(".shadow");
        let shadow_path = PathBuf::from(shadow_path);

        let current = if shadow_path.exists() { Some(1) } else { None };

        Ok(Self {
            inner: Arc::new(FsInner {
                committed_path,
                shadow_path,
                pending: Mutex::new(PendingState { current, next_token: 1 }),
            }),
        })
    }

    /// Path of the committed metadata document.
    pub fn committed_path(&self) -> &Path {
        &self.inner.committed_path
    }

    /// # Panics
    ///
    /// Panics if the pending-state mutex is poisoned (a thread panicked
    /// mid-operation); storage state is then unreliable and continuing
    /// would risk committing the wrong shadow.
    #[allow(clippy::expect_used)]
    fn lock_pending(&self) -> std::sync::MutexGuard<'_, PendingState> {
        self.inner.pending.lock().expect("pending-state mutex poisoned")
    }

    fn encode(metadata: &VaultMetadata) -> Result<Vec<u8>, StorageError> {
        let mut buf = Vec::new();
        ciborium::ser::into_writer(metadata, &mut buf)
            .map_err(|err| StorageError::Serialization(err.to_string()))?;
        Ok(buf)
    }

    fn decode(bytes: &[u8]) -> Result<VaultMetadata, StorageError> {
        ciborium::de::from_reader(bytes)
            .map_err(|err| StorageError::Serialization(err.to_string()))
    }

    /// Fsync the directory containing `path`, making a rename durable.
    fn sync_parent_dir(path: &Path) -> Result<(), StorageError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                File::open(parent)?.sync_all()?;
            }
        }
        Ok(())
    }
}

impl VaultStorage for FsVaultStorage {
    fn shadow_write(&self, metadata: &VaultMetadata) -> Result<ShadowHandle, StorageError> {
        let bytes = Self::encode(metadata)?;

        let mut pending = self.lock_pending();

        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&self.inner.shadow_path)?;
        file.write_all(&bytes)?;
        // The shadow must be durable before the rename may ever promote
        // it, or a crash could commit a torn document.
        file.sync_all()?;

        pending.next_token += 1;
        let token = pending.next_token;
        pending.current = Some(token);

        Ok(ShadowHandle::new(token))
    }

    fn atomic_commit(&self, handle: ShadowHandle) -> Result<(), StorageError> {
        let mut pending = self.lock_pending();

        match pending.current {
            Some(token) if token == handle.token() => {},
            Some(_) => return Err(StorageError::StaleShadow { token: handle.token() }),
            None => return Err(StorageError::NoPendingShadow),
        }

        fs::rename(&self.inner.shadow_path, &self.inner.committed_path)?;
        Self::sync_parent_dir(&self.inner.committed_path)?;

        pending.current = None;
        Ok(())
    }

    fn discard_shadow(&self, handle: ShadowHandle) -> Result<(), StorageError> {
        let mut pending = self.lock_pending();

        match pending.current {
            Some(token) if token == handle.token() => {},
            Some(_) => return Err(StorageError::StaleShadow { token: handle.token() }),
            None => return Err(StorageError::NoPendingShadow),
        }

        fs::remove_file(&self.inner.shadow_path)?;
        pending.current = None;
        Ok(())
    }

    fn read_committed(&self) -> Result<Option<VaultMetadata>, StorageError> {
        let mut file = match File::open(&self.inner.committed_path) {
            Ok(file) => file,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };

        let mut bytes = Vec::new();
        file.read_to_end(&mut bytes)?;
        Ok(Some(Self::decode(&bytes)?))
    }

    fn pending_shadow(&self) -> Result<Option<(ShadowHandle, VaultMetadata)>, StorageError> {
        let mut pending = self.lock_pending();

        let Some(token) = pending.current else {
            return Ok(None);
        };

        let mut file = match File::open(&self.inner.shadow_path) {
            Ok(file) => file,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                pending.current = None;
                return Ok(None);
            },
            Err(err) => return Err(err.into()),
        };

        let mut bytes = Vec::new();
        file.read_to_end(&mut bytes)?;

        match Self::decode(&bytes) {
            Ok(metadata) => Ok(Some((ShadowHandle::new(token), metadata))),
            Err(_) => {
                // A shadow that does not parse can never be proven fully
                // written; remove it so it is not retried forever.
                warn!("removing unparseable shadow file");
                fs::remove_file(&self.inner.shadow_path)?;
                pending.current = None;
                Ok(None)
            },
        }
    }
}
