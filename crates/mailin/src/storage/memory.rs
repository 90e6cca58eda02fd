//! In-memory blob storage
//!
//! Used by tests and by callers that want a throwaway store.

use std::collections::{BTreeMap, HashMap};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::sync::atomic::{AtomicU64, Ordering};

use super::blob::{BlobKey, BlobStore, Folder};
use crate::error::{MailinError, Result};
use crate::models::FolderName;

type FolderMap = HashMap<Folder, BTreeMap<BlobKey, Vec<u8>>>;

/// In-memory implementation of BlobStore
///
/// Folders map to ordered key/blob maps; keys are zero-padded counters so
/// they sort in insertion order.
pub struct InMemoryBlobStore {
    folders: RwLock<FolderMap>,
    next_key: AtomicU64,
}

impl InMemoryBlobStore {
    /// Create an empty store holding only the inbox and the failed folder
    pub fn new() -> Self {
        let mut folders = HashMap::new();
        folders.insert(Folder::Inbox, BTreeMap::new());
        folders.insert(Folder::Failed, BTreeMap::new());
        Self {
            folders: RwLock::new(folders),
            next_key: AtomicU64::new(1),
        }
    }

    /// Store `data` under a caller-chosen key, replacing any previous blob
    #[cfg(test)]
    pub(crate) fn insert(&self, folder: &Folder, key: BlobKey, data: &[u8]) -> Result<()> {
        let mut folders = self.write();
        let blobs = folders.get_mut(folder).ok_or_else(|| missing(folder))?;
        blobs.insert(key, data.to_vec());
        Ok(())
    }

    /// Drop a dated folder and everything in it
    pub fn delete_folder(&self, folder: &FolderName) {
        self.write().remove(&Folder::Dated(*folder));
    }

    fn read(&self) -> RwLockReadGuard<'_, FolderMap> {
        self.folders.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, FolderMap> {
        self.folders.write().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for InMemoryBlobStore {
    fn default() -> Self {
        Self::new()
    }
}

fn missing(folder: &Folder) -> MailinError {
    MailinError::not_found(format!("folder {}", folder))
}

impl BlobStore for InMemoryBlobStore {
    fn list_folders(&self) -> Result<Vec<FolderName>> {
        let mut folders: Vec<FolderName> = self
            .read()
            .keys()
            .filter_map(|f| match f {
                Folder::Dated(name) => Some(*name),
                Folder::Inbox | Folder::Failed => None,
            })
            .collect();
        folders.sort();
        Ok(folders)
    }

    fn has_folder(&self, folder: &FolderName) -> Result<bool> {
        Ok(self.read().contains_key(&Folder::Dated(*folder)))
    }

    fn create_folder(&self, folder: &FolderName) -> Result<()> {
        self.write().entry(Folder::Dated(*folder)).or_default();
        Ok(())
    }

    fn add(&self, folder: &Folder, data: &[u8]) -> Result<BlobKey> {
        let mut folders = self.write();
        let blobs = folders.get_mut(folder).ok_or_else(|| missing(folder))?;

        let key = BlobKey::new(format!(
            "{:016}",
            self.next_key.fetch_add(1, Ordering::Relaxed)
        ));
        blobs.insert(key.clone(), data.to_vec());
        Ok(key)
    }

    fn get(&self, folder: &Folder, key: &BlobKey) -> Result<Option<Vec<u8>>> {
        let folders = self.read();
        let blobs = folders.get(folder).ok_or_else(|| missing(folder))?;
        Ok(blobs.get(key).cloned())
    }

    fn exists(&self, folder: &Folder, key: &BlobKey) -> Result<bool> {
        let folders = self.read();
        let blobs = folders.get(folder).ok_or_else(|| missing(folder))?;
        Ok(blobs.contains_key(key))
    }

    fn remove(&self, folder: &Folder, key: &BlobKey) -> Result<()> {
        let mut folders = self.write();
        let blobs = folders.get_mut(folder).ok_or_else(|| missing(folder))?;
        blobs
            .remove(key)
            .map(|_| ())
            .ok_or_else(|| MailinError::not_found(format!("blob {} in {}", key, folder)))
    }

    fn list_keys(&self, folder: &Folder) -> Result<Vec<BlobKey>> {
        let folders = self.read();
        let blobs = folders.get(folder).ok_or_else(|| missing(folder))?;
        Ok(blobs.keys().cloned().collect())
    }
}
