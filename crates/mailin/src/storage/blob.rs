//! Blob storage trait for raw message bytes

use std::fmt;
use std::sync::Arc;

use crate::error::Result;
use crate::models::FolderName;

/// A partition of the blob store
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Folder {
    /// Unmanaged landing area for externally delivered messages
    Inbox,
    /// Managed partition holding messages dated on one calendar day
    Dated(FolderName),
    /// Inbox messages that could not be admitted, set aside for inspection
    Failed,
}

impl fmt::Display for Folder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Folder::Inbox => f.write_str("inbox"),
            Folder::Dated(name) => name.fmt(f),
            Folder::Failed => f.write_str("failed"),
        }
    }
}

/// Opaque locator of a blob within one folder
///
/// Keys handed out by a store sort in the order the blobs were added.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BlobKey(pub String);

impl BlobKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BlobKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Trait for foldered blob storage
///
/// The inbox and the failed folder always exist. Dated folders must be created before use;
/// operations naming a dated folder that was never created (or was deleted
/// out from under us) fail with `NotFound`.
pub trait BlobStore: Send + Sync {
    /// List the dated folders that currently exist
    fn list_folders(&self) -> Result<Vec<FolderName>>;

    /// Check whether a dated folder exists
    fn has_folder(&self, folder: &FolderName) -> Result<bool>;

    /// Create a dated folder; a no-op if it already exists
    fn create_folder(&self, folder: &FolderName) -> Result<()>;

    /// Store a blob, returning its newly assigned key
    fn add(&self, folder: &Folder, data: &[u8]) -> Result<BlobKey>;

    /// Retrieve blob content
    ///
    /// Returns None if the folder exists but holds no such key.
    fn get(&self, folder: &Folder, key: &BlobKey) -> Result<Option<Vec<u8>>>;

    /// Check if a blob exists
    fn exists(&self, folder: &Folder, key: &BlobKey) -> Result<bool>;

    /// Delete a blob; `NotFound` if the key is absent
    fn remove(&self, folder: &Folder, key: &BlobKey) -> Result<()>;

    /// All keys currently in a folder, in ascending order
    fn list_keys(&self, folder: &Folder) -> Result<Vec<BlobKey>>;
}

impl<B: BlobStore + ?Sized> BlobStore for Arc<B> {
    fn list_folders(&self) -> Result<Vec<FolderName>> {
        (**self).list_folders()
    }

    fn has_folder(&self, folder: &FolderName) -> Result<bool> {
        (**self).has_folder(folder)
    }

    fn create_folder(&self, folder: &FolderName) -> Result<()> {
        (**self).create_folder(folder)
    }

    fn add(&self, folder: &Folder, data: &[u8]) -> Result<BlobKey> {
        (**self).add(folder, data)
    }

    fn get(&self, folder: &Folder, key: &BlobKey) -> Result<Option<Vec<u8>>> {
        (**self).get(folder, key)
    }

    fn exists(&self, folder: &Folder, key: &BlobKey) -> Result<bool> {
        (**self).exists(folder, key)
    }

    fn remove(&self, folder: &Folder, key: &BlobKey) -> Result<()> {
        (**self).remove(folder, key)
    }

    fn list_keys(&self, folder: &Folder) -> Result<Vec<BlobKey>> {
        (**self).list_keys(folder)
    }
}
