//! Maildir-backed blob storage
//!
//! Directory structure:
//! ```text
//! Maildir/
//!   tmp/                  # in-flight writes
//!   new/                  # inbox: freshly delivered messages
//!   cur/                  # inbox: messages another agent has seen
//!   .2008.10.03/          # dated folder (Maildir++ subfolder)
//!     maildirfolder
//!     tmp/ new/ cur/
//!   .failed/              # inbox messages that could not be admitted
//! ```
//!
//! Any Maildir delivery agent can drop messages into the inbox. A key is a
//! file name with any `:2,FLAGS` info suffix stripped.

use std::fs;
use std::path::{Path, PathBuf};
use std::process;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use log::debug;

use super::blob::{BlobKey, BlobStore, Folder};
use crate::error::{MailinError, Result};
use crate::models::FolderName;

const SUBDIRS: [&str; 3] = ["tmp", "new", "cur"];

/// Maildir++ subfolder holding messages a drain gave up on
const FAILED_DIR: &str = ".failed";

/// Delivery sequence shared by every store in this process
static DELIVERY_SEQ: AtomicU64 = AtomicU64::new(0);

/// Blob storage on a Maildir tree
pub struct MaildirBlobStore {
    root: PathBuf,
}

impl MaildirBlobStore {
    /// Open (creating if needed) the Maildir at `root`
    pub fn new(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        create_maildir(&root)?;
        create_maildir(&root.join(FAILED_DIR))?;
        mark_subfolder(&root.join(FAILED_DIR))?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn folder_dir(&self, folder: &Folder) -> PathBuf {
        match folder {
            Folder::Inbox => self.root.clone(),
            Folder::Dated(name) => self.root.join(format!(".{}", name)),
            Folder::Failed => self.root.join(FAILED_DIR),
        }
    }

    /// Directory for `folder`, failing if a dated folder is missing
    fn existing_dir(&self, folder: &Folder) -> Result<PathBuf> {
        let dir = self.folder_dir(folder);
        if !dir.join("new").is_dir() {
            return Err(MailinError::not_found(format!("folder {}", folder)));
        }
        Ok(dir)
    }

    /// Generate a key that sorts after every key this process made before
    ///
    /// Seconds and microseconds are zero-padded so lexical order follows
    /// wall-clock order; the sequence breaks ties within one microsecond.
    /// It is process-wide, so two stores opened on the same tree never
    /// hand out the same name.
    fn next_key(&self) -> BlobKey {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        let seq = DELIVERY_SEQ.fetch_add(1, Ordering::Relaxed);
        BlobKey::new(format!(
            "{:010}.M{:06}P{}Q{:06}.mailin",
            now.as_secs(),
            now.subsec_micros(),
            process::id(),
            seq
        ))
    }

    /// Find the file holding `key` in `new/` or `cur/`, with or without
    /// an info suffix
    fn locate(&self, dir: &Path, key: &BlobKey) -> Result<Option<PathBuf>> {
        let prefix = format!("{}:", key.as_str());

        for sub in ["new", "cur"] {
            let sub = dir.join(sub);
            let exact = sub.join(key.as_str());
            if exact.is_file() {
                return Ok(Some(exact));
            }

            for entry in fs::read_dir(&sub)? {
                let entry = entry?;
                if let Some(name) = entry.file_name().to_str()
                    && name.starts_with(&prefix)
                {
                    return Ok(Some(entry.path()));
                }
            }
        }

        Ok(None)
    }
}

fn create_maildir(dir: &Path) -> Result<()> {
    for sub in SUBDIRS {
        fs::create_dir_all(dir.join(sub))?;
    }
    Ok(())
}

/// Write the Maildir++ `maildirfolder` marker; returns false if it was there
fn mark_subfolder(dir: &Path) -> Result<bool> {
    let marker = dir.join("maildirfolder");
    if marker.exists() {
        return Ok(false);
    }
    fs::write(&marker, b"")?;
    Ok(true)
}

/// Strip the `:2,FLAGS` info suffix from a Maildir file name
fn key_from_file_name(name: &str) -> Option<BlobKey> {
    if name.starts_with('.') {
        return None;
    }
    let key = name.split(':').next().unwrap_or(name);
    (!key.is_empty()).then(|| BlobKey::new(key))
}

impl BlobStore for MaildirBlobStore {
    fn list_folders(&self) -> Result<Vec<FolderName>> {
        let mut folders = Vec::new();

        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let file_name = entry.file_name();
            let Some(name) = file_name.to_str().and_then(|n| n.strip_prefix('.')) else {
                continue;
            };
            // Folders other tools created under other names are not ours
            if let Ok(folder) = name.parse::<FolderName>() {
                folders.push(folder);
            }
        }

        folders.sort();
        Ok(folders)
    }

    fn has_folder(&self, folder: &FolderName) -> Result<bool> {
        Ok(self.folder_dir(&Folder::Dated(*folder)).join("new").is_dir())
    }

    fn create_folder(&self, folder: &FolderName) -> Result<()> {
        let dir = self.folder_dir(&Folder::Dated(*folder));
        create_maildir(&dir)?;
        if mark_subfolder(&dir)? {
            debug!("[STORE] Created folder {}", folder);
        }
        Ok(())
    }

    fn add(&self, folder: &Folder, data: &[u8]) -> Result<BlobKey> {
        let dir = self.existing_dir(folder)?;
        let key = self.next_key();

        // Write atomically (write to tmp/, then rename into new/)
        let temp_path = dir.join("tmp").join(key.as_str());
        fs::write(&temp_path, data)?;
        fs::rename(&temp_path, dir.join("new").join(key.as_str()))?;

        Ok(key)
    }

    fn get(&self, folder: &Folder, key: &BlobKey) -> Result<Option<Vec<u8>>> {
        let dir = self.existing_dir(folder)?;
        match self.locate(&dir, key)? {
            Some(path) => Ok(Some(fs::read(path)?)),
            None => Ok(None),
        }
    }

    fn exists(&self, folder: &Folder, key: &BlobKey) -> Result<bool> {
        let dir = self.existing_dir(folder)?;
        Ok(self.locate(&dir, key)?.is_some())
    }

    fn remove(&self, folder: &Folder, key: &BlobKey) -> Result<()> {
        let dir = self.existing_dir(folder)?;
        let path = self
            .locate(&dir, key)?
            .ok_or_else(|| MailinError::not_found(format!("blob {} in {}", key, folder)))?;
        fs::remove_file(path)?;
        Ok(())
    }

    fn list_keys(&self, folder: &Folder) -> Result<Vec<BlobKey>> {
        let dir = self.existing_dir(folder)?;
        let mut keys = Vec::new();

        for sub in ["new", "cur"] {
            for entry in fs::read_dir(dir.join(sub))? {
                let entry = entry?;
                if !entry.file_type()?.is_file() {
                    continue;
                }
                if let Some(key) = entry.file_name().to_str().and_then(key_from_file_name) {
                    keys.push(key);
                }
            }
        }

        keys.sort();
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn create_test_store() -> (MaildirBlobStore, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let store = MaildirBlobStore::new(dir.path().join("Maildir")).unwrap();
        (store, dir)
    }

    fn folder(y: i32, m: u32, d: u32) -> FolderName {
        FolderName::from_ymd(y, m, d).unwrap()
    }

    #[test]
    fn test_new_creates_layout() {
        let (store, _dir) = create_test_store();
        for sub in SUBDIRS {
            assert!(store.root().join(sub).is_dir());
        }
    }

    #[test]
    fn test_add_get_inbox() {
        let (store, _dir) = create_test_store();

        let key = store.add(&Folder::Inbox, b"Hello, world!").unwrap();
        let retrieved = store.get(&Folder::Inbox, &key).unwrap().unwrap();

        assert_eq!(retrieved, b"Hello, world!");
        assert!(store.root().join("new").join(key.as_str()).is_file());
        assert_eq!(fs::read_dir(store.root().join("tmp")).unwrap().count(), 0);
    }

    #[test]
    fn test_get_nonexistent_key() {
        let (store, _dir) = create_test_store();
        let result = store.get(&Folder::Inbox, &BlobKey::new("nope")).unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn test_keys_sort_in_add_order() {
        let (store, _dir) = create_test_store();

        let added: Vec<BlobKey> = (0..20)
            .map(|i| store.add(&Folder::Inbox, format!("m{i}").as_bytes()).unwrap())
            .collect();

        assert_eq!(store.list_keys(&Folder::Inbox).unwrap(), added);
    }

    #[test]
    fn test_dated_folder_must_exist() {
        let (store, _dir) = create_test_store();
        let dated = Folder::Dated(folder(2008, 10, 3));

        assert!(!store.has_folder(&folder(2008, 10, 3)).unwrap());
        assert!(store.add(&dated, b"x").unwrap_err().is_not_found());
        assert!(store.list_keys(&dated).unwrap_err().is_not_found());

        store.create_folder(&folder(2008, 10, 3)).unwrap();
        assert!(store.has_folder(&folder(2008, 10, 3)).unwrap());
        assert!(store.root().join(".2008.10.03").join("maildirfolder").is_file());

        let key = store.add(&dated, b"x").unwrap();
        assert_eq!(store.list_keys(&dated).unwrap(), vec![key]);
        // Dated blobs never leak into the inbox listing
        assert!(store.list_keys(&Folder::Inbox).unwrap().is_empty());
    }

    #[test]
    fn test_list_folders_ignores_foreign_dirs() {
        let (store, _dir) = create_test_store();
        store.create_folder(&folder(2009, 1, 2)).unwrap();
        store.create_folder(&folder(2008, 10, 3)).unwrap();
        fs::create_dir_all(store.root().join(".Trash")).unwrap();

        assert_eq!(
            store.list_folders().unwrap(),
            vec![folder(2008, 10, 3), folder(2009, 1, 2)]
        );
    }

    #[test]
    fn test_remove() {
        let (store, _dir) = create_test_store();
        let key = store.add(&Folder::Inbox, b"data").unwrap();

        assert!(store.exists(&Folder::Inbox, &key).unwrap());
        store.remove(&Folder::Inbox, &key).unwrap();
        assert!(!store.exists(&Folder::Inbox, &key).unwrap());

        assert!(store.remove(&Folder::Inbox, &key).unwrap_err().is_not_found());
    }

    #[test]
    fn test_external_delivery_in_cur_with_flags() {
        let (store, _dir) = create_test_store();
        fs::write(
            store.root().join("cur").join("1222999999.V801I2M3.host:2,S"),
            b"seen elsewhere",
        )
        .unwrap();

        let key = BlobKey::new("1222999999.V801I2M3.host");
        assert_eq!(store.list_keys(&Folder::Inbox).unwrap(), vec![key.clone()]);
        assert_eq!(
            store.get(&Folder::Inbox, &key).unwrap().unwrap(),
            b"seen elsewhere"
        );
        store.remove(&Folder::Inbox, &key).unwrap();
        assert!(store.list_keys(&Folder::Inbox).unwrap().is_empty());
    }

    #[test]
    fn test_folder_deleted_externally() {
        let (store, _dir) = create_test_store();
        let name = folder(2008, 10, 3);
        store.create_folder(&name).unwrap();
        let key = store.add(&Folder::Dated(name), b"data").unwrap();

        fs::remove_dir_all(store.root().join(".2008.10.03")).unwrap();

        assert!(store.get(&Folder::Dated(name), &key).unwrap_err().is_not_found());
    }

    #[test]
    fn test_flagged_file_in_new_is_found() {
        let (store, _dir) = create_test_store();
        fs::write(store.root().join("new").join("1222999999.V801I2M4.host:2,"), b"odd agent").unwrap();

        let key = BlobKey::new("1222999999.V801I2M4.host");
        assert_eq!(store.list_keys(&Folder::Inbox).unwrap(), vec![key.clone()]);
        assert_eq!(store.get(&Folder::Inbox, &key).unwrap().unwrap(), b"odd agent");

        store.remove(&Folder::Inbox, &key).unwrap();
        assert!(store.list_keys(&Folder::Inbox).unwrap().is_empty());
    }

    #[test]
    fn test_two_stores_on_one_tree_never_share_a_key() {
        let dir = tempdir().unwrap();
        let root = dir.path().join("Maildir");
        let first = MaildirBlobStore::new(&root).unwrap();
        let second = MaildirBlobStore::new(&root).unwrap();

        for i in 0..200 {
            first.add(&Folder::Inbox, format!("first {i}").as_bytes()).unwrap();
            second.add(&Folder::Inbox, format!("second {i}").as_bytes()).unwrap();
        }

        let keys = first.list_keys(&Folder::Inbox).unwrap();
        assert_eq!(keys.len(), 400);
        let mut unique = keys.clone();
        unique.dedup();
        assert_eq!(unique.len(), 400);
    }

    #[test]
    fn test_failed_folder_is_reserved() {
        let (store, _dir) = create_test_store();
        assert!(store.root().join(".failed").join("maildirfolder").is_file());

        let key = store.add(&Folder::Failed, b"unparseable").unwrap();
        assert_eq!(store.list_keys(&Folder::Failed).unwrap(), vec![key]);

        // Not a dated folder and not part of the inbox
        assert!(store.list_folders().unwrap().is_empty());
        assert!(store.list_keys(&Folder::Inbox).unwrap().is_empty());
    }
}
