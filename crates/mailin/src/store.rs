//! Date-partitioned message store with inbox draining
//!
//! Messages delivered by outside agents land in the inbox. [`MessageStore::drain_inbox`]
//! admits them one at a time into dated folders, records each in the index
//! and optionally hands the identifier to a [`MessageSink`].

use std::path::Path;

use log::{debug, info, warn};

use crate::error::{MailinError, Result};
use crate::models::{FolderName, IndexRecord, MessageId};
use crate::parser::{HeaderParser, MessageParser};
use crate::queue::MessageSink;
use crate::storage::{BlobKey, BlobStore, Folder, MaildirBlobStore, MessageIndex};

/// Maildir directory name inside a store path
pub const MAILDIR_DIR: &str = "Maildir";

/// Index database file name inside a store path
pub const INDEX_DB: &str = "metadata.db";

/// Keyed message repository: blob storage plus an identifier index
pub struct MessageStore {
    blobs: Box<dyn BlobStore>,
    index: MessageIndex,
    parser: Box<dyn MessageParser>,
}

impl MessageStore {
    /// Open the store rooted at `path`: `path/Maildir` plus `path/metadata.db`
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        Self::open_with_index(path, path.join(INDEX_DB))
    }

    /// Open the store rooted at `path`, keeping the index in `index_db`
    pub fn open_with_index(path: impl AsRef<Path>, index_db: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        std::fs::create_dir_all(path)?;

        let blobs = MaildirBlobStore::new(path.join(MAILDIR_DIR))?;
        let index = MessageIndex::open(index_db)?;
        info!("[STORE] Opened message store at {}", path.display());

        Ok(Self::new(Box::new(blobs), index, Box::new(HeaderParser::new())))
    }

    /// Assemble a store from its collaborators
    pub fn new(
        blobs: Box<dyn BlobStore>,
        index: MessageIndex,
        parser: Box<dyn MessageParser>,
    ) -> Self {
        Self {
            blobs,
            index,
            parser,
        }
    }

    /// Fetch a stored message's raw bytes
    pub fn get(&self, message_id: &MessageId) -> Result<Vec<u8>> {
        let record = self
            .index
            .lookup(message_id)?
            .ok_or_else(|| MailinError::not_found(format!("message {}", message_id)))?;

        self.blobs
            .get(&Folder::Dated(record.folder), &record.blob_key)?
            .ok_or_else(|| {
                MailinError::not_found(format!(
                    "blob {} for message {} in {}",
                    record.blob_key, message_id, record.folder
                ))
            })
    }

    /// Store a message under `message_id`
    ///
    /// The folder comes from the message's own `Date` header. The blob write
    /// and the index insert happen inside one index transaction: if the
    /// insert or the commit fails, the blob is removed again, so the store
    /// never ends up with an indexed-but-missing or a silently duplicated
    /// message. An identifier that is already stored fails with `Conflict`
    /// and leaves the existing message untouched.
    pub fn put(&self, message_id: &MessageId, raw: &[u8]) -> Result<IndexRecord> {
        let folder = FolderName::from(self.parser.date(raw)?);
        if !self.blobs.has_folder(&folder)? {
            self.blobs.create_folder(&folder)?;
        }
        let target = Folder::Dated(folder);

        let mut written: Option<BlobKey> = None;
        let result = self.index.with_transaction(|txn| {
            if txn.lookup(message_id)?.is_some() {
                return Err(MailinError::conflict(format!(
                    "message {} already stored",
                    message_id
                )));
            }

            let blob_key = self.blobs.add(&target, raw)?;
            written = Some(blob_key.clone());

            let record = IndexRecord {
                message_id: message_id.clone(),
                folder,
                blob_key,
            };
            txn.insert(&record)?;
            Ok(record)
        });

        match result {
            Ok(record) => {
                debug!("[STORE] Stored {} in {}", message_id, folder);
                Ok(record)
            }
            Err(err) => {
                if let Some(key) = written {
                    warn!(
                        "[STORE] Rolling back blob {} in {} after failed insert of {}: {}",
                        key, folder, message_id, err
                    );
                    if let Err(cleanup) = self.blobs.remove(&target, &key) {
                        warn!("[STORE] Failed to remove blob {}: {}", key, cleanup);
                    }
                }
                Err(err)
            }
        }
    }

    /// Delete a stored message
    ///
    /// The index row goes first; a crash before the blob is removed leaves
    /// an unindexed blob (reported by [`audit`](Self::audit)), never a
    /// dangling index entry.
    pub fn remove(&self, message_id: &MessageId) -> Result<()> {
        let record = self.index.delete(message_id)?;
        self.blobs
            .remove(&Folder::Dated(record.folder), &record.blob_key)?;
        debug!("[STORE] Removed {} from {}", message_id, record.folder);
        Ok(())
    }

    /// Check if a message is stored
    pub fn contains(&self, message_id: &MessageId) -> Result<bool> {
        Ok(self.index.lookup(message_id)?.is_some())
    }

    /// Count stored messages
    pub fn len(&self) -> Result<usize> {
        self.index.count()
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Lazily walk the identifiers of all stored messages
    ///
    /// Each call starts a fresh walk. Order is unspecified.
    pub fn keys(&self) -> impl Iterator<Item = Result<MessageId>> + '_ {
        self.index.keys()
    }

    /// Drop raw message bytes into the inbox, as a delivery agent would
    pub fn deliver(&self, raw: &[u8]) -> Result<BlobKey> {
        self.blobs.add(&Folder::Inbox, raw)
    }

    /// Number of messages waiting in the inbox
    pub fn inbox_len(&self) -> Result<usize> {
        Ok(self.blobs.list_keys(&Folder::Inbox)?.len())
    }

    /// Move inbox messages into the store
    ///
    /// The inbox is listed once, up front; messages delivered afterwards
    /// wait for the next drain. Keys are visited in ascending order, which
    /// is delivery order. Nothing happens until the returned iterator is
    /// advanced, and each step admits exactly one message, so stopping
    /// early leaves the rest of the inbox untouched.
    ///
    /// The first failure is yielded as an `Err` and ends the drain. A
    /// message rejected for its own content is first moved to the failed
    /// folder, so a later drain continues with the messages behind it.
    pub fn drain_inbox<'a>(
        &'a self,
        sink: Option<&'a dyn MessageSink>,
        options: DrainOptions,
    ) -> Result<Drain<'a>> {
        let keys = self.blobs.list_keys(&Folder::Inbox)?;
        info!(
            "[DRAIN] {} inbox messages to drain{}",
            keys.len(),
            if options.dry_run { " (dry run)" } else { "" }
        );

        Ok(Drain {
            store: self,
            sink,
            keys: keys.into_iter(),
            remaining: options.limit.filter(|&n| n > 0),
            dry_run: options.dry_run,
            drained: 0,
            finished: false,
        })
    }

    /// Admit one inbox message
    ///
    /// The message is stored before it leaves the inbox. A message that can
    /// never be admitted (unparseable, or its identifier is already stored)
    /// is moved to the failed folder so the next drain gets past it; other
    /// failures leave it in the inbox. If the inbox removal itself fails the
    /// store entry is taken back out.
    fn admit(&self, key: &BlobKey, sink: Option<&dyn MessageSink>, dry_run: bool) -> Result<MessageId> {
        let raw = self.blobs.get(&Folder::Inbox, key)?.ok_or_else(|| {
            MailinError::not_found(format!("inbox message {}", key))
        })?;

        if dry_run {
            let message_id = self.parser.message_id(&raw)?;
            debug!("[DRAIN] Would admit {} ({})", message_id, key);
            return Ok(message_id);
        }

        let admitted = self
            .parser
            .message_id(&raw)
            .and_then(|message_id| self.put(&message_id, &raw).map(|record| (message_id, record)));
        let (message_id, record) = match admitted {
            Ok(admitted) => admitted,
            Err(err) => {
                if err.is_parse() || err.is_conflict() {
                    self.set_aside(key, &raw, &err);
                }
                return Err(err);
            }
        };

        if let Err(err) = self.blobs.remove(&Folder::Inbox, key) {
            warn!(
                "[DRAIN] Could not remove {} from inbox, undoing admission of {}: {}",
                key, message_id, err
            );
            if let Err(undo) = self.remove(&message_id) {
                warn!("[DRAIN] Failed to undo admission of {}: {}", message_id, undo);
            }
            return Err(err);
        }

        if let Some(sink) = sink {
            sink.push(&message_id)?;
        }

        debug!("[DRAIN] Admitted {} into {}", message_id, record.folder);
        Ok(message_id)
    }

    /// Move a rejected inbox message to the failed folder
    ///
    /// Best effort: if either step fails the message stays in the inbox.
    fn set_aside(&self, key: &BlobKey, raw: &[u8], reason: &MailinError) {
        let failed_key = match self.blobs.add(&Folder::Failed, raw) {
            Ok(failed_key) => failed_key,
            Err(err) => {
                warn!("[DRAIN] Could not set aside {}: {}", key, err);
                return;
            }
        };

        match self.blobs.remove(&Folder::Inbox, key) {
            Ok(()) => warn!(
                "[DRAIN] Moved {} to {} as {}: {}",
                key,
                Folder::Failed,
                failed_key,
                reason
            ),
            Err(err) => {
                warn!("[DRAIN] Could not remove {} from inbox: {}", key, err);
                if let Err(cleanup) = self.blobs.remove(&Folder::Failed, &failed_key) {
                    warn!("[DRAIN] Failed to remove copy {}: {}", failed_key, cleanup);
                }
            }
        }
    }

    /// Number of messages a drain has set aside
    pub fn failed_len(&self) -> Result<usize> {
        Ok(self.blobs.list_keys(&Folder::Failed)?.len())
    }

    /// Cross-check the index against the blob store
    ///
    /// Reports only; nothing is repaired.
    pub fn audit(&self) -> Result<AuditReport> {
        let mut report = AuditReport::default();

        for record in self.index.records() {
            let record = record?;
            let present = match self.blobs.exists(&Folder::Dated(record.folder), &record.blob_key) {
                Ok(present) => present,
                Err(err) if err.is_not_found() => false,
                Err(err) => return Err(err),
            };
            if !present {
                warn!(
                    "[STORE] {} points at missing blob {} in {}",
                    record.message_id, record.blob_key, record.folder
                );
                report.dangling.push(record);
            }
        }

        for folder in self.blobs.list_folders()? {
            for key in self.blobs.list_keys(&Folder::Dated(folder))? {
                if !self.index.has_blob(&folder, &key)? {
                    warn!("[STORE] Blob {} in {} is not indexed", key, folder);
                    report.orphaned.push((folder, key));
                }
            }
        }

        Ok(report)
    }
}

/// Options for [`MessageStore::drain_inbox`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainOptions {
    /// Stop after this many messages; `None` or `Some(0)` means no limit
    pub limit: Option<usize>,
    /// Walk and parse the inbox without changing anything
    pub dry_run: bool,
}

impl DrainOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn limit(mut self, limit: impl Into<Option<usize>>) -> Self {
        self.limit = limit.into();
        self
    }

    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }
}

/// Lazy drain of an inbox snapshot; see [`MessageStore::drain_inbox`]
pub struct Drain<'a> {
    store: &'a MessageStore,
    sink: Option<&'a dyn MessageSink>,
    keys: std::vec::IntoIter<BlobKey>,
    remaining: Option<usize>,
    dry_run: bool,
    drained: usize,
    finished: bool,
}

impl Drain<'_> {
    /// Messages drained so far
    pub fn drained(&self) -> usize {
        self.drained
    }

    fn finish(&mut self) {
        if !self.finished {
            self.finished = true;
            info!("[DRAIN] Drained {} messages", self.drained);
        }
    }
}

impl Iterator for Drain<'_> {
    type Item = Result<MessageId>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished || self.remaining == Some(0) {
            self.finish();
            return None;
        }

        let Some(key) = self.keys.next() else {
            self.finish();
            return None;
        };

        match self.store.admit(&key, self.sink, self.dry_run) {
            Ok(message_id) => {
                self.drained += 1;
                if let Some(remaining) = self.remaining.as_mut() {
                    *remaining -= 1;
                }
                Some(Ok(message_id))
            }
            Err(err) => {
                warn!("[DRAIN] Stopped at inbox message {}: {}", key, err);
                self.finish();
                Some(Err(err))
            }
        }
    }
}

/// Findings of [`MessageStore::audit`]
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct AuditReport {
    /// Index rows whose blob is gone
    pub dangling: Vec<IndexRecord>,
    /// Blobs in dated folders that no index row points at
    pub orphaned: Vec<(FolderName, BlobKey)>,
}

impl AuditReport {
    pub fn is_clean(&self) -> bool {
        self.dangling.is_empty() && self.orphaned.is_empty()
    }
}
