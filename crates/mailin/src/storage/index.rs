//! Persistent index from message identifiers to blob locations

use std::path::Path;

use log::info;
use rusqlite::{Connection, OptionalExtension, Row, params};
use rusqlite_migration::{M, Migrations};

use super::blob::BlobKey;
use super::sqlite::{Database, PAGE_SIZE, Paged};
use crate::error::{MailinError, Result};
use crate::models::{FolderName, IndexRecord, MessageId};

/// Database migrations
///
/// Each migration is applied in order. The user_version pragma tracks which
/// migrations have been applied.
fn migrations() -> Migrations<'static> {
    Migrations::new(vec![
        // Migration 1: Initial schema
        M::up(
            r#"
            CREATE TABLE messages (
                id INTEGER PRIMARY KEY,
                message_id VARCHAR(1024) NOT NULL UNIQUE,
                year INTEGER NOT NULL,
                month INTEGER NOT NULL,
                day INTEGER NOT NULL,
                blob_key VARCHAR(1024) NOT NULL UNIQUE
            );
            "#,
        ),
    ])
}

/// SQLite-backed message index
///
/// `message_id` and `blob_key` are each unique across the whole table;
/// inserting a duplicate of either fails with `Conflict`.
pub struct MessageIndex {
    db: Database,
}

impl MessageIndex {
    /// Open (creating if needed) the index database at `db_path`
    pub fn open(db_path: impl AsRef<Path>) -> Result<Self> {
        let db = Database::open(db_path, &migrations())?;
        let index = Self { db };
        info!("[STORE] Index holds {} messages", index.count()?);
        Ok(index)
    }

    /// Open a private in-memory index
    pub fn in_memory() -> Result<Self> {
        Ok(Self {
            db: Database::in_memory(&migrations())?,
        })
    }

    /// Run `f` inside one index transaction
    ///
    /// Commits when `f` returns Ok, rolls back otherwise.
    pub(crate) fn with_transaction<T>(
        &self,
        f: impl FnOnce(&IndexTxn<'_>) -> Result<T>,
    ) -> Result<T> {
        self.db.with_transaction(|tx| f(&IndexTxn { conn: tx }))
    }

    /// Find where a message lives
    pub fn lookup(&self, message_id: &MessageId) -> Result<Option<IndexRecord>> {
        self.db.with_conn(|conn| lookup_in(conn, message_id))
    }

    /// Record a message's location
    pub fn insert(&self, record: &IndexRecord) -> Result<()> {
        self.db.with_transaction(|tx| insert_in(tx, record))
    }

    /// Remove a message's row, returning what it pointed at
    pub fn delete(&self, message_id: &MessageId) -> Result<IndexRecord> {
        self.db.with_transaction(|tx| {
            let record = lookup_in(tx, message_id)?
                .ok_or_else(|| MailinError::not_found(format!("message {}", message_id)))?;
            tx.execute(
                "DELETE FROM messages WHERE message_id = ?",
                [message_id.as_str()],
            )?;
            Ok(record)
        })
    }

    /// Check whether any row points at `key` in `folder`
    pub fn has_blob(&self, folder: &FolderName, key: &BlobKey) -> Result<bool> {
        self.db.with_conn(|conn| {
            let found: Option<i64> = conn
                .query_row(
                    "SELECT id FROM messages
                     WHERE blob_key = ? AND year = ? AND month = ? AND day = ?",
                    params![key.as_str(), folder.year(), folder.month(), folder.day()],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(found.is_some())
        })
    }

    /// Count indexed messages
    pub fn count(&self) -> Result<usize> {
        self.db.with_conn(|conn| {
            let count: i64 = conn.query_row("SELECT COUNT(*) FROM messages", [], |row| row.get(0))?;
            Ok(count as usize)
        })
    }

    /// Lazily walk every indexed identifier, in insertion order
    pub fn keys(&self) -> impl Iterator<Item = Result<MessageId>> + '_ {
        self.records().map(|r| r.map(|record| record.message_id))
    }

    /// Lazily walk every record, in insertion order
    pub fn records(&self) -> impl Iterator<Item = Result<IndexRecord>> + '_ {
        Paged::new(move |after| {
            self.db.with_conn(|conn| {
                let mut stmt = conn.prepare_cached(
                    "SELECT id, message_id, year, month, day, blob_key FROM messages
                     WHERE id > ? ORDER BY id LIMIT ?",
                )?;
                let rows = stmt
                    .query_map(params![after, PAGE_SIZE as i64], |row| {
                        Ok((row.get::<_, i64>(0)?, RawRecord::from_row(row, 1)?))
                    })?
                    .collect::<std::result::Result<Vec<_>, _>>()?;

                let records: Vec<(i64, IndexRecord)> = rows
                    .into_iter()
                    .map(|(id, raw)| raw.into_record().map(|record| (id, record)))
                    .collect::<Result<_>>()?;
                Ok(records)
            })
        })
    }
}

/// Index columns as stored, before the date is validated
struct RawRecord {
    message_id: String,
    year: i32,
    month: u32,
    day: u32,
    blob_key: String,
}

impl RawRecord {
    fn from_row(row: &Row<'_>, offset: usize) -> rusqlite::Result<Self> {
        Ok(Self {
            message_id: row.get(offset)?,
            year: row.get(offset + 1)?,
            month: row.get(offset + 2)?,
            day: row.get(offset + 3)?,
            blob_key: row.get(offset + 4)?,
        })
    }

    fn into_record(self) -> Result<IndexRecord> {
        let folder = FolderName::from_ymd(self.year, self.month, self.day).ok_or_else(|| {
            MailinError::corrupt(format!(
                "message {} has impossible date {}-{}-{}",
                self.message_id, self.year, self.month, self.day
            ))
        })?;
        Ok(IndexRecord {
            message_id: MessageId::new(self.message_id),
            folder,
            blob_key: BlobKey::new(self.blob_key),
        })
    }
}

/// Index operations bound to an open transaction
pub(crate) struct IndexTxn<'a> {
    conn: &'a Connection,
}

impl IndexTxn<'_> {
    pub(crate) fn lookup(&self, message_id: &MessageId) -> Result<Option<IndexRecord>> {
        lookup_in(self.conn, message_id)
    }

    pub(crate) fn insert(&self, record: &IndexRecord) -> Result<()> {
        insert_in(self.conn, record)
    }
}

fn lookup_in(conn: &Connection, message_id: &MessageId) -> Result<Option<IndexRecord>> {
    let raw = conn
        .query_row(
            "SELECT message_id, year, month, day, blob_key FROM messages WHERE message_id = ?",
            [message_id.as_str()],
            |row| RawRecord::from_row(row, 0),
        )
        .optional()?;
    raw.map(RawRecord::into_record).transpose()
}

fn insert_in(conn: &Connection, record: &IndexRecord) -> Result<()> {
    conn.execute(
        "INSERT INTO messages (message_id, year, month, day, blob_key) VALUES (?, ?, ?, ?, ?)",
        params![
            record.message_id.as_str(),
            record.folder.year(),
            record.folder.month(),
            record.folder.day(),
            record.blob_key.as_str(),
        ],
    )
    .map_err(|e| MailinError::from_insert(e, format!("record for message {}", record.message_id)))?;
    Ok(())
}
