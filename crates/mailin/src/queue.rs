//! Durable FIFO of message identifiers awaiting downstream processing

use std::path::Path;
use std::sync::Mutex;

use log::{debug, info};
use rusqlite::{OptionalExtension, params};
use rusqlite_migration::{M, Migrations};

use crate::error::{MailinError, Result};
use crate::models::{MessageId, QueueEntry};
use crate::storage::{Database, PAGE_SIZE, Paged};

/// File name used by [`PendingQueue::open_in_dir`]
pub const PENDING_DB: &str = "pending.db";

/// Anything that accepts identifiers of freshly admitted messages
pub trait MessageSink {
    fn push(&self, message_id: &MessageId) -> Result<()>;
}

/// Collects pushed identifiers in memory
impl MessageSink for Mutex<Vec<MessageId>> {
    fn push(&self, message_id: &MessageId) -> Result<()> {
        self.lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(message_id.clone());
        Ok(())
    }
}

fn migrations() -> Migrations<'static> {
    Migrations::new(vec![
        // Migration 1: Initial schema
        //
        // AUTOINCREMENT keeps sequence numbers strictly increasing even after
        // the newest rows are popped, so an id is never handed out twice.
        M::up(
            r#"
            CREATE TABLE pending (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                message_id VARCHAR(1024) NOT NULL UNIQUE
            );
            "#,
        ),
    ])
}

/// SQLite-backed pending queue
///
/// Entries leave the queue either through [`pop`](Self::pop), oldest first,
/// or through [`remove`](Self::remove). Several handles (threads or
/// processes) may share one database file; each pop is atomic.
pub struct PendingQueue {
    db: Database,
}

impl PendingQueue {
    /// Open (creating if needed) the queue database at `db_path`
    pub fn open(db_path: impl AsRef<Path>) -> Result<Self> {
        let queue = Self {
            db: Database::open(db_path, &migrations())?,
        };
        info!("[QUEUE] {} entries pending", queue.len()?);
        Ok(queue)
    }

    /// Open `pending.db` inside `dir`, creating the directory if needed
    pub fn open_in_dir(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        std::fs::create_dir_all(dir)?;
        Self::open(dir.join(PENDING_DB))
    }

    /// Open a private, non-durable queue
    pub fn in_memory() -> Result<Self> {
        Ok(Self {
            db: Database::in_memory(&migrations())?,
        })
    }

    /// Append to the tail; `Conflict` if the identifier is already queued
    pub fn push(&self, message_id: &MessageId) -> Result<()> {
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO pending (message_id) VALUES (?)",
                [message_id.as_str()],
            )
            .map_err(|e| MailinError::from_insert(e, format!("queued message {}", message_id)))?;
            Ok(())
        })
    }

    /// Atomically remove and return up to `how_many` identifiers from the head
    ///
    /// Returns fewer (possibly none) when the queue runs short. The select
    /// and the delete share one write transaction, so concurrent callers
    /// never see the same entry and no entry is dropped unreturned.
    pub fn pop(&self, how_many: usize) -> Result<Vec<MessageId>> {
        if how_many == 0 {
            return Ok(Vec::new());
        }

        let popped = self.db.with_transaction(|tx| {
            let mut select =
                tx.prepare_cached("SELECT id, message_id FROM pending ORDER BY id LIMIT ?")?;
            let head: Vec<(i64, String)> = select
                .query_map([how_many as i64], |row| Ok((row.get(0)?, row.get(1)?)))?
                .collect::<std::result::Result<_, _>>()?;

            let mut delete = tx.prepare_cached("DELETE FROM pending WHERE id = ?")?;
            for (id, _) in &head {
                delete.execute([id])?;
            }

            Ok(head
                .into_iter()
                .map(|(_, message_id)| MessageId::new(message_id))
                .collect::<Vec<_>>())
        })?;

        if !popped.is_empty() {
            debug!("[QUEUE] Popped {} of {} requested", popped.len(), how_many);
        }
        Ok(popped)
    }

    /// Delete an entry wherever it sits; `NotFound` if absent
    pub fn remove(&self, message_id: &MessageId) -> Result<()> {
        let deleted = self.db.with_conn(|conn| {
            Ok(conn.execute(
                "DELETE FROM pending WHERE message_id = ?",
                [message_id.as_str()],
            )?)
        })?;

        if deleted == 0 {
            return Err(MailinError::not_found(format!("queued message {}", message_id)));
        }
        Ok(())
    }

    /// Number of queued entries
    pub fn len(&self) -> Result<usize> {
        self.db.with_conn(|conn| {
            let count: i64 = conn.query_row("SELECT COUNT(*) FROM pending", [], |row| row.get(0))?;
            Ok(count as usize)
        })
    }

    /// True iff nothing is queued
    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Check whether an identifier is currently queued
    pub fn contains(&self, message_id: &MessageId) -> Result<bool> {
        self.db.with_conn(|conn| {
            let found: Option<i64> = conn
                .query_row(
                    "SELECT id FROM pending WHERE message_id = ?",
                    [message_id.as_str()],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(found.is_some())
        })
    }

    /// Look at up to `how_many` head entries without consuming them
    pub fn peek(&self, how_many: usize) -> Result<Vec<QueueEntry>> {
        self.db.with_conn(|conn| {
            let mut stmt =
                conn.prepare_cached("SELECT id, message_id FROM pending ORDER BY id LIMIT ?")?;
            let entries = stmt
                .query_map([how_many as i64], |row| {
                    Ok(QueueEntry {
                        sequence: row.get(0)?,
                        message_id: MessageId::new(row.get::<_, String>(1)?),
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(entries)
        })
    }

    /// Lazily walk all entries in insertion order without consuming them
    pub fn iter(&self) -> impl Iterator<Item = Result<QueueEntry>> + '_ {
        Paged::new(move |after| {
            self.db.with_conn(|conn| {
                let mut stmt = conn.prepare_cached(
                    "SELECT id, message_id FROM pending WHERE id > ? ORDER BY id LIMIT ?",
                )?;
                let entries = stmt
                    .query_map(params![after, PAGE_SIZE as i64], |row| {
                        let sequence: i64 = row.get(0)?;
                        Ok((
                            sequence,
                            QueueEntry {
                                sequence,
                                message_id: MessageId::new(row.get::<_, String>(1)?),
                            },
                        ))
                    })?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(entries)
            })
        })
    }
}

impl MessageSink for PendingQueue {
    fn push(&self, message_id: &MessageId) -> Result<()> {
        PendingQueue::push(self, message_id)
    }
}
