//! SQLite connection handling shared by the index and the pending queue

use std::collections::VecDeque;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use log::info;
use rusqlite::{Connection, Transaction, TransactionBehavior};
use rusqlite_migration::Migrations;

use crate::error::Result;

/// Rows fetched per round trip by [`Paged`] iterators
pub const PAGE_SIZE: usize = 256;

/// How long a writer waits on another process's lock before giving up
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// An owned SQLite connection with its schema brought up to date
///
/// Each component opens its own `Database`; nothing is shared implicitly.
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open (creating if needed) the database file at `path`
    pub fn open(path: impl AsRef<Path>, migrations: &Migrations<'_>) -> Result<Self> {
        let path = path.as_ref();
        let conn = Connection::open(path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;

        // WAL lets readers proceed while a writer holds the lock, and
        // synchronous = NORMAL is still crash safe under WAL.
        conn.execute_batch(
            r#"
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA temp_store = MEMORY;
            "#,
        )?;

        let db = Self::prepare(conn, migrations)?;
        info!("[STORE] Opened database at {}", path.display());
        Ok(db)
    }

    /// Open a private in-memory database
    pub fn in_memory(migrations: &Migrations<'_>) -> Result<Self> {
        Self::prepare(Connection::open_in_memory()?, migrations)
    }

    fn prepare(mut conn: Connection, migrations: &Migrations<'_>) -> Result<Self> {
        conn.busy_timeout(BUSY_TIMEOUT)?;
        migrations.to_latest(&mut conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        // A panic mid-statement leaves no open transaction behind: the
        // Transaction guard rolls back on unwind.
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Run `f` against the connection outside any explicit transaction
    pub fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let conn = self.lock();
        f(&conn)
    }

    /// Run `f` inside an IMMEDIATE transaction
    ///
    /// The write lock is taken up front, so two processes can never both
    /// read the same rows and then race to change them. The transaction
    /// commits if `f` returns Ok and rolls back on every other exit path,
    /// including unwinding.
    pub fn with_transaction<T>(&self, f: impl FnOnce(&Transaction<'_>) -> Result<T>) -> Result<T> {
        let mut conn = self.lock();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let value = f(&tx)?;
        tx.commit()?;
        Ok(value)
    }
}

/// Lazy keyset-paginated iterator over rows ordered by an integer id
///
/// `fetch(after)` returns up to [`PAGE_SIZE`] `(id, item)` pairs with
/// `id > after`, ascending. No lock is held between pages, so rows inserted
/// behind the cursor are never revisited and rows deleted ahead of it are
/// simply skipped. After an error the iterator is exhausted.
pub struct Paged<T, F> {
    fetch: F,
    cursor: i64,
    buffer: VecDeque<T>,
    exhausted: bool,
}

impl<T, F> Paged<T, F>
where
    F: FnMut(i64) -> Result<Vec<(i64, T)>>,
{
    pub fn new(fetch: F) -> Self {
        Self {
            fetch,
            cursor: 0,
            buffer: VecDeque::new(),
            exhausted: false,
        }
    }
}

impl<T, F> Iterator for Paged<T, F>
where
    F: FnMut(i64) -> Result<Vec<(i64, T)>>,
{
    type Item = Result<T>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.buffer.is_empty() && !self.exhausted {
            match (self.fetch)(self.cursor) {
                Ok(page) => {
                    if page.len() < PAGE_SIZE {
                        self.exhausted = true;
                    }
                    for (id, item) in page {
                        self.cursor = id;
                        self.buffer.push_back(item);
                    }
                }
                Err(e) => {
                    self.exhausted = true;
                    return Some(Err(e));
                }
            }
        }
        self.buffer.pop_front().map(Ok)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::MailinError;
    use rusqlite_migration::M;
    use tempfile::tempdir;

    fn migrations() -> Migrations<'static> {
        Migrations::new(vec![M::up(
            "CREATE TABLE items (id INTEGER PRIMARY KEY, name TEXT NOT NULL UNIQUE);",
        )])
    }

    fn count(db: &Database) -> i64 {
        db.with_conn(|conn| {
            Ok(conn.query_row("SELECT COUNT(*) FROM items", [], |row| row.get(0))?)
        })
        .unwrap()
    }

    #[test]
    fn test_transaction_commits_on_ok() {
        let db = Database::in_memory(&migrations()).unwrap();

        db.with_transaction(|tx| {
            tx.execute("INSERT INTO items (name) VALUES ('a')", [])?;
            Ok(())
        })
        .unwrap();

        assert_eq!(count(&db), 1);
    }

    #[test]
    fn test_transaction_rolls_back_on_err() {
        let db = Database::in_memory(&migrations()).unwrap();

        let result: Result<()> = db.with_transaction(|tx| {
            tx.execute("INSERT INTO items (name) VALUES ('a')", [])?;
            Err(MailinError::conflict("forced"))
        });

        assert!(result.unwrap_err().is_conflict());
        assert_eq!(count(&db), 0);
    }

    #[test]
    fn test_reopen_reuses_schema() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("items.test.sqlite");

        {
            let db = Database::open(&path, &migrations()).unwrap();
            db.with_conn(|conn| {
                conn.execute("INSERT INTO items (name) VALUES ('kept')", [])?;
                Ok(())
            })
            .unwrap();
        }

        let db = Database::open(&path, &migrations()).unwrap();
        assert_eq!(count(&db), 1);
    }

    #[test]
    fn test_paged_walks_every_row_once() {
        let db = Database::in_memory(&migrations()).unwrap();
        let total = PAGE_SIZE * 2 + 7;
        db.with_transaction(|tx| {
            let mut stmt = tx.prepare("INSERT INTO items (name) VALUES (?)")?;
            for i in 0..total {
                stmt.execute([format!("item-{i:04}")])?;
            }
            Ok(())
        })
        .unwrap();

        let names: Vec<String> = Paged::new(|after| {
            db.with_conn(|conn| {
                let mut stmt =
                    conn.prepare("SELECT id, name FROM items WHERE id > ? ORDER BY id LIMIT ?")?;
                let rows: Vec<(i64, String)> = stmt
                    .query_map(rusqlite::params![after, PAGE_SIZE as i64], |row| {
                        Ok((row.get(0)?, row.get(1)?))
                    })?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(rows)
            })
        })
        .collect::<Result<_>>()
        .unwrap();

        assert_eq!(names.len(), total);
        assert_eq!(names[0], "item-0000");
        assert_eq!(names[total - 1], format!("item-{:04}", total - 1));
    }

    #[test]
    fn test_paged_stops_after_error() {
        let mut calls = 0;
        let mut paged = Paged::<String, _>::new(|_| {
            calls += 1;
            Err(MailinError::corrupt("boom"))
        });

        assert!(paged.next().unwrap().is_err());
        assert!(paged.next().is_none());
        drop(paged);
        assert_eq!(calls, 1);
    }
}
