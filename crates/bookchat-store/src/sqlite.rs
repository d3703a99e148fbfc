//! SQLite implementation of the LogStore trait.
//!
//! The primary storage backend. Uses rusqlite with bundled SQLite; every
//! operation runs on the blocking pool via `tokio::task::spawn_blocking`.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};

use bookchat_core::{MessageRecord, RecordId};

use crate::error::{Result, StoreError};
use crate::migration::{self, now_micros};
use crate::traits::{InsertResult, LogStore};

/// SQLite-based store implementation.
///
/// Thread-safe via internal Mutex.
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
    path: Option<PathBuf>,
}

impl SqliteStore {
    /// Open a SQLite database at the given path.
    ///
    /// Creates the file and runs migrations if it doesn't exist.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut conn = Connection::open(path)?;
        conn.pragma_update(None, "synchronous", "FULL")?;
        migration::migrate(&mut conn)?;
        tracing::info!(path = %path.display(), "opened sqlite log store");
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            path: Some(path.to_path_buf()),
        })
    }

    /// Open an in-memory SQLite database.
    pub fn open_memory() -> Result<Self> {
        let mut conn = Connection::open_in_memory()?;
        migration::migrate(&mut conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            path: None,
        })
    }

    /// The database file, if on disk.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Run `f` against the connection on the blocking pool.
    async fn blocking<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = conn
                .lock()
                .map_err(|e| StoreError::LockPoisoned(format!("connection mutex: {}", e)))?;
            f(&mut conn)
        })
        .await
        .map_err(|e| StoreError::Task(e.to_string()))?
    }
}

fn to_sql_position(position: u64) -> Result<i64> {
    i64::try_from(position)
        .map_err(|_| StoreError::InvalidData(format!("position {} out of range", position)))
}

/// Raw columns of a stored record.
struct StoredRow {
    record_id: String,
    position: i64,
    wire: Vec<u8>,
}

impl StoredRow {
    fn from_sql(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            record_id: row.get("record_id")?,
            position: row.get("position")?,
            wire: row.get("wire")?,
        })
    }

    fn decode(self) -> Result<MessageRecord> {
        let id = RecordId::parse(self.record_id)
            .map_err(|e| StoreError::InvalidData(e.to_string()))?;
        let position = u64::try_from(self.position)
            .map_err(|_| StoreError::InvalidData(format!("negative position {}", self.position)))?;
        MessageRecord::from_wire(id.clone(), position, &self.wire)
            .map_err(|e| StoreError::InvalidData(format!("record {}: {}", id, e)))
    }
}

const SELECT_COLUMNS: &str = "SELECT record_id, position, wire FROM records";

#[async_trait]
impl LogStore for SqliteStore {
    async fn insert_record(&self, record: &MessageRecord, wire: &[u8]) -> Result<InsertResult> {
        let record = record.clone();
        let wire = wire.to_vec();

        self.blocking(move |conn| {
            let position = to_sql_position(record.position)?;
            let tx = conn.transaction()?;

            // 1. Position taken?
            let at_position: Option<(String, Vec<u8>)> = tx
                .query_row(
                    "SELECT record_id, wire FROM records WHERE position = ?1",
                    params![position],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .optional()?;

            if let Some((existing_id, existing_wire)) = at_position {
                if existing_id == record.id.as_str() && existing_wire == wire {
                    return Ok(InsertResult::AlreadyExists);
                }
                return Ok(InsertResult::Conflict {
                    existing: RecordId::parse(existing_id)
                        .map_err(|e| StoreError::InvalidData(e.to_string()))?,
                });
            }

            // 2. Id taken elsewhere?
            let id_taken: bool = tx
                .query_row(
                    "SELECT 1 FROM records WHERE record_id = ?1",
                    params![record.id.as_str()],
                    |_| Ok(true),
                )
                .optional()?
                .unwrap_or(false);

            if id_taken {
                return Ok(InsertResult::Conflict {
                    existing: record.id.clone(),
                });
            }

            // 3. Must be the next position
            let expected: i64 = tx.query_row(
                "SELECT COALESCE(MAX(position), 0) + 1 FROM records",
                [],
                |row| row.get(0),
            )?;

            if position != expected {
                return Err(StoreError::OutOfOrder {
                    expected: expected as u64,
                    got: record.position,
                });
            }

            tx.execute(
                "INSERT INTO records (
                    position, record_id, author, kind, created_at, parent_id, wire, ingested_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    position,
                    record.id.as_str(),
                    record.author().as_str(),
                    record.kind().as_str(),
                    record.created_at().as_micros(),
                    record.parent_id().map(RecordId::as_str),
                    wire,
                    now_micros(),
                ],
            )?;

            tx.commit()?;
            Ok(InsertResult::Inserted)
        })
        .await
    }

    async fn get_record(&self, id: &RecordId) -> Result<Option<MessageRecord>> {
        let id = id.clone();
        self.blocking(move |conn| {
            conn.query_row(
                &format!("{} WHERE record_id = ?1", SELECT_COLUMNS),
                params![id.as_str()],
                StoredRow::from_sql,
            )
            .optional()?
            .map(StoredRow::decode)
            .transpose()
        })
        .await
    }

    async fn get_record_at(&self, position: u64) -> Result<Option<MessageRecord>> {
        let position = to_sql_position(position)?;
        self.blocking(move |conn| {
            conn.query_row(
                &format!("{} WHERE position = ?1", SELECT_COLUMNS),
                params![position],
                StoredRow::from_sql,
            )
            .optional()?
            .map(StoredRow::decode)
            .transpose()
        })
        .await
    }

    async fn has_record(&self, id: &RecordId) -> Result<bool> {
        let id = id.clone();
        self.blocking(move |conn| {
            let found = conn
                .query_row(
                    "SELECT 1 FROM records WHERE record_id = ?1",
                    params![id.as_str()],
                    |_| Ok(()),
                )
                .optional()?;
            Ok(found.is_some())
        })
        .await
    }

    async fn get_wire_bytes(&self, id: &RecordId) -> Result<Option<Vec<u8>>> {
        let id = id.clone();
        self.blocking(move |conn| {
            Ok(conn
                .query_row(
                    "SELECT wire FROM records WHERE record_id = ?1",
                    params![id.as_str()],
                    |row| row.get(0),
                )
                .optional()?)
        })
        .await
    }

    async fn records_after(&self, after: u64, limit: usize) -> Result<Vec<MessageRecord>> {
        let after = to_sql_position(after)?;
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        self.blocking(move |conn| {
            let mut stmt = conn.prepare_cached(&format!(
                "{} WHERE position > ?1 ORDER BY position LIMIT ?2",
                SELECT_COLUMNS
            ))?;
            let rows = stmt
                .query_map(params![after, limit], StoredRow::from_sql)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            rows.into_iter().map(StoredRow::decode).collect()
        })
        .await
    }

    async fn tail(&self) -> Result<Option<MessageRecord>> {
        self.blocking(|conn| {
            conn.query_row(
                &format!("{} ORDER BY position DESC LIMIT 1", SELECT_COLUMNS),
                [],
                StoredRow::from_sql,
            )
            .optional()?
            .map(StoredRow::decode)
            .transpose()
        })
        .await
    }

    async fn len(&self) -> Result<u64> {
        self.blocking(|conn| {
            let n: i64 = conn.query_row("SELECT COUNT(*) FROM records", [], |row| row.get(0))?;
            Ok(n as u64)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;
    use crate::traits::StoreExt;
    use bookchat_core::{Keypair, RecordDraft, RecordKind, Timestamp, Username};

    fn make_test_record(keypair: &Keypair, position: u64, parent: Option<RecordId>) -> MessageRecord {
        let author = Username::parse("alice").unwrap();
        let ts = Timestamp::from_micros(1_768_392_000_000_000 + position as i64 * 1_000_000).unwrap();
        let mut draft = RecordDraft::new(author.clone(), RecordKind::Message)
            .created_at(ts)
            .content(format!("message {}", position));
        if let Some(parent) = parent {
            draft = draft.parent(parent);
        }
        MessageRecord::seal(draft.sign(keypair), RecordId::derive(&ts, &author, 0), position, None)
    }

    #[tokio::test]
    async fn test_sqlite_store_basic() {
        let store = SqliteStore::open_memory().unwrap();
        let keypair = Keypair::generate();
        let record = make_test_record(&keypair, 1, None);
        let wire = record.wire_bytes();

        let result = store.insert_record(&record, &wire).await.unwrap();
        assert_eq!(result, InsertResult::Inserted);

        assert_eq!(store.get_record(&record.id).await.unwrap(), Some(record.clone()));
        assert_eq!(store.get_record_at(1).await.unwrap(), Some(record.clone()));
        assert_eq!(store.get_wire_bytes(&record.id).await.unwrap(), Some(wire.clone()));
        assert!(store.has_record(&record.id).await.unwrap());
        assert_eq!(store.tail().await.unwrap(), Some(record.clone()));

        let again = store.insert_record(&record, &wire).await.unwrap();
        assert_eq!(again, InsertResult::AlreadyExists);
        assert_eq!(store.len().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_sqlite_store_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log.db");
        let keypair = Keypair::from_seed(&[5u8; 32]);
        let first = make_test_record(&keypair, 1, None);
        let second = make_test_record(&keypair, 2, Some(first.id.clone()));

        {
            let store = SqliteStore::open(&path).unwrap();
            store.insert_record(&first, &first.wire_bytes()).await.unwrap();
            store.insert_record(&second, &second.wire_bytes()).await.unwrap();
        }

        let store = SqliteStore::open(&path).unwrap();
        assert_eq!(store.path(), Some(path.as_path()));
        let all = store.load_all(1).await.unwrap();
        assert_eq!(all, vec![first, second]);
    }

    #[tokio::test]
    async fn test_sqlite_matches_memory() {
        let sqlite = SqliteStore::open_memory().unwrap();
        let memory = MemoryStore::new();
        let keypair = Keypair::from_seed(&[6u8; 32]);

        for pos in 1..=5 {
            let record = make_test_record(&keypair, pos, None);
            let wire = record.wire_bytes();
            assert_eq!(
                sqlite.insert_record(&record, &wire).await.unwrap(),
                memory.insert_record(&record, &wire).await.unwrap()
            );
        }

        let gap = make_test_record(&keypair, 9, None);
        assert!(sqlite.insert_record(&gap, &gap.wire_bytes()).await.is_err());
        assert!(memory.insert_record(&gap, &gap.wire_bytes()).await.is_err());

        assert_eq!(
            sqlite.records_after(2, 2).await.unwrap(),
            memory.records_after(2, 2).await.unwrap()
        );
        assert_eq!(sqlite.tail().await.unwrap(), memory.tail().await.unwrap());
    }

    #[tokio::test]
    async fn test_tampered_row_decodes_tampered() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log.db");
        let keypair = Keypair::from_seed(&[5u8; 32]);
        let record = make_test_record(&keypair, 1, None);

        let store = SqliteStore::open(&path).unwrap();
        store.insert_record(&record, &record.wire_bytes()).await.unwrap();

        let tampered: Vec<u8> = String::from_utf8(record.wire_bytes())
            .unwrap()
            .replace("message 1", "message X")
            .into_bytes();
        let conn = Connection::open(&path).unwrap();
        conn.execute(
            "UPDATE records SET wire = ?1 WHERE position = 1",
            params![tampered],
        )
        .unwrap();

        let read = store.get_record_at(1).await.unwrap().unwrap();
        assert_eq!(&read.content[..], b"message X");
        assert_eq!(read.signature, record.signature);
    }
}
