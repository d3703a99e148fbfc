//! In-memory implementation of the LogStore trait.
//!
//! Same semantics as SQLite, no persistence. Records are kept as wire bytes
//! and decoded on read, exactly like the SQLite backend.

use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;

use bookchat_core::{MessageRecord, RecordId};

use crate::error::{Result, StoreError};
use crate::traits::{InsertResult, LogStore};

/// In-memory store implementation.
///
/// All data is lost when the store is dropped. Thread-safe via RwLock.
pub struct MemoryStore {
    inner: RwLock<MemoryStoreInner>,
}

#[derive(Default)]
struct MemoryStoreInner {
    /// Records in position order; index `i` holds position `i + 1`.
    records: Vec<StoredRecord>,

    /// Id index: record id -> position.
    by_id: HashMap<RecordId, u64>,
}

struct StoredRecord {
    id: RecordId,
    position: u64,
    wire: Vec<u8>,
}

impl StoredRecord {
    fn decode(&self) -> Result<MessageRecord> {
        MessageRecord::from_wire(self.id.clone(), self.position, &self.wire)
            .map_err(|e| StoreError::InvalidData(format!("record {}: {}", self.id, e)))
    }
}

impl MemoryStore {
    /// Create a new empty in-memory store.
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(MemoryStoreInner::default()),
        }
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, MemoryStoreInner>> {
        self.inner
            .read()
            .map_err(|e| StoreError::LockPoisoned(e.to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, MemoryStoreInner>> {
        self.inner
            .write()
            .map_err(|e| StoreError::LockPoisoned(e.to_string()))
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStoreInner {
    fn at(&self, position: u64) -> Option<&StoredRecord> {
        let index = usize::try_from(position.checked_sub(1)?).ok()?;
        self.records.get(index)
    }
}

#[async_trait]
impl LogStore for MemoryStore {
    async fn insert_record(&self, record: &MessageRecord, wire: &[u8]) -> Result<InsertResult> {
        let mut inner = self.write()?;

        // Same record already at this position
        if let Some(existing) = inner.at(record.position) {
            if existing.id == record.id && existing.wire == wire {
                return Ok(InsertResult::AlreadyExists);
            }
            return Ok(InsertResult::Conflict {
                existing: existing.id.clone(),
            });
        }

        // Id reused at another position
        if let Some(&pos) = inner.by_id.get(&record.id) {
            if let Some(existing) = inner.at(pos) {
                return Ok(InsertResult::Conflict {
                    existing: existing.id.clone(),
                });
            }
        }

        let expected = inner.records.len() as u64 + 1;
        if record.position != expected {
            return Err(StoreError::OutOfOrder {
                expected,
                got: record.position,
            });
        }

        inner.by_id.insert(record.id.clone(), record.position);
        inner.records.push(StoredRecord {
            id: record.id.clone(),
            position: record.position,
            wire: wire.to_vec(),
        });

        Ok(InsertResult::Inserted)
    }

    async fn get_record(&self, id: &RecordId) -> Result<Option<MessageRecord>> {
        let inner = self.read()?;
        match inner.by_id.get(id).and_then(|&pos| inner.at(pos)) {
            Some(stored) => stored.decode().map(Some),
            None => Ok(None),
        }
    }

    async fn get_record_at(&self, position: u64) -> Result<Option<MessageRecord>> {
        let inner = self.read()?;
        inner.at(position).map(StoredRecord::decode).transpose()
    }

    async fn has_record(&self, id: &RecordId) -> Result<bool> {
        Ok(self.read()?.by_id.contains_key(id))
    }

    async fn get_wire_bytes(&self, id: &RecordId) -> Result<Option<Vec<u8>>> {
        let inner = self.read()?;
        Ok(inner
            .by_id
            .get(id)
            .and_then(|&pos| inner.at(pos))
            .map(|stored| stored.wire.clone()))
    }

    async fn records_after(&self, after: u64, limit: usize) -> Result<Vec<MessageRecord>> {
        let inner = self.read()?;
        let start = usize::try_from(after).unwrap_or(usize::MAX);
        inner
            .records
            .iter()
            .skip(start)
            .take(limit)
            .map(StoredRecord::decode)
            .collect()
    }

    async fn tail(&self) -> Result<Option<MessageRecord>> {
        let inner = self.read()?;
        inner.records.last().map(StoredRecord::decode).transpose()
    }

    async fn len(&self) -> Result<u64> {
        Ok(self.read()?.records.len() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::StoreExt;
    use bookchat_core::{Keypair, RecordDraft, RecordKind, Timestamp, Username};

    fn make_test_record(keypair: &Keypair, position: u64) -> MessageRecord {
        let author = Username::parse("alice").unwrap();
        let ts = Timestamp::from_micros(1_768_392_000_000_000 + position as i64 * 1_000_000).unwrap();
        let draft = RecordDraft::new(author.clone(), RecordKind::Message)
            .created_at(ts)
            .content(format!("message {}", position))
            .sign(keypair);
        MessageRecord::seal(draft, RecordId::derive(&ts, &author, 0), position, None)
    }

    #[tokio::test]
    async fn test_memory_store_basic() {
        let store = MemoryStore::new();
        let keypair = Keypair::generate();
        let record = make_test_record(&keypair, 1);
        let wire = record.wire_bytes();

        let result = store.insert_record(&record, &wire).await.unwrap();
        assert_eq!(result, InsertResult::Inserted);

        assert_eq!(store.get_record(&record.id).await.unwrap(), Some(record.clone()));
        assert_eq!(store.get_record_at(1).await.unwrap(), Some(record.clone()));
        assert_eq!(store.get_wire_bytes(&record.id).await.unwrap(), Some(wire));
        assert!(store.has_record(&record.id).await.unwrap());
        assert_eq!(store.len().await.unwrap(), 1);
        assert_eq!(store.tail().await.unwrap(), Some(record));
    }

    #[tokio::test]
    async fn test_memory_store_idempotent() {
        let store = MemoryStore::new();
        let keypair = Keypair::generate();
        let record = make_test_record(&keypair, 1);
        let wire = record.wire_bytes();

        let r1 = store.insert_record(&record, &wire).await.unwrap();
        assert_eq!(r1, InsertResult::Inserted);

        let r2 = store.insert_record(&record, &wire).await.unwrap();
        assert_eq!(r2, InsertResult::AlreadyExists);
        assert_eq!(store.len().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_memory_store_conflict() {
        let store = MemoryStore::new();
        let keypair = Keypair::generate();
        let first = make_test_record(&keypair, 1);
        store.insert_record(&first, &first.wire_bytes()).await.unwrap();

        let mut other = make_test_record(&keypair, 2);
        other.position = 1;
        let result = store.insert_record(&other, &other.wire_bytes()).await.unwrap();
        assert_eq!(
            result,
            InsertResult::Conflict {
                existing: first.id.clone()
            }
        );

        let mut reused = make_test_record(&keypair, 2);
        reused.id = first.id.clone();
        let result = store.insert_record(&reused, &reused.wire_bytes()).await.unwrap();
        assert!(matches!(result, InsertResult::Conflict { .. }));
    }

    #[tokio::test]
    async fn test_memory_store_rejects_gaps() {
        let store = MemoryStore::new();
        let record = make_test_record(&Keypair::generate(), 3);
        let err = store
            .insert_record(&record, &record.wire_bytes())
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::OutOfOrder { expected: 1, got: 3 }));
    }

    #[tokio::test]
    async fn test_memory_store_paging() {
        let store = MemoryStore::new();
        let keypair = Keypair::generate();
        for pos in 1..=10 {
            let record = make_test_record(&keypair, pos);
            store.insert_record(&record, &record.wire_bytes()).await.unwrap();
        }

        let page = store.records_after(3, 4).await.unwrap();
        let positions: Vec<u64> = page.iter().map(|r| r.position).collect();
        assert_eq!(positions, vec![4, 5, 6, 7]);

        assert!(store.records_after(10, 5).await.unwrap().is_empty());
        assert_eq!(store.load_all(3).await.unwrap().len(), 10);
        assert!(!store.is_empty().await.unwrap());
    }
}
