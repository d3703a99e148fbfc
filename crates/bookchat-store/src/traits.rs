//! Store trait: the abstract interface for log persistence.
//!
//! The log is storage-agnostic. Implementations include SQLite (primary) and
//! in-memory (tests, ephemeral deployments).

use async_trait::async_trait;
use bookchat_core::{MessageRecord, RecordId};

use crate::error::Result;

/// Result of inserting a record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InsertResult {
    /// Record was inserted.
    Inserted,
    /// The identical record is already stored at this position.
    AlreadyExists,
    /// A different record holds this position or id.
    Conflict {
        /// The record already stored there.
        existing: RecordId,
    },
}

/// Async interface for record persistence.
///
/// Records are stored as their exact wire bytes plus log coordinates (id and
/// position). Reads decode from the stored bytes, so whatever is on disk is
/// what verification sees.
///
/// # Design Notes
///
/// - **Append-only**: there is no update or delete.
/// - **Contiguous positions**: an insert must take the next position;
///   anything else is `OutOfOrder`.
/// - **Idempotent inserts**: inserting the same record twice returns
///   `AlreadyExists`.
/// - **Conflict detection**: a different record at a taken position, or
///   reusing a taken id, returns `Conflict`.
/// - **Atomic**: an insert either lands completely or not at all.
#[async_trait]
pub trait LogStore: Send + Sync {
    // ─────────────────────────────────────────────────────────────────────────
    // Record Operations
    // ─────────────────────────────────────────────────────────────────────────

    /// Insert a record.
    ///
    /// # Arguments
    /// - `record`: The sealed record.
    /// - `wire`: Its wire bytes (passed in to avoid re-encoding).
    async fn insert_record(&self, record: &MessageRecord, wire: &[u8]) -> Result<InsertResult>;

    /// Get a record by id.
    async fn get_record(&self, id: &RecordId) -> Result<Option<MessageRecord>>;

    /// Get a record by its 1-based position.
    async fn get_record_at(&self, position: u64) -> Result<Option<MessageRecord>>;

    /// Check if a record exists by id.
    async fn has_record(&self, id: &RecordId) -> Result<bool>;

    /// The stored wire bytes of a record.
    async fn get_wire_bytes(&self, id: &RecordId) -> Result<Option<Vec<u8>>>;

    // ─────────────────────────────────────────────────────────────────────────
    // Scanning
    // ─────────────────────────────────────────────────────────────────────────

    /// Up to `limit` records with position `> after`, oldest first.
    async fn records_after(&self, after: u64, limit: usize) -> Result<Vec<MessageRecord>>;

    /// The last record, if any.
    async fn tail(&self) -> Result<Option<MessageRecord>>;

    /// Number of records; equal to the tail position.
    async fn len(&self) -> Result<u64>;
}

/// Extension trait for common store patterns.
pub trait StoreExt: LogStore {
    /// Read every record, paging `page_size` at a time.
    fn load_all(
        &self,
        page_size: usize,
    ) -> impl std::future::Future<Output = Result<Vec<MessageRecord>>> + Send;

    /// Whether the store holds no records.
    fn is_empty(&self) -> impl std::future::Future<Output = Result<bool>> + Send;
}

impl<S: LogStore + ?Sized> StoreExt for S {
    async fn load_all(&self, page_size: usize) -> Result<Vec<MessageRecord>> {
        let page_size = page_size.max(1);
        let mut out = Vec::new();
        let mut cursor = 0;
        loop {
            let page = self.records_after(cursor, page_size).await?;
            let Some(last) = page.last() else {
                break;
            };
            cursor = last.position;
            let done = page.len() < page_size;
            out.extend(page);
            if done {
                break;
            }
        }
        Ok(out)
    }

    async fn is_empty(&self) -> Result<bool> {
        Ok(self.len().await? == 0)
    }
}
