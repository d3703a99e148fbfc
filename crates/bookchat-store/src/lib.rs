//! # BookChat Store
//!
//! Storage abstraction for the BookChat log. Provides a trait-based interface
//! for record persistence with SQLite and in-memory implementations, plus
//! cold-storage archive bundles.
//!
//! ## Key Types
//!
//! - [`LogStore`] - The async trait for all storage operations
//! - [`SqliteStore`] - SQLite-based persistent storage
//! - [`MemoryStore`] - In-memory storage
//! - [`Archiver`] - Exports old records to CBOR bundles
//!
//! ## Usage
//!
//! ```rust,no_run
//! use bookchat_store::{LogStore, SqliteStore};
//!
//! async fn example() {
//!     let store = SqliteStore::open("bookchat.db").unwrap();
//!     let count = store.len().await.unwrap();
//!     println!("{} records", count);
//! }
//! ```
//!
//! ## Design Notes
//!
//! - **Wire bytes are the source of truth**: reads decode what is stored
//! - **Idempotent inserts**: Inserting the same record twice returns `AlreadyExists`
//! - **Conflict detection**: A different record at a taken position returns `Conflict`

pub mod archive;
pub mod error;
pub mod memory;
pub mod migration;
pub mod sqlite;
pub mod traits;

pub use archive::{ArchiveBundle, ArchiveEntry, ArchiveMetadata, Archiver, DateRange};
pub use error::{Result, StoreError};
pub use memory::MemoryStore;
pub use sqlite::SqliteStore;
pub use traits::{InsertResult, LogStore, StoreExt};
