//! Cold-storage archive bundles.
//!
//! An archive is a CBOR file holding a contiguous run of log records as their
//! exact wire bytes, with ids, positions and summary metadata. Exporting never
//! touches the primary log: archives are copies.
//!
//! Bundles carry the digest of the record before their first entry, so the
//! chain inside a bundle can be re-verified on its own.

use std::fs;
use std::path::{Path, PathBuf};

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tracing::info;

use bookchat_core::{Blake3Hash, MessageRecord, RecordId, Timestamp};

use crate::error::{Result, StoreError};
use crate::traits::LogStore;

/// Bundle format version.
pub const ARCHIVE_VERSION: u32 = 1;

const EXTENSION: &str = "cbor";

/// Span of creation times covered by a bundle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub start: Timestamp,
    pub end: Timestamp,
}

/// Summary stored at the head of a bundle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveMetadata {
    pub version: u32,
    pub created_at: Timestamp,
    pub message_count: u64,
    pub first_position: u64,
    pub last_position: u64,
    pub date_range: DateRange,
    /// Digest of the record at `first_position - 1`, if there is one.
    pub anchor: Option<Blake3Hash>,
}

/// One archived record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveEntry {
    pub id: RecordId,
    pub position: u64,
    pub wire: Bytes,
}

/// A decoded archive file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveBundle {
    pub metadata: ArchiveMetadata,
    pub entries: Vec<ArchiveEntry>,
}

impl ArchiveBundle {
    /// Bundle a contiguous, non-empty run of records.
    pub fn from_records(records: &[MessageRecord], anchor: Option<Blake3Hash>) -> Option<Self> {
        let first = records.first()?;
        let last = records.last()?;

        let entries = records
            .iter()
            .map(|r| ArchiveEntry {
                id: r.id.clone(),
                position: r.position,
                wire: Bytes::from(r.wire_bytes()),
            })
            .collect();

        Some(Self {
            metadata: ArchiveMetadata {
                version: ARCHIVE_VERSION,
                created_at: Timestamp::now(),
                message_count: records.len() as u64,
                first_position: first.position,
                last_position: last.position,
                date_range: DateRange {
                    start: *first.created_at(),
                    end: *last.created_at(),
                },
                anchor,
            },
            entries,
        })
    }

    /// Decode the archived records.
    pub fn records(&self) -> Result<Vec<MessageRecord>> {
        self.entries
            .iter()
            .map(|e| {
                MessageRecord::from_wire(e.id.clone(), e.position, &e.wire)
                    .map_err(|err| StoreError::InvalidData(format!("archived {}: {}", e.id, err)))
            })
            .collect()
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        ciborium::into_writer(self, &mut buf)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        Ok(buf)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let bundle: Self =
            ciborium::from_reader(bytes).map_err(|e| StoreError::Serialization(e.to_string()))?;
        if bundle.metadata.version != ARCHIVE_VERSION {
            return Err(StoreError::InvalidData(format!(
                "unsupported archive version {}",
                bundle.metadata.version
            )));
        }
        Ok(bundle)
    }
}

/// Writes and reads archive bundles in a directory.
#[derive(Debug, Clone)]
pub struct Archiver {
    dir: PathBuf,
    page_size: usize,
}

impl Archiver {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            page_size: 256,
        }
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Export every record created before `before` that no earlier bundle in
    /// this directory covers. Returns the new bundle's path, or `None` when
    /// there was nothing to export.
    pub async fn export_before<S: LogStore + ?Sized>(
        &self,
        store: &S,
        before: &Timestamp,
    ) -> Result<Option<PathBuf>> {
        let listing = self.clone();
        let after = blocking(move || listing.list())
            .await?
            .iter()
            .map(|(_, meta)| meta.last_position)
            .max()
            .unwrap_or(0);

        // created_at never decreases along the log, so the records to export
        // form a prefix of what follows `after`.
        let mut selected = Vec::new();
        let mut cursor = after;
        'scan: loop {
            let page = store.records_after(cursor, self.page_size).await?;
            if page.is_empty() {
                break;
            }
            for record in page {
                if record.created_at() >= before {
                    break 'scan;
                }
                cursor = record.position;
                selected.push(record);
            }
        }

        let anchor = match after {
            0 => None,
            pos => store.get_record_at(pos).await?.map(|r| r.digest()),
        };

        let Some(bundle) = ArchiveBundle::from_records(&selected, anchor) else {
            return Ok(None);
        };

        let name = format!(
            "archive_{:010}_{:010}.{}",
            bundle.metadata.first_position, bundle.metadata.last_position, EXTENSION
        );
        let path = self.dir.join(name);
        let bytes = bundle.to_bytes()?;
        let (dir, target) = (self.dir.clone(), path.clone());
        blocking(move || {
            fs::create_dir_all(&dir)?;
            let tmp = target.with_extension("tmp");
            fs::write(&tmp, bytes)?;
            fs::rename(&tmp, &target)?;
            Ok(())
        })
        .await?;

        info!(
            path = %path.display(),
            count = bundle.metadata.message_count,
            first = bundle.metadata.first_position,
            last = bundle.metadata.last_position,
            "exported archive bundle"
        );
        Ok(Some(path))
    }

    /// Read one bundle.
    pub fn read(path: impl AsRef<Path>) -> Result<ArchiveBundle> {
        ArchiveBundle::from_bytes(&fs::read(path)?)
    }

    /// All bundles in the directory, ordered by first position.
    pub fn list(&self) -> Result<Vec<(PathBuf, ArchiveMetadata)>> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }

        let mut out = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some(EXTENSION) {
                continue;
            }
            let bundle = Self::read(&path)?;
            out.push((path, bundle.metadata));
        }
        out.sort_by_key(|(_, meta)| meta.first_position);
        Ok(out)
    }
}

/// Run filesystem work off the async runtime.
async fn blocking<F, T>(f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| StoreError::Task(e.to_string()))?
}
