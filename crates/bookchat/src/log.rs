//! The message log: a single-writer, append-only sequence of records.
//!
//! Appends are serialized through the tail lock. Everything an append does
//! (validation, id assignment, the verdict, persistence, the registry update)
//! happens while that lock is held, inside a spawned task, so an append either
//! lands completely or not at all even if the caller stops waiting.
//!
//! Reads never take the tail lock; they go straight to the store.

use std::collections::{HashSet, VecDeque};
use std::fmt;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, info, warn};

use bookchat_core::{
    validate_draft, Blake3Hash, CoreError, Ed25519PublicKey, IdentityError, IdentityRegistry,
    IntegrityChecker, KeyDirectory, MessageRecord, RecordDraft, RecordId, RecordKind,
    RegistryOutcome, Resolution, Timestamp, Username, ValidationError, VerificationResult,
};
use bookchat_store::{InsertResult, LogStore};

use crate::config::KernelConfig;
use crate::error::{KernelError, Result};

// ─────────────────────────────────────────────────────────────────────────────
// Tail
// ─────────────────────────────────────────────────────────────────────────────

/// What the writer needs to know about the end of the log.
#[derive(Debug, Clone, Default)]
pub struct Tail {
    position: u64,
    created_at: Option<Timestamp>,
    digest: Option<Blake3Hash>,
    /// Second of `created_at`, and every id already used in it.
    second: Option<i64>,
    ids: HashSet<RecordId>,
}

impl Tail {
    /// Position of the last record, 0 when the log is empty.
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Creation time of the last record. New records may not be older.
    pub fn created_at(&self) -> Option<&Timestamp> {
        self.created_at.as_ref()
    }

    /// Digest of the last record's wire bytes.
    pub fn digest(&self) -> Option<&Blake3Hash> {
        self.digest.as_ref()
    }

    /// The id a record by `author` created at `created_at` would get.
    pub fn next_id(&self, created_at: &Timestamp, author: &Username) -> RecordId {
        let same_second = self.second == Some(created_at.second());
        let mut collision = 0;
        loop {
            let id = RecordId::derive(created_at, author, collision);
            if !same_second || !self.ids.contains(&id) {
                return id;
            }
            collision += 1;
        }
    }

    fn observe(&mut self, record: &MessageRecord) {
        let second = record.created_at().second();
        if self.second != Some(second) {
            self.second = Some(second);
            self.ids.clear();
        }
        self.ids.insert(record.id.clone());
        self.position = record.position;
        self.created_at = Some(*record.created_at());
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Append results
// ─────────────────────────────────────────────────────────────────────────────

/// A record that made it into the log.
#[derive(Debug, Clone, PartialEq)]
pub struct Appended {
    pub record: MessageRecord,
    /// Verdict as of the moment of append.
    pub verification: VerificationResult,
    /// What the record did to the identity registry.
    pub identity: RegistryOutcome,
}

/// A record together with its verdict, as returned to readers.
#[derive(Debug, Clone, PartialEq)]
pub struct AnnotatedRecord {
    pub record: MessageRecord,
    pub verification: VerificationResult,
    /// Set when the registry refused what this record asked for.
    pub rejection: Option<IdentityError>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Message log
// ─────────────────────────────────────────────────────────────────────────────

/// The append-only log over a store.
pub struct MessageLog<S: LogStore> {
    store: Arc<S>,
    tail: Arc<Mutex<Tail>>,
    registry: Arc<RwLock<IdentityRegistry>>,
    checker: IntegrityChecker,
    strict: bool,
    page_size: usize,
}

impl<S: LogStore + 'static> MessageLog<S> {
    /// Open a log over `store`, rebuilding the tail and the registry from
    /// what it already holds.
    pub async fn open(
        store: Arc<S>,
        directory: Arc<dyn KeyDirectory>,
        config: &KernelConfig,
    ) -> Result<Self> {
        let page_size = config.scan_page_size.max(1);
        let mut tail = Tail::default();
        let mut registry = IdentityRegistry::new(directory);

        let mut scan = LogScan::new(store.clone(), 0, page_size, None);
        let mut last = None;
        while let Some(record) = scan.next().await? {
            registry.apply(&record);
            tail.observe(&record);
            last = Some(record);
        }
        tail.digest = last.as_ref().map(MessageRecord::digest);

        info!(
            records = tail.position,
            strict = config.strict_verification,
            chained = config.chain_integrity,
            "opened message log"
        );

        Ok(Self {
            store,
            tail: Arc::new(Mutex::new(tail)),
            registry: Arc::new(RwLock::new(registry)),
            checker: IntegrityChecker::new(config.chain_integrity),
            strict: config.strict_verification,
            page_size,
        })
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn checker(&self) -> IntegrityChecker {
        self.checker
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// Current tail position.
    pub async fn position(&self) -> u64 {
        self.tail.lock().await.position
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Appending
    // ─────────────────────────────────────────────────────────────────────────

    /// Append a finished draft.
    pub async fn append(&self, draft: RecordDraft) -> Result<Appended> {
        self.append_with(move |_| Ok(draft)).await
    }

    /// Append a draft built while holding the tail, so the builder can see
    /// the current end of the log (e.g. to stay at or after its `created_at`).
    pub async fn append_with<F>(&self, build: F) -> Result<Appended>
    where
        F: FnOnce(&Tail) -> Result<RecordDraft>,
    {
        let tail = self.tail.clone().lock_owned().await;
        let draft = build(&tail)?;

        let commit = Commit {
            store: self.store.clone(),
            registry: self.registry.clone(),
            checker: self.checker,
            strict: self.strict,
        };

        // Once the draft exists the append runs to completion on its own task.
        tokio::spawn(commit.run(tail, draft))
            .await
            .map_err(|e| KernelError::Task(e.to_string()))?
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Reading
    // ─────────────────────────────────────────────────────────────────────────

    pub async fn get(&self, id: &RecordId) -> Result<MessageRecord> {
        self.store
            .get_record(id)
            .await?
            .ok_or_else(|| KernelError::RecordNotFound(id.clone()))
    }

    /// Every record, oldest first, optionally filtered.
    pub fn list(&self, filter: Option<RecordFilter>) -> LogScan<S> {
        LogScan::new(self.store.clone(), 0, self.page_size, filter)
    }

    /// Records strictly after `cursor`, oldest first.
    pub fn since(&self, cursor: u64) -> LogScan<S> {
        LogScan::new(self.store.clone(), cursor, self.page_size, None)
    }

    /// Records after `cursor` with their verdicts.
    pub async fn fetch_since(&self, cursor: u64) -> Result<Vec<AnnotatedRecord>> {
        let mut previous = match cursor {
            0 => None,
            pos => self.store.get_record_at(pos).await?.map(|r| r.digest()),
        };
        let records = self.since(cursor).collect().await?;

        let registry = self.read_registry()?;
        Ok(records
            .into_iter()
            .map(|record| {
                let verification = self.checker.verify_in(&record, &registry, previous.as_ref());
                previous = Some(record.digest());
                AnnotatedRecord {
                    rejection: registry.rejection(record.position).cloned(),
                    verification,
                    record,
                }
            })
            .collect())
    }

    /// Verdict for a single stored record.
    pub async fn verify(&self, record: &MessageRecord) -> Result<VerificationResult> {
        let previous = match record.position.checked_sub(1) {
            Some(pos) if pos > 0 => self.store.get_record_at(pos).await?.map(|r| r.digest()),
            _ => None,
        };
        let registry = self.read_registry()?;
        Ok(self.checker.verify_in(record, &registry, previous.as_ref()))
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Registry
    // ─────────────────────────────────────────────────────────────────────────

    /// Run `f` against the current registry.
    pub fn with_registry<T>(&self, f: impl FnOnce(&IdentityRegistry) -> T) -> Result<T> {
        let registry = self.read_registry()?;
        Ok(f(&registry))
    }

    /// Publish `key` for `username` in the key directory.
    ///
    /// Appends are held off while the entry is stamped with the current tail
    /// position, so the key only counts for records appended after this call.
    /// Publishing the key the name already resolves to is a no-op.
    pub async fn publish_key(&self, username: &Username, key: Ed25519PublicKey) -> Result<()> {
        let tail = self.tail.lock().await;
        let registry = self.read_registry()?;

        match registry.resolve(username) {
            Resolution::Active(bound) | Resolution::Published(bound) if bound == key => Ok(()),
            Resolution::Active(_) | Resolution::Published(_) => {
                Err(IdentityError::UsernameConflict(username.clone()).into())
            }
            Resolution::Migrated { .. } => {
                Err(IdentityError::UsernameAlreadyMigrated(username.clone()).into())
            }
            Resolution::Unbound => {
                registry.directory().publish(username, key, tail.position)?;
                info!(%username, %key, since = tail.position, "published key");
                Ok(())
            }
        }
    }

    /// Throw the registry away and replay it from the log. Appends wait until
    /// the replay is done.
    pub async fn rebuild_registry(&self) -> Result<()> {
        let tail = self.tail.lock().await;
        let directory = self.read_registry()?.directory().clone();

        let mut registry = IdentityRegistry::new(directory);
        let mut scan = self.list(None);
        while let Some(record) = scan.next().await? {
            registry.apply(&record);
        }

        info!(
            through = registry.applied_through(),
            bindings = registry.snapshot().len(),
            "rebuilt identity registry"
        );
        *write_registry(&self.registry)? = registry;
        drop(tail);
        Ok(())
    }

    fn read_registry(&self) -> Result<RwLockReadGuard<'_, IdentityRegistry>> {
        self.registry
            .read()
            .map_err(|e| KernelError::LockPoisoned(e.to_string()))
    }
}

fn write_registry(
    registry: &RwLock<IdentityRegistry>,
) -> Result<RwLockWriteGuard<'_, IdentityRegistry>> {
    registry
        .write()
        .map_err(|e| KernelError::LockPoisoned(e.to_string()))
}

/// The part of an append that runs detached from the caller.
struct Commit<S: LogStore> {
    store: Arc<S>,
    registry: Arc<RwLock<IdentityRegistry>>,
    checker: IntegrityChecker,
    strict: bool,
}

impl<S: LogStore> Commit<S> {
    async fn run(self, mut tail: OwnedMutexGuard<Tail>, draft: RecordDraft) -> Result<Appended> {
        validate_draft(&draft)?;

        if let Some(floor) = tail.created_at() {
            if draft.header.created_at < *floor {
                return Err(ValidationError::Backdated {
                    tail: floor.to_wire(),
                    got: draft.header.created_at.to_wire(),
                }
                .into());
            }
        }

        if let Some(parent) = &draft.header.parent_id {
            if !self.store.has_record(parent).await? {
                return Err(ValidationError::ParentNotFound(parent.clone()).into());
            }
        }

        let position = tail.position + 1;
        let id = tail.next_id(&draft.header.created_at, &draft.header.author);
        let previous_hash = if self.checker.chain_integrity() {
            tail.digest
        } else {
            None
        };
        let record = MessageRecord::seal(draft, id, position, previous_hash);

        let (verification, identity) = {
            let registry = self
                .registry
                .read()
                .map_err(|e| KernelError::LockPoisoned(e.to_string()))?;
            (
                self.checker.verify_in(&record, &registry, tail.digest()),
                registry.evaluate(&record),
            )
        };

        if self.strict {
            if let Err(e) = enforce(&record, verification, &identity) {
                warn!(id = %record.id, author = %record.author(), error = %e, "strict mode rejected record");
                return Err(e);
            }
        }

        let wire = record.wire_bytes();
        match self.store.insert_record(&record, &wire).await? {
            InsertResult::Inserted => {}
            InsertResult::AlreadyExists => {
                return Err(KernelError::Conflict {
                    position,
                    existing: record.id.clone(),
                })
            }
            InsertResult::Conflict { existing } => {
                return Err(KernelError::Conflict { position, existing })
            }
        }

        tail.observe(&record);
        tail.digest = Some(Blake3Hash::hash(&wire));
        write_registry(&self.registry)?.apply(&record);

        debug!(
            id = %record.id,
            position,
            kind = record.kind().as_str(),
            verification = ?verification,
            "appended record"
        );
        if let RegistryOutcome::Rejected(e) = &identity {
            warn!(id = %record.id, error = %e, "appended record flagged by identity registry");
        }

        Ok(Appended {
            record,
            verification,
            identity,
        })
    }
}

/// Strict mode: authenticity failures on `message` and `username_change`
/// records block the append. A refused username change reports the
/// registry's reason, which is more specific than the verdict.
fn enforce(
    record: &MessageRecord,
    verification: VerificationResult,
    identity: &RegistryOutcome,
) -> Result<()> {
    if !record.kind().requires_signature() {
        return Ok(());
    }
    if let (RecordKind::UsernameChange, RegistryOutcome::Rejected(e)) = (record.kind(), identity) {
        return Err(e.clone().into());
    }

    match verification {
        VerificationResult::Verified => {}
        VerificationResult::UnverifiedNoSignature => {
            return Err(ValidationError::MalformedRecord(format!(
                "{} record requires a signature",
                record.kind().as_str()
            ))
            .into())
        }
        VerificationResult::SignatureInvalid(e) => return Err(CoreError::from(e).into()),
        VerificationResult::AuthorUnbound => {
            return Err(IdentityError::AuthorUnbound(record.author().clone()).into())
        }
        VerificationResult::IntegrityViolation => {
            return Err(KernelError::IntegrityViolation {
                position: record.position,
            })
        }
    }

    match identity {
        RegistryOutcome::Rejected(e) => Err(e.clone().into()),
        _ => Ok(()),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Scanning
// ─────────────────────────────────────────────────────────────────────────────

/// Predicate applied to records during a scan.
#[derive(Clone)]
pub struct RecordFilter(Arc<dyn Fn(&MessageRecord) -> bool + Send + Sync>);

impl RecordFilter {
    pub fn new(f: impl Fn(&MessageRecord) -> bool + Send + Sync + 'static) -> Self {
        Self(Arc::new(f))
    }

    pub fn by_author(author: Username) -> Self {
        Self::new(move |r| r.author() == &author)
    }

    pub fn by_kind(kind: RecordKind) -> Self {
        Self::new(move |r| r.kind() == kind)
    }

    pub fn matches(&self, record: &MessageRecord) -> bool {
        (self.0)(record)
    }
}

impl fmt::Debug for RecordFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("RecordFilter(..)")
    }
}

/// A lazy, oldest-first walk over the log.
///
/// The end of the scan is fixed by the first fetch: records appended after
/// that are not yielded. [`LogScan::restart`] starts over and picks up a new
/// end.
pub struct LogScan<S: LogStore> {
    store: Arc<S>,
    start: u64,
    cursor: u64,
    end: Option<u64>,
    page_size: usize,
    buffer: VecDeque<MessageRecord>,
    filter: Option<RecordFilter>,
}

impl<S: LogStore> LogScan<S> {
    pub fn new(store: Arc<S>, after: u64, page_size: usize, filter: Option<RecordFilter>) -> Self {
        Self {
            store,
            start: after,
            cursor: after,
            end: None,
            page_size: page_size.max(1),
            buffer: VecDeque::new(),
            filter,
        }
    }

    /// Position of the last record fetched from the store.
    pub fn cursor(&self) -> u64 {
        self.cursor
    }

    pub async fn next(&mut self) -> Result<Option<MessageRecord>> {
        loop {
            if let Some(record) = self.buffer.pop_front() {
                match &self.filter {
                    Some(filter) if !filter.matches(&record) => continue,
                    _ => return Ok(Some(record)),
                }
            }

            let end = match self.end {
                Some(end) => end,
                None => {
                    let end = self.store.len().await?;
                    self.end = Some(end);
                    end
                }
            };
            if self.cursor >= end {
                return Ok(None);
            }

            let remaining = usize::try_from(end - self.cursor).unwrap_or(usize::MAX);
            let page = self
                .store
                .records_after(self.cursor, self.page_size.min(remaining))
                .await?;
            let Some(last) = page.last() else {
                self.cursor = end;
                return Ok(None);
            };
            self.cursor = last.position;
            self.buffer.extend(page);
        }
    }

    /// Start again from the original cursor.
    pub fn restart(&mut self) {
        self.cursor = self.start;
        self.end = None;
        self.buffer.clear();
    }

    /// Drain the rest of the scan.
    pub async fn collect(mut self) -> Result<Vec<MessageRecord>> {
        let mut out = Vec::new();
        while let Some(record) = self.next().await? {
            out.push(record);
        }
        Ok(out)
    }
}
