//! Whole-log verification.
//!
//! Verdicts depend on who each author was bound to at the time, so the
//! registry is replayed sequentially first. Once every record carries its
//! resolved binding and predecessor digest, the signature checks are
//! independent and run on blocking worker tasks.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info};

use bookchat_core::{
    Blake3Hash, IdentityRegistry, IntegrityChecker, MessageRecord, RecordId, Resolution,
    VerificationResult,
};
use bookchat_store::LogStore;

use crate::error::{KernelError, Result};
use crate::log::MessageLog;

/// Cooperative cancellation for long-running verification.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Verdict for one record in a verification pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VerifiedEntry {
    pub id: RecordId,
    pub position: u64,
    pub verification: VerificationResult,
}

/// Result of verifying the whole log.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct VerificationReport {
    /// One entry per record, in log order.
    pub entries: Vec<VerifiedEntry>,
}

impl VerificationReport {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn verified_count(&self) -> usize {
        self.entries
            .iter()
            .filter(|e| e.verification.is_verified())
            .count()
    }

    /// Entries whose verdict is anything but `Verified`.
    pub fn failures(&self) -> impl Iterator<Item = &VerifiedEntry> {
        self.entries.iter().filter(|e| !e.verification.is_verified())
    }

    pub fn get(&self, position: u64) -> Option<&VerifiedEntry> {
        self.entries.iter().find(|e| e.position == position)
    }
}

/// Everything needed to verify one record without the registry.
struct Job {
    record: MessageRecord,
    author: Resolution,
    previous: Option<Blake3Hash>,
}

impl Job {
    fn run(self, checker: &IntegrityChecker) -> VerifiedEntry {
        let verification = checker.verify(&self.record, &self.author, self.previous.as_ref());
        VerifiedEntry {
            id: self.record.id,
            position: self.record.position,
            verification,
        }
    }
}

/// Verify every record in `log` using up to `workers` parallel tasks.
///
/// Returns [`KernelError::Cancelled`] if `cancel` is raised before the pass
/// finishes. Nothing is written either way.
pub async fn verify_log<S: LogStore + 'static>(
    log: &MessageLog<S>,
    workers: usize,
    cancel: &CancelFlag,
) -> Result<VerificationReport> {
    let checker = log.checker();

    // Phase 1: resolve bindings in log order.
    let mut scan = log.list(None);
    let mut records = Vec::new();
    while let Some(record) = scan.next().await? {
        if cancel.is_cancelled() {
            return Err(KernelError::Cancelled);
        }
        records.push(record);
    }
    let jobs = log.with_registry(|registry| prepare(registry, records))?;
    let total = jobs.len();

    // Phase 2: check signatures in parallel.
    let workers = workers.max(1);
    let chunk_size = total.div_ceil(workers).max(1);
    let mut chunks: Vec<Vec<Job>> = Vec::new();
    let mut jobs = jobs.into_iter().peekable();
    while jobs.peek().is_some() {
        chunks.push(jobs.by_ref().take(chunk_size).collect());
    }

    let handles: Vec<_> = chunks
        .into_iter()
        .map(|chunk| {
            let cancel = cancel.clone();
            tokio::task::spawn_blocking(move || {
                let mut out = Vec::with_capacity(chunk.len());
                for job in chunk {
                    if cancel.is_cancelled() {
                        return None;
                    }
                    out.push(job.run(&checker));
                }
                Some(out)
            })
        })
        .collect();

    let mut entries = Vec::with_capacity(total);
    let mut cancelled = false;
    for handle in handles {
        match handle.await {
            Ok(Some(chunk)) => entries.extend(chunk),
            Ok(None) => cancelled = true,
            Err(e) => return Err(KernelError::Task(e.to_string())),
        }
    }
    if cancelled || cancel.is_cancelled() {
        debug!(total, "log verification cancelled");
        return Err(KernelError::Cancelled);
    }

    let report = VerificationReport { entries };
    info!(
        total,
        verified = report.verified_count(),
        workers,
        "verified log"
    );
    Ok(report)
}

fn prepare(registry: &IdentityRegistry, records: Vec<MessageRecord>) -> Vec<Job> {
    let mut previous = None;
    records
        .into_iter()
        .map(|record| {
            let author = registry.resolve_at(record.author(), record.position);
            let job = Job {
                previous,
                author,
                record,
            };
            previous = Some(job.record.digest());
            job
        })
        .collect()
}
