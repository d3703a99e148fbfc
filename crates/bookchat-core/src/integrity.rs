//! Per-record authenticity verdicts.

use serde::{Deserialize, Serialize};

use crate::crypto::Blake3Hash;
use crate::error::SignatureError;
use crate::record::{MessageRecord, RecordKind};
use crate::registry::{IdentityRegistry, Resolution};
use crate::signing::SigningEngine;

/// The verdict attached to a record when it is read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "verdict", content = "reason", rename_all = "snake_case")]
pub enum VerificationResult {
    /// Signed by the key bound to the author at that point in the log.
    Verified,
    /// Carries no signature.
    UnverifiedNoSignature,
    /// Carries a signature that does not check out.
    SignatureInvalid(SignatureError),
    /// The author had no usable binding (never registered, or migrated).
    AuthorUnbound,
    /// The chain link does not match the previous record.
    IntegrityViolation,
}

impl VerificationResult {
    pub fn is_verified(&self) -> bool {
        matches!(self, VerificationResult::Verified)
    }
}

/// Produces verdicts for records.
#[derive(Debug, Clone, Copy, Default)]
pub struct IntegrityChecker {
    chain_integrity: bool,
}

impl IntegrityChecker {
    pub fn new(chain_integrity: bool) -> Self {
        Self { chain_integrity }
    }

    pub fn chain_integrity(&self) -> bool {
        self.chain_integrity
    }

    /// Verify `record` given how its author resolved just before it and the
    /// digest of the record before it (`None` for the first record).
    ///
    /// 1. Unsigned system/error records are `UnverifiedNoSignature`.
    /// 2. No key for the author (migrated or unknown) is `AuthorUnbound`.
    /// 3. Otherwise unsigned is `UnverifiedNoSignature`, and a signature
    ///    that fails is `SignatureInvalid`.
    /// 4. With chaining on, a wrong `previous_hash` overrides all of the
    ///    above with `IntegrityViolation`.
    pub fn verify(
        &self,
        record: &MessageRecord,
        author: &Resolution,
        previous_digest: Option<&Blake3Hash>,
    ) -> VerificationResult {
        let verdict = Self::check_signature(record, author);

        if self.chain_integrity && record.previous_hash.as_ref() != previous_digest {
            return VerificationResult::IntegrityViolation;
        }
        verdict
    }

    /// Verify `record` against a registry, resolving its author as of the
    /// record's own position.
    pub fn verify_in(
        &self,
        record: &MessageRecord,
        registry: &IdentityRegistry,
        previous_digest: Option<&Blake3Hash>,
    ) -> VerificationResult {
        let author = registry.resolve_at(record.author(), record.position);
        self.verify(record, &author, previous_digest)
    }

    /// Verify a contiguous run of records, e.g. an archive bundle.
    ///
    /// `anchor` is the digest of the record preceding the first one.
    pub fn verify_run<'a>(
        &self,
        records: impl IntoIterator<Item = &'a MessageRecord>,
        registry: &IdentityRegistry,
        anchor: Option<Blake3Hash>,
    ) -> Vec<VerificationResult> {
        let mut previous = anchor;
        records
            .into_iter()
            .map(|record| {
                let verdict = self.verify_in(record, registry, previous.as_ref());
                previous = Some(record.digest());
                verdict
            })
            .collect()
    }

    fn check_signature(record: &MessageRecord, author: &Resolution) -> VerificationResult {
        let system_kind = matches!(record.kind(), RecordKind::System | RecordKind::Error);
        if system_kind && record.signature.is_none() {
            return VerificationResult::UnverifiedNoSignature;
        }

        let Some(key) = author.key() else {
            return VerificationResult::AuthorUnbound;
        };

        let Some(signature) = &record.signature else {
            return VerificationResult::UnverifiedNoSignature;
        };

        match SigningEngine::verify(&record.signed_message(), signature.as_bytes(), key) {
            Ok(()) => VerificationResult::Verified,
            Err(e) => VerificationResult::SignatureInvalid(e),
        }
    }
}
