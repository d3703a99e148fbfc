//! The Kernel: the boundary API of the BookChat core.
//!
//! The Kernel ties the key store, the key directory and the message log
//! together. Callers say who is speaking with an explicit [`Session`].

use std::path::PathBuf;
use std::sync::Arc;

use bytes::Bytes;
use tracing::debug;

use bookchat_core::{
    CoreError, Ed25519PublicKey, IdentityBinding, KeyDirectory, KeyStore, RecordDraft, RecordId,
    RecordKind, RegistryOutcome, Timestamp, Transition, Username, UsernameChange,
    VerificationResult,
};
use bookchat_store::{Archiver, LogStore};

use crate::config::KernelConfig;
use crate::error::Result;
use crate::log::{AnnotatedRecord, MessageLog};
use crate::session::Session;
use crate::verify::{self, CancelFlag, VerificationReport};

/// Result of a successful submit.
#[derive(Debug, Clone, PartialEq)]
pub struct Submitted {
    pub id: RecordId,
    pub position: u64,
    pub verification: VerificationResult,
    /// What the record did to the identity registry.
    pub identity: RegistryOutcome,
}

/// The main Kernel struct.
///
/// Provides a unified API for:
/// - Registering the local key under a username
/// - Submitting signed records
/// - Reading the log with verdicts
/// - Username changes
/// - Whole-log verification
pub struct Kernel<S: LogStore> {
    /// The local private key, if any.
    keystore: KeyStore,
    /// The log and its identity registry.
    log: MessageLog<S>,
    /// Configuration.
    config: KernelConfig,
}

impl<S: LogStore + 'static> Kernel<S> {
    /// Open a kernel over `store`, replaying whatever it already holds.
    pub async fn open(
        keystore: KeyStore,
        store: S,
        directory: Arc<dyn KeyDirectory>,
        config: KernelConfig,
    ) -> Result<Self> {
        let log = MessageLog::open(Arc::new(store), directory, &config).await?;
        Ok(Self {
            keystore,
            log,
            config,
        })
    }

    pub fn config(&self) -> &KernelConfig {
        &self.config
    }

    pub fn log(&self) -> &MessageLog<S> {
        &self.log
    }

    pub fn store(&self) -> &S {
        self.log.store()
    }

    /// Public half of the local key.
    pub fn local_public_key(&self) -> Option<Ed25519PublicKey> {
        self.keystore.public_key()
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Identity
    // ─────────────────────────────────────────────────────────────────────────

    /// Publish the local key for the session's username.
    ///
    /// Registering again with the same key is a no-op. The name becomes
    /// active with the first later record that verifies against the key.
    pub async fn register(&self, session: &Session) -> Result<Ed25519PublicKey> {
        let key = self.keystore.public_key().ok_or(CoreError::KeyUnavailable)?;
        self.log.publish_key(session.username(), key).await?;
        Ok(key)
    }

    /// The key currently authorized for `username`.
    pub fn public_key(&self, username: &Username) -> Result<Ed25519PublicKey> {
        Ok(self
            .log
            .with_registry(|r| self.keystore.get_public_key(username, r))??)
    }

    /// Current binding of every name the log has touched.
    pub fn bindings(&self) -> Result<Vec<IdentityBinding>> {
        self.log.with_registry(|r| r.snapshot())
    }

    /// Rebuild the identity registry from the log.
    pub async fn rebuild_registry(&self) -> Result<()> {
        self.log.rebuild_registry().await
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Authoring
    // ─────────────────────────────────────────────────────────────────────────

    /// Append a record authored by the session's user.
    ///
    /// The record is signed when the local key is the one authorized for the
    /// author. Its creation time never goes backwards along the log.
    pub async fn submit(
        &self,
        session: &Session,
        content: impl Into<Bytes>,
        kind: RecordKind,
        parent: Option<RecordId>,
    ) -> Result<Submitted> {
        if self.config.strict_verification && kind.requires_signature() && !self.keystore.has_key()
        {
            return Err(CoreError::KeyUnavailable.into());
        }

        let author = session.username().clone();
        let content = content.into();

        let appended = self
            .log
            .append_with(|tail| {
                let now = Timestamp::now();
                let created_at = match tail.created_at() {
                    Some(floor) if now < *floor => *floor,
                    _ => now,
                };

                let mut draft = RecordDraft::new(author.clone(), kind)
                    .created_at(created_at)
                    .content(content);
                if let Some(parent) = parent {
                    draft = draft.parent(parent);
                }

                let authorized = self
                    .log
                    .with_registry(|r| r.resolve(&author).key().copied())?;
                if let Some(key) = authorized.filter(|k| self.keystore.holds(k)) {
                    let signature = self.keystore.sign(&draft.signed_message())?;
                    draft = draft.signature(signature.into());
                    debug!(%author, %key, "signed record");
                }
                Ok(draft)
            })
            .await?;

        Ok(Submitted {
            id: appended.record.id,
            position: appended.record.position,
            verification: appended.verification,
            identity: appended.identity,
        })
    }

    /// Move the session's user to a new name.
    ///
    /// Submits a `username_change` record; the session follows only if the
    /// registry accepted it. In permissive mode a rejected change is still
    /// appended and the rejection comes back in [`Submitted::identity`].
    pub async fn change_username(
        &self,
        session: &mut Session,
        new_username: Username,
    ) -> Result<Submitted> {
        let change = UsernameChange::new(session.username().clone(), new_username.clone());
        let submitted = self
            .submit(session, change.to_content(), RecordKind::UsernameChange, None)
            .await?;

        if let RegistryOutcome::Applied(Transition::Migrated { .. }) = &submitted.identity {
            session.rename(new_username);
        }
        Ok(submitted)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Reading
    // ─────────────────────────────────────────────────────────────────────────

    /// Records after `cursor` (all records for `None`), oldest first, each
    /// with its verdict.
    pub async fn fetch_since(&self, cursor: Option<u64>) -> Result<Vec<AnnotatedRecord>> {
        self.log.fetch_since(cursor.unwrap_or(0)).await
    }

    /// Verify every record in the log.
    pub async fn verify_log(&self, cancel: &CancelFlag) -> Result<VerificationReport> {
        verify::verify_log(&self.log, self.config.verify_workers, cancel).await
    }

    /// Copy records created before `before` into a new bundle in `archiver`'s
    /// directory. The log itself is not touched.
    pub async fn archive_before(
        &self,
        archiver: &Archiver,
        before: &Timestamp,
    ) -> Result<Option<PathBuf>> {
        Ok(archiver.export_before(self.log.store().as_ref(), before).await?)
    }
}
