//! Identity registry: which key speaks for which username.
//!
//! The registry is derived state. It is built by replaying the log in append
//! order and can be rebuilt from scratch at any time; two replays of the same
//! log produce equal registries.
//!
//! Each username moves through `Unbound -> Active -> Migrated(to)`:
//!
//! - A name is **unbound** until the first record by it verifies against the
//!   key published for it in the [`KeyDirectory`]. That record binds it.
//!   A key only counts for records appended after it was published.
//! - A valid `username_change` moves an active (or published) name to
//!   **migrated** and binds the new name to the same key.
//! - **Migrated** is terminal. The name can never be bound again.
//!
//! The registry keeps each name's full history, so a record can always be
//! judged against the state immediately before its own position.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::crypto::Ed25519PublicKey;
use crate::error::IdentityError;
use crate::keystore::KeyDirectory;
use crate::record::{MessageRecord, RecordKind};
use crate::signing::SigningEngine;
use crate::types::Username;

/// Status of a bound username.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum BindingStatus {
    Active,
    Migrated { to: Username },
}

/// One state in a username's history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IdentityBinding {
    pub username: Username,
    pub key: Ed25519PublicKey,
    pub status: BindingStatus,
    /// Position of the record that put the name in this state.
    pub since: u64,
}

impl IdentityBinding {
    pub fn is_active(&self) -> bool {
        self.status == BindingStatus::Active
    }
}

/// How a username resolves at some point in the log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// Bound to this key.
    Active(Ed25519PublicKey),
    /// Not yet bound, but a key is published for it.
    Published(Ed25519PublicKey),
    /// Retired in favour of `to`.
    Migrated { to: Username },
    /// Nothing known.
    Unbound,
}

impl Resolution {
    /// The key records by this name must verify against, if any.
    pub fn key(&self) -> Option<&Ed25519PublicKey> {
        match self {
            Resolution::Active(key) | Resolution::Published(key) => Some(key),
            Resolution::Migrated { .. } | Resolution::Unbound => None,
        }
    }
}

/// A state change caused by one record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "transition", rename_all = "snake_case")]
pub enum Transition {
    /// First verified use of a published key.
    Bound {
        username: Username,
        key: Ed25519PublicKey,
    },
    /// `from` retired; `to` now bound to the same key.
    Migrated {
        from: Username,
        to: Username,
        key: Ed25519PublicKey,
    },
}

/// What the registry made of a record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryOutcome {
    /// No effect on identity state.
    Unchanged,
    Applied(Transition),
    /// A `username_change` that failed its checks. The record stays in the
    /// log, flagged with this reason.
    Rejected(IdentityError),
}

impl RegistryOutcome {
    pub fn is_rejected(&self) -> bool {
        matches!(self, RegistryOutcome::Rejected(_))
    }
}

/// The identity registry.
#[derive(Clone)]
pub struct IdentityRegistry {
    histories: BTreeMap<Username, Vec<IdentityBinding>>,
    rejected: BTreeMap<u64, IdentityError>,
    applied_through: u64,
    directory: Arc<dyn KeyDirectory>,
}

impl IdentityRegistry {
    /// An empty registry backed by `directory`.
    pub fn new(directory: Arc<dyn KeyDirectory>) -> Self {
        Self {
            histories: BTreeMap::new(),
            rejected: BTreeMap::new(),
            applied_through: 0,
            directory,
        }
    }

    /// Build a registry by replaying `records` in order.
    pub fn replay<'a>(
        directory: Arc<dyn KeyDirectory>,
        records: impl IntoIterator<Item = &'a MessageRecord>,
    ) -> Self {
        let mut registry = Self::new(directory);
        for record in records {
            registry.apply(record);
        }
        registry
    }

    pub fn directory(&self) -> &Arc<dyn KeyDirectory> {
        &self.directory
    }

    /// Position of the last record applied.
    pub fn applied_through(&self) -> u64 {
        self.applied_through
    }

    /// Resolve `username` as of just before `position`.
    pub fn resolve_at(&self, username: &Username, position: u64) -> Resolution {
        let state = self
            .histories
            .get(username)
            .and_then(|history| history.iter().rev().find(|b| b.since < position));

        match state {
            Some(binding) => match &binding.status {
                BindingStatus::Active => Resolution::Active(binding.key),
                BindingStatus::Migrated { to } => Resolution::Migrated { to: to.clone() },
            },
            None => match self.directory.lookup(username) {
                Some(published) if published.usable_at(position) => {
                    Resolution::Published(published.key)
                }
                _ => Resolution::Unbound,
            },
        }
    }

    /// Resolve `username` against the current state.
    pub fn resolve(&self, username: &Username) -> Resolution {
        self.resolve_at(username, u64::MAX)
    }

    /// The key currently authorized for `username`.
    pub fn public_key(&self, username: &Username) -> Result<Ed25519PublicKey, IdentityError> {
        self.resolve(username)
            .key()
            .copied()
            .ok_or_else(|| IdentityError::NotFound(username.clone()))
    }

    /// Current binding of every name the log has touched.
    pub fn snapshot(&self) -> Vec<IdentityBinding> {
        self.histories
            .values()
            .filter_map(|history| history.last().cloned())
            .collect()
    }

    /// Full history of one name, oldest first.
    pub fn history(&self, username: &Username) -> &[IdentityBinding] {
        self.histories
            .get(username)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Why the record at `position` was rejected, if it was.
    pub fn rejection(&self, position: u64) -> Option<&IdentityError> {
        self.rejected.get(&position)
    }

    pub fn rejections(&self) -> impl Iterator<Item = (u64, &IdentityError)> {
        self.rejected.iter().map(|(p, e)| (*p, e))
    }

    /// Judge `record` against the state before it, without applying it.
    pub fn evaluate(&self, record: &MessageRecord) -> RegistryOutcome {
        match record.kind() {
            RecordKind::Message => self.evaluate_first_use(record),
            RecordKind::UsernameChange => match self.check_change(record) {
                Ok(transition) => RegistryOutcome::Applied(transition),
                Err(e) => RegistryOutcome::Rejected(e),
            },
            RecordKind::System | RecordKind::Error => RegistryOutcome::Unchanged,
        }
    }

    /// Apply `record`. Records must arrive in append order; anything at or
    /// below the last applied position is ignored.
    pub fn apply(&mut self, record: &MessageRecord) -> RegistryOutcome {
        let position = record.position;
        if position <= self.applied_through {
            debug!(position, applied_through = self.applied_through, "skipping already-applied record");
            return RegistryOutcome::Unchanged;
        }

        let outcome = self.evaluate(record);
        match &outcome {
            RegistryOutcome::Unchanged => {}
            RegistryOutcome::Applied(Transition::Bound { username, key }) => {
                info!(%username, %key, position, "username bound");
                self.push(username, *key, BindingStatus::Active, position);
            }
            RegistryOutcome::Applied(Transition::Migrated { from, to, key }) => {
                info!(%from, %to, position, "username migrated");
                self.push(from, *key, BindingStatus::Migrated { to: to.clone() }, position);
                self.push(to, *key, BindingStatus::Active, position);
            }
            RegistryOutcome::Rejected(reason) => {
                warn!(position, %reason, "username change rejected");
                self.rejected.insert(position, reason.clone());
            }
        }
        self.applied_through = position;
        outcome
    }

    fn push(&mut self, username: &Username, key: Ed25519PublicKey, status: BindingStatus, since: u64) {
        self.histories
            .entry(username.clone())
            .or_default()
            .push(IdentityBinding {
                username: username.clone(),
                key,
                status,
                since,
            });
    }

    fn evaluate_first_use(&self, record: &MessageRecord) -> RegistryOutcome {
        let author = record.author();
        let Resolution::Published(key) = self.resolve_at(author, record.position) else {
            return RegistryOutcome::Unchanged;
        };
        let verified = record
            .signature
            .as_ref()
            .map(|sig| SigningEngine::is_valid(&record.signed_message(), sig.as_bytes(), &key))
            .unwrap_or(false);

        if verified {
            RegistryOutcome::Applied(Transition::Bound {
                username: author.clone(),
                key,
            })
        } else {
            RegistryOutcome::Unchanged
        }
    }

    fn check_change(&self, record: &MessageRecord) -> Result<Transition, IdentityError> {
        let position = record.position;

        // 1. Payload must parse and name the author as the old username
        let change = record.username_change()?;
        let old = change.old_username;
        let new = change.new_username;
        if &old != record.author() {
            return Err(IdentityError::MalformedPayload(format!(
                "record by {} cannot rename {}",
                record.author(),
                old
            )));
        }
        if old == new {
            return Err(IdentityError::UsernameConflict(new));
        }

        // 2. Old name must currently have a key
        let key = match self.resolve_at(&old, position) {
            Resolution::Active(key) | Resolution::Published(key) => key,
            Resolution::Migrated { .. } => return Err(IdentityError::UsernameAlreadyMigrated(old)),
            Resolution::Unbound => return Err(IdentityError::AuthorUnbound(old)),
        };

        // 3. Signed by that key
        let sig = record
            .signature
            .as_ref()
            .ok_or_else(|| IdentityError::Unsigned(old.clone()))?;
        SigningEngine::verify(&record.signed_message(), sig.as_bytes(), &key).map_err(|reason| {
            IdentityError::BadSignature {
                username: old.clone(),
                reason,
            }
        })?;

        // 4. New name must be free
        match self.resolve_at(&new, position) {
            Resolution::Active(_) => return Err(IdentityError::UsernameConflict(new)),
            Resolution::Migrated { .. } => return Err(IdentityError::UsernameAlreadyMigrated(new)),
            Resolution::Published(published) if published != key => {
                return Err(IdentityError::UsernameConflict(new))
            }
            Resolution::Published(_) | Resolution::Unbound => {}
        }

        Ok(Transition::Migrated { from: old, to: new, key })
    }
}

impl PartialEq for IdentityRegistry {
    /// Compares derived state only; the directory handle is ignored.
    fn eq(&self, other: &Self) -> bool {
        self.histories == other.histories
            && self.rejected == other.rejected
            && self.applied_through == other.applied_through
    }
}

impl fmt::Debug for IdentityRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IdentityRegistry")
            .field("histories", &self.histories)
            .field("rejected", &self.rejected)
            .field("applied_through", &self.applied_through)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{Keypair, RawSignature};
    use crate::keystore::MemoryKeyDirectory;
    use crate::record::{RecordDraft, UsernameChange};
    use crate::types::RecordId;

    fn name(s: &str) -> Username {
        Username::parse(s).unwrap()
    }

    #[derive(Default)]
    struct Log {
        records: Vec<MessageRecord>,
    }

    impl Log {
        fn new() -> Self {
            Self::default()
        }

        fn push(&mut self, draft: RecordDraft) {
            let position = self.records.len() as u64 + 1;
            let id = RecordId::derive(&draft.header.created_at, &draft.header.author, position as u32);
            self.records.push(MessageRecord::seal(draft, id, position, None));
        }

        fn message(&mut self, author: &str, keypair: &Keypair) {
            let draft = RecordDraft::new(name(author), RecordKind::Message)
                .content("hi")
                .sign(keypair);
            self.push(draft);
        }

        fn rename(&mut self, old: &str, new: &str, keypair: &Keypair) {
            let draft = RecordDraft::username_change(&UsernameChange::new(name(old), name(new)))
                .sign(keypair);
            self.push(draft);
        }
    }

    fn directory(entries: &[(&str, &Keypair)]) -> Arc<dyn KeyDirectory> {
        let dir = MemoryKeyDirectory::new();
        for (n, kp) in entries {
            dir.publish(&name(n), kp.public_key(), 0).unwrap();
        }
        Arc::new(dir)
    }

    #[test]
    fn test_first_verified_message_binds() {
        let alice = Keypair::from_seed(&[1u8; 32]);
        let dir = directory(&[("alice", &alice)]);
        let mut log = Log::new();
        log.message("alice", &alice);

        let registry = IdentityRegistry::replay(dir, &log.records);
        assert_eq!(registry.resolve(&name("alice")), Resolution::Active(alice.public_key()));
        assert_eq!(registry.resolve_at(&name("alice"), 1), Resolution::Published(alice.public_key()));
    }

    #[test]
    fn test_key_published_later_does_not_reach_back() {
        let carol = Keypair::from_seed(&[3u8; 32]);
        let dir = MemoryKeyDirectory::new();
        let mut log = Log::new();
        log.message("carol", &carol);
        dir.publish(&name("carol"), carol.public_key(), 1).unwrap();
        log.message("carol", &carol);

        let registry = IdentityRegistry::replay(Arc::new(dir), &log.records);
        assert_eq!(registry.resolve_at(&name("carol"), 1), Resolution::Unbound);
        assert_eq!(
            registry.resolve_at(&name("carol"), 2),
            Resolution::Published(carol.public_key())
        );
        assert_eq!(registry.history(&name("carol"))[0].since, 2);
    }

    #[test]
    fn test_bad_signature_does_not_bind() {
        let alice = Keypair::from_seed(&[1u8; 32]);
        let mallory = Keypair::from_seed(&[9u8; 32]);
        let dir = directory(&[("alice", &alice)]);
        let mut log = Log::new();
        log.message("alice", &mallory);

        let registry = IdentityRegistry::replay(dir, &log.records);
        assert_eq!(registry.resolve(&name("alice")), Resolution::Published(alice.public_key()));
        assert!(registry.snapshot().is_empty());
    }

    #[test]
    fn test_migration_carries_key() {
        let alice = Keypair::from_seed(&[1u8; 32]);
        let dir = directory(&[("alice", &alice)]);
        let mut log = Log::new();
        log.message("alice", &alice);
        log.rename("alice", "alicia", &alice);

        let registry = IdentityRegistry::replay(dir, &log.records);
        assert_eq!(
            registry.resolve(&name("alice")),
            Resolution::Migrated { to: name("alicia") }
        );
        assert_eq!(registry.resolve(&name("alicia")), Resolution::Active(alice.public_key()));
        assert_eq!(registry.public_key(&name("alicia")).unwrap(), alice.public_key());
        assert_eq!(
            registry.public_key(&name("alice")),
            Err(IdentityError::NotFound(name("alice")))
        );
        assert_eq!(registry.history(&name("alice")).len(), 2);
    }

    #[test]
    fn test_first_valid_change_wins() {
        let alice = Keypair::from_seed(&[1u8; 32]);
        let dir = directory(&[("alice", &alice)]);
        let mut log = Log::new();
        log.message("alice", &alice);
        log.rename("alice", "alicia", &alice);
        log.rename("alice", "alison", &alice);

        let registry = IdentityRegistry::replay(dir, &log.records);
        assert_eq!(
            registry.rejection(3),
            Some(&IdentityError::UsernameAlreadyMigrated(name("alice")))
        );
        assert_eq!(registry.resolve(&name("alison")), Resolution::Unbound);
    }

    #[test]
    fn test_change_into_taken_name_conflicts() {
        let alice = Keypair::from_seed(&[1u8; 32]);
        let bob = Keypair::from_seed(&[2u8; 32]);
        let dir = directory(&[("alice", &alice), ("bob_b", &bob)]);
        let mut log = Log::new();
        log.message("alice", &alice);
        log.message("bob_b", &bob);
        log.rename("alice", "bob_b", &alice);

        let registry = IdentityRegistry::replay(dir, &log.records);
        assert_eq!(
            registry.rejection(3),
            Some(&IdentityError::UsernameConflict(name("bob_b")))
        );
        assert_eq!(registry.resolve(&name("alice")), Resolution::Active(alice.public_key()));
    }

    #[test]
    fn test_change_into_published_name_of_other_key_conflicts() {
        let alice = Keypair::from_seed(&[1u8; 32]);
        let carol = Keypair::from_seed(&[3u8; 32]);
        let dir = directory(&[("alice", &alice), ("carol", &carol)]);
        let mut log = Log::new();
        log.rename("alice", "carol", &alice);

        let registry = IdentityRegistry::replay(dir, &log.records);
        assert_eq!(
            registry.rejection(1),
            Some(&IdentityError::UsernameConflict(name("carol")))
        );
    }

    #[test]
    fn test_retired_name_is_never_reusable() {
        let alice = Keypair::from_seed(&[1u8; 32]);
        let bob = Keypair::from_seed(&[2u8; 32]);
        let dir = directory(&[("alice", &alice), ("bob_b", &bob)]);
        let mut log = Log::new();
        log.rename("alice", "alicia", &alice);
        log.message("bob_b", &bob);
        log.rename("bob_b", "alice", &bob);

        let registry = IdentityRegistry::replay(dir, &log.records);
        assert_eq!(
            registry.rejection(3),
            Some(&IdentityError::UsernameAlreadyMigrated(name("alice")))
        );
    }

    #[test]
    fn test_unsigned_and_forged_changes_rejected() {
        let alice = Keypair::from_seed(&[1u8; 32]);
        let mallory = Keypair::from_seed(&[9u8; 32]);
        let dir = directory(&[("alice", &alice)]);
        let mut log = Log::new();
        log.push(RecordDraft::username_change(&UsernameChange::new(
            name("alice"),
            name("alicia"),
        )));
        log.rename("alice", "alicia", &mallory);
        let truncated = {
            let mut draft = RecordDraft::username_change(&UsernameChange::new(
                name("alice"),
                name("alicia"),
            ));
            draft.signature = Some(RawSignature::new(vec![0u8; 10]));
            draft
        };
        log.push(truncated);

        let registry = IdentityRegistry::replay(dir, &log.records);
        assert_eq!(registry.rejection(1), Some(&IdentityError::Unsigned(name("alice"))));
        assert!(matches!(
            registry.rejection(2),
            Some(IdentityError::BadSignature { reason: crate::error::SignatureError::Mismatch, .. })
        ));
        assert!(matches!(
            registry.rejection(3),
            Some(IdentityError::BadSignature {
                reason: crate::error::SignatureError::Malformed { len: 10 },
                ..
            })
        ));
        assert_eq!(registry.resolve(&name("alice")), Resolution::Published(alice.public_key()));
    }

    #[test]
    fn test_change_from_unknown_name_is_unbound() {
        let ghost = Keypair::from_seed(&[4u8; 32]);
        let mut log = Log::new();
        log.rename("ghost", "phantom", &ghost);

        let registry = IdentityRegistry::replay(directory(&[]), &log.records);
        assert_eq!(registry.rejection(1), Some(&IdentityError::AuthorUnbound(name("ghost"))));
    }

    #[test]
    fn test_change_must_be_authored_by_old_name() {
        let alice = Keypair::from_seed(&[1u8; 32]);
        let dir = directory(&[("alice", &alice), ("bob_b", &alice)]);
        let mut log = Log::new();
        let draft = RecordDraft::new(name("bob_b"), RecordKind::UsernameChange)
            .content(UsernameChange::new(name("alice"), name("alicia")).to_content())
            .sign(&alice);
        log.push(draft);

        let registry = IdentityRegistry::replay(dir, &log.records);
        assert!(matches!(registry.rejection(1), Some(IdentityError::MalformedPayload(_))));
    }

    #[test]
    fn test_replay_is_idempotent() {
        let alice = Keypair::from_seed(&[1u8; 32]);
        let bob = Keypair::from_seed(&[2u8; 32]);
        let dir = directory(&[("alice", &alice), ("bob_b", &bob)]);
        let mut log = Log::new();
        log.message("alice", &alice);
        log.message("bob_b", &bob);
        log.rename("alice", "alicia", &alice);
        log.rename("alice", "alison", &alice);

        let first = IdentityRegistry::replay(dir.clone(), &log.records);
        let second = IdentityRegistry::replay(dir, &log.records);
        assert_eq!(first, second);
        assert_eq!(first.snapshot(), second.snapshot());
    }

    #[test]
    fn test_apply_ignores_replayed_positions() {
        let alice = Keypair::from_seed(&[1u8; 32]);
        let dir = directory(&[("alice", &alice)]);
        let mut log = Log::new();
        log.message("alice", &alice);
        log.rename("alice", "alicia", &alice);

        let mut registry = IdentityRegistry::replay(dir.clone(), &log.records);
        let before = registry.clone();
        for record in &log.records {
            assert_eq!(registry.apply(record), RegistryOutcome::Unchanged);
        }
        assert_eq!(registry, before);
    }
}
