//! Key custody and public-key distribution.

use std::collections::HashMap;
use std::sync::RwLock;

use zeroize::Zeroizing;

use crate::crypto::{Ed25519PublicKey, Ed25519Signature, Keypair};
use crate::error::{CoreError, IdentityError};
use crate::registry::IdentityRegistry;
use crate::signing::SigningEngine;
use crate::types::Username;

/// Holds at most one private key: the local identity's.
///
/// The secret never leaves this type. Callers get signatures and the public
/// half only.
#[derive(Debug, Default)]
pub struct KeyStore {
    keypair: Option<Keypair>,
}

impl KeyStore {
    /// A store with no key loaded. Signing fails with `KeyUnavailable`.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn with_keypair(keypair: Keypair) -> Self {
        Self {
            keypair: Some(keypair),
        }
    }

    /// Load a key from an exported seed, replacing any held key.
    pub fn load_seed(&mut self, seed: Zeroizing<[u8; 32]>) {
        self.keypair = Some(Keypair::from_seed(&seed));
    }

    /// Create a fresh key if none is held; returns the public half.
    pub fn ensure_key(&mut self) -> Ed25519PublicKey {
        self.keypair.get_or_insert_with(Keypair::generate).public_key()
    }

    /// Export the held key's seed for persistence by the embedding layer.
    pub fn export_seed(&self) -> Result<Zeroizing<[u8; 32]>, CoreError> {
        self.keypair
            .as_ref()
            .map(Keypair::seed)
            .ok_or(CoreError::KeyUnavailable)
    }

    pub fn has_key(&self) -> bool {
        self.keypair.is_some()
    }

    /// Public half of the held key.
    pub fn public_key(&self) -> Option<Ed25519PublicKey> {
        self.keypair.as_ref().map(Keypair::public_key)
    }

    /// Whether the held key is `key`.
    pub fn holds(&self, key: &Ed25519PublicKey) -> bool {
        self.public_key().as_ref() == Some(key)
    }

    /// Sign `message` with the held key.
    pub fn sign(&self, message: &[u8]) -> Result<Ed25519Signature, CoreError> {
        let keypair = self.keypair.as_ref().ok_or(CoreError::KeyUnavailable)?;
        Ok(SigningEngine::sign(message, keypair))
    }

    /// The key authorized to speak for `username`.
    ///
    /// Registry binding first, then the directory for unbound names.
    /// Migrated names have no key.
    pub fn get_public_key(
        &self,
        username: &Username,
        registry: &IdentityRegistry,
    ) -> Result<Ed25519PublicKey, IdentityError> {
        registry.public_key(username)
    }
}

/// A key as published in a [`KeyDirectory`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PublishedKey {
    pub key: Ed25519PublicKey,
    /// Log position at the time of publishing. Only records after it may
    /// use the key.
    pub since: u64,
}

impl PublishedKey {
    /// Whether a record at `position` may use this key.
    pub fn usable_at(&self, position: u64) -> bool {
        self.since < position
    }
}

/// Write-once map from username to published public key.
///
/// This is the explicit-registration source: a name becomes bound to a key
/// the first time a record by that name verifies against the published key.
/// Entries carry the log position they were published at, so replaying the
/// log gives the same bindings no matter when the replay runs.
pub trait KeyDirectory: Send + Sync {
    /// Publish `key` for `username` as of log position `since`.
    ///
    /// Re-publishing the same key succeeds and keeps the original position;
    /// a different key fails with `UsernameConflict`.
    fn publish(
        &self,
        username: &Username,
        key: Ed25519PublicKey,
        since: u64,
    ) -> Result<(), IdentityError>;

    /// The published key for `username`, if any.
    fn lookup(&self, username: &Username) -> Option<PublishedKey>;
}

/// In-memory [`KeyDirectory`].
#[derive(Debug, Default)]
pub struct MemoryKeyDirectory {
    keys: RwLock<HashMap<Username, PublishedKey>>,
}

impl MemoryKeyDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.keys.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl KeyDirectory for MemoryKeyDirectory {
    fn publish(
        &self,
        username: &Username,
        key: Ed25519PublicKey,
        since: u64,
    ) -> Result<(), IdentityError> {
        let mut keys = self.keys.write().unwrap_or_else(|e| e.into_inner());
        match keys.get(username) {
            Some(existing) if existing.key == key => Ok(()),
            Some(_) => Err(IdentityError::UsernameConflict(username.clone())),
            None => {
                keys.insert(username.clone(), PublishedKey { key, since });
                Ok(())
            }
        }
    }

    fn lookup(&self, username: &Username) -> Option<PublishedKey> {
        self.keys
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(username)
            .copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn name(s: &str) -> Username {
        Username::parse(s).unwrap()
    }

    #[test]
    fn test_empty_store_cannot_sign() {
        let store = KeyStore::empty();
        assert!(matches!(store.sign(b"x"), Err(CoreError::KeyUnavailable)));
        assert!(store.public_key().is_none());
        assert!(store.export_seed().is_err());
    }

    #[test]
    fn test_seed_roundtrip() {
        let mut store = KeyStore::empty();
        let pk = store.ensure_key();
        let seed = store.export_seed().unwrap();

        let mut restored = KeyStore::empty();
        restored.load_seed(seed);
        assert_eq!(restored.public_key(), Some(pk));

        let sig = restored.sign(b"msg").unwrap();
        assert!(SigningEngine::is_valid(b"msg", sig.as_bytes(), &pk));
    }

    #[test]
    fn test_ensure_key_is_stable() {
        let mut store = KeyStore::empty();
        let a = store.ensure_key();
        let b = store.ensure_key();
        assert_eq!(a, b);
        assert!(store.holds(&a));
    }

    #[test]
    fn test_directory_is_write_once() {
        let dir = MemoryKeyDirectory::new();
        let k1 = Keypair::from_seed(&[1u8; 32]).public_key();
        let k2 = Keypair::from_seed(&[2u8; 32]).public_key();

        dir.publish(&name("alice"), k1, 3).unwrap();
        dir.publish(&name("alice"), k1, 7).unwrap();
        assert_eq!(
            dir.publish(&name("alice"), k2, 7),
            Err(IdentityError::UsernameConflict(name("alice")))
        );
        assert_eq!(
            dir.lookup(&name("alice")),
            Some(PublishedKey { key: k1, since: 3 })
        );
        assert_eq!(dir.lookup(&name("bob")), None);
        assert_eq!(dir.len(), 1);
    }

    #[test]
    fn test_published_key_applies_after_its_position() {
        let published = PublishedKey {
            key: Keypair::from_seed(&[1u8; 32]).public_key(),
            since: 2,
        };
        assert!(!published.usable_at(1));
        assert!(!published.usable_at(2));
        assert!(published.usable_at(3));
    }
}
