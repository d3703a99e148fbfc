//! Test fixtures and helpers.
//!
//! Common setup code for integration tests.

use std::sync::Arc;

use bookchat::{Kernel, KernelConfig, Result, Session};
use bookchat_core::{
    Ed25519PublicKey, KeyDirectory, KeyStore, Keypair, MemoryKeyDirectory, MessageRecord,
    RecordDraft, RecordId, RecordKind, Timestamp, Username, UsernameChange,
};
use bookchat_store::{LogStore, MemoryStore, StoreExt};

/// 2026-01-14T12:00:00Z in microseconds.
pub const BASE_MICROS: i64 = 1_768_392_000_000_000;

/// `BASE_MICROS` plus `offset` microseconds.
pub fn at(offset: i64) -> Timestamp {
    Timestamp::from_micros(BASE_MICROS + offset).expect("fixture timestamp in range")
}

/// A participant with a deterministic keypair.
pub struct TestFixture {
    pub keypair: Keypair,
    pub username: Username,
}

impl TestFixture {
    /// Create a new test fixture with a random keypair.
    pub fn new(username: &str) -> Self {
        Self {
            keypair: Keypair::generate(),
            username: Username::parse(username).expect("fixture username is valid"),
        }
    }

    /// Create with a deterministic keypair from seed.
    pub fn with_seed(username: &str, seed: [u8; 32]) -> Self {
        Self {
            keypair: Keypair::from_seed(&seed),
            username: Username::parse(username).expect("fixture username is valid"),
        }
    }

    pub fn public_key(&self) -> Ed25519PublicKey {
        self.keypair.public_key()
    }

    pub fn session(&self) -> Session {
        Session::new(self.username.clone())
    }

    /// A key store holding this participant's key.
    pub fn keystore(&self) -> KeyStore {
        KeyStore::with_keypair(Keypair::from_seed(&self.keypair.seed()))
    }

    /// Publish this participant's key to `directory`, usable from the first
    /// record on.
    pub fn publish(&self, directory: &dyn KeyDirectory) {
        directory
            .publish(&self.username, self.public_key(), 0)
            .expect("fixture key publishes");
    }

    /// A signed message draft.
    pub fn message(&self, created_at: Timestamp, content: &str) -> RecordDraft {
        RecordDraft::new(self.username.clone(), RecordKind::Message)
            .created_at(created_at)
            .content(content.to_string())
            .sign(&self.keypair)
    }

    /// A signed reply draft.
    pub fn reply(&self, created_at: Timestamp, parent: RecordId, content: &str) -> RecordDraft {
        RecordDraft::new(self.username.clone(), RecordKind::Message)
            .created_at(created_at)
            .parent(parent)
            .content(content.to_string())
            .sign(&self.keypair)
    }

    /// An unsigned message draft.
    pub fn unsigned(&self, created_at: Timestamp, content: &str) -> RecordDraft {
        RecordDraft::new(self.username.clone(), RecordKind::Message)
            .created_at(created_at)
            .content(content.to_string())
    }

    /// A signed username change from `from` to `to`, authored by `from`.
    pub fn rename(&self, created_at: Timestamp, from: &str, to: &str) -> RecordDraft {
        let change = UsernameChange::new(
            Username::parse(from).expect("fixture username is valid"),
            Username::parse(to).expect("fixture username is valid"),
        );
        RecordDraft::username_change(&change)
            .created_at(created_at)
            .sign(&self.keypair)
    }
}

/// Create multiple participants for multi-party tests.
pub fn multi_party_fixtures(names: &[&str]) -> Vec<TestFixture> {
    names
        .iter()
        .enumerate()
        .map(|(i, name)| {
            let mut seed = [0u8; 32];
            seed[0] = i as u8 + 1;
            TestFixture::with_seed(name, seed)
        })
        .collect()
}

/// A kernel over a memory store, with the directory kept at hand.
pub struct KernelFixture {
    pub kernel: Kernel<MemoryStore>,
    pub directory: Arc<MemoryKeyDirectory>,
}

impl KernelFixture {
    /// Open a kernel whose key store holds `owner`'s key.
    pub async fn open(owner: &TestFixture, config: KernelConfig) -> Result<Self> {
        Self::open_with(owner.keystore(), MemoryStore::new(), config).await
    }

    pub async fn open_with(
        keystore: KeyStore,
        store: MemoryStore,
        config: KernelConfig,
    ) -> Result<Self> {
        let directory = Arc::new(MemoryKeyDirectory::new());
        let kernel = Kernel::open(keystore, store, directory.clone(), config).await?;
        Ok(Self { kernel, directory })
    }
}

/// Every record in `store`, oldest first.
pub async fn stored_records<S: LogStore + ?Sized>(store: &S) -> Vec<MessageRecord> {
    store.load_all(256).await.expect("store readable")
}
