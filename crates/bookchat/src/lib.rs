//! # BookChat
//!
//! The message-authenticity core of BookChat: a signed, append-only message
//! log with username-to-key bindings.
//!
//! ## Overview
//!
//! - **Records**: Immutable. Signed by the author's key. Never edited or deleted.
//! - **Log**: A single ordered sequence; one writer at a time.
//! - **Bindings**: A username is bound to a key by its first verified record,
//!   and can move to a new name with a signed `username_change`.
//! - **Verdicts**: Every record read back carries a verification result.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use bookchat::{Kernel, KernelConfig, Session};
//! use bookchat::core::{KeyStore, Keypair, MemoryKeyDirectory, RecordKind};
//! use bookchat::store::SqliteStore;
//!
//! async fn example() {
//!     let store = SqliteStore::open("bookchat.db").unwrap();
//!     let keystore = KeyStore::with_keypair(Keypair::generate());
//!     let directory = Arc::new(MemoryKeyDirectory::new());
//!
//!     let kernel = Kernel::open(keystore, store, directory, KernelConfig::default())
//!         .await
//!         .unwrap();
//!
//!     let session = Session::parse("alice").unwrap();
//!     kernel.register(&session).await.unwrap();
//!
//!     let submitted = kernel
//!         .submit(&session, "hello", RecordKind::Message, None)
//!         .await
//!         .unwrap();
//!     assert!(submitted.verification.is_verified());
//!
//!     for annotated in kernel.fetch_since(None).await.unwrap() {
//!         println!("{} {:?}", annotated.record.id, annotated.verification);
//!     }
//! }
//! ```
//!
//! ## Modes
//!
//! In permissive mode (the default) records that fail verification are still
//! appended and carry their verdict. In strict mode a `message` or
//! `username_change` that fails verification is refused.

pub mod config;
pub mod error;
pub mod kernel;
pub mod log;
pub mod session;
pub mod verify;

// Re-export component crates
pub use bookchat_core as core;
pub use bookchat_store as store;

pub use config::KernelConfig;
pub use error::{KernelError, Result};
pub use kernel::{Kernel, Submitted};
pub use log::{Appended, AnnotatedRecord, LogScan, MessageLog, RecordFilter, Tail};
pub use session::Session;
pub use verify::{CancelFlag, VerificationReport, VerifiedEntry};

// Re-export commonly used core types
pub use bookchat_core::{
    Ed25519PublicKey, IdentityBinding, Keypair, MessageRecord, RecordId, RecordKind, Username,
    VerificationResult,
};
