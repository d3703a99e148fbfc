//! # BookChat Core
//!
//! Pure primitives for BookChat's message-authenticity layer: signed records,
//! the wire codec, the identity registry and per-record verdicts.
//!
//! This crate contains no I/O and no storage. Everything here is computation
//! over records and keys; the `bookchat-store` and `bookchat` crates add
//! persistence and the append discipline.
//!
//! ## Key Types
//!
//! - [`MessageRecord`] - An entry of the append-only log
//! - [`RecordDraft`] - A record before the log places it
//! - [`IdentityRegistry`] - Username to key bindings, derived by replay
//! - [`IntegrityChecker`] - Attaches a [`VerificationResult`] to a record
//! - [`KeyStore`] - Custody of the local private key
//!
//! ## Wire format
//!
//! Records are `Key: value` header lines, a blank line, then raw content.
//! See the [`canonical`] module.

pub mod canonical;
pub mod crypto;
pub mod error;
pub mod integrity;
pub mod keystore;
pub mod record;
pub mod registry;
pub mod signing;
pub mod types;
pub mod validation;

pub use canonical::{decode_record, signed_message, wire_bytes, WireRecord};
pub use crypto::{Blake3Hash, Ed25519PublicKey, Ed25519Signature, Keypair, RawSignature};
pub use error::{CoreError, IdentityError, SignatureError, ValidationError};
pub use integrity::{IntegrityChecker, VerificationResult};
pub use keystore::{KeyDirectory, KeyStore, MemoryKeyDirectory, PublishedKey};
pub use record::{
    MessageRecord, RecordDraft, RecordHeader, RecordKind, UsernameChange, MAX_CONTENT_LEN,
};
pub use registry::{
    BindingStatus, IdentityBinding, IdentityRegistry, RegistryOutcome, Resolution, Transition,
};
pub use signing::{SigningEngine, SIGN_DOMAIN};
pub use types::{RecordId, Timestamp, Username};
pub use validation::validate_draft;
