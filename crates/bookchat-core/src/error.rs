//! Error types for BookChat core.

use thiserror::Error;

use crate::types::{RecordId, Username};

/// Errors from key handling and the wire codec.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("no private key is loaded")]
    KeyUnavailable,

    #[error("invalid public key")]
    InvalidPublicKey,

    #[error("malformed signature: expected 64 bytes, got {len}")]
    MalformedSignature { len: usize },

    #[error("signature does not match")]
    SignatureMismatch,

    #[error("encoding error: {0}")]
    EncodingError(String),

    #[error("decoding error: {0}")]
    DecodingError(String),
}

/// Why a signature failed to verify.
///
/// Kept separate from [`CoreError`] so verdicts can carry it by value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignatureError {
    /// The signature bytes are not a 64-byte Ed25519 signature.
    #[error("malformed signature ({len} bytes)")]
    Malformed { len: usize },

    /// Well-formed, but not produced by the key over this message.
    #[error("signature mismatch")]
    Mismatch,

    /// The key the signature was checked against is not a valid curve point.
    #[error("public key is not a valid ed25519 point")]
    InvalidPublicKey,
}

impl From<SignatureError> for CoreError {
    fn from(e: SignatureError) -> Self {
        match e {
            SignatureError::Malformed { len } => CoreError::MalformedSignature { len },
            SignatureError::Mismatch => CoreError::SignatureMismatch,
            SignatureError::InvalidPublicKey => CoreError::InvalidPublicKey,
        }
    }
}

/// Structural problems with a record. These always block an append.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("malformed record: {0}")]
    MalformedRecord(String),

    #[error("invalid username {0:?}: expected 3-20 characters of [A-Za-z0-9_]")]
    InvalidUsername(String),

    #[error("parent record {0} not found")]
    ParentNotFound(RecordId),

    #[error("created_at {got} is earlier than the log tail {tail}")]
    Backdated { tail: String, got: String },

    #[error("content is {len} bytes, limit is {max}")]
    ContentTooLarge { len: usize, max: usize },
}

impl From<CoreError> for ValidationError {
    fn from(e: CoreError) -> Self {
        ValidationError::MalformedRecord(e.to_string())
    }
}

/// Identity registry failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IdentityError {
    #[error("{0} has no active binding")]
    AuthorUnbound(Username),

    #[error("{0} is already bound to a different key")]
    UsernameConflict(Username),

    #[error("{0} has been migrated and cannot be reused")]
    UsernameAlreadyMigrated(Username),

    #[error("no public key known for {0}")]
    NotFound(Username),

    #[error("username change for {0} is unsigned")]
    Unsigned(Username),

    #[error("username change for {username} failed signature check: {reason}")]
    BadSignature {
        username: Username,
        reason: SignatureError,
    },

    #[error("username change payload is malformed: {0}")]
    MalformedPayload(String),
}
