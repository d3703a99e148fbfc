//! Records: the entries of the message log.
//!
//! A record is authored as a [`RecordDraft`] (header, content, optional
//! signature). The log seals it into a [`MessageRecord`] by assigning an id,
//! a position and, when chaining is on, the previous record's digest.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::canonical::{decode_record, signed_message, wire_bytes};
use crate::crypto::{Blake3Hash, Keypair, RawSignature};
use crate::error::{IdentityError, ValidationError};
use crate::signing::SigningEngine;
use crate::types::{RecordId, Timestamp, Username};

/// Largest content section accepted on append.
pub const MAX_CONTENT_LEN: usize = 1 << 20;

/// The type of a record. A closed set: the wire form rejects anything else.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    /// A chat message.
    Message,
    /// A request to move an identity to a new username.
    UsernameChange,
    /// Emitted by the system itself.
    System,
    /// A system-emitted error notice.
    Error,
}

impl RecordKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Message => "message",
            Self::UsernameChange => "username_change",
            Self::System => "system",
            Self::Error => "error",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "message" => Some(Self::Message),
            "username_change" => Some(Self::UsernameChange),
            "system" => Some(Self::System),
            "error" => Some(Self::Error),
            _ => None,
        }
    }

    /// Kinds whose authenticity strict mode enforces.
    pub fn requires_signature(self) -> bool {
        matches!(self, Self::Message | Self::UsernameChange)
    }
}

/// Payload of a `username_change` record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsernameChange {
    pub old_username: Username,
    pub new_username: Username,
}

impl UsernameChange {
    pub fn new(old_username: Username, new_username: Username) -> Self {
        Self {
            old_username,
            new_username,
        }
    }

    /// Encode as the record's content section.
    pub fn to_content(&self) -> Bytes {
        // Serializing two strings cannot fail.
        Bytes::from(serde_json::to_vec(self).unwrap_or_default())
    }

    pub fn from_content(content: &[u8]) -> Result<Self, IdentityError> {
        serde_json::from_slice(content).map_err(|e| IdentityError::MalformedPayload(e.to_string()))
    }
}

/// The signed part of a record's header.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordHeader {
    pub created_at: Timestamp,
    pub author: Username,
    pub parent_id: Option<RecordId>,
    pub kind: RecordKind,
}

/// A record before the log has placed it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordDraft {
    pub header: RecordHeader,
    pub content: Bytes,
    pub signature: Option<RawSignature>,
}

impl RecordDraft {
    /// Start a draft stamped with the current time.
    pub fn new(author: Username, kind: RecordKind) -> Self {
        Self {
            header: RecordHeader {
                created_at: Timestamp::now(),
                author,
                parent_id: None,
                kind,
            },
            content: Bytes::new(),
            signature: None,
        }
    }

    /// Draft a `username_change` for `change.old_username`.
    pub fn username_change(change: &UsernameChange) -> Self {
        Self::new(change.old_username.clone(), RecordKind::UsernameChange)
            .content(change.to_content())
    }

    pub fn created_at(mut self, ts: Timestamp) -> Self {
        self.header.created_at = ts;
        self
    }

    pub fn parent(mut self, parent: RecordId) -> Self {
        self.header.parent_id = Some(parent);
        self
    }

    pub fn content(mut self, content: impl Into<Bytes>) -> Self {
        self.content = content.into();
        self
    }

    /// Attach signature bytes as-is.
    pub fn signature(mut self, signature: RawSignature) -> Self {
        self.signature = Some(signature);
        self
    }

    /// The bytes a signature over this draft covers.
    pub fn signed_message(&self) -> Vec<u8> {
        signed_message(&self.header, &self.content)
    }

    /// Sign the draft with `keypair`, replacing any previous signature.
    pub fn sign(mut self, keypair: &Keypair) -> Self {
        let sig = SigningEngine::sign(&self.signed_message(), keypair);
        self.signature = Some(sig.into());
        self
    }
}

/// A record as stored in the log. Never mutated after append.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageRecord {
    pub id: RecordId,
    /// 1-based append position.
    pub position: u64,
    pub header: RecordHeader,
    pub content: Bytes,
    pub signature: Option<RawSignature>,
    /// Blake3 of the previous record's wire bytes, when chaining is on.
    pub previous_hash: Option<Blake3Hash>,
}

impl MessageRecord {
    /// Place a draft in the log.
    pub fn seal(
        draft: RecordDraft,
        id: RecordId,
        position: u64,
        previous_hash: Option<Blake3Hash>,
    ) -> Self {
        Self {
            id,
            position,
            header: draft.header,
            content: draft.content,
            signature: draft.signature,
            previous_hash,
        }
    }

    /// Rebuild a record from stored wire bytes plus its log coordinates.
    pub fn from_wire(id: RecordId, position: u64, bytes: &[u8]) -> Result<Self, ValidationError> {
        let wire = decode_record(bytes)?;
        Ok(Self {
            id,
            position,
            header: wire.header,
            content: wire.content,
            signature: wire.signature,
            previous_hash: wire.previous_hash,
        })
    }

    pub fn author(&self) -> &Username {
        &self.header.author
    }

    pub fn kind(&self) -> RecordKind {
        self.header.kind
    }

    pub fn created_at(&self) -> &Timestamp {
        &self.header.created_at
    }

    pub fn parent_id(&self) -> Option<&RecordId> {
        self.header.parent_id.as_ref()
    }

    pub fn is_signed(&self) -> bool {
        self.signature.is_some()
    }

    /// The bytes the record's signature covers.
    pub fn signed_message(&self) -> Vec<u8> {
        signed_message(&self.header, &self.content)
    }

    /// Full wire encoding, including signature and chain link.
    pub fn wire_bytes(&self) -> Vec<u8> {
        wire_bytes(self)
    }

    /// Digest of the wire bytes; the next record's `previous_hash`.
    pub fn digest(&self) -> Blake3Hash {
        Blake3Hash::hash(&self.wire_bytes())
    }

    /// Decode the payload of a `username_change` record.
    pub fn username_change(&self) -> Result<UsernameChange, IdentityError> {
        if self.header.kind != RecordKind::UsernameChange {
            return Err(IdentityError::MalformedPayload(format!(
                "record {} is a {} record",
                self.id,
                self.header.kind.as_str()
            )));
        }
        UsernameChange::from_content(&self.content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn alice() -> Username {
        Username::parse("alice").unwrap()
    }

    #[test]
    fn test_kind_strings() {
        for kind in [
            RecordKind::Message,
            RecordKind::UsernameChange,
            RecordKind::System,
            RecordKind::Error,
        ] {
            assert_eq!(RecordKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(RecordKind::parse("edit"), None);
    }

    #[test]
    fn test_username_change_payload() {
        let change = UsernameChange::new(alice(), Username::parse("alicia").unwrap());
        let content = change.to_content();
        assert_eq!(
            &content[..],
            br#"{"old_username":"alice","new_username":"alicia"}"#
        );
        assert_eq!(UsernameChange::from_content(&content).unwrap(), change);
        assert!(UsernameChange::from_content(b"{}").is_err());
    }

    #[test]
    fn test_signed_draft_verifies() {
        let keypair = Keypair::from_seed(&[1u8; 32]);
        let draft = RecordDraft::new(alice(), RecordKind::Message)
            .content("hi")
            .sign(&keypair);

        let sig = draft.signature.as_ref().unwrap();
        assert_eq!(sig.len(), 64);
        assert!(SigningEngine::is_valid(
            &draft.signed_message(),
            sig.as_bytes(),
            &keypair.public_key()
        ));
    }

    #[test]
    fn test_seal_and_wire_roundtrip() {
        let keypair = Keypair::from_seed(&[1u8; 32]);
        let ts = Timestamp::from_wire("2026-01-14T12:00:00.000001Z").unwrap();
        let draft = RecordDraft::new(alice(), RecordKind::Message)
            .created_at(ts)
            .content("hello")
            .sign(&keypair);
        let id = RecordId::derive(&ts, &alice(), 0);
        let record = MessageRecord::seal(draft, id.clone(), 1, None);

        let back = MessageRecord::from_wire(id, 1, &record.wire_bytes()).unwrap();
        assert_eq!(back, record);
        assert_eq!(back.digest(), record.digest());
    }

    #[test]
    fn test_username_change_on_wrong_kind() {
        let ts = Timestamp::now();
        let draft = RecordDraft::new(alice(), RecordKind::Message).created_at(ts);
        let record = MessageRecord::seal(draft, RecordId::derive(&ts, &alice(), 0), 1, None);
        assert!(matches!(
            record.username_change(),
            Err(IdentityError::MalformedPayload(_))
        ));
    }
}
