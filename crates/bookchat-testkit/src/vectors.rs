//! Golden test vectors for the wire format.
//!
//! These pin the exact bytes that get signed and stored, so any change to
//! the encoding shows up as a test failure rather than as signatures that
//! silently stop verifying.

use bookchat_core::{
    Keypair, MessageRecord, RecordDraft, RecordId, RecordKind, SigningEngine, Timestamp,
    Username,
};

/// A golden test vector.
#[derive(Debug, Clone)]
pub struct GoldenVector {
    /// Human-readable name for the vector.
    pub name: &'static str,
    /// Seed for deterministic key generation.
    pub seed: [u8; 32],
    /// Author username.
    pub author: &'static str,
    /// Record kind.
    pub kind: RecordKind,
    /// Creation time, microseconds since the epoch.
    pub created_at: i64,
    /// Parent record id, if any.
    pub parent: Option<&'static str>,
    /// Content bytes.
    pub content: &'static [u8],
    /// Expected public key for `seed` (hex).
    pub expected_public_key: &'static str,
    /// Expected signed message.
    pub expected_signed_message: &'static [u8],
    /// Expected record id at collision index 0.
    pub expected_id: &'static str,
}

/// Get all golden test vectors.
pub fn all_vectors() -> Vec<GoldenVector> {
    vec![
        GoldenVector {
            name: "message with hello content",
            seed: [0x42; 32],
            author: "alice",
            kind: RecordKind::Message,
            created_at: 1_768_392_000_000_000, // 2026-01-14T12:00:00Z
            parent: None,
            content: b"hello",
            expected_public_key: "2152f8d19b791d24453242e15f2eab6cb7cffa7b6a5ed30097960e069881db12",
            expected_signed_message: b"Date: 2026-01-14T12:00:00.000000Z\n\
                Author: alice\n\
                Type: message\n\
                \n\
                hello",
            expected_id: "20260114_120000_alice",
        },
        GoldenVector {
            name: "reply with multi-line content",
            seed: [0x42; 32],
            author: "alice",
            kind: RecordKind::Message,
            created_at: 1_768_392_001_123_456,
            parent: Some("20260114_115959_bob"),
            content: b"line one\n\nline three",
            expected_public_key: "2152f8d19b791d24453242e15f2eab6cb7cffa7b6a5ed30097960e069881db12",
            expected_signed_message: b"Date: 2026-01-14T12:00:01.123456Z\n\
                Author: alice\n\
                Parent: 20260114_115959_bob\n\
                Type: message\n\
                \n\
                line one\n\nline three",
            expected_id: "20260114_120001_alice",
        },
        GoldenVector {
            name: "username change",
            seed: [0x00; 32],
            author: "bob_1",
            kind: RecordKind::UsernameChange,
            created_at: 1_768_395_600_000_000, // 2026-01-14T13:00:00Z
            parent: None,
            content: br#"{"old_username":"bob_1","new_username":"robert"}"#,
            expected_public_key: "3b6a27bcceb6a42d62a3a8d02a6f0d73653215771de243a63ac048a18b59da29",
            expected_signed_message: b"Date: 2026-01-14T13:00:00.000000Z\n\
                Author: bob_1\n\
                Type: username_change\n\
                \n\
                {\"old_username\":\"bob_1\",\"new_username\":\"robert\"}",
            expected_id: "20260114_130000_bob_1",
        },
        GoldenVector {
            name: "empty system notice",
            seed: [0x07; 32],
            author: "system",
            kind: RecordKind::System,
            created_at: 0,
            parent: None,
            content: b"",
            expected_public_key: "ea4a6c63e29c520abef5507b132ec5f9954776aebebe7b92421eea691446d22c",
            expected_signed_message: b"Date: 1970-01-01T00:00:00.000000Z\n\
                Author: system\n\
                Type: system\n\
                \n",
            expected_id: "19700101_000000_system",
        },
    ]
}

/// Build the signed draft described by a golden vector.
pub fn generate_draft_from_vector(vector: &GoldenVector) -> RecordDraft {
    let keypair = Keypair::from_seed(&vector.seed);
    let author = Username::parse(vector.author).expect("vector author is valid");
    let created_at = Timestamp::from_micros(vector.created_at).expect("vector time in range");

    let mut draft = RecordDraft::new(author, vector.kind)
        .created_at(created_at)
        .content(vector.content);
    if let Some(parent) = vector.parent {
        draft = draft.parent(RecordId::parse(parent).expect("vector parent is valid"));
    }
    draft.sign(&keypair)
}

/// Build the record a golden vector describes, placed first in the log.
pub fn generate_record_from_vector(vector: &GoldenVector) -> MessageRecord {
    let draft = generate_draft_from_vector(vector);
    let id = RecordId::derive(&draft.header.created_at, &draft.header.author, 0);
    MessageRecord::seal(draft, id, 1, None)
}

/// Check every golden vector against this implementation.
///
/// Returns `(name, matches, signed message as text)` per vector.
pub fn verify_all_vectors() -> Vec<(String, bool, String)> {
    all_vectors()
        .iter()
        .map(|v| {
            let record = generate_record_from_vector(v);
            let message = record.signed_message();
            let key = Keypair::from_seed(&v.seed).public_key();

            let signature_ok = record
                .signature
                .as_ref()
                .map(|s| SigningEngine::is_valid(&message, s.as_bytes(), &key))
                .unwrap_or(false);
            let matches = message == v.expected_signed_message
                && key.to_hex() == v.expected_public_key
                && record.id.as_str() == v.expected_id
                && signature_ok;

            (
                v.name.to_string(),
                matches,
                String::from_utf8_lossy(&message).into_owned(),
            )
        })
        .collect()
}
