//! Canonical wire encoding for records.
//!
//! A record on the wire is a block of `Key: value` header lines, a blank
//! line, then the raw content:
//!
//! ```text
//! Date: 2026-01-14T12:00:00.000000Z
//! Author: alice
//! Parent: 20260114_115959_bob
//! Type: message
//! Signature: <128 hex chars>
//! Previous-Hash: <64 hex chars>
//!
//! hello
//! ```
//!
//! Field order is fixed. `Parent`, `Signature` and `Previous-Hash` are
//! optional. The decoder accepts exactly what the encoder produces, so
//! re-encoding a decoded record reproduces the input byte for byte.
//!
//! The signed message is the same layout without the `Signature` and
//! `Previous-Hash` lines: a signature cannot cover itself, and the chain
//! link is assigned by the log after signing.

use bytes::Bytes;

use crate::crypto::{Blake3Hash, RawSignature};
use crate::error::ValidationError;
use crate::record::{MessageRecord, RecordHeader, RecordKind};
use crate::types::{RecordId, Timestamp, Username};

/// Header field names, in wire order.
mod keys {
    pub const DATE: &str = "Date";
    pub const AUTHOR: &str = "Author";
    pub const PARENT: &str = "Parent";
    pub const TYPE: &str = "Type";
    pub const SIGNATURE: &str = "Signature";
    pub const PREVIOUS_HASH: &str = "Previous-Hash";
}

/// A decoded record without log coordinates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WireRecord {
    pub header: RecordHeader,
    pub content: Bytes,
    pub signature: Option<RawSignature>,
    pub previous_hash: Option<Blake3Hash>,
}

fn push_line(buf: &mut Vec<u8>, key: &str, value: &str) {
    buf.extend_from_slice(key.as_bytes());
    buf.extend_from_slice(b": ");
    buf.extend_from_slice(value.as_bytes());
    buf.push(b'\n');
}

fn push_header(buf: &mut Vec<u8>, header: &RecordHeader) {
    push_line(buf, keys::DATE, &header.created_at.to_wire());
    push_line(buf, keys::AUTHOR, header.author.as_str());
    if let Some(parent) = &header.parent_id {
        push_line(buf, keys::PARENT, parent.as_str());
    }
    push_line(buf, keys::TYPE, header.kind.as_str());
}

/// The bytes covered by a record's signature.
pub fn signed_message(header: &RecordHeader, content: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(128 + content.len());
    push_header(&mut buf, header);
    buf.push(b'\n');
    buf.extend_from_slice(content);
    buf
}

/// Encode a record to its full wire form.
pub fn wire_bytes(record: &MessageRecord) -> Vec<u8> {
    let mut buf = Vec::with_capacity(320 + record.content.len());
    push_header(&mut buf, &record.header);
    if let Some(sig) = &record.signature {
        push_line(&mut buf, keys::SIGNATURE, &sig.to_hex());
    }
    if let Some(prev) = &record.previous_hash {
        push_line(&mut buf, keys::PREVIOUS_HASH, &prev.to_hex());
    }
    buf.push(b'\n');
    buf.extend_from_slice(&record.content);
    buf
}

fn malformed(msg: impl Into<String>) -> ValidationError {
    ValidationError::MalformedRecord(msg.into())
}

/// Header lines, consumed strictly in wire order.
struct HeaderLines<'a> {
    lines: std::iter::Peekable<std::str::Split<'a, char>>,
}

impl<'a> HeaderLines<'a> {
    fn new(header: &'a str) -> Self {
        Self {
            lines: header.split('\n').peekable(),
        }
    }

    /// Take the next line if it carries `key`.
    fn optional(&mut self, key: &str) -> Option<&'a str> {
        let line = *self.lines.peek()?;
        let (k, v) = line.split_once(": ")?;
        if k != key {
            return None;
        }
        self.lines.next();
        Some(v)
    }

    fn required(&mut self, key: &str) -> Result<&'a str, ValidationError> {
        self.optional(key)
            .ok_or_else(|| malformed(format!("missing or misplaced {} header", key)))
    }

    fn finish(mut self) -> Result<(), ValidationError> {
        match self.lines.next() {
            None => Ok(()),
            Some(line) => Err(malformed(format!("unexpected header line {:?}", line))),
        }
    }
}

fn decode_hex_field(key: &str, value: &str) -> Result<Vec<u8>, ValidationError> {
    let bytes = hex::decode(value).map_err(|e| malformed(format!("{}: {}", key, e)))?;
    // Only lowercase hex round-trips.
    if hex::encode(&bytes) != value {
        return Err(malformed(format!("{} is not lowercase hex", key)));
    }
    Ok(bytes)
}

/// Decode a record from wire bytes.
pub fn decode_record(bytes: &[u8]) -> Result<WireRecord, ValidationError> {
    // 1. Split header from content at the first blank line
    let split = bytes
        .windows(2)
        .position(|w| w == b"\n\n")
        .ok_or_else(|| malformed("no blank line after header"))?;
    let header = std::str::from_utf8(&bytes[..split])
        .map_err(|_| malformed("header is not valid UTF-8"))?;
    let content = Bytes::copy_from_slice(&bytes[split + 2..]);

    // 2. Fields in fixed order
    let mut lines = HeaderLines::new(header);
    let created_at = Timestamp::from_wire(lines.required(keys::DATE)?)?;
    let author = Username::parse(lines.required(keys::AUTHOR)?)?;
    let parent_id = lines.optional(keys::PARENT).map(RecordId::parse).transpose()?;
    let kind_str = lines.required(keys::TYPE)?;
    let kind = RecordKind::parse(kind_str)
        .ok_or_else(|| malformed(format!("unknown record type {:?}", kind_str)))?;
    let signature = lines
        .optional(keys::SIGNATURE)
        .map(|v| decode_hex_field(keys::SIGNATURE, v).map(RawSignature::new))
        .transpose()?;
    let previous_hash = lines
        .optional(keys::PREVIOUS_HASH)
        .map(|v| {
            let bytes = decode_hex_field(keys::PREVIOUS_HASH, v)?;
            let arr: [u8; 32] = bytes
                .try_into()
                .map_err(|_| malformed("Previous-Hash must be 32 bytes"))?;
            Ok::<_, ValidationError>(Blake3Hash::from_bytes(arr))
        })
        .transpose()?;
    lines.finish()?;

    Ok(WireRecord {
        header: RecordHeader {
            created_at,
            author,
            parent_id,
            kind,
        },
        content,
        signature,
        previous_hash,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::Keypair;
    use crate::record::RecordDraft;

    fn ts() -> Timestamp {
        Timestamp::from_wire("2026-01-14T12:00:00.000000Z").unwrap()
    }

    fn record(draft: RecordDraft, previous_hash: Option<Blake3Hash>) -> MessageRecord {
        let id = RecordId::derive(&draft.header.created_at, &draft.header.author, 0);
        MessageRecord::seal(draft, id, 1, previous_hash)
    }

    #[test]
    fn test_unsigned_layout() {
        let draft = RecordDraft::new(Username::parse("system").unwrap(), RecordKind::System)
            .created_at(ts())
            .content("server restarted");
        let bytes = wire_bytes(&record(draft, None));

        assert_eq!(
            bytes,
            b"Date: 2026-01-14T12:00:00.000000Z\nAuthor: system\nType: system\n\nserver restarted"
        );
    }

    #[test]
    fn test_signed_message_excludes_signature_and_chain() {
        let keypair = Keypair::from_seed(&[3u8; 32]);
        let draft = RecordDraft::new(Username::parse("alice").unwrap(), RecordKind::Message)
            .created_at(ts())
            .parent(RecordId::parse("20260114_115959_bob").unwrap())
            .content("hi")
            .sign(&keypair);
        let message = draft.signed_message();
        let rec = record(draft, Some(Blake3Hash::hash(b"prev")));

        assert_eq!(
            message,
            b"Date: 2026-01-14T12:00:00.000000Z\nAuthor: alice\nParent: 20260114_115959_bob\nType: message\n\nhi"
        );
        let wire = String::from_utf8(rec.wire_bytes()).unwrap();
        assert!(wire.contains("\nSignature: "));
        assert!(wire.contains("\nPrevious-Hash: "));
        assert_eq!(rec.signed_message(), message);
    }

    #[test]
    fn test_decode_reencode_byte_exact() {
        let keypair = Keypair::from_seed(&[3u8; 32]);
        let draft = RecordDraft::new(Username::parse("alice").unwrap(), RecordKind::Message)
            .created_at(ts())
            .content("line one\n\nline three\n")
            .sign(&keypair);
        let rec = record(draft, Some(Blake3Hash::hash(b"prev")));
        let bytes = rec.wire_bytes();

        let decoded = decode_record(&bytes).unwrap();
        assert_eq!(decoded.content, rec.content);
        assert_eq!(decoded.signature, rec.signature);
        assert_eq!(decoded.previous_hash, rec.previous_hash);

        let again = MessageRecord::from_wire(rec.id.clone(), 1, &bytes).unwrap();
        assert_eq!(again.wire_bytes(), bytes);
    }

    #[test]
    fn test_malformed_signature_survives_decode() {
        let bytes = b"Date: 2026-01-14T12:00:00.000000Z\nAuthor: alice\nType: message\nSignature: abcd\n\nhi";
        let decoded = decode_record(bytes).unwrap();
        assert_eq!(decoded.signature.unwrap().len(), 2);
    }

    #[test]
    fn test_rejects_bad_input() {
        let cases: &[&[u8]] = &[
            b"Date: 2026-01-14T12:00:00.000000Z\nAuthor: alice\nType: message",
            b"Author: alice\nDate: 2026-01-14T12:00:00.000000Z\nType: message\n\nhi",
            b"Date: 2026-01-14T12:00:00.000000Z\nAuthor: alice\nType: edit\n\nhi",
            b"Date: 2026-01-14T12:00:00.000000Z\nAuthor: a\nType: message\n\nhi",
            b"Date: 2026-01-14T12:00:00.000000Z\nAuthor: alice\nType: message\nX-Extra: 1\n\nhi",
            b"Date: 2026-01-14T12:00:00.000000Z\nAuthor: alice\nType: message\nSignature: ABCD\n\nhi",
            b"Date: 2026-01-14T12:00:00.000000Z\nAuthor: alice\nType: message\nPrevious-Hash: abcd\n\nhi",
        ];
        for case in cases {
            assert!(
                decode_record(case).is_err(),
                "accepted {:?}",
                String::from_utf8_lossy(case)
            );
        }
    }
}
