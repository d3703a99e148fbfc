//! Proptest generators for property-based testing.

use proptest::prelude::*;

use bookchat_core::{
    Blake3Hash, Ed25519PublicKey, Keypair, MessageRecord, RecordDraft, RecordId, RecordKind,
    Timestamp, Username,
};

/// 2001-09-09 to 2033-05-18, in microseconds.
const TIMESTAMP_RANGE: std::ops::RangeInclusive<i64> = 1_000_000_000_000_000..=2_000_000_000_000_000;

/// Generate a random keypair.
pub fn keypair() -> impl Strategy<Value = Keypair> {
    any::<[u8; 32]>().prop_map(|seed| Keypair::from_seed(&seed))
}

/// Generate a random Blake3Hash.
pub fn blake3_hash() -> impl Strategy<Value = Blake3Hash> {
    any::<[u8; 32]>().prop_map(Blake3Hash)
}

/// Generate a random Ed25519PublicKey.
pub fn public_key() -> impl Strategy<Value = Ed25519PublicKey> {
    keypair().prop_map(|kp| kp.public_key())
}

/// Generate a valid username.
pub fn username() -> impl Strategy<Value = Username> {
    "[A-Za-z0-9_]{3,20}".prop_map(|s| Username::parse(s).expect("pattern matches username syntax"))
}

/// Generate strings that are not valid usernames.
pub fn invalid_username() -> impl Strategy<Value = String> {
    prop_oneof![
        "[A-Za-z0-9_]{0,2}",
        "[A-Za-z0-9_]{21,40}",
        "[A-Za-z0-9_]{1,9}[ .:/@\\-][A-Za-z0-9_]{1,9}",
    ]
}

/// Generate a timestamp with microsecond precision.
pub fn timestamp() -> impl Strategy<Value = Timestamp> {
    TIMESTAMP_RANGE.prop_map(|micros| Timestamp::from_micros(micros).expect("in chrono range"))
}

/// Generate a RecordKind.
pub fn record_kind() -> impl Strategy<Value = RecordKind> {
    prop_oneof![
        Just(RecordKind::Message),
        Just(RecordKind::UsernameChange),
        Just(RecordKind::System),
        Just(RecordKind::Error),
    ]
}

/// Generate content bytes of specified max length.
///
/// Content is opaque on the wire, so any bytes are fair, including newlines
/// and blank lines.
pub fn content(max_len: usize) -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(any::<u8>(), 0..=max_len)
}

/// Parameters for generating a record.
#[derive(Debug, Clone)]
pub struct RecordParams {
    pub seed: [u8; 32],
    pub author: Username,
    pub kind: RecordKind,
    pub created_at: Timestamp,
    pub content: Vec<u8>,
    pub parent: Option<(Timestamp, Username)>,
    pub signed: bool,
    pub position: u64,
    pub previous_hash: Option<Blake3Hash>,
}

impl Arbitrary for RecordParams {
    type Parameters = ();
    type Strategy = BoxedStrategy<Self>;

    fn arbitrary_with(_: Self::Parameters) -> Self::Strategy {
        (
            any::<[u8; 32]>(), // seed
            username(),
            record_kind(),
            timestamp(),
            content(512),
            proptest::option::of((timestamp(), username())),
            any::<bool>(),
            1u64..=1_000_000u64, // position
            proptest::option::of(blake3_hash()),
        )
            .prop_map(
                |(seed, author, kind, created_at, content, parent, signed, position, previous_hash)| {
                    RecordParams {
                        seed,
                        author,
                        kind,
                        created_at,
                        content,
                        parent,
                        signed,
                        position,
                        previous_hash,
                    }
                },
            )
            .boxed()
    }
}

impl RecordParams {
    pub fn keypair(&self) -> Keypair {
        Keypair::from_seed(&self.seed)
    }
}

/// Build a draft from parameters.
pub fn draft_from_params(params: &RecordParams) -> RecordDraft {
    let mut draft = RecordDraft::new(params.author.clone(), params.kind)
        .created_at(params.created_at)
        .content(params.content.clone());

    if let Some((at, author)) = &params.parent {
        draft = draft.parent(RecordId::derive(at, author, 0));
    }
    if params.signed {
        draft = draft.sign(&params.keypair());
    }
    draft
}

/// Build a placed record from parameters.
pub fn record_from_params(params: &RecordParams) -> MessageRecord {
    let id = RecordId::derive(&params.created_at, &params.author, 0);
    MessageRecord::seal(
        draft_from_params(params),
        id,
        params.position,
        params.previous_hash,
    )
}
