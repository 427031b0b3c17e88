use crate::bloom::FilterPolicy;
use crate::coding::{decode_fixed64, put_fixed64, put_varint32, varint_length};
use std::sync::Arc;

/// Monotonically increasing counter assigned to each write operation.
/// It provides a total ordering of all writes and is the basis of snapshot
/// reads: a reader at sequence S sees exactly the writes numbered <= S.
pub type SequenceNumber = u64;

/// Sequence numbers share a u64 with the value-type tag, leaving 56 bits
/// for the counter itself. At a million writes per second that is over two
/// thousand years of headroom.
pub const MAX_SEQUENCE_NUMBER: SequenceNumber = (1 << 56) - 1;

/// Distinguishes puts from deletes in the storage engine.
/// A delete writes a tombstone: the key stays, marked as deleted, and
/// compaction reclaims the space later.
///
/// The discriminants are part of the on-disk format and must not change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ValueType {
    /// A delete (tombstone marker).
    Deletion = 0x00,
    /// A normal put operation.
    Value = 0x01,
}

/// The tag used when building keys for lookups.
///
/// Internal keys with the same user key sort by decreasing (sequence, type),
/// so a seek key built with the largest tag lands at or before every entry
/// visible at that sequence.
pub const VALUE_TYPE_FOR_SEEK: ValueType = ValueType::Value;

impl ValueType {
    /// Decode a tag byte. Unknown tags come back as `None`; readers treat
    /// them as corruption rather than guessing.
    pub fn from_u8(tag: u8) -> Option<ValueType> {
        match tag {
            0x00 => Some(ValueType::Deletion),
            0x01 => Some(ValueType::Value),
            _ => None,
        }
    }
}

/// Pack a sequence number and a value type into the trailing u64 of an
/// internal key: sequence in the high 56 bits, tag in the low 8.
pub fn pack_sequence_and_type(sequence: SequenceNumber, value_type: ValueType) -> u64 {
    debug_assert!(sequence <= MAX_SEQUENCE_NUMBER);
    (sequence << 8) | value_type as u64
}

/// An internal key taken apart: the user's key plus the (sequence, type)
/// pair that versions it. Borrows the user key from the encoded form.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParsedInternalKey<'a> {
    pub user_key: &'a [u8],
    pub sequence: SequenceNumber,
    pub value_type: ValueType,
}

impl<'a> ParsedInternalKey<'a> {
    pub fn new(
        user_key: &'a [u8],
        sequence: SequenceNumber,
        value_type: ValueType,
    ) -> ParsedInternalKey<'a> {
        ParsedInternalKey {
            user_key,
            sequence,
            value_type,
        }
    }

    /// Bytes this key occupies once encoded.
    pub fn encoding_length(&self) -> usize {
        self.user_key.len() + 8
    }
}

/// Append the encoded form of `key`: user key bytes, then the packed
/// (sequence, type) as a fixed64.
pub fn append_internal_key(dst: &mut Vec<u8>, key: &ParsedInternalKey<'_>) {
    dst.extend_from_slice(key.user_key);
    put_fixed64(dst, pack_sequence_and_type(key.sequence, key.value_type));
}

/// Decode an internal key. `None` if it is too short to hold the trailer or
/// the tag byte is not a known `ValueType`.
pub fn parse_internal_key(encoded: &[u8]) -> Option<ParsedInternalKey<'_>> {
    if encoded.len() < 8 {
        return None;
    }
    let split = encoded.len() - 8;
    let packed = decode_fixed64(&encoded[split..]);
    let value_type = ValueType::from_u8((packed & 0xff) as u8)?;
    Some(ParsedInternalKey {
        user_key: &encoded[..split],
        sequence: packed >> 8,
        value_type,
    })
}

/// The user-key portion of an encoded internal key.
pub fn extract_user_key(encoded: &[u8]) -> &[u8] {
    debug_assert!(encoded.len() >= 8);
    &encoded[..encoded.len() - 8]
}

/// An owned, encoded internal key.
///
/// Most of the engine passes internal keys around as plain byte slices; this
/// wrapper exists for the places that need to store one and still get at its
/// parts, like table metadata and compaction boundaries.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct InternalKey {
    rep: Vec<u8>,
}

impl InternalKey {
    pub fn new(user_key: &[u8], sequence: SequenceNumber, value_type: ValueType) -> InternalKey {
        let mut rep = Vec::with_capacity(user_key.len() + 8);
        append_internal_key(
            &mut rep,
            &ParsedInternalKey::new(user_key, sequence, value_type),
        );
        InternalKey { rep }
    }

    /// Wrap an already-encoded internal key.
    pub fn decode_from(encoded: &[u8]) -> InternalKey {
        debug_assert!(encoded.len() >= 8);
        InternalKey {
            rep: encoded.to_vec(),
        }
    }

    pub fn encoded(&self) -> &[u8] {
        &self.rep
    }

    pub fn user_key(&self) -> &[u8] {
        extract_user_key(&self.rep)
    }

    pub fn parse(&self) -> Option<ParsedInternalKey<'_>> {
        parse_internal_key(&self.rep)
    }
}

/// Key format handed to point lookups.
///
/// A single buffer serves both layers that want a say in a lookup:
///
/// ```text
/// ┌────────────────────┬───────────────┬─────────────────────────┐
/// │ varint32 of        │ user key      │ fixed64                 │
/// │ (key_len + 8)      │ (key_len B)   │ (sequence << 8 | tag)   │
/// └────────────────────┴───────────────┴─────────────────────────┘
/// │◄──────────────── memtable_key ────────────────────────────►│
///                      │◄──────────── internal_key ───────────►│
///                      │◄─ user_key ─►│
/// ```
///
/// The memtable stores length-prefixed internal keys and the table layer
/// wants the bare internal key, so both views come from one allocation.
/// The tag is always `VALUE_TYPE_FOR_SEEK`: a lookup at sequence S must see
/// every entry numbered <= S, and that tag sorts first among them.
pub struct LookupKey {
    data: Vec<u8>,
    kstart: usize,
}

impl LookupKey {
    pub fn new(user_key: &[u8], sequence: SequenceNumber) -> LookupKey {
        let internal_len = user_key.len() + 8;
        let mut data = Vec::with_capacity(varint_length(internal_len as u64) + internal_len);
        put_varint32(&mut data, internal_len as u32);
        let kstart = data.len();
        data.extend_from_slice(user_key);
        put_fixed64(
            &mut data,
            pack_sequence_and_type(sequence, VALUE_TYPE_FOR_SEEK),
        );
        LookupKey { data, kstart }
    }

    /// The full length-prefixed key, as stored in the memtable.
    pub fn memtable_key(&self) -> &[u8] {
        &self.data
    }

    /// User key plus trailer, as stored in tables.
    pub fn internal_key(&self) -> &[u8] {
        &self.data[self.kstart..]
    }

    pub fn user_key(&self) -> &[u8] {
        &self.data[self.kstart..self.data.len() - 8]
    }
}

/// Filter policy wrapper that converts the internal keys the table layer
/// sees into the user keys the underlying policy expects.
///
/// Without this, a filter would be built over `user_key ++ trailer` bytes
/// and never match the bare user keys probed at read time.
pub struct InternalFilterPolicy {
    user_policy: Arc<dyn FilterPolicy>,
}

impl InternalFilterPolicy {
    pub fn new(user_policy: Arc<dyn FilterPolicy>) -> InternalFilterPolicy {
        InternalFilterPolicy { user_policy }
    }
}

impl FilterPolicy for InternalFilterPolicy {
    fn name(&self) -> &'static str {
        self.user_policy.name()
    }

    fn create_filter(&self, keys: &[&[u8]], dst: &mut Vec<u8>) {
        let stripped: Vec<&[u8]> = keys.iter().map(|k| extract_user_key(k)).collect();
        self.user_policy.create_filter(&stripped, dst);
    }

    fn key_may_match(&self, key: &[u8], filter: &[u8]) -> bool {
        self.user_policy.key_may_match(extract_user_key(key), filter)
    }
}
