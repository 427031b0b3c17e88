//! Key ordering, and the two key-shortening tricks built on top of it.
//!
//! Everything sorted in the engine (blocks, tables, the index entries that
//! point at them) is sorted by a `Comparator`. Index blocks additionally use
//! the comparator to manufacture short "separator" keys that sit between two
//! real keys, which keeps indexes small without losing precision.

use std::cmp::Ordering;
use std::sync::Arc;

use crate::coding::{decode_fixed64, put_fixed64};
use crate::types::{MAX_SEQUENCE_NUMBER, VALUE_TYPE_FOR_SEEK, extract_user_key,
                   pack_sequence_and_type};

/// A total order over keys.
///
/// Implementations must be consistent: the same comparator (by `name`) that
/// wrote a table must be used to read it, or binary search silently returns
/// wrong entries.
pub trait Comparator: Send + Sync {
    fn compare(&self, a: &[u8], b: &[u8]) -> Ordering;

    /// Identifies the ordering. Persisted alongside data so mismatches can
    /// be detected at open time instead of producing garbage reads.
    fn name(&self) -> &'static str;

    /// If possible, shorten `start` to a key that is still >= `start` but
    /// < `limit`. Leaving `start` unchanged is always correct; shortening
    /// just makes index blocks smaller.
    fn find_shortest_separator(&self, start: &mut Vec<u8>, limit: &[u8]);

    /// If possible, change `key` to a short key >= `key`. Used for the
    /// final index entry of a table, where there is no upper neighbor.
    fn find_short_successor(&self, key: &mut Vec<u8>);
}

/// Plain lexicographic byte order.
#[derive(Debug, Clone, Copy, Default)]
pub struct BytewiseComparator;

impl Comparator for BytewiseComparator {
    fn compare(&self, a: &[u8], b: &[u8]) -> Ordering {
        a.cmp(b)
    }

    fn name(&self) -> &'static str {
        "lsm.BytewiseComparator"
    }

    fn find_shortest_separator(&self, start: &mut Vec<u8>, limit: &[u8]) {
        // Find length of common prefix
        let min_length = start.len().min(limit.len());
        let mut diff_index = 0;
        while diff_index < min_length && start[diff_index] == limit[diff_index] {
            diff_index += 1;
        }

        if diff_index >= min_length {
            // One key is a prefix of the other; nothing shorter exists
            return;
        }

        let diff_byte = start[diff_index];
        if diff_byte < 0xff && diff_byte + 1 < limit[diff_index] {
            start[diff_index] += 1;
            start.truncate(diff_index + 1);
            debug_assert_eq!(self.compare(start, limit), Ordering::Less);
        }
    }

    fn find_short_successor(&self, key: &mut Vec<u8>) {
        // Bump the first byte that can be bumped, drop the rest
        for i in 0..key.len() {
            if key[i] != 0xff {
                key[i] += 1;
                key.truncate(i + 1);
                return;
            }
        }
        // Run of 0xff bytes: key is its own successor, leave it alone
    }
}

/// Orders internal keys: by user key ascending, then by (sequence, type)
/// descending, so the newest version of a key is always encountered first.
#[derive(Clone)]
pub struct InternalKeyComparator {
    user_comparator: Arc<dyn Comparator>,
}

impl InternalKeyComparator {
    pub fn new(user_comparator: Arc<dyn Comparator>) -> InternalKeyComparator {
        InternalKeyComparator { user_comparator }
    }

    pub fn user_comparator(&self) -> &dyn Comparator {
        self.user_comparator.as_ref()
    }
}

impl Comparator for InternalKeyComparator {
    fn compare(&self, a: &[u8], b: &[u8]) -> Ordering {
        let by_user_key = self
            .user_comparator
            .compare(extract_user_key(a), extract_user_key(b));
        if by_user_key != Ordering::Equal {
            return by_user_key;
        }
        let a_packed = decode_fixed64(&a[a.len() - 8..]);
        let b_packed = decode_fixed64(&b[b.len() - 8..]);
        // Reversed: higher sequence numbers sort first
        b_packed.cmp(&a_packed)
    }

    fn name(&self) -> &'static str {
        "lsm.InternalKeyComparator"
    }

    fn find_shortest_separator(&self, start: &mut Vec<u8>, limit: &[u8]) {
        // Shorten the user-key portion if the user comparator can
        let user_start = extract_user_key(start).to_vec();
        let user_limit = extract_user_key(limit);
        let mut shortened = user_start.clone();
        self.user_comparator
            .find_shortest_separator(&mut shortened, user_limit);

        if shortened.len() < user_start.len()
            && self.user_comparator.compare(&user_start, &shortened) == Ordering::Less
        {
            // The user key grew logically but shrank physically. Tack on the
            // earliest-sorting trailer so the result stays below every real
            // entry for the shortened key.
            put_fixed64(
                &mut shortened,
                pack_sequence_and_type(MAX_SEQUENCE_NUMBER, VALUE_TYPE_FOR_SEEK),
            );
            debug_assert_eq!(self.compare(start, &shortened), Ordering::Less);
            debug_assert_eq!(self.compare(&shortened, limit), Ordering::Less);
            *start = shortened;
        }
    }

    fn find_short_successor(&self, key: &mut Vec<u8>) {
        let user_key = extract_user_key(key).to_vec();
        let mut bumped = user_key.clone();
        self.user_comparator.find_short_successor(&mut bumped);

        if bumped.len() < user_key.len()
            && self.user_comparator.compare(&user_key, &bumped) == Ordering::Less
        {
            put_fixed64(
                &mut bumped,
                pack_sequence_and_type(MAX_SEQUENCE_NUMBER, VALUE_TYPE_FOR_SEEK),
            );
            debug_assert_eq!(self.compare(key, &bumped), Ordering::Less);
            *key = bumped;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{InternalKey, SequenceNumber, ValueType};

    fn ikey(user_key: &[u8], seq: SequenceNumber, vt: ValueType) -> Vec<u8> {
        InternalKey::new(user_key, seq, vt).encoded().to_vec()
    }

    fn icmp() -> InternalKeyComparator {
        InternalKeyComparator::new(Arc::new(BytewiseComparator))
    }

    #[test]
    fn bytewise_separator() {
        let check = |start: &[u8], limit: &[u8], expected: &[u8]| {
            let mut s = start.to_vec();
            BytewiseComparator.find_shortest_separator(&mut s, limit);
            assert_eq!(s, expected);
        };
        check(b"foo", b"hello", b"g");
        check(b"green", b"grue", b"grf");
        // Prefix relationships leave the key alone
        check(b"foo", b"foobar", b"foo");
        check(b"foobar", b"foo", b"foobar");
        // Adjacent bytes cannot shorten
        check(b"fop", b"foq", b"fop");
        check(b"\xff\xff", b"\xff\xff\x01", b"\xff\xff");
    }

    #[test]
    fn bytewise_successor() {
        let check = |key: &[u8], expected: &[u8]| {
            let mut k = key.to_vec();
            BytewiseComparator.find_short_successor(&mut k);
            assert_eq!(k, expected);
        };
        check(b"foo", b"g");
        check(b"\xff\xffabc", b"\xff\xffb");
        check(b"\xff\xff", b"\xff\xff");
    }

    #[test]
    fn internal_key_order() {
        let cmp = icmp();
        // Increasing order: user key first, then descending sequence
        let sorted = [
            ikey(b"", 100, ValueType::Value),
            ikey(b"", 99, ValueType::Value),
            ikey(b"a", 100, ValueType::Value),
            ikey(b"a", 100, ValueType::Deletion),
            ikey(b"a", 3, ValueType::Value),
            ikey(b"aa", 7, ValueType::Deletion),
            ikey(b"b", MAX_SEQUENCE_NUMBER, ValueType::Value),
            ikey(b"b", 0, ValueType::Deletion),
        ];
        for i in 0..sorted.len() {
            for j in 0..sorted.len() {
                let expected = i.cmp(&j);
                assert_eq!(
                    cmp.compare(&sorted[i], &sorted[j]),
                    expected,
                    "entries {i} and {j}"
                );
            }
        }
    }

    #[test]
    fn internal_key_separator() {
        let cmp = icmp();

        // User keys differ: shorten and restore the seek trailer
        let mut start = ikey(b"foo", 100, ValueType::Value);
        cmp.find_shortest_separator(&mut start, &ikey(b"hello", 200, ValueType::Value));
        assert_eq!(start, ikey(b"g", MAX_SEQUENCE_NUMBER, VALUE_TYPE_FOR_SEEK));

        // Identical user keys: unchanged, whatever the trailers say
        for limit_seq in [100, 99, 101] {
            let mut start = ikey(b"foo", 100, ValueType::Value);
            cmp.find_shortest_separator(&mut start, &ikey(b"foo", limit_seq, ValueType::Value));
            assert_eq!(start, ikey(b"foo", 100, ValueType::Value));
        }

        // Prefix relationship: unchanged
        let mut start = ikey(b"foobar", 100, ValueType::Value);
        cmp.find_shortest_separator(&mut start, &ikey(b"foo", 200, ValueType::Value));
        assert_eq!(start, ikey(b"foobar", 100, ValueType::Value));

        let mut start = ikey(b"foo", 100, ValueType::Value);
        cmp.find_shortest_separator(&mut start, &ikey(b"foobar", 200, ValueType::Value));
        assert_eq!(start, ikey(b"foo", 100, ValueType::Value));
    }

    #[test]
    fn internal_key_successor() {
        let cmp = icmp();

        let mut key = ikey(b"foo", 100, ValueType::Value);
        cmp.find_short_successor(&mut key);
        assert_eq!(key, ikey(b"g", MAX_SEQUENCE_NUMBER, VALUE_TYPE_FOR_SEEK));

        let mut key = ikey(b"\xff\xff", 100, ValueType::Value);
        cmp.find_short_successor(&mut key);
        assert_eq!(key, ikey(b"\xff\xff", 100, ValueType::Value));
    }
}
