//! Bloom filters: "is this key in the set?" with one-sided error.
//!
//! - If any probed bit is 0 → the key is DEFINITELY NOT in the set
//! - If all probed bits are 1 → the key is PROBABLY in the set
//!
//! Tables attach a filter per chunk of file so point reads can skip blocks
//! that cannot contain the target key. On a miss-heavy workload that removes
//! the large majority of data-block reads.
//!
//! Sizing rule of thumb: 10 bits per key gives roughly a 1% false-positive
//! rate at the optimal probe count of `bits_per_key * ln 2`.
//!
//! Hash trick: k independent hash functions aren't needed. One 128-bit hash
//! split into halves (h1, h2) gives the double-hashing sequence
//! `h_i = h1 + i * h2`, which behaves indistinguishably for filter purposes.

use xxhash_rust::xxh3::xxh3_128;

/// Builds and queries the filters stored in table files.
///
/// The policy's `name` is recorded next to the filter data; a reader whose
/// policy name differs ignores the filter rather than misinterpreting it.
pub trait FilterPolicy: Send + Sync {
    fn name(&self) -> &'static str;

    /// Append a filter summarizing `keys` to `dst`. Keys may repeat.
    fn create_filter(&self, keys: &[&[u8]], dst: &mut Vec<u8>);

    /// Must return true if `key` was passed to the `create_filter` call
    /// that produced `filter`. May return true for keys that were not.
    fn key_may_match(&self, key: &[u8], filter: &[u8]) -> bool;
}

/// The built-in bloom filter.
///
/// Filter layout: the bit array, then one trailing byte holding the probe
/// count so the array can be interpreted without the policy's parameters.
pub struct BloomFilterPolicy {
    bits_per_key: usize,
    k: usize,
}

impl BloomFilterPolicy {
    pub fn new(bits_per_key: usize) -> BloomFilterPolicy {
        // Optimal probe count is bits_per_key * ln(2); round down and clamp
        let k = ((bits_per_key as f64) * 0.69) as usize;
        BloomFilterPolicy {
            bits_per_key,
            k: k.clamp(1, 30),
        }
    }
}

fn bloom_hash(key: &[u8]) -> (u64, u64) {
    let h = xxh3_128(key);
    (h as u64, (h >> 64) as u64)
}

impl FilterPolicy for BloomFilterPolicy {
    fn name(&self) -> &'static str {
        "lsm.BuiltinBloomFilter"
    }

    fn create_filter(&self, keys: &[&[u8]], dst: &mut Vec<u8>) {
        let mut bits = keys.len() * self.bits_per_key;
        // Tiny key sets would see terrible false-positive rates; floor the
        // array size
        if bits < 64 {
            bits = 64;
        }
        let bytes = bits.div_ceil(8);
        let bits = bytes * 8;

        let start = dst.len();
        dst.resize(start + bytes, 0);
        dst.push(self.k as u8);

        for key in keys {
            let (h1, h2) = bloom_hash(key);
            let mut h = h1;
            for _ in 0..self.k {
                let bit = (h % bits as u64) as usize;
                dst[start + bit / 8] |= 1 << (bit % 8);
                h = h.wrapping_add(h2);
            }
        }
    }

    fn key_may_match(&self, key: &[u8], filter: &[u8]) -> bool {
        if filter.len() < 2 {
            return false;
        }
        let bits = (filter.len() - 1) * 8;
        let k = filter[filter.len() - 1] as usize;
        if k > 30 {
            // Reserved for future encodings; claim a match rather than
            // wrongly ruling a key out
            return true;
        }

        let (h1, h2) = bloom_hash(key);
        let mut h = h1;
        for _ in 0..k {
            let bit = (h % bits as u64) as usize;
            if filter[bit / 8] & (1 << (bit % 8)) == 0 {
                return false;
            }
            h = h.wrapping_add(h2);
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build(policy: &BloomFilterPolicy, keys: &[&[u8]]) -> Vec<u8> {
        let mut filter = Vec::new();
        policy.create_filter(keys, &mut filter);
        filter
    }

    #[test]
    fn empty_filter_matches_nothing() {
        let policy = BloomFilterPolicy::new(10);
        let filter = build(&policy, &[]);
        assert!(!policy.key_may_match(b"hello", &filter));
        assert!(!policy.key_may_match(b"", &filter));
    }

    #[test]
    fn no_false_negatives() {
        let policy = BloomFilterPolicy::new(10);
        let keys: Vec<Vec<u8>> = (0..1000u32)
            .map(|i| i.to_le_bytes().to_vec())
            .collect();
        let key_refs: Vec<&[u8]> = keys.iter().map(|k| k.as_slice()).collect();
        let filter = build(&policy, &key_refs);

        for key in &key_refs {
            assert!(policy.key_may_match(key, &filter), "lost key {key:?}");
        }
    }

    #[test]
    fn small_filter_basics() {
        let policy = BloomFilterPolicy::new(10);
        let filter = build(&policy, &[b"hello", b"world"]);
        assert!(policy.key_may_match(b"hello", &filter));
        assert!(policy.key_may_match(b"world", &filter));
        assert!(!policy.key_may_match(b"x", &filter));
        assert!(!policy.key_may_match(b"foo", &filter));
    }

    #[test]
    fn false_positive_rate_is_sane() {
        let policy = BloomFilterPolicy::new(10);
        let keys: Vec<Vec<u8>> = (0..10_000u32)
            .map(|i| i.to_le_bytes().to_vec())
            .collect();
        let key_refs: Vec<&[u8]> = keys.iter().map(|k| k.as_slice()).collect();
        let filter = build(&policy, &key_refs);

        // Probe keys that were never inserted. Theory says ~1% false
        // positives at 10 bits/key; allow a wide margin.
        let mut hits = 0;
        for i in 0..10_000u32 {
            let probe = (1_000_000 + i).to_le_bytes();
            if policy.key_may_match(&probe, &filter) {
                hits += 1;
            }
        }
        assert!(hits < 500, "false positive rate way off: {hits}/10000");
    }

    #[test]
    fn truncated_filters_fail_closed() {
        let policy = BloomFilterPolicy::new(10);
        assert!(!policy.key_may_match(b"anything", b""));
        assert!(!policy.key_may_match(b"anything", b"\x05"));
    }
}
