use std::cmp::Ordering;
use std::sync::Arc;

use crate::coding::{put_fixed32, put_varint32};
use crate::comparator::Comparator;

/// Accumulates sorted key-value pairs and serializes them into a block.
///
/// Keys usually share long prefixes with their neighbors, so each entry
/// stores only the suffix that differs from the previous key. Every
/// `restart_interval` entries the full key is written out again; these
/// restart points are what seeks binary-search over.
///
/// Layout of an entry and of the finished block:
///
/// ```text
/// entry:  [shared (varint)][non_shared (varint)][value_len (varint)]
///         [key suffix (non_shared bytes)][value]
///
/// block:  | entry | entry | ... | entry |
///         | restart offset 0 (4B) | ... | restart offset K-1 (4B) |
///         | num restarts (4B) |
/// ```
///
/// A smaller interval costs space but makes in-block seeks cheaper;
/// interval 1 disables prefix compression entirely.
pub struct BlockBuilder {
    restart_interval: usize,
    comparator: Arc<dyn Comparator>,
    buffer: Vec<u8>,
    /// Offsets of entries that store their full key.
    restarts: Vec<u32>,
    /// Entries added since the last restart point.
    counter: usize,
    last_key: Vec<u8>,
}

impl BlockBuilder {
    pub fn new(restart_interval: usize, comparator: Arc<dyn Comparator>) -> BlockBuilder {
        debug_assert!(restart_interval >= 1);
        BlockBuilder {
            restart_interval,
            comparator,
            buffer: Vec::new(),
            restarts: vec![0],
            counter: 0,
            last_key: Vec::new(),
        }
    }

    /// Add a key-value pair. Keys MUST arrive in increasing order under
    /// the builder's comparator.
    pub fn add(&mut self, key: &[u8], value: &[u8]) {
        debug_assert!(self.counter <= self.restart_interval);
        debug_assert!(
            self.buffer.is_empty()
                || self.comparator.compare(key, &self.last_key) == Ordering::Greater
        );

        let mut shared = 0;
        if self.counter < self.restart_interval {
            let min_len = self.last_key.len().min(key.len());
            while shared < min_len && self.last_key[shared] == key[shared] {
                shared += 1;
            }
        } else {
            // Interval exhausted: write the full key and start a new
            // restart region here.
            self.restarts.push(self.buffer.len() as u32);
            self.counter = 0;
        }
        let non_shared = key.len() - shared;

        put_varint32(&mut self.buffer, shared as u32);
        put_varint32(&mut self.buffer, non_shared as u32);
        put_varint32(&mut self.buffer, value.len() as u32);
        self.buffer.extend_from_slice(&key[shared..]);
        self.buffer.extend_from_slice(value);

        self.last_key.truncate(shared);
        self.last_key.extend_from_slice(&key[shared..]);
        debug_assert_eq!(self.last_key, key);
        self.counter += 1;
    }

    /// Finalize the block: append the restart offsets and their count.
    pub fn finish(mut self) -> Vec<u8> {
        for restart in &self.restarts {
            put_fixed32(&mut self.buffer, *restart);
        }
        put_fixed32(&mut self.buffer, self.restarts.len() as u32);
        self.buffer
    }

    /// Size of the block if finished now.
    pub fn current_size_estimate(&self) -> usize {
        self.buffer.len() + self.restarts.len() * 4 + 4
    }

    /// Whether any entries have been added.
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }
}
