use std::sync::Arc;

use crate::bloom::FilterPolicy;
use crate::coding::{decode_fixed32, put_fixed32};

/// Every filter covers a 2 KiB window of file offsets. A data block
/// starting at offset X is tested against filter number X >> 11, so the
/// reader can find the right filter from the block handle alone.
pub const FILTER_BASE_LG: u32 = 11;
const FILTER_BASE: u64 = 1 << FILTER_BASE_LG;

/// Builds the filter block for a table.
///
/// The caller interleaves `add_key` (for every key written) with
/// `start_block` (once per data block flush); `finish` serializes all
/// generated filters plus an offset array for direct indexing:
///
/// ```text
/// | filter 0 | filter 1 | ... | filter N-1 |
/// | offset of filter 0 (4B) | ... | offset of filter N-1 (4B) |
/// | offset of the offset array (4B) | base lg (1B) |
/// ```
pub struct FilterBlockBuilder {
    policy: Arc<dyn FilterPolicy>,
    /// Key bytes, flattened. `start` holds each key's offset in here.
    keys: Vec<u8>,
    start: Vec<usize>,
    result: Vec<u8>,
    filter_offsets: Vec<u32>,
}

impl FilterBlockBuilder {
    pub fn new(policy: Arc<dyn FilterPolicy>) -> FilterBlockBuilder {
        FilterBlockBuilder {
            policy,
            keys: Vec::new(),
            start: Vec::new(),
            result: Vec::new(),
            filter_offsets: Vec::new(),
        }
    }

    /// Note that a data block begins at `block_offset`. Generates filters
    /// for every 2 KiB boundary passed since the last call; a sparse file
    /// region yields empty filters, keeping the index math direct.
    pub fn start_block(&mut self, block_offset: u64) {
        let filter_index = block_offset / FILTER_BASE;
        debug_assert!(filter_index >= self.filter_offsets.len() as u64);
        while filter_index > self.filter_offsets.len() as u64 {
            self.generate_filter();
        }
    }

    pub fn add_key(&mut self, key: &[u8]) {
        self.start.push(self.keys.len());
        self.keys.extend_from_slice(key);
    }

    pub fn finish(mut self) -> Vec<u8> {
        if !self.start.is_empty() {
            self.generate_filter();
        }

        let array_offset = self.result.len() as u32;
        for offset in &self.filter_offsets {
            put_fixed32(&mut self.result, *offset);
        }
        put_fixed32(&mut self.result, array_offset);
        self.result.push(FILTER_BASE_LG as u8);
        self.result
    }

    fn generate_filter(&mut self) {
        let num_keys = self.start.len();
        if num_keys == 0 {
            // No keys since the last filter; record an empty one.
            self.filter_offsets.push(self.result.len() as u32);
            return;
        }

        // Sentinel simplifies the windows below.
        self.start.push(self.keys.len());
        let key_slices: Vec<&[u8]> = self
            .start
            .windows(2)
            .map(|w| &self.keys[w[0]..w[1]])
            .collect();

        self.filter_offsets.push(self.result.len() as u32);
        self.policy.create_filter(&key_slices, &mut self.result);

        self.keys.clear();
        self.start.clear();
    }
}

/// Reads filters out of a serialized filter block. Malformed contents
/// disable filtering rather than failing reads: every query then says
/// "maybe".
pub struct FilterBlockReader {
    policy: Arc<dyn FilterPolicy>,
    data: Vec<u8>,
    /// Beginning of the offset array.
    offset_start: usize,
    num: usize,
    base_lg: u32,
}

impl FilterBlockReader {
    pub fn new(policy: Arc<dyn FilterPolicy>, contents: Vec<u8>) -> FilterBlockReader {
        let n = contents.len();
        let mut reader = FilterBlockReader {
            policy,
            data: contents,
            offset_start: 0,
            num: 0,
            base_lg: 0,
        };
        // 1 byte base lg + 4 bytes array offset at minimum.
        if n < 5 {
            return reader;
        }
        let base_lg = reader.data[n - 1] as u32;
        let array_offset = decode_fixed32(&reader.data[n - 5..]) as usize;
        if array_offset > n - 5 {
            return reader;
        }
        reader.base_lg = base_lg;
        reader.offset_start = array_offset;
        reader.num = (n - 5 - array_offset) / 4;
        reader
    }

    pub fn key_may_match(&self, block_offset: u64, key: &[u8]) -> bool {
        let index = (block_offset >> self.base_lg) as usize;
        if index < self.num {
            let start =
                decode_fixed32(&self.data[self.offset_start + index * 4..]) as usize;
            let limit =
                decode_fixed32(&self.data[self.offset_start + index * 4 + 4..]) as usize;
            if start <= limit && limit <= self.offset_start {
                let filter = &self.data[start..limit];
                return self.policy.key_may_match(key, filter);
            } else if start == limit {
                // Empty filter: no keys in this window.
                return false;
            }
        }
        // Out of range or garbled: treat as a potential match.
        true
    }
}
