pub mod builder;

pub use builder::BlockBuilder;

use std::cmp::Ordering;
use std::ops::Deref;
use std::sync::Arc;

use crate::cache::CacheHandle;
use crate::coding::{decode_fixed32, get_varint32};
use crate::comparator::Comparator;
use crate::error::{Error, Result};
use crate::iterator::StorageIterator;
use crate::sstable::format::BlockContents;

/// An immutable block of sorted entries, as produced by
/// [`BlockBuilder`]. Construction validates the restart array; entry
/// headers are validated lazily as iteration reaches them.
pub struct Block {
    data: Vec<u8>,
    /// Where the restart offset array begins.
    restart_offset: usize,
    num_restarts: u32,
}

impl Block {
    pub fn new(contents: BlockContents) -> Result<Block> {
        let data = contents.data;
        if data.len() < 4 {
            return Err(Error::Corruption("bad block contents".into()));
        }
        let num_restarts = decode_fixed32(&data[data.len() - 4..]);
        let max_restarts = ((data.len() - 4) / 4) as u32;
        if num_restarts > max_restarts {
            return Err(Error::Corruption("bad block contents".into()));
        }
        let restart_offset = data.len() - 4 * (1 + num_restarts as usize);
        Ok(Block {
            data,
            restart_offset,
            num_restarts,
        })
    }

    /// Decoded size in memory, used as the cache charge.
    pub fn size(&self) -> usize {
        self.data.len()
    }

    fn restart_point(&self, index: u32) -> u32 {
        debug_assert!(index < self.num_restarts);
        decode_fixed32(&self.data[self.restart_offset + 4 * index as usize..])
    }
}

/// A shared reference to a block: either plainly owned or pinned in the
/// block cache. Iterators hold one so the block outlives them either
/// way.
pub enum BlockRef {
    Owned(Arc<Block>),
    Cached(CacheHandle<Block>),
}

impl Deref for BlockRef {
    type Target = Block;

    fn deref(&self) -> &Block {
        match self {
            BlockRef::Owned(block) => block,
            BlockRef::Cached(handle) => handle,
        }
    }
}

impl BlockRef {
    pub fn iter(self, comparator: Arc<dyn Comparator>) -> BlockIterator {
        BlockIterator::new(self, comparator)
    }
}

/// Decodes the entry header at `offset`. Returns the offset of the key
/// suffix and the (shared, non_shared, value_len) triple, or None when
/// the header is malformed or the payload overruns `limit`.
fn decode_entry(data: &[u8], offset: usize, limit: usize) -> Option<(usize, u32, u32, u32)> {
    let mut cursor = data.get(offset..limit)?;
    let shared = get_varint32(&mut cursor)?;
    let non_shared = get_varint32(&mut cursor)?;
    let value_len = get_varint32(&mut cursor)?;
    if cursor.len() < non_shared as usize + value_len as usize {
        return None;
    }
    Some((limit - cursor.len(), shared, non_shared, value_len))
}

/// Cursor over a block's entries. Reconstructs prefix-compressed keys
/// into an owned buffer as it moves; values are ranges into the block.
pub struct BlockIterator {
    block: BlockRef,
    comparator: Arc<dyn Comparator>,
    /// Offset of the current entry; `restart_offset` when invalid.
    current: usize,
    /// Restart region containing `current`.
    restart_index: u32,
    key: Vec<u8>,
    value_range: (usize, usize),
    status: Result<()>,
}

impl BlockIterator {
    fn new(block: BlockRef, comparator: Arc<dyn Comparator>) -> BlockIterator {
        let current = block.restart_offset;
        let restart_index = block.num_restarts;
        BlockIterator {
            block,
            comparator,
            current,
            restart_index,
            key: Vec::new(),
            value_range: (0, 0),
            status: Ok(()),
        }
    }

    /// Offset just past the current entry, where the next one starts.
    fn next_entry_offset(&self) -> usize {
        self.value_range.1
    }

    fn mark_invalid(&mut self) {
        self.current = self.block.restart_offset;
        self.restart_index = self.block.num_restarts;
    }

    fn corruption_error(&mut self) {
        self.mark_invalid();
        if self.status.is_ok() {
            self.status = Err(Error::Corruption("bad entry in block".into()));
        }
        self.key.clear();
        self.value_range = (0, 0);
    }

    fn seek_to_restart_point(&mut self, index: u32) {
        self.key.clear();
        self.restart_index = index;
        // parse_next_key picks the entry offset up from here.
        let offset = self.block.restart_point(index) as usize;
        self.value_range = (offset, offset);
    }

    /// Decode the entry at next_entry_offset into key/value. Returns
    /// false (leaving the iterator invalid) at the end of the block or
    /// on a malformed entry.
    fn parse_next_key(&mut self) -> bool {
        let p = self.next_entry_offset();
        let limit = self.block.restart_offset;
        if p >= limit {
            self.mark_invalid();
            return false;
        }
        self.current = p;

        match decode_entry(&self.block.data, p, limit) {
            Some((payload, shared, non_shared, value_len))
                if self.key.len() >= shared as usize =>
            {
                self.key.truncate(shared as usize);
                let suffix_end = payload + non_shared as usize;
                self.key
                    .extend_from_slice(&self.block.data[payload..suffix_end]);
                self.value_range = (suffix_end, suffix_end + value_len as usize);
                while self.restart_index + 1 < self.block.num_restarts
                    && (self.block.restart_point(self.restart_index + 1) as usize)
                        < self.current
                {
                    self.restart_index += 1;
                }
                true
            }
            _ => {
                self.corruption_error();
                false
            }
        }
    }
}

impl StorageIterator for BlockIterator {
    fn is_valid(&self) -> bool {
        self.current < self.block.restart_offset
    }

    fn seek_to_first(&mut self) {
        if self.block.num_restarts == 0 {
            self.mark_invalid();
            return;
        }
        self.seek_to_restart_point(0);
        self.parse_next_key();
    }

    fn seek_to_last(&mut self) {
        if self.block.num_restarts == 0 {
            self.mark_invalid();
            return;
        }
        self.seek_to_restart_point(self.block.num_restarts - 1);
        while self.parse_next_key() && self.next_entry_offset() < self.block.restart_offset {}
    }

    fn seek(&mut self, target: &[u8]) {
        if self.block.num_restarts == 0 {
            self.mark_invalid();
            return;
        }
        // Binary search the restart points for the last full key before
        // target, then scan forward from there.
        let mut left = 0u32;
        let mut right = self.block.num_restarts - 1;
        while left < right {
            let mid = (left + right + 1) / 2;
            let region_offset = self.block.restart_point(mid) as usize;
            match decode_entry(&self.block.data, region_offset, self.block.restart_offset) {
                Some((payload, 0, non_shared, _)) => {
                    let mid_key = &self.block.data[payload..payload + non_shared as usize];
                    if self.comparator.compare(mid_key, target) == Ordering::Less {
                        left = mid;
                    } else {
                        right = mid - 1;
                    }
                }
                _ => {
                    // A restart point must carry a full key.
                    self.corruption_error();
                    return;
                }
            }
        }

        self.seek_to_restart_point(left);
        loop {
            if !self.parse_next_key() {
                return;
            }
            if self.comparator.compare(&self.key, target) != Ordering::Less {
                return;
            }
        }
    }

    fn next(&mut self) {
        debug_assert!(self.is_valid());
        self.parse_next_key();
    }

    fn prev(&mut self) {
        debug_assert!(self.is_valid());

        // Back up to the last restart point before the current entry.
        let original = self.current;
        while self.block.restart_point(self.restart_index) as usize >= original {
            if self.restart_index == 0 {
                // No entries before this one.
                self.mark_invalid();
                return;
            }
            self.restart_index -= 1;
        }

        self.seek_to_restart_point(self.restart_index);
        while self.parse_next_key() && self.next_entry_offset() < original {}
    }

    fn key(&self) -> &[u8] {
        debug_assert!(self.is_valid());
        &self.key
    }

    fn value(&self) -> &[u8] {
        debug_assert!(self.is_valid());
        &self.block.data[self.value_range.0..self.value_range.1]
    }

    fn status(&self) -> Result<()> {
        self.status.clone()
    }
}
