use std::sync::Arc;

use crate::bloom::FilterPolicy;
use crate::cache::ShardedLruCache;
use crate::comparator::{BytewiseComparator, Comparator};
use crate::sstable::block::Block;

/// How a block's payload is stored on disk.
///
/// The tag byte sits in every block trailer and is part of the persistent
/// format: values must never be reused, and an unrecognized tag is treated
/// as corruption, not as a hint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionType {
    None = 0x00,
    Snappy = 0x01,
}

impl CompressionType {
    pub fn from_u8(tag: u8) -> Option<CompressionType> {
        match tag {
            0x00 => Some(CompressionType::None),
            0x01 => Some(CompressionType::Snappy),
            _ => None,
        }
    }
}

/// Knobs for building and reading tables.
///
/// The defaults are the ones to beat: 4 KiB blocks match the unit the OS
/// reads anyway, and snappy is cheap enough that turning it off rarely wins.
#[derive(Clone)]
pub struct Options {
    /// Defines key ordering. Tables written under one comparator must be
    /// read under the same one.
    pub comparator: Arc<dyn Comparator>,

    /// Target uncompressed size of a data block. Blocks are the unit of
    /// reading and caching; bigger blocks mean fewer index entries but more
    /// wasted bytes per point lookup.
    pub block_size: usize,

    /// Keys between restart points inside a block. Larger intervals
    /// compress shared prefixes better and make in-block seeks linearly
    /// slower.
    pub block_restart_interval: usize,

    pub compression: CompressionType,

    /// When set, tables get a filter block and point reads consult it
    /// before touching data blocks.
    pub filter_policy: Option<Arc<dyn FilterPolicy>>,

    /// Shared cache of decoded data blocks. One cache typically serves
    /// every open table.
    pub block_cache: Option<Arc<ShardedLruCache<Block>>>,

    /// Verify checksums on internal reads (index, metaindex) too, and turn
    /// oddities reads could paper over into hard errors.
    pub paranoid_checks: bool,
}

impl Default for Options {
    fn default() -> Options {
        Options {
            comparator: Arc::new(BytewiseComparator),
            block_size: 4096,
            block_restart_interval: 16,
            compression: CompressionType::Snappy,
            filter_policy: None,
            block_cache: None,
            paranoid_checks: false,
        }
    }
}

/// Per-read knobs, cheap to copy.
#[derive(Debug, Clone, Copy)]
pub struct ReadOptions {
    /// Verify the stored checksum of every block this read touches.
    pub verify_checksums: bool,

    /// Whether blocks read on behalf of this operation should be added to
    /// the block cache. Bulk scans turn this off so they don't flush the
    /// working set of hot blocks.
    pub fill_cache: bool,
}

impl Default for ReadOptions {
    fn default() -> ReadOptions {
        ReadOptions {
            verify_checksums: false,
            fill_cache: true,
        }
    }
}
