use std::sync::Arc;

use crate::bloom::FilterPolicy;
use crate::comparator::BytewiseComparator;
use crate::env::RandomAccessFile;
use crate::error::{Error, Result};
use crate::iterator::{EmptyIterator, StorageIterator, TwoLevelIterator};
use crate::options::{Options, ReadOptions};
use crate::sstable::block::{Block, BlockIterator, BlockRef};
use crate::sstable::filter_block::FilterBlockReader;
use crate::sstable::format::{BlockHandle, FOOTER_ENCODED_LENGTH, Footer, read_block};

/// An opened table file. Supports point lookups and range scans.
///
/// On open:
/// 1. Read footer (last 48 bytes) → find metaindex and index handles
/// 2. Read and parse the index block, kept in memory for the table's
///    lifetime
/// 3. Follow the metaindex to the filter block, if a policy is set
/// 4. Ready for queries (data blocks read on demand)
///
/// A `Table` is immutable and internally synchronized; clones share the
/// same underlying state and the whole thing can be used from multiple
/// threads without external locking.
#[derive(Clone)]
pub struct Table {
    rep: Arc<TableRep>,
}

impl std::fmt::Debug for Table {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Table").finish_non_exhaustive()
    }
}

struct TableRep {
    options: Options,
    file: Box<dyn RandomAccessFile>,
    /// Prefix for block cache keys. Distinguishes blocks of this table
    /// from blocks of other tables sharing the cache.
    cache_id: u64,
    filter: Option<FilterBlockReader>,
    /// Where the non-data region begins. Offset estimates for keys past
    /// the last entry point here.
    metaindex_handle: BlockHandle,
    index_block: Arc<Block>,
}

impl Table {
    /// Open a table stored in `file`, whose length is `size` bytes.
    ///
    /// Reads the footer and the index block up front. The client must
    /// ensure the file outlives any iterator handed out by the table,
    /// which the `Box<dyn RandomAccessFile>` ownership takes care of.
    pub fn open(options: Options, file: Box<dyn RandomAccessFile>, size: u64) -> Result<Table> {
        if size < FOOTER_ENCODED_LENGTH as u64 {
            return Err(Error::Corruption("file is too short to be a table".into()));
        }

        let mut footer_space = [0u8; FOOTER_ENCODED_LENGTH];
        let footer_input = file.read(size - FOOTER_ENCODED_LENGTH as u64, &mut footer_space)?;
        let footer = Footer::decode_from(footer_input)?;

        let read_options = ReadOptions {
            verify_checksums: options.paranoid_checks,
            fill_cache: false,
        };
        let index_contents = read_block(file.as_ref(), &read_options, &footer.index_handle)?;
        let index_block = Arc::new(Block::new(index_contents)?);

        let cache_id = match &options.block_cache {
            Some(cache) => cache.new_id(),
            None => 0,
        };
        let mut rep = TableRep {
            options,
            file,
            cache_id,
            filter: None,
            metaindex_handle: footer.metaindex_handle,
            index_block,
        };
        rep.read_meta(&footer);
        Ok(Table { rep: Arc::new(rep) })
    }

    fn index_iter(&self) -> BlockIterator {
        BlockRef::Owned(Arc::clone(&self.rep.index_block))
            .iter(Arc::clone(&self.rep.options.comparator))
    }

    /// Converts an index entry (an encoded block handle) into an
    /// iterator over that block's contents, going through the block
    /// cache when one is configured.
    fn block_reader(
        rep: &TableRep,
        options: &ReadOptions,
        index_value: &[u8],
    ) -> Box<dyn StorageIterator> {
        let mut input = index_value;
        let handle = match BlockHandle::decode_from(&mut input) {
            Ok(handle) => handle,
            Err(e) => return Box::new(EmptyIterator::with_error(e)),
        };

        let block = match &rep.options.block_cache {
            Some(cache) => {
                // Cache key: table id ++ block offset, both fixed64.
                let mut cache_key = [0u8; 16];
                cache_key[..8].copy_from_slice(&rep.cache_id.to_le_bytes());
                cache_key[8..].copy_from_slice(&handle.offset.to_le_bytes());
                match cache.lookup(&cache_key) {
                    Some(cached) => BlockRef::Cached(cached),
                    None => {
                        let contents = match read_block(rep.file.as_ref(), options, &handle) {
                            Ok(contents) => contents,
                            Err(e) => return Box::new(EmptyIterator::with_error(e)),
                        };
                        let cachable = contents.cachable;
                        let block = match Block::new(contents) {
                            Ok(block) => block,
                            Err(e) => return Box::new(EmptyIterator::with_error(e)),
                        };
                        if cachable && options.fill_cache {
                            let charge = block.size();
                            BlockRef::Cached(cache.insert(&cache_key, block, charge))
                        } else {
                            BlockRef::Owned(Arc::new(block))
                        }
                    }
                }
            }
            None => {
                let contents = match read_block(rep.file.as_ref(), options, &handle) {
                    Ok(contents) => contents,
                    Err(e) => return Box::new(EmptyIterator::with_error(e)),
                };
                match Block::new(contents) {
                    Ok(block) => BlockRef::Owned(Arc::new(block)),
                    Err(e) => return Box::new(EmptyIterator::with_error(e)),
                }
            }
        };
        Box::new(block.iter(Arc::clone(&rep.options.comparator)))
    }

    /// Create an iterator over all entries in the table, in comparator
    /// order. Data blocks are fetched lazily as positioning demands.
    pub fn iter(&self, options: &ReadOptions) -> TwoLevelIterator {
        let rep = Arc::clone(&self.rep);
        TwoLevelIterator::new(
            Box::new(self.index_iter()),
            Box::new(move |options, index_value| Table::block_reader(&rep, options, index_value)),
            *options,
        )
    }

    /// Point lookup.
    ///
    /// 1. Seek the index for the one block that could hold `key`
    /// 2. Ask the filter; a negative answer skips the block read
    /// 3. Read the block and seek inside it
    ///
    /// Returns the first entry at or after `key` within that block. The
    /// caller decides whether the returned key actually matches; with
    /// internal keys an exact user-key match at an older sequence number
    /// is still a hit.
    pub fn internal_get(
        &self,
        options: &ReadOptions,
        key: &[u8],
    ) -> Result<Option<(Vec<u8>, Vec<u8>)>> {
        let mut index_iter = self.index_iter();
        index_iter.seek(key);
        if !index_iter.is_valid() {
            index_iter.status()?;
            return Ok(None);
        }

        if let Some(filter) = &self.rep.filter {
            let mut input = index_iter.value();
            if let Ok(handle) = BlockHandle::decode_from(&mut input)
                && !filter.key_may_match(handle.offset, key)
            {
                return Ok(None);
            }
        }

        let mut block_iter = Table::block_reader(&self.rep, options, index_iter.value());
        block_iter.seek(key);
        if block_iter.is_valid() {
            return Ok(Some((
                block_iter.key().to_vec(),
                block_iter.value().to_vec(),
            )));
        }
        block_iter.status()?;
        Ok(None)
    }

    /// Approximate file offset where the data for `key` would live.
    /// Block-granular; compression makes it an estimate, not a promise.
    pub fn approximate_offset_of(&self, key: &[u8]) -> u64 {
        let mut index_iter = self.index_iter();
        index_iter.seek(key);
        if index_iter.is_valid() {
            let mut input = index_iter.value();
            if let Ok(handle) = BlockHandle::decode_from(&mut input) {
                return handle.offset;
            }
        }
        // Past the last key, or a damaged index entry: the data region
        // ends where the metaindex begins.
        self.rep.metaindex_handle.offset
    }
}

impl TableRep {
    /// Load the filter block if a policy is configured. Filters are an
    /// optimization; any error here just leaves the table filterless.
    fn read_meta(&mut self, footer: &Footer) {
        let Some(policy) = self.options.filter_policy.clone() else {
            return;
        };
        let read_options = ReadOptions {
            verify_checksums: self.options.paranoid_checks,
            fill_cache: false,
        };
        let Ok(contents) = read_block(self.file.as_ref(), &read_options, &footer.metaindex_handle)
        else {
            return;
        };
        let Ok(meta) = Block::new(contents) else {
            return;
        };

        // Metaindex keys are plain strings, ordered bytewise regardless
        // of the table's comparator.
        let key = format!("filter.{}", policy.name());
        let mut iter = BlockRef::Owned(Arc::new(meta)).iter(Arc::new(BytewiseComparator));
        iter.seek(key.as_bytes());
        if iter.is_valid() && iter.key() == key.as_bytes() {
            self.read_filter(policy, iter.value());
        }
    }

    fn read_filter(&mut self, policy: Arc<dyn FilterPolicy>, handle_value: &[u8]) {
        let mut input = handle_value;
        let Ok(handle) = BlockHandle::decode_from(&mut input) else {
            return;
        };
        let read_options = ReadOptions {
            verify_checksums: self.options.paranoid_checks,
            fill_cache: false,
        };
        let Ok(contents) = read_block(self.file.as_ref(), &read_options, &handle) else {
            return;
        };
        self.filter = Some(FilterBlockReader::new(policy, contents.data));
    }
}
