use std::cmp::Ordering;
use std::mem;
use std::sync::Arc;

use crate::comparator::BytewiseComparator;
use crate::crc32c;
use crate::env::WritableFile;
use crate::error::Result;
use crate::options::{CompressionType, Options};
use crate::sstable::block::BlockBuilder;
use crate::sstable::filter_block::FilterBlockBuilder;
use crate::sstable::format::{BLOCK_TRAILER_SIZE, BlockHandle, Footer};

/// Builds a table file from a sorted stream of key-value pairs.
///
/// Build process:
/// 1. Entries accumulate in a data block; at ~block_size it is
///    compressed, checksummed and written out.
/// 2. Each flushed block gets one index entry. The index key is not the
///    block's last key but a shortened separator computed against the
///    next block's first key, which is why the entry is held pending
///    until that key arrives.
/// 3. finish() flushes the last block, then writes the filter block,
///    the metaindex, the index and the footer.
pub struct TableBuilder<W: WritableFile> {
    options: Options,
    file: W,
    /// Bytes written so far; the next block lands here.
    offset: u64,
    status: Result<()>,
    data_block: BlockBuilder,
    index_block: BlockBuilder,
    /// Last key added. Outside a block it holds the separator the next
    /// index entry will use.
    last_key: Vec<u8>,
    num_entries: u64,
    closed: bool,
    filter_block: Option<FilterBlockBuilder>,
    /// True when a data block was flushed but its index entry is still
    /// waiting for the next block's first key.
    pending_index_entry: bool,
    pending_handle: BlockHandle,
    /// Compression scratch, reused across blocks.
    compressed_output: Vec<u8>,
}

impl<W: WritableFile> TableBuilder<W> {
    pub fn new(options: Options, file: W) -> TableBuilder<W> {
        let filter_block = options
            .filter_policy
            .as_ref()
            .map(|policy| FilterBlockBuilder::new(Arc::clone(policy)));
        let data_block = BlockBuilder::new(
            options.block_restart_interval,
            Arc::clone(&options.comparator),
        );
        // Index keys are separators under the same comparator; one
        // restart per entry keeps index seeks cheap.
        let index_block = BlockBuilder::new(1, Arc::clone(&options.comparator));
        TableBuilder {
            options,
            file,
            offset: 0,
            status: Ok(()),
            data_block,
            index_block,
            last_key: Vec::new(),
            num_entries: 0,
            closed: false,
            filter_block,
            pending_index_entry: false,
            pending_handle: BlockHandle::default(),
            compressed_output: Vec::new(),
        }
    }

    /// Add a key-value pair. Keys MUST arrive in increasing order under
    /// the table's comparator.
    pub fn add(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        debug_assert!(!self.closed);
        self.status.clone()?;
        if self.num_entries > 0 {
            debug_assert_eq!(
                self.options.comparator.compare(key, &self.last_key),
                Ordering::Greater
            );
        }

        if self.pending_index_entry {
            debug_assert!(self.data_block.is_empty());
            // last_key still holds the previous block's final key; any
            // separator in (last_key, key] routes lookups correctly and
            // a short one keeps the index small.
            self.options
                .comparator
                .find_shortest_separator(&mut self.last_key, key);
            let mut handle_encoding = Vec::new();
            self.pending_handle.encode_to(&mut handle_encoding);
            self.index_block.add(&self.last_key, &handle_encoding);
            self.pending_index_entry = false;
        }

        if let Some(filter) = &mut self.filter_block {
            filter.add_key(key);
        }

        self.last_key.clear();
        self.last_key.extend_from_slice(key);
        self.num_entries += 1;
        self.data_block.add(key, value);

        if self.data_block.current_size_estimate() >= self.options.block_size {
            self.flush()?;
        }
        Ok(())
    }

    /// Write the in-progress data block out, even if undersized. The
    /// next add() starts a fresh block.
    pub fn flush(&mut self) -> Result<()> {
        debug_assert!(!self.closed);
        self.status.clone()?;
        if self.data_block.is_empty() {
            return Ok(());
        }
        debug_assert!(!self.pending_index_entry);

        let block = mem::replace(
            &mut self.data_block,
            BlockBuilder::new(
                self.options.block_restart_interval,
                Arc::clone(&self.options.comparator),
            ),
        );
        let raw = block.finish();
        let handle = self.write_block(&raw);
        self.save_error(&handle);
        let handle = handle?;
        self.pending_handle = handle;
        self.pending_index_entry = true;
        self.file.flush()?;

        if let Some(filter) = &mut self.filter_block {
            filter.start_block(self.offset);
        }
        Ok(())
    }

    /// Compress if configured and worthwhile, then write with trailer.
    fn write_block(&mut self, raw: &[u8]) -> Result<BlockHandle> {
        let (contents, ty) = match self.options.compression {
            CompressionType::None => (raw, CompressionType::None),
            CompressionType::Snappy => {
                self.compressed_output.clear();
                self.compressed_output
                    .resize(snap::raw::max_compress_len(raw.len()), 0);
                match snap::raw::Encoder::new().compress(raw, &mut self.compressed_output) {
                    // Compression must buy back at least 12.5% or the
                    // block is stored raw.
                    Ok(n) if n < raw.len() - raw.len() / 8 => {
                        self.compressed_output.truncate(n);
                        (self.compressed_output.as_slice(), CompressionType::Snappy)
                    }
                    _ => (raw, CompressionType::None),
                }
            }
        };
        Self::write_raw_block(&mut self.file, &mut self.offset, contents, ty)
    }

    fn write_raw_block(
        file: &mut W,
        offset: &mut u64,
        contents: &[u8],
        ty: CompressionType,
    ) -> Result<BlockHandle> {
        let handle = BlockHandle::new(*offset, contents.len() as u64);
        file.append(contents)?;

        let mut trailer = [0u8; BLOCK_TRAILER_SIZE];
        trailer[0] = ty as u8;
        let mut digest = crc32c::CRC32C.digest();
        digest.update(contents);
        digest.update(&trailer[..1]);
        trailer[1..].copy_from_slice(&crc32c::mask(digest.finalize()).to_le_bytes());
        file.append(&trailer)?;

        *offset += (contents.len() + BLOCK_TRAILER_SIZE) as u64;
        Ok(handle)
    }

    fn save_error<T>(&mut self, result: &Result<T>) {
        if self.status.is_ok()
            && let Err(e) = result
        {
            self.status = Err(e.clone());
        }
    }

    /// Finalize the table: last data block, filter block, metaindex,
    /// index, footer. Returns the destination file for the caller to
    /// sync or inspect.
    pub fn finish(mut self) -> Result<W> {
        self.flush()?;
        debug_assert!(!self.closed);
        self.closed = true;

        // Filter block, uncompressed so the reader can index into it.
        let filter_handle = match self.filter_block.take() {
            Some(filter) => {
                let contents = filter.finish();
                Some(Self::write_raw_block(
                    &mut self.file,
                    &mut self.offset,
                    &contents,
                    CompressionType::None,
                )?)
            }
            None => None,
        };

        // Metaindex: maps "filter.<policy name>" to the filter block.
        let mut metaindex_block = BlockBuilder::new(
            self.options.block_restart_interval,
            Arc::new(BytewiseComparator),
        );
        if let Some(handle) = filter_handle {
            let key = match &self.options.filter_policy {
                Some(policy) => format!("filter.{}", policy.name()),
                None => unreachable!("filter block without a policy"),
            };
            let mut handle_encoding = Vec::new();
            handle.encode_to(&mut handle_encoding);
            metaindex_block.add(key.as_bytes(), &handle_encoding);
        }
        let raw = metaindex_block.finish();
        let metaindex_handle = self.write_block(&raw)?;

        // Index block. The final block's entry has no successor key, so
        // its separator only needs to sort after every key in the table.
        if self.pending_index_entry {
            self.options.comparator.find_short_successor(&mut self.last_key);
            let mut handle_encoding = Vec::new();
            self.pending_handle.encode_to(&mut handle_encoding);
            self.index_block.add(&self.last_key, &handle_encoding);
            self.pending_index_entry = false;
        }
        let index = mem::replace(
            &mut self.index_block,
            BlockBuilder::new(1, Arc::new(BytewiseComparator)),
        );
        let raw = index.finish();
        let index_handle = self.write_block(&raw)?;

        let footer = Footer {
            metaindex_handle,
            index_handle,
        };
        let mut footer_encoding = Vec::new();
        footer.encode_to(&mut footer_encoding);
        self.file.append(&footer_encoding)?;
        self.offset += footer_encoding.len() as u64;
        self.file.flush()?;

        Ok(self.file)
    }

    /// Stop building without writing the footer. The returned file holds
    /// whatever blocks were already flushed and is not a valid table.
    pub fn abandon(self) -> W {
        self.file
    }

    /// Number of entries added so far.
    pub fn num_entries(&self) -> u64 {
        self.num_entries
    }

    /// Size of the file generated so far. Finished blocks only; call
    /// flush() first for an estimate that includes the current block.
    pub fn file_size(&self) -> u64 {
        self.offset
    }
}
