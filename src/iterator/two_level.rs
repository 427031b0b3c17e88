use crate::error::Result;
use crate::iterator::StorageIterator;
use crate::options::ReadOptions;

/// Builds an iterator over one data block, given the opaque value stored
/// for it in the index.
pub type BlockFunction = Box<dyn Fn(&ReadOptions, &[u8]) -> Box<dyn StorageIterator>>;

/// Composes an index iterator with lazily-built data iterators into a
/// single sorted view.
///
/// ```text
///   index iterator            data block iterators
///   +------------------+
///   | sep_0 -> handle0 | ----> [ a:1 | b:2 ]
///   | sep_1 -> handle1 | ----> [ c:3 ]
///   | sep_2 -> handle2 | ----> [ e:5 | f:6 ]
///   +------------------+
/// ```
///
/// Only the block under the cursor is materialized. Moving past its last
/// entry advances the index and opens the next block; empty or unreadable
/// blocks are skipped, with any error kept for `status()`.
pub struct TwoLevelIterator {
    index_iter: Box<dyn StorageIterator>,
    block_function: BlockFunction,
    options: ReadOptions,
    data_iter: Option<Box<dyn StorageIterator>>,
    /// Index value the current data_iter was built from. Lets a seek
    /// that lands on the same block reuse the open iterator.
    data_block_handle: Vec<u8>,
    status: Result<()>,
}

impl TwoLevelIterator {
    pub fn new(
        index_iter: Box<dyn StorageIterator>,
        block_function: BlockFunction,
        options: ReadOptions,
    ) -> TwoLevelIterator {
        TwoLevelIterator {
            index_iter,
            block_function,
            options,
            data_iter: None,
            data_block_handle: Vec::new(),
            status: Ok(()),
        }
    }

    fn save_error(&mut self, status: Result<()>) {
        if self.status.is_ok() && status.is_err() {
            self.status = status;
        }
    }

    fn set_data_iterator(&mut self, data_iter: Option<Box<dyn StorageIterator>>) {
        if let Some(old) = &self.data_iter {
            let status = old.status();
            self.save_error(status);
        }
        self.data_iter = data_iter;
    }

    fn init_data_block(&mut self) {
        if !self.index_iter.is_valid() {
            self.set_data_iterator(None);
            return;
        }
        let handle = self.index_iter.value();
        if self.data_iter.is_some() && self.data_block_handle.as_slice() == handle {
            // The cursor left this block and came back; the open data
            // iterator is already the right one.
            return;
        }
        let data_iter = (self.block_function)(&self.options, handle);
        self.data_block_handle.clear();
        self.data_block_handle.extend_from_slice(handle);
        self.set_data_iterator(Some(data_iter));
    }

    fn skip_empty_data_blocks_forward(&mut self) {
        while !self.is_valid() {
            // Off the end of the current block; move to the next one.
            if !self.index_iter.is_valid() {
                self.set_data_iterator(None);
                return;
            }
            self.index_iter.next();
            self.init_data_block();
            if let Some(data) = &mut self.data_iter {
                data.seek_to_first();
            }
        }
    }

    fn skip_empty_data_blocks_backward(&mut self) {
        while !self.is_valid() {
            if !self.index_iter.is_valid() {
                self.set_data_iterator(None);
                return;
            }
            self.index_iter.prev();
            self.init_data_block();
            if let Some(data) = &mut self.data_iter {
                data.seek_to_last();
            }
        }
    }
}

impl StorageIterator for TwoLevelIterator {
    fn is_valid(&self) -> bool {
        self.data_iter.as_ref().is_some_and(|data| data.is_valid())
    }

    fn seek_to_first(&mut self) {
        self.index_iter.seek_to_first();
        self.init_data_block();
        if let Some(data) = &mut self.data_iter {
            data.seek_to_first();
        }
        self.skip_empty_data_blocks_forward();
    }

    fn seek_to_last(&mut self) {
        self.index_iter.seek_to_last();
        self.init_data_block();
        if let Some(data) = &mut self.data_iter {
            data.seek_to_last();
        }
        self.skip_empty_data_blocks_backward();
    }

    fn seek(&mut self, target: &[u8]) {
        self.index_iter.seek(target);
        self.init_data_block();
        if let Some(data) = &mut self.data_iter {
            data.seek(target);
        }
        self.skip_empty_data_blocks_forward();
    }

    fn next(&mut self) {
        debug_assert!(self.is_valid());
        if let Some(data) = &mut self.data_iter {
            data.next();
        }
        self.skip_empty_data_blocks_forward();
    }

    fn prev(&mut self) {
        debug_assert!(self.is_valid());
        if let Some(data) = &mut self.data_iter {
            data.prev();
        }
        self.skip_empty_data_blocks_backward();
    }

    fn key(&self) -> &[u8] {
        debug_assert!(self.is_valid());
        match &self.data_iter {
            Some(data) => data.key(),
            None => &[],
        }
    }

    fn value(&self) -> &[u8] {
        debug_assert!(self.is_valid());
        match &self.data_iter {
            Some(data) => data.value(),
            None => &[],
        }
    }

    fn status(&self) -> Result<()> {
        // Index errors first, then the open data block, then anything
        // recorded while switching blocks.
        self.index_iter.status()?;
        if let Some(data) = &self.data_iter {
            data.status()?;
        }
        self.status.clone()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::comparator::{BytewiseComparator, Comparator};
    use crate::sstable::block::{Block, BlockBuilder, BlockRef};
    use crate::sstable::format::BlockContents;

    fn make_block(comparator: &Arc<dyn Comparator>, entries: &[(&str, &str)]) -> Arc<Block> {
        let mut builder = BlockBuilder::new(16, Arc::clone(comparator));
        for (key, value) in entries {
            builder.add(key.as_bytes(), value.as_bytes());
        }
        let contents = BlockContents {
            data: builder.finish(),
            cachable: true,
        };
        Arc::new(Block::new(contents).unwrap())
    }

    /// Three data blocks behind a tiny index; the middle block is empty
    /// and must be invisible to the composed iterator.
    fn fixture() -> TwoLevelIterator {
        let comparator: Arc<dyn Comparator> = Arc::new(BytewiseComparator);
        let blocks = vec![
            make_block(&comparator, &[("a", "1"), ("b", "2")]),
            make_block(&comparator, &[]),
            make_block(&comparator, &[("c", "3")]),
        ];

        let mut index = BlockBuilder::new(1, Arc::clone(&comparator));
        index.add(b"b", b"0");
        index.add(b"bb", b"1");
        index.add(b"c", b"2");
        let index_block = Arc::new(
            Block::new(BlockContents {
                data: index.finish(),
                cachable: true,
            })
            .unwrap(),
        );
        let index_iter = BlockRef::Owned(index_block).iter(Arc::clone(&comparator));

        let block_comparator = Arc::clone(&comparator);
        TwoLevelIterator::new(
            Box::new(index_iter),
            Box::new(move |_options, index_value| {
                let idx = (index_value[0] - b'0') as usize;
                Box::new(
                    BlockRef::Owned(Arc::clone(&blocks[idx])).iter(Arc::clone(&block_comparator)),
                )
            }),
            ReadOptions::default(),
        )
    }

    #[test]
    fn forward_scan_skips_empty_blocks() {
        let mut iter = fixture();
        assert!(!iter.is_valid());

        iter.seek_to_first();
        let mut keys = Vec::new();
        while iter.is_valid() {
            keys.push(iter.key().to_vec());
            iter.next();
        }
        assert_eq!(keys, [b"a".to_vec(), b"b".to_vec(), b"c".to_vec()]);
        iter.status().unwrap();
    }

    #[test]
    fn backward_scan_skips_empty_blocks() {
        let mut iter = fixture();
        iter.seek_to_last();
        let mut keys = Vec::new();
        while iter.is_valid() {
            keys.push(iter.key().to_vec());
            iter.prev();
        }
        assert_eq!(keys, [b"c".to_vec(), b"b".to_vec(), b"a".to_vec()]);
        iter.status().unwrap();
    }

    #[test]
    fn seek_crosses_into_the_right_block() {
        let mut iter = fixture();

        iter.seek(b"b");
        assert!(iter.is_valid());
        assert_eq!(iter.key(), b"b");
        assert_eq!(iter.value(), b"2");

        // "bb" routes to the empty block, which the iterator steps over.
        iter.seek(b"bb");
        assert!(iter.is_valid());
        assert_eq!(iter.key(), b"c");

        iter.prev();
        assert!(iter.is_valid());
        assert_eq!(iter.key(), b"b");

        iter.seek(b"zzz");
        assert!(!iter.is_valid());
        iter.status().unwrap();
    }
}
