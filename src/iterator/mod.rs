pub mod two_level;

pub use two_level::TwoLevelIterator;

use crate::error::{Error, Result};

/// The central iteration abstraction for the storage formats.
///
/// Every sorted source (block, table, composed view) implements this
/// trait, which is what makes composition work: a table iterator is an
/// index iterator driving per-block iterators behind one interface.
///
/// Positioning methods do not return errors. An iterator that runs into
/// trouble becomes invalid and remembers the problem; callers check
/// `status()` after a scan to tell "finished" from "failed". This lets a
/// composed iterator step over a damaged region and keep going while the
/// error stays observable.
pub trait StorageIterator {
    /// Returns true if the iterator is positioned at a valid entry.
    fn is_valid(&self) -> bool;

    /// Positions the iterator at the first entry.
    fn seek_to_first(&mut self);

    /// Positions the iterator at the last entry.
    fn seek_to_last(&mut self);

    /// Positions the iterator at the first entry with key >= target.
    fn seek(&mut self, target: &[u8]);

    /// Advances to the next entry. Requires a valid position.
    fn next(&mut self);

    /// Moves back to the previous entry. Requires a valid position.
    fn prev(&mut self);

    /// Returns the current key. Only meaningful when is_valid() is true.
    fn key(&self) -> &[u8];

    /// Returns the current value. Only meaningful when is_valid() is true.
    fn value(&self) -> &[u8];

    /// First error this iterator ran into, if any.
    fn status(&self) -> Result<()>;
}

/// An iterator over nothing, optionally carrying an error. Stands in for
/// a real iterator when a source cannot be opened at all.
pub struct EmptyIterator {
    status: Result<()>,
}

impl EmptyIterator {
    pub fn new() -> EmptyIterator {
        EmptyIterator { status: Ok(()) }
    }

    pub fn with_error(error: Error) -> EmptyIterator {
        EmptyIterator { status: Err(error) }
    }
}

impl Default for EmptyIterator {
    fn default() -> EmptyIterator {
        EmptyIterator::new()
    }
}

impl StorageIterator for EmptyIterator {
    fn is_valid(&self) -> bool {
        false
    }

    fn seek_to_first(&mut self) {}

    fn seek_to_last(&mut self) {}

    fn seek(&mut self, _target: &[u8]) {}

    fn next(&mut self) {
        debug_assert!(false, "next on an empty iterator");
    }

    fn prev(&mut self) {
        debug_assert!(false, "prev on an empty iterator");
    }

    fn key(&self) -> &[u8] {
        debug_assert!(false, "key on an empty iterator");
        &[]
    }

    fn value(&self) -> &[u8] {
        debug_assert!(false, "value on an empty iterator");
        &[]
    }

    fn status(&self) -> Result<()> {
        self.status.clone()
    }
}
