//! Sorted table files: immutable, block-oriented key-value storage.
//!
//! File layout, start to end:
//!
//! ```text
//! +--------------------+
//! | data block 0       |
//! | data block 1       |
//! |   ...              |
//! | data block N       |
//! +--------------------+
//! | filter block       |   optional, whole-file bloom filters
//! +--------------------+
//! | metaindex block    |   "filter.<policy>" -> filter handle
//! +--------------------+
//! | index block        |   separator key -> data block handle
//! +--------------------+
//! | footer (48 bytes)  |   metaindex + index handles, magic
//! +--------------------+
//! ```
//!
//! Every block is followed by a 5-byte trailer: a compression tag and a
//! masked crc32c over the block contents and the tag. A reader starts at
//! the footer and works backwards; data blocks are only touched when a
//! lookup or scan needs them.

pub mod block;
pub mod builder;
pub mod filter_block;
pub mod format;
pub mod reader;

pub use block::{Block, BlockBuilder, BlockIterator, BlockRef};
pub use builder::TableBuilder;
pub use filter_block::{FILTER_BASE_LG, FilterBlockBuilder, FilterBlockReader};
pub use format::{
    BLOCK_TRAILER_SIZE, BlockContents, BlockHandle, FOOTER_ENCODED_LENGTH, Footer, TABLE_MAGIC,
    read_block,
};
pub use reader::Table;
