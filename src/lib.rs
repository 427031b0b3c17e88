//! # LSM Storage Engine Core
//!
//! The durable pieces of a Log-Structured Merge-Tree engine: a
//! write-ahead log, immutable sorted table files, and the caching and
//! iterator machinery that reads them back.
//!
//! ## Core idea
//! Writes land in a log first (sequential, cheap to make durable) and
//! later settle into sorted tables. Reads walk the tables lazily through
//! a shared block cache. Everything in this crate is format and
//! mechanism; policy (when to flush, what to merge) belongs a layer up.

pub mod arena;
pub mod bloom;
pub mod cache;
pub mod coding;
pub mod comparator;
pub mod crc32c;
pub mod env;
pub mod error;
pub mod iterator;
pub mod options;
pub mod sstable;
pub mod types;
pub mod wal;

// Public re-exports for the top-level API
pub use error::{Error, Result};
pub use options::{CompressionType, Options, ReadOptions};
pub use sstable::{Table, TableBuilder};
