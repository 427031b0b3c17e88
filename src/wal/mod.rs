//! Write-ahead log: record framing over fixed-size blocks.
//!
//! Core idea: the log is a sequence of 32 KiB blocks, and a reader that
//! lands on an arbitrary block boundary can start reading records without
//! scanning from the start of the file. To make that work, a logical
//! record never straddles a block boundary in one piece; it is split into
//! physical fragments, each fully contained in one block:
//!
//! ```text
//! block 0                         block 1
//! +---------------------------+   +---------------------------+
//! | Full(r1) | First(r2 ...   |   | ... Last(r2) | Full(r3) |0|
//! +---------------------------+   +---------------------------+
//!                                                            ^
//!                                   trailer < 7 bytes, zeroed
//! ```
//!
//! Each physical fragment carries a 7-byte header:
//!
//! ```text
//! +------------+---------+----------+- - - - - - - - -+
//! | crc32c (4) | len (2) | type (1) |  payload (len)  |
//! +------------+---------+----------+- - - - - - - - -+
//! ```
//!
//! The checksum is a masked crc32c of the type byte and the payload, so a
//! fragment copied to the wrong offset still fails validation. Length is
//! little-endian and counts the payload only. When fewer than 7 bytes of
//! a block remain, they are zero-filled and the next fragment starts in a
//! fresh block.
//!
//! Recovery tolerates tail damage: a record cut short by a crash is
//! dropped silently, while corruption in the middle of the log is handed
//! to a [`Reporter`] and skipped so the records after it still replay.

mod reader;
mod writer;

pub use reader::{LogReporter, Reporter, WALReader};
pub use writer::WALWriter;

/// Physical block size. Readers fetch the log in chunks of this size.
pub const BLOCK_SIZE: usize = 32 * 1024;

/// Bytes of framing before each fragment payload: crc (4), length (2),
/// type (1).
pub const HEADER_SIZE: usize = 4 + 2 + 1;

/// How a physical fragment relates to its logical record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RecordType {
    /// Reserved for preallocated files; never written.
    Zero = 0,
    Full = 1,
    First = 2,
    Middle = 3,
    Last = 4,
}

pub const MAX_RECORD_TYPE: u8 = RecordType::Last as u8;

impl RecordType {
    pub fn from_u8(ty: u8) -> Option<RecordType> {
        match ty {
            0 => Some(RecordType::Zero),
            1 => Some(RecordType::Full),
            2 => Some(RecordType::First),
            3 => Some(RecordType::Middle),
            4 => Some(RecordType::Last),
            _ => None,
        }
    }
}
