use crate::crc32c;
use crate::env::WritableFile;
use crate::error::Result;
use crate::wal::{BLOCK_SIZE, HEADER_SIZE, RecordType};

const BLOCK_TRAILER: [u8; HEADER_SIZE - 1] = [0; HEADER_SIZE - 1];

/// Appends records to a log file, fragmenting each one across 32 KiB
/// blocks so that no fragment straddles a block boundary.
///
/// The writer tracks only its position within the current block; the
/// destination file owns the absolute offset. Records become durable in
/// two steps:
///   append() + flush()  → library buffer → OS page cache
///   sync()              → OS page cache → physical disk
pub struct WALWriter<W: WritableFile> {
    dest: W,
    block_offset: usize,
}

impl<W: WritableFile> WALWriter<W> {
    /// Create a writer that starts at the beginning of a fresh file.
    pub fn new(dest: W) -> WALWriter<W> {
        WALWriter {
            dest,
            block_offset: 0,
        }
    }

    /// Create a writer that appends to a log already `dest_length` bytes
    /// long, picking up mid-block where the previous writer stopped.
    pub fn with_offset(dest: W, dest_length: u64) -> WALWriter<W> {
        WALWriter {
            dest,
            block_offset: (dest_length % BLOCK_SIZE as u64) as usize,
        }
    }

    /// Append one logical record. Empty records are legal and produce a
    /// single zero-length Full fragment.
    pub fn add_record(&mut self, record: &[u8]) -> Result<()> {
        let mut left = record;
        let mut begin = true;

        loop {
            let leftover = BLOCK_SIZE - self.block_offset;
            if leftover < HEADER_SIZE {
                // Not even a header fits. Zero-fill and switch blocks.
                if leftover > 0 {
                    self.dest.append(&BLOCK_TRAILER[..leftover])?;
                }
                self.block_offset = 0;
            }

            let avail = BLOCK_SIZE - self.block_offset - HEADER_SIZE;
            let fragment_length = left.len().min(avail);
            let end = fragment_length == left.len();

            let ty = match (begin, end) {
                (true, true) => RecordType::Full,
                (true, false) => RecordType::First,
                (false, false) => RecordType::Middle,
                (false, true) => RecordType::Last,
            };

            self.emit_physical_record(ty, &left[..fragment_length])?;
            left = &left[fragment_length..];
            begin = false;
            if left.is_empty() {
                return Ok(());
            }
        }
    }

    fn emit_physical_record(&mut self, ty: RecordType, data: &[u8]) -> Result<()> {
        debug_assert!(data.len() <= 0xffff);
        debug_assert!(self.block_offset + HEADER_SIZE + data.len() <= BLOCK_SIZE);

        // The checksum covers the type byte and the payload.
        let mut digest = crc32c::CRC32C.digest();
        digest.update(&[ty as u8]);
        digest.update(data);
        let crc = crc32c::mask(digest.finalize());

        let mut header = [0u8; HEADER_SIZE];
        header[..4].copy_from_slice(&crc.to_le_bytes());
        header[4] = (data.len() & 0xff) as u8;
        header[5] = (data.len() >> 8) as u8;
        header[6] = ty as u8;

        self.dest.append(&header)?;
        self.dest.append(data)?;
        self.dest.flush()?;
        self.block_offset += HEADER_SIZE + data.len();
        Ok(())
    }

    /// Force everything written so far down to disk.
    pub fn sync(&mut self) -> Result<()> {
        self.dest.sync()
    }

    /// Give the destination back, e.g. to inspect an in-memory log.
    pub fn into_inner(self) -> W {
        self.dest
    }
}
