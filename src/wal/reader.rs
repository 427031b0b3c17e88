use log::warn;

use crate::coding::decode_fixed32;
use crate::crc32c;
use crate::env::SequentialFile;
use crate::error::Result;
use crate::wal::{BLOCK_SIZE, HEADER_SIZE, RecordType};

/// Receives notice of skipped log regions, so recovery can count dropped
/// bytes and decide whether the damage is acceptable.
pub trait Reporter {
    /// Some bytes were dropped. `bytes` is an approximate count and
    /// `reason` says what was wrong with them.
    fn corruption(&mut self, bytes: usize, reason: &str);
}

/// Standard reporter: warns through the `log` facade and keeps totals.
/// The first reason seen is retained, mirroring how recovery surfaces
/// the earliest problem.
#[derive(Default)]
pub struct LogReporter {
    dropped_bytes: u64,
    message: Option<String>,
}

impl LogReporter {
    pub fn new() -> LogReporter {
        LogReporter::default()
    }

    pub fn dropped_bytes(&self) -> u64 {
        self.dropped_bytes
    }

    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }
}

impl Reporter for LogReporter {
    fn corruption(&mut self, bytes: usize, reason: &str) {
        warn!("log: dropping {bytes} bytes: {reason}");
        self.dropped_bytes += bytes as u64;
        if self.message.is_none() {
            self.message = Some(reason.to_string());
        }
    }
}

/// Outcome of reading one physical fragment. A real fragment is a range
/// into the reader's block buffer.
enum Physical {
    Record { ty: u8, start: usize, len: usize },
    Eof,
    BadRecord,
}

const FULL: u8 = RecordType::Full as u8;
const FIRST: u8 = RecordType::First as u8;
const MIDDLE: u8 = RecordType::Middle as u8;
const LAST: u8 = RecordType::Last as u8;

/// Reads logical records back out of a log, reassembling fragments and
/// resynchronizing after corrupt regions.
///
/// Damage is handled in two tiers. A record cut off by the end of the
/// file is taken to be a half-finished write from a crash and dropped
/// without comment. Anything else that fails validation is handed to the
/// [`Reporter`] along with a byte count, then skipped; reading continues
/// with the next intact fragment.
pub struct WALReader<R: SequentialFile> {
    file: R,
    reporter: Option<Box<dyn Reporter>>,
    checksum: bool,
    buf: Vec<u8>,
    pos: usize,
    eof: bool,
    /// Offset of the start of the last record returned.
    last_record_offset: u64,
    /// File offset just past the end of `buf`.
    end_of_buffer_offset: u64,
    initial_offset: u64,
    /// Inside a fragment run we joined partway through; drop fragments
    /// until the run ends.
    resyncing: bool,
}

impl<R: SequentialFile> WALReader<R> {
    /// Create a reader that returns records starting at the first one
    /// whose physical position is at or past `initial_offset`.
    pub fn new(
        file: R,
        reporter: Option<Box<dyn Reporter>>,
        checksum: bool,
        initial_offset: u64,
    ) -> WALReader<R> {
        WALReader {
            file,
            reporter,
            checksum,
            buf: Vec::new(),
            pos: 0,
            eof: false,
            last_record_offset: 0,
            end_of_buffer_offset: 0,
            initial_offset,
            resyncing: initial_offset > 0,
        }
    }

    /// Read the next logical record into `record`. Returns false at end
    /// of file. `record` is only meaningful when this returns true.
    pub fn read_record(&mut self, record: &mut Vec<u8>) -> bool {
        if self.last_record_offset < self.initial_offset && !self.skip_to_initial_block() {
            return false;
        }

        record.clear();
        let mut in_fragmented_record = false;
        // Offset of the first fragment of the record being assembled.
        let mut prospective_offset = 0u64;

        loop {
            match self.read_physical_record() {
                Physical::Record { ty, start, len } => {
                    let fragment_offset = self.end_of_buffer_offset
                        - (self.buf.len() - self.pos) as u64
                        - (HEADER_SIZE + len) as u64;

                    if self.resyncing {
                        if ty == MIDDLE {
                            continue;
                        }
                        if ty == LAST {
                            self.resyncing = false;
                            continue;
                        }
                        self.resyncing = false;
                    }

                    match ty {
                        FULL => {
                            if in_fragmented_record && !record.is_empty() {
                                // A zero-length First at a block tail is
                                // legal, anything more is a lost tail.
                                self.report_drop(record.len(), "partial record without end(1)");
                            }
                            record.clear();
                            record.extend_from_slice(&self.buf[start..start + len]);
                            self.last_record_offset = fragment_offset;
                            return true;
                        }
                        FIRST => {
                            if in_fragmented_record && !record.is_empty() {
                                self.report_drop(record.len(), "partial record without end(2)");
                            }
                            prospective_offset = fragment_offset;
                            record.clear();
                            record.extend_from_slice(&self.buf[start..start + len]);
                            in_fragmented_record = true;
                        }
                        MIDDLE => {
                            if !in_fragmented_record {
                                self.report_drop(len, "missing start of fragmented record(1)");
                            } else {
                                record.extend_from_slice(&self.buf[start..start + len]);
                            }
                        }
                        LAST => {
                            if !in_fragmented_record {
                                self.report_drop(len, "missing start of fragmented record(2)");
                            } else {
                                record.extend_from_slice(&self.buf[start..start + len]);
                                self.last_record_offset = prospective_offset;
                                return true;
                            }
                        }
                        _ => {
                            let dropped =
                                len + if in_fragmented_record { record.len() } else { 0 };
                            self.report_drop(dropped, &format!("unknown record type {ty}"));
                            in_fragmented_record = false;
                            record.clear();
                        }
                    }
                }
                Physical::Eof => {
                    // A fragment run with no Last means the writer died
                    // mid-record. Drop it without reporting.
                    if in_fragmented_record {
                        record.clear();
                    }
                    return false;
                }
                Physical::BadRecord => {
                    if in_fragmented_record {
                        self.report_drop(record.len(), "error in middle of record");
                        in_fragmented_record = false;
                        record.clear();
                    }
                }
            }
        }
    }

    /// Offset of the start of the last record returned by `read_record`.
    pub fn last_record_offset(&self) -> u64 {
        self.last_record_offset
    }

    /// Position the file at the block containing `initial_offset`. An
    /// offset inside a block trailer belongs to the next block.
    fn skip_to_initial_block(&mut self) -> bool {
        let offset_in_block = (self.initial_offset % BLOCK_SIZE as u64) as usize;
        let mut block_start = self.initial_offset - offset_in_block as u64;
        if offset_in_block > BLOCK_SIZE - 6 {
            block_start += BLOCK_SIZE as u64;
        }
        self.end_of_buffer_offset = block_start;

        if block_start > 0
            && let Err(e) = self.file.skip(block_start)
        {
            self.report_drop(block_start as usize, &e.to_string());
            return false;
        }
        true
    }

    /// Reads the next fragment, refilling the block buffer as needed.
    /// Consumes the fragment from the buffer before returning it.
    fn read_physical_record(&mut self) -> Physical {
        loop {
            if self.buf.len() - self.pos < HEADER_SIZE {
                if !self.eof {
                    // Drop any trailer bytes and fetch the next block.
                    self.buf.clear();
                    self.pos = 0;
                    self.buf.resize(BLOCK_SIZE, 0);
                    match read_full(&mut self.file, &mut self.buf) {
                        Ok(n) => {
                            self.buf.truncate(n);
                            self.end_of_buffer_offset += n as u64;
                            if n < BLOCK_SIZE {
                                self.eof = true;
                            }
                        }
                        Err(e) => {
                            self.buf.clear();
                            self.report_drop(BLOCK_SIZE, &e.to_string());
                            self.eof = true;
                            return Physical::Eof;
                        }
                    }
                    continue;
                }
                // Leftover bytes too short for a header: a write that
                // died partway. Not an error.
                self.buf.clear();
                self.pos = 0;
                return Physical::Eof;
            }

            let header_start = self.pos;
            let header = &self.buf[header_start..header_start + HEADER_SIZE];
            let length = header[4] as usize | (header[5] as usize) << 8;
            let ty = header[6];

            if HEADER_SIZE + length > self.buf.len() - self.pos {
                let drop_size = self.buf.len() - self.pos;
                self.buf.clear();
                self.pos = 0;
                if !self.eof {
                    self.report_drop(drop_size, "bad record length");
                    return Physical::BadRecord;
                }
                // The payload ran off the end of the file: assume an
                // unfinished write and say nothing.
                return Physical::Eof;
            }

            if ty == RecordType::Zero as u8 && length == 0 {
                // Zero-filled region, e.g. a block trailer or file
                // preallocation. Skip the rest of the buffer quietly.
                self.buf.clear();
                self.pos = 0;
                return Physical::BadRecord;
            }

            if self.checksum {
                let expected = crc32c::unmask(decode_fixed32(&header[..4]));
                let mut digest = crc32c::CRC32C.digest();
                digest
                    .update(&self.buf[header_start + 6..header_start + HEADER_SIZE + length]);
                if digest.finalize() != expected {
                    // The length field itself may be garbage; trusting it
                    // could land us inside a later record. Drop the whole
                    // rest of the buffer.
                    let drop_size = self.buf.len() - self.pos;
                    self.buf.clear();
                    self.pos = 0;
                    self.report_drop(drop_size, "checksum mismatch");
                    return Physical::BadRecord;
                }
            }

            self.pos += HEADER_SIZE + length;

            // Fragments wholly before the requested start offset are
            // skipped without comment.
            let fragment_start = self.end_of_buffer_offset
                - (self.buf.len() - self.pos) as u64
                - (HEADER_SIZE + length) as u64;
            if fragment_start < self.initial_offset {
                return Physical::BadRecord;
            }

            return Physical::Record {
                ty,
                start: header_start + HEADER_SIZE,
                len: length,
            };
        }
    }

    /// Notify the reporter, unless the damage lies entirely before the
    /// region the caller asked to read.
    fn report_drop(&mut self, bytes: usize, reason: &str) {
        if let Some(reporter) = &mut self.reporter {
            let remaining = (self.buf.len() - self.pos) as u64;
            if self.end_of_buffer_offset >= remaining + bytes as u64 + self.initial_offset {
                reporter.corruption(bytes, reason);
            }
        }
    }
}

/// Fill `buf` as far as the file allows. A short count means the file
/// ended.
fn read_full<R: SequentialFile>(file: &mut R, buf: &mut [u8]) -> Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = file.read(&mut buf[filled..])?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}
