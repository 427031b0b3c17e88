// WAL log format tests
// Fragmentation across 32 KiB blocks, reassembly on read, recovery from
// corrupt regions, and reads positioned at an arbitrary byte offset.

use std::cell::RefCell;
use std::io::Cursor;
use std::rc::Rc;

use lsm_core::crc32c;
use lsm_core::wal::{BLOCK_SIZE, HEADER_SIZE, RecordType, Reporter, WALReader, WALWriter};

// =============================================================================
// Harness
// =============================================================================

fn big_string(partial: &str, n: usize) -> Vec<u8> {
    partial.bytes().cycle().take(n).collect()
}

fn number_string(n: u32) -> Vec<u8> {
    format!("{n}.").into_bytes()
}

fn build_log(records: &[&[u8]]) -> Vec<u8> {
    let mut writer = WALWriter::new(Vec::new());
    for record in records {
        writer.add_record(record).unwrap();
    }
    writer.into_inner()
}

/// Rewrite the stored checksum of the header at `offset` so it matches
/// the (possibly doctored) type byte and payload that follow it.
fn fix_checksum(log: &mut [u8], offset: usize, payload_len: usize) {
    let mut digest = crc32c::CRC32C.digest();
    digest.update(&log[offset + 6..offset + HEADER_SIZE + payload_len]);
    let masked = crc32c::mask(digest.finalize());
    log[offset..offset + 4].copy_from_slice(&masked.to_le_bytes());
}

#[derive(Default)]
struct ReportState {
    dropped_bytes: u64,
    messages: String,
}

struct CollectingReporter {
    state: Rc<RefCell<ReportState>>,
}

impl Reporter for CollectingReporter {
    fn corruption(&mut self, bytes: usize, reason: &str) {
        let mut state = self.state.borrow_mut();
        state.dropped_bytes += bytes as u64;
        state.messages.push_str(reason);
    }
}

struct LogHarness {
    reader: WALReader<Cursor<Vec<u8>>>,
    state: Rc<RefCell<ReportState>>,
}

fn open_reader(contents: Vec<u8>, initial_offset: u64) -> LogHarness {
    let state = Rc::new(RefCell::new(ReportState::default()));
    let reporter = CollectingReporter {
        state: Rc::clone(&state),
    };
    LogHarness {
        reader: WALReader::new(
            Cursor::new(contents),
            Some(Box::new(reporter)),
            true,
            initial_offset,
        ),
        state,
    }
}

impl LogHarness {
    /// Next record, or None at end of log.
    fn read(&mut self) -> Option<Vec<u8>> {
        let mut record = Vec::new();
        self.reader.read_record(&mut record).then_some(record)
    }

    fn dropped_bytes(&self) -> u64 {
        self.state.borrow().dropped_bytes
    }

    fn reported(&self, needle: &str) -> bool {
        self.state.borrow().messages.contains(needle)
    }
}

// =============================================================================
// Test 1: Empty log reads nothing
// =============================================================================
#[test]
fn empty_log_reads_nothing() {
    let mut harness = open_reader(Vec::new(), 0);
    assert_eq!(harness.read(), None);
    assert_eq!(harness.dropped_bytes(), 0);
}

// =============================================================================
// Test 2: Round trip, including an empty record
// =============================================================================
#[test]
fn read_write_round_trip() {
    let log = build_log(&[b"foo", b"bar", b"", b"xxxx"]);
    let mut harness = open_reader(log, 0);

    assert_eq!(harness.read().unwrap(), b"foo");
    assert_eq!(harness.read().unwrap(), b"bar");
    assert_eq!(harness.read().unwrap(), b"");
    assert_eq!(harness.read().unwrap(), b"xxxx");
    assert_eq!(harness.read(), None);
    assert_eq!(harness.read(), None);
    assert_eq!(harness.dropped_bytes(), 0);
}

// =============================================================================
// Test 3: Many small records spanning many blocks
// =============================================================================
#[test]
fn many_blocks_of_small_records() {
    let mut writer = WALWriter::new(Vec::new());
    for i in 0..100_000u32 {
        writer.add_record(&number_string(i)).unwrap();
    }
    let mut harness = open_reader(writer.into_inner(), 0);
    for i in 0..100_000u32 {
        assert_eq!(harness.read().unwrap(), number_string(i));
    }
    assert_eq!(harness.read(), None);
    assert_eq!(harness.dropped_bytes(), 0);
}

// =============================================================================
// Test 4: Records larger than a block are fragmented and reassembled
// =============================================================================
#[test]
fn large_records_fragment_and_reassemble() {
    let log = build_log(&[
        b"small",
        &big_string("medium", 50_000),
        &big_string("large", 100_000),
    ]);
    let mut harness = open_reader(log, 0);

    assert_eq!(harness.read().unwrap(), b"small");
    assert_eq!(harness.read().unwrap(), big_string("medium", 50_000));
    assert_eq!(harness.read().unwrap(), big_string("large", 100_000));
    assert_eq!(harness.read(), None);
    assert_eq!(harness.dropped_bytes(), 0);
}

// =============================================================================
// Test 5: A record fitting exactly before the trailer leaves room for an
// empty record in the same block
// =============================================================================
#[test]
fn marginal_trailer_fits_empty_record() {
    // First record ends exactly one header short of the block boundary.
    let n = BLOCK_SIZE - 2 * HEADER_SIZE;
    let log = build_log(&[&big_string("foo", n), b"", b"bar"]);
    let mut harness = open_reader(log, 0);

    assert_eq!(harness.read().unwrap(), big_string("foo", n));
    assert_eq!(harness.read().unwrap(), b"");
    assert_eq!(
        harness.reader.last_record_offset(),
        (BLOCK_SIZE - HEADER_SIZE) as u64
    );
    assert_eq!(harness.read().unwrap(), b"bar");
    assert_eq!(harness.read(), None);
}

// =============================================================================
// Test 6: A non-empty record at the same boundary leaves a zero-length
// First fragment at the block tail
// =============================================================================
#[test]
fn marginal_trailer_splits_with_empty_first_fragment() {
    let n = BLOCK_SIZE - 2 * HEADER_SIZE;
    let log = build_log(&[&big_string("foo", n), b"bar"]);
    let mut harness = open_reader(log, 0);

    assert_eq!(harness.read().unwrap(), big_string("foo", n));
    assert_eq!(harness.read().unwrap(), b"bar");
    // "bar" logically starts at the zero-length fragment in block 0.
    assert_eq!(
        harness.reader.last_record_offset(),
        (BLOCK_SIZE - HEADER_SIZE) as u64
    );
    assert_eq!(harness.read(), None);
    assert_eq!(harness.dropped_bytes(), 0);
}

// =============================================================================
// Test 7: Leftover space shorter than a header is zero-filled
// =============================================================================
#[test]
fn short_trailer_is_zero_filled() {
    // First record ends 3 bytes short of the boundary; those 3 bytes
    // cannot hold a header and must be skipped by the reader.
    let n = BLOCK_SIZE - 2 * HEADER_SIZE + 4;
    let log = build_log(&[&big_string("foo", n), b"", b"bar"]);
    assert_eq!(log[BLOCK_SIZE - 3..BLOCK_SIZE], [0, 0, 0]);

    let mut harness = open_reader(log, 0);
    assert_eq!(harness.read().unwrap(), big_string("foo", n));
    assert_eq!(harness.read().unwrap(), b"");
    assert_eq!(harness.reader.last_record_offset(), BLOCK_SIZE as u64);
    assert_eq!(harness.read().unwrap(), b"bar");
    assert_eq!(harness.read(), None);
    assert_eq!(harness.dropped_bytes(), 0);
}

// =============================================================================
// Test 8: File ending flush with a record boundary
// =============================================================================
#[test]
fn aligned_eof() {
    let n = BLOCK_SIZE - 2 * HEADER_SIZE + 4;
    let log = build_log(&[&big_string("foo", n)]);
    let mut harness = open_reader(log, 0);

    assert_eq!(harness.read().unwrap(), big_string("foo", n));
    assert_eq!(harness.read(), None);
    assert_eq!(harness.dropped_bytes(), 0);
}

// =============================================================================
// Test 9: Reopening a log for append continues mid-block
// =============================================================================
#[test]
fn reopen_for_append_continues_mid_block() {
    let mut writer = WALWriter::new(Vec::new());
    writer.add_record(b"hello").unwrap();
    let contents = writer.into_inner();
    let existing = contents.len() as u64;

    let mut writer = WALWriter::with_offset(contents, existing);
    writer.add_record(b"world").unwrap();

    let mut harness = open_reader(writer.into_inner(), 0);
    assert_eq!(harness.read().unwrap(), b"hello");
    assert_eq!(harness.read().unwrap(), b"world");
    assert_eq!(harness.reader.last_record_offset(), existing);
    assert_eq!(harness.read(), None);
}

// =============================================================================
// Test 10: Random record sizes, skewed toward both tiny and huge
// =============================================================================
#[test]
fn random_payload_sizes_round_trip() {
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn skewed(rng: &mut StdRng, max_log: u32) -> usize {
        let base = rng.gen_range(0..=max_log);
        rng.gen_range(0..(1u64 << base) + 1) as usize
    }

    let mut rng = StdRng::seed_from_u64(301);
    let mut sizes = Vec::new();
    let mut writer = WALWriter::new(Vec::new());
    for i in 0..300u32 {
        let size = skewed(&mut rng, 17);
        sizes.push(size);
        writer.add_record(&vec![(i % 251) as u8; size]).unwrap();
    }

    let mut harness = open_reader(writer.into_inner(), 0);
    for (i, size) in sizes.iter().enumerate() {
        assert_eq!(
            harness.read().unwrap(),
            vec![(i % 251) as u8; *size],
            "record {i}"
        );
    }
    assert_eq!(harness.read(), None);
    assert_eq!(harness.dropped_bytes(), 0);
}

// =============================================================================
// Test 11: A record cut off by the end of the file is dropped silently
// =============================================================================
#[test]
fn truncated_trailing_record_is_ignored() {
    let mut log = build_log(&[b"foo"]);
    log.truncate(log.len() - 1);
    let mut harness = open_reader(log, 0);

    assert_eq!(harness.read(), None);
    // A half-written tail is a crash artifact, not corruption.
    assert_eq!(harness.dropped_bytes(), 0);
}

#[test]
fn truncated_header_at_eof_is_ignored() {
    let mut log = build_log(&[b"foo"]);
    log.truncate(HEADER_SIZE - 2);
    let mut harness = open_reader(log, 0);

    assert_eq!(harness.read(), None);
    assert_eq!(harness.dropped_bytes(), 0);
}

// =============================================================================
// Test 12: A length pointing past the block drops the block, then resyncs
// =============================================================================
#[test]
fn bad_record_length_resyncs_to_next_block() {
    let payload = BLOCK_SIZE - HEADER_SIZE;
    let mut log = build_log(&[&big_string("bar", payload), b"foo"]);
    // Least significant length byte lives at header offset 4.
    log[4] = log[4].wrapping_add(1);

    let mut harness = open_reader(log, 0);
    assert_eq!(harness.read().unwrap(), b"foo");
    assert_eq!(harness.read(), None);
    assert_eq!(harness.dropped_bytes(), BLOCK_SIZE as u64);
    assert!(harness.reported("bad record length"));
}

// =============================================================================
// Test 13: A checksum mismatch drops the rest of the buffer
// =============================================================================
#[test]
fn checksum_mismatch_drops_the_buffer() {
    let mut log = build_log(&[b"foooooo"]);
    log[0] = log[0].wrapping_add(14);

    let mut harness = open_reader(log, 0);
    assert_eq!(harness.read(), None);
    // Header plus payload: 7 + 7.
    assert_eq!(harness.dropped_bytes(), 14);
    assert!(harness.reported("checksum mismatch"));
}

// =============================================================================
// Test 14: Unknown record types are reported by value
// =============================================================================
#[test]
fn unknown_record_type_is_reported() {
    let mut log = build_log(&[b"foo"]);
    log[6] = 5;
    fix_checksum(&mut log, 0, 3);

    let mut harness = open_reader(log, 0);
    assert_eq!(harness.read(), None);
    assert_eq!(harness.dropped_bytes(), 3);
    assert!(harness.reported("unknown record type 5"));
}

// =============================================================================
// Test 15: Continuation fragments with no start are reported
// =============================================================================
#[test]
fn middle_without_first_is_reported() {
    let mut log = build_log(&[b"foo"]);
    log[6] = RecordType::Middle as u8;
    fix_checksum(&mut log, 0, 3);

    let mut harness = open_reader(log, 0);
    assert_eq!(harness.read(), None);
    assert_eq!(harness.dropped_bytes(), 3);
    assert!(harness.reported("missing start of fragmented record(1)"));
}

#[test]
fn last_without_first_is_reported() {
    let mut log = build_log(&[b"foo"]);
    log[6] = RecordType::Last as u8;
    fix_checksum(&mut log, 0, 3);

    let mut harness = open_reader(log, 0);
    assert_eq!(harness.read(), None);
    assert_eq!(harness.dropped_bytes(), 3);
    assert!(harness.reported("missing start of fragmented record(2)"));
}

// =============================================================================
// Test 16: A fragment run interrupted by a complete record loses its head
// =============================================================================
#[test]
fn full_record_inside_fragment_reports_earlier_partial() {
    let mut log = build_log(&[b"foo", b"bar"]);
    // Turn "foo" into the start of a fragmented record that never ends.
    log[6] = RecordType::First as u8;
    fix_checksum(&mut log, 0, 3);

    let mut harness = open_reader(log, 0);
    assert_eq!(harness.read().unwrap(), b"bar");
    assert_eq!(harness.read(), None);
    assert_eq!(harness.dropped_bytes(), 3);
    assert!(harness.reported("partial record without end(1)"));
}

#[test]
fn first_fragment_inside_fragment_reports_earlier_partial() {
    let mut log = build_log(&[b"foo", &big_string("bar", 100_000)]);
    log[6] = RecordType::First as u8;
    fix_checksum(&mut log, 0, 3);

    let mut harness = open_reader(log, 0);
    assert_eq!(harness.read().unwrap(), big_string("bar", 100_000));
    assert_eq!(harness.read(), None);
    assert_eq!(harness.dropped_bytes(), 3);
    assert!(harness.reported("partial record without end(2)"));
}

// =============================================================================
// Test 17: Losing the end of a fragment run at EOF is silent
// =============================================================================
#[test]
fn missing_last_fragment_at_eof_is_silent() {
    let mut log = build_log(&[&big_string("bar", BLOCK_SIZE)]);
    // Remove the entire Last fragment.
    log.truncate(log.len() - 14);
    let mut harness = open_reader(log, 0);

    assert_eq!(harness.read(), None);
    assert_eq!(harness.dropped_bytes(), 0);
}

#[test]
fn partial_last_fragment_at_eof_is_silent() {
    let mut log = build_log(&[&big_string("bar", BLOCK_SIZE)]);
    log.truncate(log.len() - 1);
    let mut harness = open_reader(log, 0);

    assert_eq!(harness.read(), None);
    assert_eq!(harness.dropped_bytes(), 0);
}

// =============================================================================
// Test 18: A wrecked block in the middle of two fragment runs takes out
// both records but nothing after them
// =============================================================================
#[test]
fn error_joins_adjacent_records() {
    // Two block-spanning records, then a small one. Wiping the shared
    // middle block destroys both spanning records.
    let mut log = build_log(&[
        &big_string("foo", BLOCK_SIZE),
        &big_string("bar", BLOCK_SIZE),
        b"correct",
    ]);
    for byte in &mut log[BLOCK_SIZE..2 * BLOCK_SIZE] {
        *byte = b'x';
    }

    let mut harness = open_reader(log, 0);
    assert_eq!(harness.read().unwrap(), b"correct");
    assert_eq!(harness.read(), None);
    let dropped = harness.dropped_bytes();
    assert!(dropped >= 2 * BLOCK_SIZE as u64);
    assert!(dropped <= 2 * BLOCK_SIZE as u64 + 100);
}

// =============================================================================
// Test 19: Reads positioned at an arbitrary byte offset
// =============================================================================

/// Four records with known positions:
///   "a" * 10000   at 0
///   "b" * 10000   at 10007
///   "c" * 65536   at 20014 (spans into block 2)
///   "d" * 10000   at 85571
fn positioned_log() -> Vec<u8> {
    build_log(&[
        &big_string("a", 10_000),
        &big_string("b", 10_000),
        &big_string("c", 2 * BLOCK_SIZE),
        &big_string("d", 10_000),
    ])
}

#[test]
fn offset_one_skips_the_first_record() {
    let mut harness = open_reader(positioned_log(), 1);
    assert_eq!(harness.read().unwrap(), big_string("b", 10_000));
    assert_eq!(harness.reader.last_record_offset(), 10_007);
}

#[test]
fn offset_inside_first_record_reads_the_second() {
    let mut harness = open_reader(positioned_log(), 10_000);
    assert_eq!(harness.read().unwrap(), big_string("b", 10_000));
    assert_eq!(harness.reader.last_record_offset(), 10_007);
}

#[test]
fn offset_at_record_start_reads_that_record() {
    let mut harness = open_reader(positioned_log(), 20_014);
    assert_eq!(harness.read().unwrap(), big_string("c", 2 * BLOCK_SIZE));
    assert_eq!(harness.reader.last_record_offset(), 20_014);
    assert_eq!(harness.read().unwrap(), big_string("d", 10_000));
}

#[test]
fn offset_inside_spanning_record_skips_its_fragments() {
    let mut harness = open_reader(positioned_log(), 20_015);
    // The continuation fragments of "c" are passed over without being
    // counted as corruption.
    assert_eq!(harness.read().unwrap(), big_string("d", 10_000));
    assert_eq!(harness.reader.last_record_offset(), 85_571);
    assert_eq!(harness.dropped_bytes(), 0);
    assert_eq!(harness.read(), None);
}

#[test]
fn offset_in_block_trailer_rounds_up_to_next_block() {
    // Offsets within the last 6 bytes of a block belong to the next one.
    let mut harness = open_reader(positioned_log(), BLOCK_SIZE as u64 - 5);
    assert_eq!(harness.read().unwrap(), big_string("d", 10_000));
    assert_eq!(harness.reader.last_record_offset(), 85_571);
}

#[test]
fn offset_at_file_size_reads_nothing() {
    let log = positioned_log();
    let size = log.len() as u64;
    let mut harness = open_reader(log, size);
    assert_eq!(harness.read(), None);
    assert_eq!(harness.dropped_bytes(), 0);
}

#[test]
fn offset_past_file_size_reads_nothing() {
    let log = positioned_log();
    let size = log.len() as u64;
    let mut harness = open_reader(log, size + 20_000);
    assert_eq!(harness.read(), None);
    assert_eq!(harness.dropped_bytes(), 0);
}
