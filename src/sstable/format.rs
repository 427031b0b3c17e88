use crate::coding::{decode_fixed32, get_varint64, put_fixed32, put_varint64};
use crate::crc32c;
use crate::env::RandomAccessFile;
use crate::error::{Error, Result};
use crate::options::{CompressionType, ReadOptions};

/// Location of a block within a table file: offset and size of the raw
/// block, excluding the 5-byte trailer that follows it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BlockHandle {
    pub offset: u64,
    pub size: u64,
}

impl BlockHandle {
    /// Worst-case encoded length: two varint64s.
    pub const MAX_ENCODED_LENGTH: usize = 10 + 10;

    pub fn new(offset: u64, size: u64) -> BlockHandle {
        BlockHandle { offset, size }
    }

    pub fn encode_to(&self, dst: &mut Vec<u8>) {
        put_varint64(dst, self.offset);
        put_varint64(dst, self.size);
    }

    /// Decodes a handle from the front of `input`, leaving `input` at
    /// whatever follows it.
    pub fn decode_from(input: &mut &[u8]) -> Result<BlockHandle> {
        let offset = get_varint64(input)
            .ok_or_else(|| Error::Corruption("bad block handle".into()))?;
        let size = get_varint64(input)
            .ok_or_else(|| Error::Corruption("bad block handle".into()))?;
        Ok(BlockHandle { offset, size })
    }
}

/// Sentinel at the very end of every table file. Spells "LSM_TBL\0".
pub const TABLE_MAGIC: u64 = 0x4C53_4D5F_5442_4C00;

/// Encoded footer length: two maximally-padded handles plus the magic.
/// The footer is the one fixed-size structure in the file, so it can be
/// found by reading the last 48 bytes.
pub const FOOTER_ENCODED_LENGTH: usize = 2 * BlockHandle::MAX_ENCODED_LENGTH + 8;

/// Trailer after every block: 1-byte compression tag + 4-byte masked
/// crc32c of the block contents and the tag.
pub const BLOCK_TRAILER_SIZE: usize = 5;

/// The fixed tail of a table file, pointing at the metaindex and index
/// blocks.
#[derive(Debug, Clone, Copy, Default)]
pub struct Footer {
    pub metaindex_handle: BlockHandle,
    pub index_handle: BlockHandle,
}

impl Footer {
    pub fn encode_to(&self, dst: &mut Vec<u8>) {
        let original = dst.len();
        self.metaindex_handle.encode_to(dst);
        self.index_handle.encode_to(dst);
        // Varint handles are variable-length; pad so the magic always
        // sits in the final 8 bytes.
        dst.resize(original + 2 * BlockHandle::MAX_ENCODED_LENGTH, 0);
        put_fixed32(dst, (TABLE_MAGIC & 0xffff_ffff) as u32);
        put_fixed32(dst, (TABLE_MAGIC >> 32) as u32);
        debug_assert_eq!(dst.len(), original + FOOTER_ENCODED_LENGTH);
    }

    pub fn decode_from(input: &[u8]) -> Result<Footer> {
        if input.len() < FOOTER_ENCODED_LENGTH {
            return Err(Error::Corruption("footer too short".into()));
        }
        let magic_lo = decode_fixed32(&input[FOOTER_ENCODED_LENGTH - 8..]);
        let magic_hi = decode_fixed32(&input[FOOTER_ENCODED_LENGTH - 4..]);
        let magic = (magic_hi as u64) << 32 | magic_lo as u64;
        if magic != TABLE_MAGIC {
            return Err(Error::Corruption(
                "not a table file (bad magic number)".into(),
            ));
        }

        let mut cursor = &input[..FOOTER_ENCODED_LENGTH - 8];
        let metaindex_handle = BlockHandle::decode_from(&mut cursor)?;
        let index_handle = BlockHandle::decode_from(&mut cursor)?;
        Ok(Footer {
            metaindex_handle,
            index_handle,
        })
    }
}

/// Raw result of reading one block: the uncompressed bytes plus whether
/// they belong in the block cache. Bytes served out of a memory-mapped
/// file stay with the OS page cache and are not cachable.
#[derive(Debug)]
pub struct BlockContents {
    pub data: Vec<u8>,
    pub cachable: bool,
}

/// Read the block at `handle` and return its verified, uncompressed
/// contents.
pub fn read_block(
    file: &dyn RandomAccessFile,
    options: &ReadOptions,
    handle: &BlockHandle,
) -> Result<BlockContents> {
    let n = handle.size as usize;
    let mut scratch = vec![0u8; n + BLOCK_TRAILER_SIZE];
    let scratch_ptr = scratch.as_ptr();
    let data = file.read(handle.offset, &mut scratch)?;
    if data.len() != n + BLOCK_TRAILER_SIZE {
        return Err(Error::Corruption("truncated block read".into()));
    }

    // The crc in the trailer covers the payload and the tag byte.
    if options.verify_checksums {
        let expected = crc32c::unmask(decode_fixed32(&data[n + 1..]));
        let actual = crc32c::value(&data[..n + 1]);
        if actual != expected {
            return Err(Error::Corruption("block checksum mismatch".into()));
        }
    }

    let from_scratch = std::ptr::eq(data.as_ptr(), scratch_ptr);
    match CompressionType::from_u8(data[n]) {
        Some(CompressionType::None) => {
            if from_scratch {
                // data is scratch itself; trim the trailer and hand the
                // buffer over without copying.
                scratch.truncate(n);
                Ok(BlockContents {
                    data: scratch,
                    cachable: true,
                })
            } else {
                // The file returned its own memory (an mmap window).
                Ok(BlockContents {
                    data: data[..n].to_vec(),
                    cachable: false,
                })
            }
        }
        Some(CompressionType::Snappy) => {
            let ulength = snap::raw::decompress_len(&data[..n]).map_err(|_| {
                Error::Corruption("corrupted compressed block contents".into())
            })?;
            let mut ubuf = vec![0u8; ulength];
            snap::raw::Decoder::new()
                .decompress(&data[..n], &mut ubuf)
                .map_err(|_| {
                    Error::Corruption("corrupted compressed block contents".into())
                })?;
            Ok(BlockContents {
                data: ubuf,
                cachable: true,
            })
        }
        None => Err(Error::Corruption("bad block type".into())),
    }
}
