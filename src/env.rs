//! File abstractions the storage formats are written against.
//!
//! Log and table code never touches `std::fs` directly. They speak three
//! small traits, so tests can run against plain byte vectors and production
//! can pick between buffered reads and mmap without the formats noticing.

use std::fs::{File, OpenOptions};
use std::io;
use std::io::{BufWriter, Read, Seek, SeekFrom, Write};
use std::os::unix::fs::FileExt;
use std::path::Path;

use memmap2::Mmap;

use crate::error::{Error, Result};

/// Sequential read access with a cursor. Used by the log reader.
pub trait SequentialFile {
    /// Read up to `buf.len()` bytes, returning how many were read.
    /// Zero means end of file.
    fn read(&mut self, buf: &mut [u8]) -> Result<usize>;

    /// Skip `n` bytes without reading them.
    fn skip(&mut self, n: u64) -> Result<()>;
}

/// Positioned reads with no cursor. Used by the table reader, which serves
/// many iterators from one open file, so implementations must tolerate
/// concurrent calls.
pub trait RandomAccessFile: Send + Sync {
    /// Read up to `scratch.len()` bytes starting at `offset`.
    ///
    /// The returned slice is either a prefix of `scratch` or memory the file
    /// owns outright (an mmap region). Callers that care which, as the block
    /// cache does, can compare pointers. A short slice means the read ran
    /// off the end of the file.
    fn read<'a>(&'a self, offset: u64, scratch: &'a mut [u8]) -> Result<&'a [u8]>;
}

/// Append-only write access. Used by the log and table writers.
pub trait WritableFile {
    fn append(&mut self, data: &[u8]) -> Result<()>;

    /// Push buffered bytes to the OS.
    fn flush(&mut self) -> Result<()>;

    /// Push buffered bytes all the way to the disk. Durability lives here;
    /// when to pay for it is the caller's policy.
    fn sync(&mut self) -> Result<()>;
}

pub struct FsSequentialFile {
    file: File,
}

impl FsSequentialFile {
    pub fn open(path: &Path) -> Result<FsSequentialFile> {
        Ok(FsSequentialFile {
            file: File::open(path)?,
        })
    }
}

impl SequentialFile for FsSequentialFile {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        Ok(self.file.read(buf)?)
    }

    fn skip(&mut self, n: u64) -> Result<()> {
        self.file.seek(SeekFrom::Current(n as i64))?;
        Ok(())
    }
}

pub struct FsRandomAccessFile {
    file: File,
}

impl FsRandomAccessFile {
    pub fn open(path: &Path) -> Result<FsRandomAccessFile> {
        Ok(FsRandomAccessFile {
            file: File::open(path)?,
        })
    }
}

impl RandomAccessFile for FsRandomAccessFile {
    fn read<'a>(&'a self, offset: u64, scratch: &'a mut [u8]) -> Result<&'a [u8]> {
        // pread leaves no cursor to race on
        let mut filled = 0;
        while filled < scratch.len() {
            let n = self
                .file
                .read_at(&mut scratch[filled..], offset + filled as u64)?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        Ok(&scratch[..filled])
    }
}

/// Random access over a memory-mapped file.
///
/// Reads hand back the mapped bytes themselves instead of copying into
/// scratch. The block layer notices and skips re-caching them: the page
/// cache already holds these bytes.
pub struct MmapRandomAccessFile {
    map: Mmap,
}

impl MmapRandomAccessFile {
    pub fn open(path: &Path) -> Result<MmapRandomAccessFile> {
        let file = File::open(path)?;
        // Safety: read-only mapping of a table file, and table files are
        // immutable once written.
        let map = unsafe { Mmap::map(&file)? };
        Ok(MmapRandomAccessFile { map })
    }

    pub fn len(&self) -> u64 {
        self.map.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.map.len() == 0
    }
}

impl RandomAccessFile for MmapRandomAccessFile {
    fn read<'a>(&'a self, offset: u64, scratch: &'a mut [u8]) -> Result<&'a [u8]> {
        let offset = offset as usize;
        let n = scratch.len();
        if offset + n > self.map.len() {
            return Err(Error::InvalidArgument(
                "mmap read past end of file".into(),
            ));
        }
        Ok(&self.map[offset..offset + n])
    }
}

pub struct FsWritableFile {
    writer: BufWriter<File>,
}

impl FsWritableFile {
    /// Create (or truncate) a file for writing.
    pub fn create(path: &Path) -> Result<FsWritableFile> {
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)?;
        Ok(FsWritableFile {
            writer: BufWriter::new(file),
        })
    }

    /// Open an existing file and continue appending to it.
    pub fn open_append(path: &Path) -> Result<FsWritableFile> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(FsWritableFile {
            writer: BufWriter::new(file),
        })
    }
}

impl WritableFile for FsWritableFile {
    fn append(&mut self, data: &[u8]) -> Result<()> {
        self.writer.write_all(data)?;
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }

    fn sync(&mut self) -> Result<()> {
        // Two layers of buffering to drain:
        //   BufWriter.flush()  → Rust buffer → OS page cache
        //   File.sync_all()    → OS page cache → physical disk
        self.writer.flush()?;
        self.writer.get_ref().sync_all()?;
        Ok(())
    }
}

/// In-memory destination. Handy for tests and for sizing experiments.
impl WritableFile for Vec<u8> {
    fn append(&mut self, data: &[u8]) -> Result<()> {
        self.extend_from_slice(data);
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        Ok(())
    }

    fn sync(&mut self) -> Result<()> {
        Ok(())
    }
}

/// In-memory sequential source over an owned buffer.
impl SequentialFile for io::Cursor<Vec<u8>> {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        Ok(io::Read::read(self, buf)?)
    }

    fn skip(&mut self, n: u64) -> Result<()> {
        self.set_position(self.position() + n);
        Ok(())
    }
}

/// In-memory source, the mirror of the `WritableFile` impl above. Copies
/// into scratch like a real file read would.
impl RandomAccessFile for Vec<u8> {
    fn read<'a>(&'a self, offset: u64, scratch: &'a mut [u8]) -> Result<&'a [u8]> {
        let data: &[u8] = self;
        if offset >= data.len() as u64 {
            return Ok(&scratch[..0]);
        }
        let offset = offset as usize;
        let n = scratch.len().min(data.len() - offset);
        scratch[..n].copy_from_slice(&data[offset..offset + n]);
        Ok(&scratch[..n])
    }
}
