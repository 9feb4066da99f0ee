// 1. Local crate imports
use super::FRAME_HEADER_SIZE;
use crate::buffered_writer::BufferedFileWriter;
use wal_core::Result;

// 2. External crate imports
use bytes::{BufMut, BytesMut};

// 3. Standard library imports
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};

/// Appends framed records to one segment file.
///
/// `size` tracks bytes appended since construction (including frame
/// headers), used by the coordinator to decide when to roll to a new
/// segment. It is a plain field, not an atomic: the coordinator's write
/// lock guarantees a `SegmentWriter` has at most one caller at a time.
pub struct SegmentWriter {
    path: PathBuf,
    writer: BufferedFileWriter,
    size: u64,
}

impl SegmentWriter {
    /// Opens `path` for append, creating it if absent. `size` is seeded
    /// from the file's existing length so a re-opened segment (e.g. after
    /// recovery locates the highest-numbered segment on init) keeps
    /// accurate rollover accounting.
    pub fn open(path: impl AsRef<Path>, buffer_capacity: usize) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&path)?;
        let size = file.metadata()?.len();
        Ok(Self {
            path,
            writer: BufferedFileWriter::new(file, buffer_capacity),
            size,
        })
    }

    /// Emits the 9-byte frame header followed by `payload`.
    ///
    /// Returns the byte offset at which this record begins, equal to the
    /// cumulative bytes appended before this call.
    pub fn write(&mut self, index: u32, type_tag: u8, crc: u32, payload: &[u8]) -> Result<u64> {
        let prior_size = self.size;

        let mut header = BytesMut::with_capacity(FRAME_HEADER_SIZE);
        header.put_u32(index);
        header.put_u8(type_tag);
        header.put_u32(crc);
        self.writer.write(&header)?;
        self.writer.write(payload)?;

        self.size += FRAME_HEADER_SIZE as u64 + payload.len() as u64;
        Ok(prior_size)
    }

    /// Flushes and fsyncs the underlying buffered writer. This is the
    /// durability point: bytes appended since the previous `sync` are not
    /// guaranteed to survive a crash until this returns `Ok`.
    pub fn sync(&mut self) -> Result<()> {
        self.writer.flush()
    }

    /// Syncs, then releases the file handle.
    pub fn close(mut self) -> Result<()> {
        self.sync()?;
        Ok(())
    }

    /// Cumulative bytes appended since construction.
    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Truncates the segment file at `path` to `len` bytes, for crash-recovery
/// and explicit-truncate callers that need to drop a partially written
/// tail without going through a `SegmentWriter`.
pub fn truncate_file(path: impl AsRef<Path>, len: u64) -> Result<()> {
    let file = OpenOptions::new().write(true).open(path.as_ref())?;
    file.set_len(len)?;
    Ok(())
}
