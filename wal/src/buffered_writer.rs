// 1. Local crate imports
use wal_core::{Error, Result};

// 2. External crate imports
// (none in this file)

// 3. Standard library imports
use std::fs::File;
use std::io::Write;

/// Amortizes small appends into batched `write()` syscalls with an explicit
/// flush-then-fsync operation.
///
/// A `BufferedFileWriter` owns the file handle exclusively; it is not
/// `Sync` on its own and callers (the segment writer, the meta index
/// manager) are responsible for serializing access, typically behind a
/// `parking_lot::Mutex` or the coordinator's write lock.
///
/// # Durability
///
/// Bytes passed to [`write`](Self::write) are only guaranteed to survive a
/// crash once [`flush`](Self::flush) returns `Ok`. `flush` is idempotent:
/// calling it twice in a row with no intervening `write` performs the
/// second call's `fsync` as a no-op (tracked via a dirty flag, not merely
/// an empty buffer check).
pub struct BufferedFileWriter {
    file: File,
    buf: Vec<u8>,
    capacity: usize,
    dirty: bool,
}

impl BufferedFileWriter {
    /// Wraps `file`, buffering up to `capacity` bytes before spilling to
    /// disk.
    pub fn new(file: File, capacity: usize) -> Self {
        Self {
            file,
            buf: Vec::with_capacity(capacity),
            capacity,
            dirty: false,
        }
    }

    /// Appends `bytes` logically at end-of-file.
    ///
    /// If the buffer is currently empty and `bytes` alone exceeds
    /// `capacity`, it is written straight through. Otherwise the buffer is
    /// filled and flushed in `capacity`-sized rounds, with any trailing
    /// remainder left buffered for a later call.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ShortWrite`] if an underlying `write` call returns
    /// fewer bytes than requested. The write is not retried; the caller
    /// decides how to proceed.
    pub fn write(&mut self, bytes: &[u8]) -> Result<()> {
        if bytes.is_empty() {
            return Ok(());
        }

        if self.buf.is_empty() && bytes.len() > self.capacity {
            Self::write_once(&mut self.file, bytes)?;
            self.dirty = true;
            return Ok(());
        }

        let mut remaining = bytes;
        while !remaining.is_empty() {
            let space = self.capacity - self.buf.len();
            let take = space.min(remaining.len());
            self.buf.extend_from_slice(&remaining[..take]);
            remaining = &remaining[take..];
            self.dirty = true;
            if self.buf.len() == self.capacity && !remaining.is_empty() {
                self.flush_buffer()?;
            }
        }
        Ok(())
    }

    /// Writes any buffered bytes, then issues an `fsync` on the file —
    /// unless nothing has been written since the previous `flush`, in
    /// which case the `fsync` is elided.
    pub fn flush(&mut self) -> Result<()> {
        self.flush_buffer()?;
        if self.dirty {
            self.file.sync_all()?;
            self.dirty = false;
        }
        Ok(())
    }

    /// Flushes and releases the file handle.
    pub fn close(mut self) -> Result<()> {
        self.flush()
    }

    fn flush_buffer(&mut self) -> Result<()> {
        if !self.buf.is_empty() {
            Self::write_once(&mut self.file, &self.buf)?;
            self.buf.clear();
        }
        Ok(())
    }

    fn write_once(file: &mut File, bytes: &[u8]) -> Result<()> {
        let wrote = file.write(bytes)?;
        if wrote != bytes.len() {
            return Err(Error::ShortWrite {
                wrote,
                requested: bytes.len(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::OpenOptions;
    use std::io::Read;
    use tempfile::TempDir;

    fn open(dir: &TempDir, name: &str) -> File {
        OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(dir.path().join(name))
            .unwrap()
    }

    #[test]
    fn write_under_capacity_stays_buffered_until_flush() {
        let dir = TempDir::new().unwrap();
        let file = open(&dir, "a.log");
        let mut writer = BufferedFileWriter::new(file, 64);

        writer.write(b"hello").unwrap();

        let mut raw = File::open(dir.path().join("a.log")).unwrap();
        let mut contents = Vec::new();
        raw.read_to_end(&mut contents).unwrap();
        assert!(contents.is_empty());

        writer.flush().unwrap();
        let mut contents = Vec::new();
        File::open(dir.path().join("a.log"))
            .unwrap()
            .read_to_end(&mut contents)
            .unwrap();
        assert_eq!(contents, b"hello");
    }

    #[test]
    fn write_larger_than_capacity_bypasses_buffer() {
        let dir = TempDir::new().unwrap();
        let file = open(&dir, "b.log");
        let mut writer = BufferedFileWriter::new(file, 4);

        writer.write(b"this is longer than four bytes").unwrap();

        let mut contents = Vec::new();
        File::open(dir.path().join("b.log"))
            .unwrap()
            .read_to_end(&mut contents)
            .unwrap();
        assert_eq!(contents, b"this is longer than four bytes");
    }

    #[test]
    fn fill_flush_repeat_leaves_remainder_buffered() {
        let dir = TempDir::new().unwrap();
        let file = open(&dir, "c.log");
        let mut writer = BufferedFileWriter::new(file, 4);

        writer.write(b"abcdefgh12").unwrap();

        let mut contents = Vec::new();
        File::open(dir.path().join("c.log"))
            .unwrap()
            .read_to_end(&mut contents)
            .unwrap();
        assert_eq!(contents, b"abcdefgh");

        writer.flush().unwrap();
        let mut contents = Vec::new();
        File::open(dir.path().join("c.log"))
            .unwrap()
            .read_to_end(&mut contents)
            .unwrap();
        assert_eq!(contents, b"abcdefgh12");
    }

    #[test]
    fn flush_is_idempotent_when_nothing_new_was_written() {
        let dir = TempDir::new().unwrap();
        let file = open(&dir, "d.log");
        let mut writer = BufferedFileWriter::new(file, 64);

        writer.write(b"x").unwrap();
        writer.flush().unwrap();
        writer.flush().unwrap();
        writer.flush().unwrap();

        let mut contents = Vec::new();
        File::open(dir.path().join("d.log"))
            .unwrap()
            .read_to_end(&mut contents)
            .unwrap();
        assert_eq!(contents, b"x");
    }

    #[test]
    fn total_bytes_observed_equal_sum_of_inputs() {
        let dir = TempDir::new().unwrap();
        let file = open(&dir, "e.log");
        let mut writer = BufferedFileWriter::new(file, 8);

        let inputs: &[&[u8]] = &[b"a", b"bc", b"def", b"ghij", b"klmno"];
        for chunk in inputs {
            writer.write(chunk).unwrap();
        }
        writer.flush().unwrap();

        let expected: Vec<u8> = inputs.iter().flat_map(|c| c.iter().copied()).collect();
        let mut contents = Vec::new();
        File::open(dir.path().join("e.log"))
            .unwrap()
            .read_to_end(&mut contents)
            .unwrap();
        assert_eq!(contents, expected);
    }
}
