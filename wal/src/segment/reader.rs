// 1. Local crate imports
use super::FRAME_HEADER_SIZE;
use wal_core::{Entry, Error, Registry, Result};

// 2. External crate imports
use crc32fast::Hasher;

// 3. Standard library imports
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

struct PendingFrame {
    index: u32,
    type_tag: u8,
    crc: u32,
    raw: Vec<u8>,
}

/// Random and sequential decoding of framed records from one segment file.
///
/// A reader owns its own file handle, so it can be opened and used
/// independently of whatever [`super::SegmentWriter`] (if any) is
/// currently appending to the same path — readers never take the
/// coordinator's write lock.
pub struct SegmentReader {
    file: File,
    registry: Registry,
    cursor: u64,
    pending: Option<PendingFrame>,
}

impl SegmentReader {
    pub fn open(path: impl AsRef<Path>, registry: Registry) -> Result<Self> {
        let file = File::open(path.as_ref())?;
        Ok(Self {
            file,
            registry,
            cursor: 0,
            pending: None,
        })
    }

    /// Advances the cursor by one frame.
    ///
    /// Returns `Ok(false)` on clean EOF (zero bytes where a header was
    /// expected). A short header (1-8 bytes) fails with
    /// [`Error::UnexpectedEof`]. Checksum is intentionally not validated
    /// here; call [`decode`](Self::decode) for that.
    pub fn read_next(&mut self) -> Result<bool> {
        self.file.seek(SeekFrom::Start(self.cursor))?;

        let mut header = [0u8; FRAME_HEADER_SIZE];
        let got = read_up_to(&mut self.file, &mut header)?;
        if got == 0 {
            self.pending = None;
            return Ok(false);
        }
        if got < FRAME_HEADER_SIZE {
            return Err(Error::UnexpectedEof);
        }

        let index = u32::from_be_bytes(header[0..4].try_into().unwrap());
        let type_tag = header[4];
        let crc = u32::from_be_bytes(header[5..9].try_into().unwrap());

        let codec = self.registry.get(type_tag)?.clone();
        let raw = codec.read(&mut self.file)?;

        self.cursor += FRAME_HEADER_SIZE as u64 + raw.len() as u64;
        self.pending = Some(PendingFrame {
            index,
            type_tag,
            crc,
            raw,
        });
        Ok(true)
    }

    /// Validates the CRC of the last frame read by [`read_next`](Self::read_next)
    /// and decodes its payload.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::NoCurrentEntry`] if no `read_next` call has
    /// succeeded since the reader was opened or since the last clean EOF,
    /// and [`Error::CorruptEntry`] on a checksum mismatch.
    pub fn decode(&self) -> Result<Entry> {
        let pending = self.pending.as_ref().ok_or(Error::NoCurrentEntry)?;

        let mut hasher = Hasher::new();
        hasher.update(&pending.raw);
        if hasher.finalize() != pending.crc {
            return Err(Error::CorruptEntry {
                index: pending.index,
            });
        }

        let codec = self.registry.get(pending.type_tag)?;
        let payload = codec.decode(&pending.raw)?;
        Ok(Entry {
            index: pending.index,
            type_tag: pending.type_tag,
            payload,
        })
    }

    /// Reads to the end of the segment, returning the last successfully
    /// read logical index, or `None` if the segment holds no frames.
    pub fn seek_end(&mut self) -> Result<Option<u32>> {
        let mut last = None;
        while self.read_next()? {
            last = self.pending.as_ref().map(|p| p.index);
        }
        Ok(last)
    }

    /// One-shot random read at `byte_offset`: reads the frame there,
    /// validates its CRC and decodes it.
    pub fn read_offset(&mut self, byte_offset: u64) -> Result<Entry> {
        self.cursor = byte_offset;
        if !self.read_next()? {
            return Err(Error::UnexpectedEof);
        }
        self.decode()
    }
}

fn read_up_to(file: &mut File, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut total = 0;
    while total < buf.len() {
        let n = file.read(&mut buf[total..])?;
        if n == 0 {
            break;
        }
        total += n;
    }
    Ok(total)
}
