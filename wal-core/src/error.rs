use std::io;

/// Errors produced by the write-ahead log stack.
///
/// Every variant here corresponds to a failure mode a host application must
/// be able to distinguish: some are recoverable by truncating the log
/// (`CorruptEntry`, `UnexpectedEof`), some indicate programmer error
/// (`OutOfOrderCommit`, `OutOfBounds`), and `Io` wraps the underlying
/// filesystem.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Operation attempted on a WAL that has already been closed.
    #[error("WAL is closed")]
    Closed,

    /// `index.META` exists but its marker bytes are not "META".
    #[error("invalid meta file marker")]
    InvalidMetaMarker,

    /// A frame referenced a type tag with no registered codec.
    #[error("unknown entry type tag {0}")]
    UnknownType(u8),

    /// CRC-32 of a payload did not match the stored frame checksum.
    #[error("corrupt entry at index {index}: checksum mismatch")]
    CorruptEntry { index: u32 },

    /// A frame header was shorter than `FRAME_HEADER_SIZE` bytes.
    #[error("unexpected EOF while reading frame header")]
    UnexpectedEof,

    /// `decode()` was called on a reader with no successful `read_next()`.
    #[error("no current entry buffered")]
    NoCurrentEntry,

    /// `position`/`truncate` referenced an index outside `[base, head)`.
    #[error("index {index} out of bounds [{base}, {head})")]
    OutOfBounds { index: u32, base: u32, head: u32 },

    /// `truncate` targeted an index at or before the commit point.
    #[error("cannot truncate at {target}: already committed through {commit}")]
    TruncateCommitted { target: u32, commit: i64 },

    /// `commit(i)` was called with `i` more than one past the current commit.
    #[error("out-of-order commit: expected {expected}, got {got}")]
    OutOfOrderCommit { expected: u32, got: u32 },

    /// Meta append saw a segment id smaller than the current segment.
    #[error("out-of-order segment: {segment} < current {current}")]
    OutOfOrderSegment { segment: u32, current: u32 },

    /// `commit_up_to(i)` was called with `i` already committed.
    #[error("index {0} is already committed")]
    AlreadyCommitted(u32),

    /// An underlying `write` returned fewer bytes than requested.
    #[error("short write: wrote {wrote} of {requested} bytes")]
    ShortWrite { wrote: usize, requested: usize },

    /// Filesystem error.
    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
