//! On-disk record framing and the segment writer/reader built on top of it.

mod reader;
mod writer;

pub use reader::SegmentReader;
pub use writer::{truncate_file, SegmentWriter};

/// `Index (4B) + Type (1B) + CRC (4B)`; the payload follows and is not
/// counted here.
pub const FRAME_HEADER_SIZE: usize = 9;

/// Default [`crate::buffered_writer::BufferedFileWriter`] capacity for a
/// segment file.
pub const DEFAULT_WRITE_BUFFER_SIZE: usize = 64 * 1024;

/// Builds the `<segmentID>.wal` file name for `segment_id`.
pub fn segment_file_name(segment_id: u32) -> String {
    format!("{segment_id}.wal")
}
