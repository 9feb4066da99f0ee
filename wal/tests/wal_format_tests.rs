mod common;

use common::{registry, TextPayload};
use tempfile::TempDir;
use wal::{Wal, WalOptions};
use wal_core::EntryPayload;

/// One record's on-disk frame is
/// `Index(4B BE) | Type(1B) | CRC(4B BE) | Payload`, with the CRC computed
/// over the payload bytes alone. This checks the bytes a single `write`
/// actually lands on disk, not just round-trip decoding, so a change that
/// silently reorders or widens the header would be caught here even if
/// `read_offset` still happened to decode it correctly.
#[tokio::test]
async fn single_record_frame_matches_the_documented_layout() {
    let dir = TempDir::new().unwrap();
    let wal = Wal::open(dir.path(), registry(), WalOptions::default())
        .await
        .unwrap();

    let payload = TextPayload::new("test");
    let encoded = payload.encode();
    wal.write(&payload).await.unwrap();

    let bytes = std::fs::read(dir.path().join("0.wal")).unwrap();
    assert_eq!(bytes.len(), 9 + encoded.len());

    let index = u32::from_be_bytes(bytes[0..4].try_into().unwrap());
    let type_tag = bytes[4];
    let crc = u32::from_be_bytes(bytes[5..9].try_into().unwrap());
    let body = &bytes[9..];

    assert_eq!(index, 0);
    assert_eq!(type_tag, payload.type_tag());
    assert_eq!(body, encoded.as_slice());

    let mut hasher = crc32fast::Hasher::new();
    hasher.update(&encoded);
    assert_eq!(crc, hasher.finalize());
}

/// Two back-to-back records pack with no padding: the second frame's index
/// field starts exactly where the first frame's bytes end.
#[tokio::test]
async fn consecutive_records_are_packed_with_no_padding() {
    let dir = TempDir::new().unwrap();
    let wal = Wal::open(dir.path(), registry(), WalOptions::default())
        .await
        .unwrap();

    let first = TextPayload::new("a");
    let second = TextPayload::new("bb");
    let first_encoded = first.encode();
    wal.write(&first).await.unwrap();
    wal.write(&second).await.unwrap();

    let bytes = std::fs::read(dir.path().join("0.wal")).unwrap();
    let second_frame_start = 9 + first_encoded.len();
    let second_index = u32::from_be_bytes(
        bytes[second_frame_start..second_frame_start + 4]
            .try_into()
            .unwrap(),
    );
    assert_eq!(second_index, 1);
}

/// `index.META` is a 20-byte header (`"META" | Base | Head | Commit |
/// CurrentSegment`, all big-endian, `Commit` signed) followed by dense
/// 8-byte `(SegmentID, ByteOffset)` entries — no buffering-mode flag or
/// other metadata leaks into the on-disk layout.
#[tokio::test]
async fn meta_file_header_and_entries_match_the_documented_layout() {
    let dir = TempDir::new().unwrap();
    let wal = Wal::open(dir.path(), registry(), WalOptions::default())
        .await
        .unwrap();

    wal.write(&TextPayload::new("a")).await.unwrap();
    wal.write(&TextPayload::new("b")).await.unwrap();
    wal.commit(0).await.unwrap();
    wal.close().await.unwrap();

    let bytes = std::fs::read(dir.path().join("index.META")).unwrap();
    assert_eq!(&bytes[0..4], b"META");
    let base = u32::from_be_bytes(bytes[4..8].try_into().unwrap());
    let head = u32::from_be_bytes(bytes[8..12].try_into().unwrap());
    let commit = i32::from_be_bytes(bytes[12..16].try_into().unwrap());
    let current_segment = u32::from_be_bytes(bytes[16..20].try_into().unwrap());

    assert_eq!(base, 0);
    assert_eq!(head, 2);
    assert_eq!(commit, 0);
    assert_eq!(current_segment, 0);

    assert_eq!(bytes.len(), 20 + 2 * 8);
    let entry0_segment = u32::from_be_bytes(bytes[20..24].try_into().unwrap());
    let entry0_offset = u32::from_be_bytes(bytes[24..28].try_into().unwrap());
    let entry1_segment = u32::from_be_bytes(bytes[28..32].try_into().unwrap());
    let entry1_offset = u32::from_be_bytes(bytes[32..36].try_into().unwrap());

    assert_eq!((entry0_segment, entry0_offset), (0, 0));
    assert_eq!(entry1_segment, 0);
    assert!(entry1_offset > 0);
}

/// A fresh, never-written directory still gets an `index.META` with
/// `Base = Head = 0`, `Commit = -1`, `CurrentSegment = 0` and no trailing
/// entries.
#[tokio::test]
async fn fresh_meta_file_has_empty_header_and_no_entries() {
    let dir = TempDir::new().unwrap();
    let wal = Wal::open(dir.path(), registry(), WalOptions::default())
        .await
        .unwrap();
    wal.close().await.unwrap();

    let bytes = std::fs::read(dir.path().join("index.META")).unwrap();
    assert_eq!(bytes.len(), 20);
    let base = u32::from_be_bytes(bytes[4..8].try_into().unwrap());
    let head = u32::from_be_bytes(bytes[8..12].try_into().unwrap());
    let commit = i32::from_be_bytes(bytes[12..16].try_into().unwrap());
    assert_eq!((base, head, commit), (0, 0, -1));
}
