//! The crash-safe second file: a fixed header plus a dense array mapping
//! logical index → `(segmentID, byteOffset)`.

// 1. Local crate imports
use wal_core::{Error, Result};

// 2. External crate imports
use parking_lot::Mutex;

// 3. Standard library imports
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

const MARKER: &[u8; 4] = b"META";
const HEADER_SIZE: u64 = 20;
const INDEX_ENTRY_SIZE: u64 = 8;
const COMPACTION_BATCH_SIZE: usize = 256;

const META_FILE_NAME: &str = "index.META";
const META_TMP_FILE_NAME: &str = "index.META.tmp";

/// Configuration for the [`MetaIndexManager`]'s write-batching behavior.
#[derive(Debug, Clone)]
pub struct MetaOptions {
    /// Batched (`true`) vs direct (`false`) persistence of index-slot
    /// writes. See module docs.
    pub buffering_enabled: bool,
    /// Queue size that forces a batched flush.
    pub max_buffer_size: usize,
    /// Period of the background flush timer in batched mode.
    pub auto_sync_interval: Duration,
}

impl Default for MetaOptions {
    fn default() -> Self {
        Self {
            buffering_enabled: true,
            max_buffer_size: 1024,
            auto_sync_interval: Duration::from_millis(1000),
        }
    }
}

/// In-memory mirror of the 20-byte on-disk header.
#[derive(Debug, Clone, Copy)]
struct Header {
    base: u32,
    head: u32,
    commit: i32,
    current_segment: u32,
}

impl Header {
    fn fresh() -> Self {
        Self {
            base: 0,
            head: 0,
            commit: -1,
            current_segment: 0,
        }
    }

    fn encode(&self) -> [u8; HEADER_SIZE as usize] {
        let mut buf = [0u8; HEADER_SIZE as usize];
        buf[0..4].copy_from_slice(MARKER);
        buf[4..8].copy_from_slice(&self.base.to_be_bytes());
        buf[8..12].copy_from_slice(&self.head.to_be_bytes());
        buf[12..16].copy_from_slice(&self.commit.to_be_bytes());
        buf[16..20].copy_from_slice(&self.current_segment.to_be_bytes());
        buf
    }

    fn decode(buf: &[u8; HEADER_SIZE as usize]) -> Result<Self> {
        if &buf[0..4] != MARKER {
            return Err(Error::InvalidMetaMarker);
        }
        Ok(Self {
            base: u32::from_be_bytes(buf[4..8].try_into().unwrap()),
            head: u32::from_be_bytes(buf[8..12].try_into().unwrap()),
            commit: i32::from_be_bytes(buf[12..16].try_into().unwrap()),
            current_segment: u32::from_be_bytes(buf[16..20].try_into().unwrap()),
        })
    }

    fn local_index(&self, index: u32) -> u32 {
        index - self.base
    }
}

struct MetaState {
    file: File,
    header: Header,
    header_dirty: bool,
    queued: Vec<(u32, u32)>,
    queued_start_slot: Option<u32>,
}

impl MetaState {
    /// Writes the 12-byte `[Head, Commit, CurrentSegment]` tail at offset 8.
    fn write_header_tail(&mut self) -> Result<()> {
        let mut tail = [0u8; 12];
        tail[0..4].copy_from_slice(&self.header.head.to_be_bytes());
        tail[4..8].copy_from_slice(&self.header.commit.to_be_bytes());
        tail[8..12].copy_from_slice(&self.header.current_segment.to_be_bytes());
        self.file.seek(SeekFrom::Start(8))?;
        self.file.write_all(&tail)?;
        Ok(())
    }

    /// Writes the header tail and fsyncs immediately, clearing the dirty
    /// flag. Used by direct mode and by `truncate`, both of which persist
    /// the header regardless of what's queued.
    fn persist_header_now(&mut self) -> Result<()> {
        self.write_header_tail()?;
        self.file.sync_all()?;
        self.header_dirty = false;
        Ok(())
    }

    fn write_entry(&mut self, slot: u32, segment_id: u32, byte_offset: u32) -> Result<()> {
        let mut entry = [0u8; INDEX_ENTRY_SIZE as usize];
        entry[0..4].copy_from_slice(&segment_id.to_be_bytes());
        entry[4..8].copy_from_slice(&byte_offset.to_be_bytes());
        let offset = HEADER_SIZE + slot as u64 * INDEX_ENTRY_SIZE;
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.write_all(&entry)?;
        Ok(())
    }

    fn read_entry(&mut self, slot: u32) -> Result<(u32, u32)> {
        let offset = HEADER_SIZE + slot as u64 * INDEX_ENTRY_SIZE;
        self.file.seek(SeekFrom::Start(offset))?;
        let mut buf = [0u8; INDEX_ENTRY_SIZE as usize];
        self.file.read_exact(&mut buf)?;
        Ok((
            u32::from_be_bytes(buf[0..4].try_into().unwrap()),
            u32::from_be_bytes(buf[4..8].try_into().unwrap()),
        ))
    }

    /// Writes any queued entries and, if the header has changed since the
    /// last flush, the header tail too — then fsyncs. A no-op only when
    /// both the queue is empty and the header is clean, so a `commit`/
    /// `commit_up_to` that lands between two entry flushes still gets
    /// persisted even though it queued no index entries itself.
    fn flush(&mut self) -> Result<()> {
        if self.queued.is_empty() && !self.header_dirty {
            return Ok(());
        }
        if !self.queued.is_empty() {
            let start_slot = self
                .queued_start_slot
                .expect("non-empty queue always has a recorded start slot");
            let mut buf = Vec::with_capacity(self.queued.len() * INDEX_ENTRY_SIZE as usize);
            for (segment_id, byte_offset) in &self.queued {
                buf.extend_from_slice(&segment_id.to_be_bytes());
                buf.extend_from_slice(&byte_offset.to_be_bytes());
            }
            let offset = HEADER_SIZE + start_slot as u64 * INDEX_ENTRY_SIZE;
            self.file.seek(SeekFrom::Start(offset))?;
            self.file.write_all(&buf)?;
        }
        self.write_header_tail()?;
        self.file.sync_all()?;
        self.queued.clear();
        self.queued_start_slot = None;
        self.header_dirty = false;
        Ok(())
    }
}

/// Owns `index.META`: header pointers plus the dense index-entry array.
///
/// In batched mode a background thread flushes on `auto_sync_interval`; the
/// thread is joined on [`close`](Self::close). The manager is fully
/// synchronous (no tokio dependency) so it can be driven from the
/// coordinator's `spawn_blocking` suspension points or exercised directly
/// in tests without a runtime.
pub struct MetaIndexManager {
    dir: PathBuf,
    state: Arc<Mutex<MetaState>>,
    options: MetaOptions,
    stop: Arc<AtomicBool>,
    flush_thread: Mutex<Option<JoinHandle<()>>>,
}

impl MetaIndexManager {
    /// Opens `index.META` under `dir`, creating it if absent. Deletes a
    /// stale `index.META.tmp` left behind by a crash mid-compaction.
    pub fn open(dir: impl AsRef<Path>, options: MetaOptions) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        let path = dir.join(META_FILE_NAME);
        let tmp_path = dir.join(META_TMP_FILE_NAME);

        if tmp_path.exists() {
            log::warn!("removing stale {}", tmp_path.display());
            std::fs::remove_file(&tmp_path)?;
        }

        let (file, header) = if path.exists() {
            let mut file = OpenOptions::new().read(true).write(true).open(&path)?;
            let mut buf = [0u8; HEADER_SIZE as usize];
            file.read_exact(&mut buf)?;
            let header = Header::decode(&buf)?;
            (file, header)
        } else {
            let mut file = OpenOptions::new()
                .create(true)
                .read(true)
                .write(true)
                .open(&path)?;
            let header = Header::fresh();
            file.write_all(&header.encode())?;
            file.sync_all()?;
            (file, header)
        };

        let state = Arc::new(Mutex::new(MetaState {
            file,
            header,
            header_dirty: false,
            queued: Vec::new(),
            queued_start_slot: None,
        }));

        let stop = Arc::new(AtomicBool::new(false));
        let flush_thread = if options.buffering_enabled {
            Some(spawn_flush_thread(
                Arc::clone(&state),
                Arc::clone(&stop),
                options.auto_sync_interval,
            ))
        } else {
            None
        };

        Ok(Self {
            dir,
            state,
            options,
            stop,
            flush_thread: Mutex::new(flush_thread),
        })
    }

    pub fn base(&self) -> u32 {
        self.state.lock().header.base
    }

    pub fn head(&self) -> u32 {
        self.state.lock().header.head
    }

    pub fn commit(&self) -> i32 {
        self.state.lock().header.commit
    }

    pub fn current_segment(&self) -> u32 {
        self.state.lock().header.current_segment
    }

    /// Appends `(segment_id, byte_offset)`, assigning it the index that was
    /// `head` before this call.
    pub fn append(&self, segment_id: u32, byte_offset: u32) -> Result<u32> {
        let mut state = self.state.lock();
        if segment_id < state.header.current_segment {
            return Err(Error::OutOfOrderSegment {
                segment: segment_id,
                current: state.header.current_segment,
            });
        }

        let assigned = state.header.head;
        let slot = state.header.local_index(assigned);

        if self.options.buffering_enabled {
            if state.queued.is_empty() {
                state.queued_start_slot = Some(slot);
            }
            state.queued.push((segment_id, byte_offset));
        } else {
            state.write_entry(slot, segment_id, byte_offset)?;
        }

        state.header.head += 1;
        if segment_id > state.header.current_segment {
            state.header.current_segment = segment_id;
        }
        state.header_dirty = true;

        if !self.options.buffering_enabled {
            state.persist_header_now()?;
        } else if state.queued.len() >= self.options.max_buffer_size {
            state.flush()?;
        }

        Ok(assigned)
    }

    /// Idempotent for `index <= commit`. Fails [`Error::OutOfOrderCommit`]
    /// if `index` skips ahead of `commit + 1`.
    pub fn commit_index(&self, index: u32) -> Result<i32> {
        let mut state = self.state.lock();
        if index as i64 <= state.header.commit as i64 {
            return Ok(state.header.commit);
        }
        if index as i64 != state.header.commit as i64 + 1 {
            return Err(Error::OutOfOrderCommit {
                expected: (state.header.commit + 1) as u32,
                got: index,
            });
        }
        state.header.commit = index as i32;
        state.header_dirty = true;
        if !self.options.buffering_enabled {
            state.persist_header_now()?;
        }
        Ok(state.header.commit)
    }

    /// Flushes any queued writes (batched mode), then returns the location
    /// stored for `index`.
    pub fn position(&self, index: u32) -> Result<(u32, u32)> {
        let mut state = self.state.lock();
        if index < state.header.base || index >= state.header.head {
            return Err(Error::OutOfBounds {
                index,
                base: state.header.base,
                head: state.header.head,
            });
        }
        state.flush()?;
        let slot = state.header.local_index(index);
        state.read_entry(slot)
    }

    /// Sets `head = from`; the index array tail is left in place, not
    /// shrunk. Persists the header tail immediately regardless of mode.
    pub fn truncate(&self, from: u32) -> Result<()> {
        let mut state = self.state.lock();
        if from >= state.header.head {
            return Err(Error::OutOfBounds {
                index: from,
                base: state.header.base,
                head: state.header.head,
            });
        }
        if from as i64 <= state.header.commit as i64 {
            return Err(Error::TruncateCommitted {
                target: from,
                commit: state.header.commit as i64,
            });
        }

        state.header.head = from;
        let new_local_head = state.header.local_index(from);
        if let Some(start) = state.queued_start_slot {
            let keep = new_local_head.saturating_sub(start) as usize;
            state.queued.truncate(keep);
            if state.queued.is_empty() {
                state.queued_start_slot = None;
            }
        }
        state.persist_header_now()?;
        Ok(())
    }

    /// Copy-and-swap compaction: drops entries for indices `< commit + 1`.
    pub fn compact(&self) -> Result<()> {
        let mut state = self.state.lock();
        state.flush()?;
        let new_base = (state.header.commit + 1) as u32;
        let new_header = Header {
            base: new_base,
            head: state.header.head,
            commit: state.header.commit,
            current_segment: state.header.current_segment,
        };

        let tmp_path = self.dir.join(META_TMP_FILE_NAME);
        let live_path = self.dir.join(META_FILE_NAME);

        let mut tmp_file = OpenOptions::new()
            .create(true)
            .truncate(true)
            .read(true)
            .write(true)
            .open(&tmp_path)?;
        tmp_file.write_all(&new_header.encode())?;
        copy_entries(
            &mut state.file,
            &mut tmp_file,
            state.header.local_index(new_base),
            state.header.local_index(state.header.head),
        )?;
        tmp_file.sync_all()?;
        drop(tmp_file);

        std::fs::rename(&tmp_path, &live_path)?;

        let mut reopened = OpenOptions::new().read(true).write(true).open(&live_path)?;
        let mut buf = [0u8; HEADER_SIZE as usize];
        reopened.read_exact(&mut buf)?;
        state.file = reopened;
        state.header = Header::decode(&buf)?;
        state.header_dirty = false;
        state.queued.clear();
        state.queued_start_slot = None;
        Ok(())
    }

    /// Like [`compact`](Self::compact), but the committed prefix being
    /// dropped from the live directory is written out to
    /// `dest_dir/index.META` first, fsynced, and only then is the live
    /// file swapped — so a crash can never leave `dest_dir` without a
    /// complete archive nor the live directory with a half-written header.
    pub fn archive(&self, dest_dir: impl AsRef<Path>) -> Result<()> {
        let dest_dir = dest_dir.as_ref();
        std::fs::create_dir_all(dest_dir)?;

        let mut state = self.state.lock();
        state.flush()?;

        let new_base = (state.header.commit + 1) as u32;

        let archived_header = Header {
            base: state.header.base,
            head: new_base,
            commit: state.header.commit,
            current_segment: state.header.current_segment,
        };
        let archive_path = dest_dir.join(META_FILE_NAME);
        let mut archive_file = OpenOptions::new()
            .create(true)
            .truncate(true)
            .read(true)
            .write(true)
            .open(&archive_path)?;
        archive_file.write_all(&archived_header.encode())?;
        copy_entries(
            &mut state.file,
            &mut archive_file,
            0,
            state.header.local_index(new_base),
        )?;
        archive_file.sync_all()?;
        drop(archive_file);

        let new_live_header = Header {
            base: new_base,
            head: state.header.head,
            commit: state.header.commit,
            current_segment: state.header.current_segment,
        };
        let tmp_path = self.dir.join(META_TMP_FILE_NAME);
        let live_path = self.dir.join(META_FILE_NAME);
        let mut tmp_file = OpenOptions::new()
            .create(true)
            .truncate(true)
            .read(true)
            .write(true)
            .open(&tmp_path)?;
        tmp_file.write_all(&new_live_header.encode())?;
        copy_entries(
            &mut state.file,
            &mut tmp_file,
            state.header.local_index(new_base),
            state.header.local_index(state.header.head),
        )?;
        tmp_file.sync_all()?;
        drop(tmp_file);

        std::fs::rename(&tmp_path, &live_path)?;

        let mut reopened = OpenOptions::new().read(true).write(true).open(&live_path)?;
        let mut buf = [0u8; HEADER_SIZE as usize];
        reopened.read_exact(&mut buf)?;
        state.file = reopened;
        state.header = Header::decode(&buf)?;
        state.header_dirty = false;
        state.queued.clear();
        state.queued_start_slot = None;
        Ok(())
    }

    /// Stops the background flusher (if any), performs a final flush, and
    /// releases the file handle.
    ///
    /// Takes `&self` rather than consuming the manager so a coordinator
    /// holding it behind an `Arc` can call this without needing unique
    /// ownership; the background thread handle is moved out of its mutex
    /// and joined here, so a second `close()` call is a cheap no-op.
    pub fn close(&self) -> Result<()> {
        self.stop.store(true, Ordering::Release);
        if let Some(handle) = self.flush_thread.lock().take() {
            let _ = handle.join();
        }
        self.state.lock().flush()
    }
}

/// Streams index entries for local slots `[from_slot, to_slot)` from `src`
/// (positioned via its own seeks) into `dst` (appended at its current
/// position, right after a freshly written header), in batches bounded by
/// [`COMPACTION_BATCH_SIZE`].
fn copy_entries(src: &mut File, dst: &mut File, from_slot: u32, to_slot: u32) -> Result<()> {
    let mut slot = from_slot;
    while slot < to_slot {
        let batch = (to_slot - slot).min(COMPACTION_BATCH_SIZE as u32);
        let mut buf = vec![0u8; batch as usize * INDEX_ENTRY_SIZE as usize];
        src.seek(SeekFrom::Start(HEADER_SIZE + slot as u64 * INDEX_ENTRY_SIZE))?;
        src.read_exact(&mut buf)?;
        dst.write_all(&buf)?;
        slot += batch;
    }
    Ok(())
}

fn spawn_flush_thread(
    state: Arc<Mutex<MetaState>>,
    stop: Arc<AtomicBool>,
    interval: Duration,
) -> JoinHandle<()> {
    std::thread::spawn(move || {
        while !stop.load(Ordering::Acquire) {
            std::thread::sleep(interval);
            if stop.load(Ordering::Acquire) {
                break;
            }
            if let Err(e) = state.lock().flush() {
                log::warn!("periodic meta index flush failed: {e}");
            }
        }
    })
}
