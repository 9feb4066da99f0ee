//! The `Wal` coordinator: one active segment writer, one meta manager, one
//! exclusive write lock.

// 1. Local crate imports
use crate::meta::{MetaIndexManager, MetaOptions};
use crate::segment::{self, segment_file_name, truncate_file, SegmentReader, SegmentWriter};
use wal_core::{Entry, EntryPayload, Error, Registry, Result};

// 2. External crate imports
use crc32fast::Hasher;
use tokio::sync::{Mutex as AsyncMutex, Notify};

// 3. Standard library imports
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

/// Constructor configuration for a [`Wal`].
#[derive(Debug, Clone)]
pub struct WalOptions {
    /// Threshold at which a new segment file is started on the next write.
    pub max_segment_size: u64,
    /// Minimum `commit - base` required for `compact`/`archive` to do work.
    pub min_entries_for_compaction: u32,
    /// Meta index manager batching configuration.
    pub meta: MetaOptions,
    /// [`crate::buffered_writer::BufferedFileWriter`] capacity for segment
    /// files.
    pub segment_buffer_size: usize,
    /// Delay before an fsync round actually runs, giving concurrent
    /// writers a chance to pile onto the same batch. Zero by default.
    pub sync_delay: Duration,
}

impl Default for WalOptions {
    fn default() -> Self {
        Self {
            max_segment_size: 10 * 1024 * 1024,
            min_entries_for_compaction: 1000,
            meta: MetaOptions::default(),
            segment_buffer_size: segment::DEFAULT_WRITE_BUFFER_SIZE,
            sync_delay: Duration::from_millis(0),
        }
    }
}

struct WriteState {
    segment: Option<SegmentWriter>,
    current_segment_id: u32,
}

struct Inner {
    dir: PathBuf,
    registry: Registry,
    options: WalOptions,
    meta: MetaIndexManager,
    write_lock: AsyncMutex<WriteState>,
    durable_index: AtomicI64,
    sync_notify: Notify,
    sync_ongoing: AtomicBool,
    sync_error: StdMutex<Option<Arc<Error>>>,
    closed: AtomicBool,
}

/// The write-ahead log coordinator.
///
/// Owns the current segment writer and the meta index manager, and
/// serializes `write`, `close`, `compact`, `archive` and its own background
/// fsync driver behind one write lock. Cloning a `Wal` shares the same
/// underlying state (it is a thin handle over an `Arc`), so it can be
/// handed to multiple tasks that all append to the same directory.
#[derive(Clone)]
pub struct Wal {
    inner: Arc<Inner>,
}

impl Wal {
    /// Opens (creating if necessary) the WAL directory at `dir`.
    ///
    /// Locates `index.META`, enumerates `*.wal` segment files and, if any
    /// exist, reopens the highest-numbered one for append. Calling `open`
    /// a second time on an already-open `Wal` handle is not meaningful;
    /// opening a *second, independent* `Wal` over the same directory from
    /// the same process is the caller's mistake to avoid, matching the
    /// "owns both files exclusively" rule.
    pub async fn open(
        dir: impl AsRef<Path>,
        registry: Registry,
        options: WalOptions,
    ) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        let dir_for_blocking = dir.clone();
        let meta_options = options.meta.clone();
        let buffer_size = options.segment_buffer_size;

        let (meta, segment, current_segment_id) = tokio::task::spawn_blocking(move || {
            open_blocking(&dir_for_blocking, meta_options, buffer_size)
        })
        .await
        .expect("wal open task panicked")?;

        Ok(Self {
            inner: Arc::new(Inner {
                dir,
                registry,
                options,
                meta,
                write_lock: AsyncMutex::new(WriteState {
                    segment,
                    current_segment_id,
                }),
                durable_index: AtomicI64::new(-1),
                sync_notify: Notify::new(),
                sync_ongoing: AtomicBool::new(false),
                sync_error: StdMutex::new(None),
                closed: AtomicBool::new(false),
            }),
        })
    }

    /// Encodes and appends `payload`, returning its assigned logical
    /// index once an `fsync` covering it has completed.
    pub async fn write(&self, payload: &dyn EntryPayload) -> Result<u32> {
        self.ensure_open()?;

        let type_tag = payload.type_tag();
        let encoded = payload.encode();
        let crc = {
            let mut hasher = Hasher::new();
            hasher.update(&encoded);
            hasher.finalize()
        };

        let assigned_index = {
            let mut state = self.inner.write_lock.lock().await;
            self.ensure_open()?;
            self.roll_if_needed(&mut state).await?;

            let new_index = self.inner.meta.head();
            let segment_id = state.current_segment_id;

            let mut writer = state
                .segment
                .take()
                .expect("segment writer present after roll_if_needed");
            let payload_for_write = encoded;
            let (writer, write_result) = tokio::task::spawn_blocking(move || {
                let result = writer.write(new_index, type_tag, crc, &payload_for_write);
                (writer, result)
            })
            .await
            .expect("segment write task panicked");
            state.segment = Some(writer);
            let byte_offset = write_result?;

            let assigned = self.inner.meta.append(segment_id, byte_offset as u32)?;
            debug_assert_eq!(assigned, new_index);
            assigned
        };

        self.ensure_sync_running();
        self.await_durable(assigned_index as i64).await?;
        Ok(assigned_index)
    }

    /// Marks `index` committed. Idempotent for indices already at or below
    /// the current commit point.
    pub async fn commit(&self, index: u32) -> Result<i32> {
        self.ensure_open()?;
        self.inner.meta.commit_index(index)
    }

    /// Commits every index from the current commit point through `index`
    /// inclusive.
    pub async fn commit_up_to(&self, index: u32) -> Result<()> {
        self.ensure_open()?;
        let current = self.inner.meta.commit();
        if index as i64 <= current as i64 {
            return Err(Error::AlreadyCommitted(index));
        }
        let mut next = current + 1;
        while next as i64 <= index as i64 {
            self.inner.meta.commit_index(next as u32)?;
            next += 1;
        }
        Ok(())
    }

    /// Replays uncommitted entries `[commit+1, head)` through `handler`,
    /// committing each index the handler accepts and truncating the log at
    /// the first index it rejects.
    ///
    /// The default handler (used by [`recover_default`](Self::recover_default))
    /// always rejects, which discards the entire uncommitted tail — this
    /// is the expected outcome when a WAL is reopened with nothing
    /// committed: there is no acknowledged prefix to trust, so recovery
    /// drops it rather than replaying unverified writes.
    pub async fn recover<F>(&self, mut handler: F) -> Result<()>
    where
        F: FnMut(u32, &Entry) -> bool,
    {
        self.ensure_open()?;

        let commit = self.inner.meta.commit();
        let head = self.inner.meta.head();
        if commit as i64 == head as i64 - 1 {
            return Ok(());
        }

        let mut i = (commit + 1) as u32;
        while i < head {
            let entry = self.get_entry(i).await?;
            if handler(i, &entry) {
                self.inner.meta.commit_index(i)?;
                i += 1;
            } else {
                self.truncate_internal(i).await?;
                return Ok(());
            }
        }
        Ok(())
    }

    /// [`recover`](Self::recover) with a handler that rejects everything.
    pub async fn recover_default(&self) -> Result<()> {
        self.recover(|_, _| false).await
    }

    /// Reads and decodes the entry at logical index `index`.
    pub async fn get_entry(&self, index: u32) -> Result<Entry> {
        let (segment_id, byte_offset) = self.inner.meta.position(index)?;
        let path = self.inner.dir.join(segment_file_name(segment_id));
        let registry = self.inner.registry.clone();
        tokio::task::spawn_blocking(move || {
            let mut reader = SegmentReader::open(&path, registry)?;
            reader.read_offset(byte_offset as u64)
        })
        .await
        .expect("get_entry task panicked")
    }

    /// Compacts the committed prefix, deleting segment files that hold
    /// only committed records. Returns `false` (a no-op) if the
    /// preconditions in the type docs aren't met.
    pub async fn compact(&self) -> Result<bool> {
        self.ensure_open()?;
        let mut state = self.inner.write_lock.lock().await;
        let Some((first_segment, segment_of_commit)) = self.compaction_bounds()? else {
            return Ok(false);
        };

        self.sync_segment(&mut state).await?;
        self.inner.meta.compact()?;

        let dir = self.inner.dir.clone();
        tokio::task::spawn_blocking(move || delete_segment_range(&dir, first_segment, segment_of_commit))
            .await
            .expect("compact cleanup task panicked")?;

        Ok(true)
    }

    /// Same preconditions as [`compact`](Self::compact), but moves the
    /// removed segment files into `dest` instead of deleting them (falling
    /// back to copy-then-unlink across filesystem boundaries).
    pub async fn archive(&self, dest: impl AsRef<Path>) -> Result<bool> {
        self.ensure_open()?;
        let dest = dest.as_ref().to_path_buf();
        let mut state = self.inner.write_lock.lock().await;
        let Some((first_segment, segment_of_commit)) = self.compaction_bounds()? else {
            return Ok(false);
        };

        self.sync_segment(&mut state).await?;
        self.inner.meta.archive(&dest)?;

        let dir = self.inner.dir.clone();
        tokio::task::spawn_blocking(move || {
            move_segment_range(&dir, &dest, first_segment, segment_of_commit)
        })
        .await
        .expect("archive move task panicked")?;

        Ok(true)
    }

    /// Marks the WAL closed, syncing and closing the current segment.
    /// Idempotent.
    pub async fn close(&self) -> Result<()> {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let mut state = self.inner.write_lock.lock().await;
        if let Some(writer) = state.segment.take() {
            tokio::task::spawn_blocking(move || writer.close())
                .await
                .expect("segment close task panicked")?;
        }
        self.inner.meta.close()
    }

    pub fn current_segment_id(&self) -> u32 {
        self.inner.meta.current_segment()
    }

    /// One past the greatest logical index ever assigned.
    pub fn next_index(&self) -> u32 {
        self.inner.meta.head()
    }

    /// The greatest logical index ever assigned, or `None` if the log is
    /// empty.
    pub fn last_index(&self) -> Option<u32> {
        self.inner.meta.head().checked_sub(1)
    }

    /// The greatest committed logical index, or `None` if none.
    pub fn commit_index(&self) -> Option<u32> {
        let commit = self.inner.meta.commit();
        (commit >= 0).then_some(commit as u32)
    }

    pub fn is_committed(&self, index: u32) -> bool {
        self.inner.meta.commit() as i64 >= index as i64
    }

    fn ensure_open(&self) -> Result<()> {
        if self.inner.closed.load(Ordering::Acquire) {
            Err(Error::Closed)
        } else {
            Ok(())
        }
    }

    async fn roll_if_needed(&self, state: &mut WriteState) -> Result<()> {
        let needs_roll = match &state.segment {
            None => true,
            Some(writer) => writer.size() >= self.inner.options.max_segment_size,
        };
        if !needs_roll {
            return Ok(());
        }

        let next_id = if state.segment.is_some() {
            state.current_segment_id + 1
        } else {
            state.current_segment_id
        };

        if let Some(old) = state.segment.take() {
            tokio::task::spawn_blocking(move || old.close())
                .await
                .expect("segment close task panicked")?;
        }

        let path = self.inner.dir.join(segment_file_name(next_id));
        let buffer_size = self.inner.options.segment_buffer_size;
        let writer = tokio::task::spawn_blocking(move || SegmentWriter::open(path, buffer_size))
            .await
            .expect("segment open task panicked")?;

        state.segment = Some(writer);
        state.current_segment_id = next_id;
        Ok(())
    }

    async fn sync_segment(&self, state: &mut WriteState) -> Result<()> {
        if let Some(writer) = state.segment.take() {
            let (writer, result) = tokio::task::spawn_blocking(move || {
                let mut writer = writer;
                let result = writer.sync();
                (writer, result)
            })
            .await
            .expect("segment sync task panicked");
            state.segment = Some(writer);
            result?;
        }
        Ok(())
    }

    /// Returns `(first_segment_id, segment_id_of_commit)` if `compact`/
    /// `archive` preconditions hold, `None` otherwise.
    fn compaction_bounds(&self) -> Result<Option<(u32, u32)>> {
        let commit = self.inner.meta.commit();
        let head = self.inner.meta.head();
        let base = self.inner.meta.base();

        if commit == -1 || commit as i64 == head as i64 - 1 {
            return Ok(None);
        }
        if (commit as i64 - base as i64) < self.inner.options.min_entries_for_compaction as i64 {
            return Ok(None);
        }

        let (first_segment, _) = self.inner.meta.position(base)?;
        let (segment_of_commit, _) = self.inner.meta.position(commit as u32)?;
        if first_segment == segment_of_commit || segment_of_commit == 0 {
            return Ok(None);
        }
        Ok(Some((first_segment, segment_of_commit)))
    }

    /// Locates and truncates at logical index `from`. Used internally by
    /// `recover`; not part of the public operation surface because a
    /// truncate past acknowledged work is only safe to trigger from
    /// recovery logic that already decided to drop a suffix.
    async fn truncate_internal(&self, from: u32) -> Result<()> {
        let (segment_id, byte_offset) = self.inner.meta.position(from)?;
        self.inner.meta.truncate(from)?;

        let mut state = self.inner.write_lock.lock().await;
        let dir = self.inner.dir.clone();
        let buffer_size = self.inner.options.segment_buffer_size;
        let current_segment_id = state.current_segment_id;
        let old_writer = state.segment.take();

        let (new_writer, new_current_segment_id) = tokio::task::spawn_blocking(move || {
            if let Some(writer) = old_writer {
                writer.close()?;
            }
            if segment_id != current_segment_id {
                for id in (segment_id + 1)..=current_segment_id {
                    let path = dir.join(segment_file_name(id));
                    if path.exists() {
                        std::fs::remove_file(&path)?;
                    }
                }
            }
            let path = dir.join(segment_file_name(segment_id));
            truncate_file(&path, byte_offset as u64)?;
            let writer = SegmentWriter::open(&path, buffer_size)?;
            Ok::<_, Error>((writer, segment_id))
        })
        .await
        .expect("truncate task panicked")?;

        state.segment = Some(new_writer);
        state.current_segment_id = new_current_segment_id;
        Ok(())
    }

    fn ensure_sync_running(&self) {
        if self.inner.sync_ongoing.swap(true, Ordering::AcqRel) {
            return;
        }
        let inner = Arc::clone(&self.inner);
        let delay = self.inner.options.sync_delay;
        tokio::spawn(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            let outcome = run_sync_round(&inner).await;
            match outcome {
                Ok(synced_through) => {
                    inner.durable_index.fetch_max(synced_through, Ordering::AcqRel);
                    *inner.sync_error.lock().unwrap() = None;
                }
                Err(e) => {
                    *inner.sync_error.lock().unwrap() = Some(Arc::new(e));
                }
            }
            inner.sync_ongoing.store(false, Ordering::Release);
            inner.sync_notify.notify_waiters();
        });
    }

    async fn await_durable(&self, target: i64) -> Result<()> {
        loop {
            let notified = self.inner.sync_notify.notified();
            if self.inner.durable_index.load(Ordering::Acquire) >= target {
                return Ok(());
            }
            if let Some(e) = self.inner.sync_error.lock().unwrap().as_deref() {
                return Err(clone_error(e));
            }
            self.ensure_sync_running();
            notified.await;
        }
    }
}

/// Runs under the write lock: snapshots the index everything buffered so
/// far is covered by, then flushes and fsyncs the segment writer.
///
/// Holding the write lock for the whole round is what makes the snapshot
/// correct — no concurrent `write` can append a new record (which would
/// require the same lock) between the snapshot and the fsync call, so
/// every index `<= synced_through` that this call returns was already
/// durably buffered before the fsync started.
async fn run_sync_round(inner: &Arc<Inner>) -> Result<i64> {
    let mut state = inner.write_lock.lock().await;
    let synced_through = inner.meta.head() as i64 - 1;
    if let Some(writer) = state.segment.take() {
        let (writer, result) = tokio::task::spawn_blocking(move || {
            let mut writer = writer;
            let result = writer.sync();
            (writer, result)
        })
        .await
        .expect("sync task panicked");
        state.segment = Some(writer);
        result?;
    }
    Ok(synced_through)
}

fn clone_error(e: &Error) -> Error {
    match e {
        Error::Closed => Error::Closed,
        Error::InvalidMetaMarker => Error::InvalidMetaMarker,
        Error::UnknownType(t) => Error::UnknownType(*t),
        Error::CorruptEntry { index } => Error::CorruptEntry { index: *index },
        Error::UnexpectedEof => Error::UnexpectedEof,
        Error::NoCurrentEntry => Error::NoCurrentEntry,
        Error::OutOfBounds { index, base, head } => Error::OutOfBounds {
            index: *index,
            base: *base,
            head: *head,
        },
        Error::TruncateCommitted { target, commit } => Error::TruncateCommitted {
            target: *target,
            commit: *commit,
        },
        Error::OutOfOrderCommit { expected, got } => Error::OutOfOrderCommit {
            expected: *expected,
            got: *got,
        },
        Error::OutOfOrderSegment { segment, current } => Error::OutOfOrderSegment {
            segment: *segment,
            current: *current,
        },
        Error::AlreadyCommitted(i) => Error::AlreadyCommitted(*i),
        Error::ShortWrite { wrote, requested } => Error::ShortWrite {
            wrote: *wrote,
            requested: *requested,
        },
        Error::Io(io_err) => Error::Io(std::io::Error::new(io_err.kind(), io_err.to_string())),
    }
}

fn open_blocking(
    dir: &Path,
    meta_options: MetaOptions,
    buffer_size: usize,
) -> Result<(MetaIndexManager, Option<SegmentWriter>, u32)> {
    std::fs::create_dir_all(dir)?;
    let meta = MetaIndexManager::open(dir, meta_options)?;

    let mut segment_ids = list_segment_ids(dir)?;
    segment_ids.sort_unstable();

    if let Some(&highest) = segment_ids.last() {
        let path = dir.join(segment_file_name(highest));
        let writer = SegmentWriter::open(path, buffer_size)?;
        Ok((meta, Some(writer), highest))
    } else {
        let current = meta.current_segment();
        Ok((meta, None, current))
    }
}

fn list_segment_ids(dir: &Path) -> Result<Vec<u32>> {
    let mut ids = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if let Some(stem) = name.strip_suffix(".wal") {
            if let Ok(id) = stem.parse::<u32>() {
                ids.push(id);
            }
        }
    }
    Ok(ids)
}

fn delete_segment_range(dir: &Path, from: u32, to_exclusive: u32) -> Result<()> {
    for id in from..to_exclusive {
        let path = dir.join(segment_file_name(id));
        if path.exists() {
            std::fs::remove_file(&path)?;
        }
    }
    Ok(())
}

fn move_segment_range(dir: &Path, dest: &Path, from: u32, to_exclusive: u32) -> Result<()> {
    std::fs::create_dir_all(dest)?;
    for id in from..to_exclusive {
        let src = dir.join(segment_file_name(id));
        if !src.exists() {
            continue;
        }
        let dst = dest.join(segment_file_name(id));
        move_file(&src, &dst)?;
    }
    Ok(())
}

fn move_file(src: &Path, dst: &Path) -> Result<()> {
    if std::fs::rename(src, dst).is_ok() {
        return Ok(());
    }
    std::fs::copy(src, dst)?;
    std::fs::remove_file(src)?;
    Ok(())
}
