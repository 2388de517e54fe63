use std::collections::BTreeMap;
use std::ffi::OsString;
use std::fs::{File, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;

use crate::codec::Codec;
use crate::error::StorageError;
use crate::frame::{self, Op, ReplayStep, FORMAT_VERSION, MAGIC, PREAMBLE_LEN};
use crate::lock::FileLock;
use crate::volume::{Volume, VolumeKind};
use crate::RecordId;

/// Options for opening a [`RecordStore`], similar to [`std::fs::OpenOptions`].
#[derive(Debug, Clone, Copy)]
pub struct StoreOptions {
    pub volume: VolumeKind,
    /// How long to wait for the exclusive file lock before failing with
    /// [`StorageError::Locked`].
    pub lock_timeout: Duration,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            volume: VolumeKind::default(),
            lock_timeout: Duration::from_millis(500),
        }
    }
}

#[derive(Debug, Clone)]
enum Pending {
    Put(Arc<[u8]>),
    Update(Arc<[u8]>),
    Delete,
    Preallocate,
}

/// Persistent map from [`RecordId`] to an opaque byte payload.
///
/// Mutations are staged in memory and only hit the file as one checksummed
/// commit frame on [`RecordStore::commit`]; after a crash, a torn tail frame
/// is discarded on open, so either all of a commit's effects are visible or
/// none are. The store is not internally synchronized; callers serialize
/// access (one logical writer, readers excluded by the owner's locks).
pub struct RecordStore {
    path: PathBuf,
    file: std::io::BufWriter<File>,
    _lock: FileLock,
    /// Committed records. `None` marks an id that is allocated but carries
    /// no value (see [`RecordStore::preallocate`]).
    records: BTreeMap<RecordId, Option<Arc<[u8]>>>,
    pending: BTreeMap<RecordId, Pending>,
    next_recid: RecordId,
    committed_next_recid: RecordId,
    next_op_seq: u64,
    closed: bool,
}

impl std::fmt::Debug for RecordStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordStore")
            .field("path", &self.path)
            .field("records", &self.records.len())
            .field("pending", &self.pending.len())
            .field("next_recid", &self.next_recid)
            .field("closed", &self.closed)
            .finish()
    }
}

impl RecordStore {
    /// Open (or create) the store at `path`.
    #[tracing::instrument(skip_all, fields(path = %path.as_ref().display()))]
    pub fn open(path: impl AsRef<Path>, options: StoreOptions) -> Result<Self, StorageError> {
        let path = path.as_ref();
        let lock = FileLock::acquire(&lock_path(path), options.lock_timeout)?;

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(path)
            .with_context(|| format!("could not open store file: {}", path.display()))
            .map_err(io_other)?;

        let len = file.metadata()?.len();
        let mut records = BTreeMap::new();
        let mut next_recid: RecordId = 1;
        let mut next_op_seq: u64 = 0;
        let mut good_end = PREAMBLE_LEN as u64;

        if len == 0 {
            file.write_all(&MAGIC)?;
            file.write_all(&[FORMAT_VERSION])?;
            file.sync_data()?;
        } else {
            let volume = Volume::open(&mut file, options.volume)?;
            let bytes = volume.bytes();
            if bytes.len() < PREAMBLE_LEN || bytes[..MAGIC.len()] != MAGIC {
                return Err(StorageError::Corruption(format!(
                    "not a record store file: {}",
                    path.display()
                )));
            }
            if bytes[MAGIC.len()] != FORMAT_VERSION {
                return Err(StorageError::Corruption(format!(
                    "unsupported format version {}",
                    bytes[MAGIC.len()]
                )));
            }

            let mut offset = PREAMBLE_LEN;
            loop {
                match frame::read_frame(bytes, offset)
                    .map_err(StorageError::checksum_mismatch)?
                {
                    ReplayStep::End => break,
                    ReplayStep::Torn => {
                        log::warn!(
                            "discarding torn commit frame at byte {offset} of {}",
                            path.display()
                        );
                        break;
                    }
                    ReplayStep::Frame {
                        min_op_seq,
                        ops,
                        consumed,
                    } => {
                        if min_op_seq != next_op_seq {
                            return Err(StorageError::Corruption(format!(
                                "out-of-order commit frame: expected op seq {next_op_seq}, \
                                 found {min_op_seq}"
                            )));
                        }
                        next_op_seq += ops.len() as u64;
                        for op in ops {
                            next_recid = next_recid.max(op.recid() + 1);
                            apply(&mut records, op);
                        }
                        offset += consumed;
                        good_end = offset as u64;
                    }
                }
            }
        }

        if good_end < len {
            file.set_len(good_end)?;
        }
        file.seek(SeekFrom::End(0))?;

        log::debug!(
            "opened record store {} with {} records",
            path.display(),
            records.len()
        );

        Ok(Self {
            path: path.to_owned(),
            file: std::io::BufWriter::new(file),
            _lock: lock,
            records,
            pending: BTreeMap::new(),
            next_recid,
            committed_next_recid: next_recid,
            next_op_seq,
            closed: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Stage a new record and return its freshly allocated id.
    pub fn put<T>(&mut self, value: &T, codec: &impl Codec<T>) -> Result<RecordId, StorageError> {
        self.check_open()?;
        let mut bytes = Vec::new();
        codec.encode(value, &mut bytes);
        let recid = self.allocate();
        self.pending.insert(recid, Pending::Put(bytes.into()));
        Ok(recid)
    }

    /// Reserve an id without writing a value. The id survives commit and
    /// reopen; [`RecordStore::get`] returns `None` for it.
    pub fn preallocate(&mut self) -> Result<RecordId, StorageError> {
        self.check_open()?;
        let recid = self.allocate();
        self.pending.insert(recid, Pending::Preallocate);
        Ok(recid)
    }

    /// Drop the value at an existing id while keeping the id allocated.
    pub fn clear(&mut self, recid: RecordId) -> Result<(), StorageError> {
        self.check_open()?;
        self.pending.insert(recid, Pending::Preallocate);
        Ok(())
    }

    /// Read the record at `recid`. `None` if the id is unknown or carries
    /// no value.
    pub fn get<T>(
        &self,
        recid: RecordId,
        codec: &impl Codec<T>,
    ) -> Result<Option<T>, StorageError> {
        self.check_open()?;
        match self.visible(recid) {
            Some(Some(bytes)) => Ok(Some(codec.decode(&bytes)?)),
            _ => Ok(None),
        }
    }

    /// `true` if `recid` is allocated (with or without a value).
    pub fn contains(&self, recid: RecordId) -> Result<bool, StorageError> {
        self.check_open()?;
        Ok(self.visible(recid).is_some())
    }

    /// Overwrite the value at `recid`. The id is allocated if unknown.
    pub fn update<T>(
        &mut self,
        recid: RecordId,
        value: &T,
        codec: &impl Codec<T>,
    ) -> Result<(), StorageError> {
        self.check_open()?;
        let mut bytes = Vec::new();
        codec.encode(value, &mut bytes);
        let staged = match self.pending.get(&recid) {
            // The id was allocated in this commit; it stays a fresh put.
            Some(Pending::Put(_)) => Pending::Put(bytes.into()),
            _ => Pending::Update(bytes.into()),
        };
        self.next_recid = self.next_recid.max(recid + 1);
        self.pending.insert(recid, staged);
        Ok(())
    }

    /// Replace the value at `recid` with `new` iff the current value equals
    /// `expected` under the codec's byte representation.
    pub fn compare_and_swap<T>(
        &mut self,
        recid: RecordId,
        expected: &T,
        new: &T,
        codec: &impl Codec<T>,
    ) -> Result<bool, StorageError> {
        self.check_open()?;
        let mut want = Vec::new();
        codec.encode(expected, &mut want);
        match self.visible(recid) {
            Some(Some(current)) if *current == *want => {
                self.update(recid, new, codec)?;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    /// Remove `recid`. Returns whether the id was allocated.
    pub fn delete(&mut self, recid: RecordId) -> Result<bool, StorageError> {
        self.check_open()?;
        let existed = self.visible(recid).is_some();
        self.pending.insert(recid, Pending::Delete);
        Ok(existed)
    }

    /// All allocated ids in ascending order, a snapshot taken now.
    ///
    /// Ascending order means a caller's reserved header record (id 1) is
    /// always yielded first.
    pub fn iter_recids(&self) -> Result<Vec<RecordId>, StorageError> {
        self.check_open()?;
        let mut ids: Vec<RecordId> = self
            .records
            .keys()
            .filter(|id| !matches!(self.pending.get(id), Some(Pending::Delete)))
            .chain(
                self.pending
                    .iter()
                    .filter(|(id, p)| {
                        !matches!(p, Pending::Delete) && !self.records.contains_key(id)
                    })
                    .map(|(id, _)| id),
            )
            .copied()
            .collect();
        ids.sort_unstable();
        ids.dedup();
        Ok(ids)
    }

    /// Number of allocated ids, including value-less ones.
    pub fn len(&self) -> usize {
        self.iter_recids().map(|v| v.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// `true` if there are staged, uncommitted operations.
    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    /// Make all staged operations durable as a single commit frame.
    pub fn commit(&mut self) -> Result<(), StorageError> {
        self.check_open()?;
        if self.pending.is_empty() {
            return Ok(());
        }

        let ops: Vec<Op> = self
            .pending
            .iter()
            .map(|(&recid, p)| match p {
                Pending::Put(bytes) => Op::Put {
                    recid,
                    bytes: bytes.to_vec(),
                },
                Pending::Update(bytes) => Op::Update {
                    recid,
                    bytes: bytes.to_vec(),
                },
                Pending::Delete => Op::Delete { recid },
                Pending::Preallocate => Op::Preallocate { recid },
            })
            .collect();

        frame::write_frame(&mut self.file, self.next_op_seq, &ops)?;
        // A frame fits the BufWriter only by luck; flush then fsync so the
        // commit is durable before the in-memory state advances.
        self.file.flush()?;
        self.file.get_ref().sync_data()?;

        self.next_op_seq += ops.len() as u64;
        for op in ops {
            apply(&mut self.records, op);
        }
        self.pending.clear();
        self.committed_next_recid = self.next_recid;
        Ok(())
    }

    /// Discard all staged operations, including staged id allocations.
    pub fn rollback(&mut self) -> Result<(), StorageError> {
        self.check_open()?;
        self.pending.clear();
        self.next_recid = self.committed_next_recid;
        Ok(())
    }

    /// Block until all committed frames are physically on disk.
    pub fn sync_all(&mut self) -> Result<(), StorageError> {
        self.check_open()?;
        self.file.flush()?;
        self.file.get_ref().sync_all()?;
        Ok(())
    }

    /// Close the store. Idempotent; staged uncommitted operations are
    /// discarded with a warning.
    pub fn close(&mut self) -> Result<(), StorageError> {
        if self.closed {
            return Ok(());
        }
        if !self.pending.is_empty() {
            log::warn!(
                "closing {} with {} uncommitted staged ops; discarding",
                self.path.display(),
                self.pending.len()
            );
            self.pending.clear();
        }
        self.file.flush()?;
        self.file.get_ref().sync_all()?;
        self.closed = true;
        log::debug!("closed record store {}", self.path.display());
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    fn check_open(&self) -> Result<(), StorageError> {
        if self.closed {
            Err(StorageError::Closed)
        } else {
            Ok(())
        }
    }

    fn allocate(&mut self) -> RecordId {
        let recid = self.next_recid;
        self.next_recid += 1;
        recid
    }

    fn visible(&self, recid: RecordId) -> Option<Option<Arc<[u8]>>> {
        match self.pending.get(&recid) {
            Some(Pending::Put(bytes) | Pending::Update(bytes)) => Some(Some(bytes.clone())),
            Some(Pending::Delete) => None,
            Some(Pending::Preallocate) => Some(None),
            None => self.records.get(&recid).cloned(),
        }
    }
}

fn apply(records: &mut BTreeMap<RecordId, Option<Arc<[u8]>>>, op: Op) {
    match op {
        Op::Put { recid, bytes } | Op::Update { recid, bytes } => {
            records.insert(recid, Some(bytes.into()));
        }
        Op::Delete { recid } => {
            records.remove(&recid);
        }
        Op::Preallocate { recid } => {
            records.insert(recid, None);
        }
    }
}

fn lock_path(path: &Path) -> PathBuf {
    let mut os: OsString = path.as_os_str().to_owned();
    os.push(".lock");
    PathBuf::from(os)
}

fn io_other(e: anyhow::Error) -> StorageError {
    StorageError::Io(std::io::Error::other(e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::RawBytes;
    use pretty_assertions::assert_eq;
    use std::io::Write as _;
    use tempfile::TempDir;

    fn open(dir: &TempDir) -> RecordStore {
        let _ = env_logger::builder().is_test(true).try_init();
        RecordStore::open(dir.path().join("test.db"), StoreOptions::default()).unwrap()
    }

    #[test]
    fn put_get_commit_reopen() {
        let tmp = TempDir::with_prefix("recordstore").unwrap();
        let mut store = open(&tmp);

        let a = store.put(&b"alpha".to_vec(), &RawBytes).unwrap();
        let b = store.put(&b"beta".to_vec(), &RawBytes).unwrap();
        assert_eq!((a, b), (1, 2));
        assert_eq!(store.get(a, &RawBytes).unwrap(), Some(b"alpha".to_vec()));
        store.commit().unwrap();
        drop(store);

        let store = open(&tmp);
        assert_eq!(store.get(a, &RawBytes).unwrap(), Some(b"alpha".to_vec()));
        assert_eq!(store.get(b, &RawBytes).unwrap(), Some(b"beta".to_vec()));
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn uncommitted_ops_do_not_survive_reopen() {
        let tmp = TempDir::with_prefix("recordstore").unwrap();
        let mut store = open(&tmp);

        store.put(&b"committed".to_vec(), &RawBytes).unwrap();
        store.commit().unwrap();
        store.put(&b"staged".to_vec(), &RawBytes).unwrap();
        drop(store);

        let store = open(&tmp);
        assert_eq!(store.len(), 1);
        assert_eq!(
            store.get(1, &RawBytes).unwrap(),
            Some(b"committed".to_vec())
        );
    }

    #[test]
    fn rollback_discards_and_releases_ids() {
        let tmp = TempDir::with_prefix("recordstore").unwrap();
        let mut store = open(&tmp);

        let a = store.put(&b"keep".to_vec(), &RawBytes).unwrap();
        store.commit().unwrap();

        let b = store.put(&b"drop".to_vec(), &RawBytes).unwrap();
        store.update(a, &b"clobbered".to_vec(), &RawBytes).unwrap();
        store.rollback().unwrap();

        assert_eq!(store.get(a, &RawBytes).unwrap(), Some(b"keep".to_vec()));
        assert_eq!(store.get(b, &RawBytes).unwrap(), None);
        // The rolled-back allocation is reused.
        assert_eq!(store.put(&b"again".to_vec(), &RawBytes).unwrap(), b);
    }

    #[test]
    fn torn_tail_frame_is_discarded() {
        let tmp = TempDir::with_prefix("recordstore").unwrap();
        let path = tmp.path().join("test.db");
        let mut store = RecordStore::open(&path, StoreOptions::default()).unwrap();

        store.put(&b"durable".to_vec(), &RawBytes).unwrap();
        store.commit().unwrap();
        drop(store);

        // Simulate a crash mid-append: half a frame header at the tail.
        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(&[9, 9, 9, 9, 9]).unwrap();
        drop(file);

        let store = RecordStore::open(&path, StoreOptions::default()).unwrap();
        assert_eq!(store.get(1, &RawBytes).unwrap(), Some(b"durable".to_vec()));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn flipped_bit_is_corruption() {
        let tmp = TempDir::with_prefix("recordstore").unwrap();
        let path = tmp.path().join("test.db");
        let mut store = RecordStore::open(&path, StoreOptions::default()).unwrap();

        store.put(&vec![0u8; 64], &RawBytes).unwrap();
        store.commit().unwrap();
        store.put(&vec![1u8; 64], &RawBytes).unwrap();
        store.commit().unwrap();
        drop(store);

        let mut bytes = std::fs::read(&path).unwrap();
        let mid = PREAMBLE_LEN + frame::FrameHeader::LEN + 8;
        bytes[mid] ^= 0x01;
        std::fs::write(&path, &bytes).unwrap();

        match RecordStore::open(&path, StoreOptions::default()) {
            Err(StorageError::Corruption(_)) => {}
            other => panic!("expected corruption, got {other:?}"),
        }
    }

    #[test]
    fn preallocate_survives_reopen() {
        let tmp = TempDir::with_prefix("recordstore").unwrap();
        let mut store = open(&tmp);

        let header = store.put(&b"header".to_vec(), &RawBytes).unwrap();
        let hole = store.preallocate().unwrap();
        let c = store.put(&b"value".to_vec(), &RawBytes).unwrap();
        store.commit().unwrap();
        drop(store);

        let mut store = open(&tmp);
        assert_eq!(store.iter_recids().unwrap(), vec![header, hole, c]);
        assert_eq!(store.get(hole, &RawBytes).unwrap(), None);
        assert!(store.contains(hole).unwrap());
        // Fresh allocations continue after the reserved id.
        assert_eq!(store.put(&b"next".to_vec(), &RawBytes).unwrap(), c + 1);
    }

    #[test]
    fn clear_keeps_id_but_drops_value() {
        let tmp = TempDir::with_prefix("recordstore").unwrap();
        let mut store = open(&tmp);

        let a = store.put(&b"present".to_vec(), &RawBytes).unwrap();
        store.commit().unwrap();
        store.clear(a).unwrap();
        store.commit().unwrap();

        assert!(store.contains(a).unwrap());
        assert_eq!(store.get(a, &RawBytes).unwrap(), None);
    }

    #[test]
    fn compare_and_swap_by_bytes() {
        let tmp = TempDir::with_prefix("recordstore").unwrap();
        let mut store = open(&tmp);

        let a = store.put(&b"one".to_vec(), &RawBytes).unwrap();
        store.commit().unwrap();

        assert!(!store
            .compare_and_swap(a, &b"wrong".to_vec(), &b"two".to_vec(), &RawBytes)
            .unwrap());
        assert_eq!(store.get(a, &RawBytes).unwrap(), Some(b"one".to_vec()));

        assert!(store
            .compare_and_swap(a, &b"one".to_vec(), &b"two".to_vec(), &RawBytes)
            .unwrap());
        assert_eq!(store.get(a, &RawBytes).unwrap(), Some(b"two".to_vec()));
    }

    #[test]
    fn delete_and_iteration_order() {
        let tmp = TempDir::with_prefix("recordstore").unwrap();
        let mut store = open(&tmp);

        let ids: Vec<_> = (0..4)
            .map(|i| store.put(&vec![i as u8], &RawBytes).unwrap())
            .collect();
        store.commit().unwrap();

        assert!(store.delete(ids[2]).unwrap());
        assert!(!store.delete(999).unwrap());
        store.commit().unwrap();

        assert_eq!(store.iter_recids().unwrap(), vec![ids[0], ids[1], ids[3]]);
    }

    #[test]
    fn second_open_fails_locked() {
        let tmp = TempDir::with_prefix("recordstore").unwrap();
        let path = tmp.path().join("test.db");
        let _store = RecordStore::open(&path, StoreOptions::default()).unwrap();

        let opts = StoreOptions {
            lock_timeout: Duration::from_millis(50),
            ..StoreOptions::default()
        };
        match RecordStore::open(&path, opts) {
            Err(StorageError::Locked(_)) => {}
            other => panic!("expected locked, got {other:?}"),
        }
    }

    #[test]
    fn heap_volume_replays_like_mmap() {
        let tmp = TempDir::with_prefix("recordstore").unwrap();
        let path = tmp.path().join("test.db");
        let mut store = RecordStore::open(&path, StoreOptions::default()).unwrap();
        for i in 0..10u8 {
            store.put(&vec![i; 8], &RawBytes).unwrap();
        }
        store.commit().unwrap();
        drop(store);

        let opts = StoreOptions {
            volume: VolumeKind::Heap,
            ..StoreOptions::default()
        };
        let store = RecordStore::open(&path, opts).unwrap();
        assert_eq!(store.len(), 10);
        assert_eq!(store.get(5, &RawBytes).unwrap(), Some(vec![4u8; 8]));
    }

    #[test]
    fn ops_after_close_fail() {
        let tmp = TempDir::with_prefix("recordstore").unwrap();
        let mut store = open(&tmp);
        store.close().unwrap();
        store.close().unwrap(); // idempotent

        assert!(matches!(
            store.put(&b"x".to_vec(), &RawBytes),
            Err(StorageError::Closed)
        ));
        assert!(matches!(store.get(1, &RawBytes), Err(StorageError::Closed)));
    }
}
