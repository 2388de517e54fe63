use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use quiverdb_recordstore::RecordId;

use super::column::{Column, ColumnHeaderCodec};
use super::{now_micros, SharedReadGuard, SharedWriteGuard, HEADER_RECID, MIN_TUPLE_ID};
use crate::error::{QuiverError, Result, TxError, ValidationError};
use crate::types::{Value, ValueCodec};

/// Lifecycle of a column transaction.
///
/// `Clean → Dirty → Clean` over commit/rollback; `Error` is entered on a
/// failed store operation, from which only rollback and close are valid;
/// `Closed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxStatus {
    Clean,
    Dirty,
    Error,
    Closed,
}

/// A transaction on one [`Column`].
///
/// Holds the column's global read lock from construction until drop, so the
/// column cannot close underneath it. Reads observe a consistent snapshot:
/// the transaction pins the column's tx read lock — at begin when
/// read-only, at the first read otherwise — and keeps it until close, so a
/// concurrent writer cannot commit between two of its reads. The first
/// mutating call exchanges the pinned read side for the tx write lock and
/// keeps that until commit, rollback or close.
///
/// Dropping a dirty transaction rolls it back.
pub struct ColumnTx {
    column: Arc<Column>,
    tid: u128,
    readonly: bool,
    status: TxStatus,
    _global: Option<SharedReadGuard<()>>,
    /// The pinned read snapshot. Behind a mutex so `&self` reads (including
    /// parallel traversals) can pin it lazily.
    read_guard: Mutex<Option<SharedReadGuard<()>>>,
    write_guard: Option<SharedWriteGuard<()>>,
}

impl ColumnTx {
    pub(super) fn new(
        column: Arc<Column>,
        readonly: bool,
        tid: u128,
        global: SharedReadGuard<()>,
    ) -> Self {
        log::trace!("begin tx {tid:x} on column {}", column.def().name);
        // Read-only transactions snapshot at begin; this waits out an
        // active writer.
        let read_guard = Mutex::new(readonly.then(|| RwLock::read_arc(&column.tx_lock)));
        Self {
            column,
            tid,
            readonly,
            status: TxStatus::Clean,
            _global: Some(global),
            read_guard,
            write_guard: None,
        }
    }

    pub fn status(&self) -> TxStatus {
        self.status
    }

    pub fn tid(&self) -> u128 {
        self.tid
    }

    pub fn is_readonly(&self) -> bool {
        self.readonly
    }

    fn codec(&self) -> ValueCodec {
        ValueCodec::new(self.column.def().ty)
    }

    fn check_valid(&self) -> Result<()> {
        match self.status {
            TxStatus::Clean | TxStatus::Dirty => Ok(()),
            TxStatus::Error => Err(TxError::InError.into()),
            TxStatus::Closed => Err(TxError::Closed.into()),
        }
    }

    fn check_tuple_id(tuple_id: i64) -> Result<()> {
        if tuple_id < MIN_TUPLE_ID {
            return Err(ValidationError::InvalidTupleId(tuple_id).into());
        }
        Ok(())
    }

    /// Pin this transaction's read snapshot if it holds no guard yet.
    pub(super) fn ensure_snapshot(&self) {
        if self.write_guard.is_some() {
            return;
        }
        let mut guard = self.read_guard.lock();
        if guard.is_none() {
            *guard = Some(RwLock::read_arc(&self.column.tx_lock));
        }
    }

    /// Take the column write lock if this transaction does not hold it yet.
    fn ensure_writable(&mut self) -> Result<()> {
        if self.readonly {
            return Err(TxError::ReadOnly.into());
        }
        if self.write_guard.is_some() {
            return Ok(());
        }
        // The transaction's own pinned read side would block the upgrade.
        let had_snapshot = self.read_guard.get_mut().take().is_some();
        match RwLock::try_write_arc(&self.column.tx_lock) {
            Some(guard) => {
                self.write_guard = Some(guard);
                Ok(())
            }
            None => {
                if had_snapshot {
                    // Re-pin the read side. A competing writer that slipped
                    // into the gap is waited out, moving the snapshot to
                    // its commit.
                    *self.read_guard.get_mut() =
                        Some(RwLock::read_arc(&self.column.tx_lock));
                }
                Err(TxError::WriteLockUnavailable.into())
            }
        }
    }

    /// Run a mutating store operation; a store failure poisons the
    /// transaction into [`TxStatus::Error`].
    fn mutate<R>(&mut self, f: impl FnOnce(&mut Self) -> Result<R>) -> Result<R> {
        match f(self) {
            Ok(r) => {
                self.status = TxStatus::Dirty;
                Ok(r)
            }
            Err(e) => {
                if !matches!(
                    e,
                    QuiverError::Validation(_) | QuiverError::Tx(_) | QuiverError::Catalog(_)
                ) {
                    log::warn!("tx {:x} entered error state: {e}", self.tid);
                    self.status = TxStatus::Error;
                }
                Err(e)
            }
        }
    }

    /// Read without touching the tx lock; the snapshot (or write guard) is
    /// already pinned.
    fn read_unlocked(&self, tuple_id: i64) -> Result<Option<Value>> {
        Ok(self.column.store.read().get(tuple_id, &self.codec())?)
    }

    /// Read the value at `tuple_id`; `None` for an allocated-null or
    /// unknown id.
    pub fn read(&self, tuple_id: i64) -> Result<Option<Value>> {
        self.check_valid()?;
        Self::check_tuple_id(tuple_id)?;
        self.ensure_snapshot();
        self.read_unlocked(tuple_id)
    }

    pub fn read_all(&self, tuple_ids: &[i64]) -> Result<Vec<Option<Value>>> {
        self.check_valid()?;
        for &tuple_id in tuple_ids {
            Self::check_tuple_id(tuple_id)?;
        }
        self.ensure_snapshot();
        tuple_ids
            .iter()
            .map(|&tuple_id| self.read_unlocked(tuple_id))
            .collect()
    }

    /// Row count from the header record.
    pub fn count(&self) -> Result<i64> {
        self.check_valid()?;
        self.ensure_snapshot();
        let header = self
            .column
            .store
            .read()
            .get(HEADER_RECID, &ColumnHeaderCodec)?
            .ok_or_else(|| QuiverError::corruption("column header record missing"))?;
        Ok(header.count)
    }

    fn tuple_ids_unlocked(&self) -> Result<Vec<RecordId>> {
        let ids = self.column.store.read().iter_recids()?;
        match ids.split_first() {
            Some((&HEADER_RECID, rest)) => Ok(rest.to_vec()),
            _ => Err(QuiverError::corruption(
                "header record is not the first record id",
            )),
        }
    }

    /// Snapshot of all tuple ids, in ascending order.
    ///
    /// The underlying iterator must yield the header record first; anything
    /// else means the store no longer looks like a column.
    pub fn tuple_ids(&self) -> Result<Vec<RecordId>> {
        self.check_valid()?;
        self.ensure_snapshot();
        self.tuple_ids_unlocked()
    }

    /// Visit every (tuple id, value) pair in ascending tuple-id order.
    pub fn for_each(&self, mut f: impl FnMut(i64, Option<Value>)) -> Result<()> {
        self.check_valid()?;
        self.ensure_snapshot();
        for tuple_id in self.tuple_ids_unlocked()? {
            f(tuple_id, self.read_unlocked(tuple_id)?);
        }
        Ok(())
    }

    /// Map every (tuple id, value) pair, preserving tuple-id order.
    pub fn map<R>(&self, mut f: impl FnMut(i64, Option<Value>) -> R) -> Result<Vec<R>> {
        let mut out = Vec::new();
        self.for_each(|tuple_id, value| out.push(f(tuple_id, value)))?;
        Ok(out)
    }

    /// Keep the (tuple id, value) pairs the predicate accepts.
    pub fn filter(
        &self,
        mut p: impl FnMut(i64, Option<&Value>) -> bool,
    ) -> Result<Vec<(i64, Option<Value>)>> {
        let mut out = Vec::new();
        self.for_each(|tuple_id, value| {
            if p(tuple_id, value.as_ref()) {
                out.push((tuple_id, value));
            }
        })?;
        Ok(out)
    }

    /// Visit every pair from a bounded pool of `parallelism` workers. The
    /// pool is joined before this returns; no work leaks past the call.
    pub fn parallel_for_each(
        &self,
        f: impl Fn(i64, Option<Value>) + Send + Sync,
        parallelism: usize,
    ) -> Result<()> {
        use rayon::prelude::*;

        self.check_valid()?;
        self.ensure_snapshot();
        let ids = self.tuple_ids_unlocked()?;

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(parallelism.max(1))
            .build()
            .map_err(|e| anyhow::anyhow!("could not build worker pool: {e}"))?;
        pool.install(|| {
            ids.par_iter().try_for_each(|&tuple_id| {
                let value = self.read_unlocked(tuple_id)?;
                f(tuple_id, value);
                Ok::<(), QuiverError>(())
            })
        })
    }

    /// Insert a value (or an allocated null) and return its new tuple id.
    pub fn insert(&mut self, value: Option<Value>) -> Result<i64> {
        Ok(self.insert_all(vec![value])?[0])
    }

    /// Batch insert. Validation happens up front, so a bad value aborts the
    /// call before any id is allocated; the header count is bumped by
    /// exactly the batch size.
    pub fn insert_all(&mut self, values: Vec<Option<Value>>) -> Result<Vec<i64>> {
        self.check_valid()?;
        for value in &values {
            self.column.def().validate(value.as_ref())?;
        }
        self.ensure_writable()?;
        let n = values.len() as i64;
        self.mutate(|tx| {
            let codec = tx.codec();
            let mut store = tx.column.store.write();
            let mut ids = Vec::with_capacity(values.len());
            for value in &values {
                let tuple_id = match value {
                    Some(v) => store.put(v, &codec)?,
                    None => store.preallocate()?,
                };
                ids.push(tuple_id);
            }
            bump_header(&mut store, n)?;
            Ok(ids)
        })
    }

    /// Overwrite the value at `tuple_id`. A `None` value clears the cell
    /// (nullable columns only). Unknown tuple ids are rejected.
    pub fn update(&mut self, tuple_id: i64, value: Option<Value>) -> Result<()> {
        self.check_valid()?;
        Self::check_tuple_id(tuple_id)?;
        self.column.def().validate(value.as_ref())?;
        self.ensure_writable()?;
        self.mutate(|tx| {
            let codec = tx.codec();
            let mut store = tx.column.store.write();
            if !store.contains(tuple_id)? {
                return Err(ValidationError::InvalidTupleId(tuple_id).into());
            }
            match &value {
                Some(v) => store.update(tuple_id, v, &codec)?,
                None => store.clear(tuple_id)?,
            }
            bump_header(&mut store, 0)?;
            Ok(())
        })
    }

    /// Overwrite iff the current value equals `expected` (bit-exact on
    /// floats). Returns whether the swap happened.
    pub fn compare_and_update(
        &mut self,
        tuple_id: i64,
        value: Option<Value>,
        expected: Option<&Value>,
    ) -> Result<bool> {
        self.check_valid()?;
        Self::check_tuple_id(tuple_id)?;
        self.column.def().validate(value.as_ref())?;
        self.ensure_writable()?;
        let current = self.read_unlocked(tuple_id)?;
        if current.as_ref() != expected {
            return Ok(false);
        }
        self.update(tuple_id, value)?;
        Ok(true)
    }

    /// Delete the row at `tuple_id`; a no-op for unknown ids.
    pub fn delete(&mut self, tuple_id: i64) -> Result<()> {
        self.delete_all(&[tuple_id]).map(|_| ())
    }

    /// Batch delete. Returns the number of rows that actually existed; the
    /// header count is decremented by exactly that number.
    pub fn delete_all(&mut self, tuple_ids: &[i64]) -> Result<u64> {
        self.check_valid()?;
        for &tuple_id in tuple_ids {
            Self::check_tuple_id(tuple_id)?;
        }
        self.ensure_writable()?;
        self.mutate(|tx| {
            let mut store = tx.column.store.write();
            let mut deleted = 0u64;
            for &tuple_id in tuple_ids {
                if store.delete(tuple_id)? {
                    deleted += 1;
                }
            }
            bump_header(&mut store, -(deleted as i64))?;
            Ok(deleted)
        })
    }

    /// Make this transaction's effects durable and visible to others.
    ///
    /// Releases the write lock; a later read on this transaction pins a
    /// fresh snapshot.
    pub fn commit(&mut self) -> Result<()> {
        self.check_valid()?;
        if self.status == TxStatus::Dirty {
            if let Err(e) = self.column.store.write().commit() {
                self.status = TxStatus::Error;
                return Err(e.into());
            }
            self.status = TxStatus::Clean;
        }
        self.write_guard = None;
        Ok(())
    }

    /// Discard all staged effects. Also the only way (besides close) out of
    /// the error state.
    pub fn rollback(&mut self) -> Result<()> {
        match self.status {
            TxStatus::Closed => return Err(TxError::Closed.into()),
            TxStatus::Clean | TxStatus::Dirty | TxStatus::Error => {
                self.column.store.write().rollback()?;
                self.status = TxStatus::Clean;
                self.write_guard = None;
            }
        }
        Ok(())
    }

    /// Close the transaction, rolling back first if it is dirty. Idempotent.
    pub fn close(&mut self) {
        if self.status == TxStatus::Closed {
            return;
        }
        if matches!(self.status, TxStatus::Dirty | TxStatus::Error) {
            if let Err(e) = self.rollback() {
                log::warn!("rollback on close of tx {:x} failed: {e}", self.tid);
            }
        }
        self.status = TxStatus::Closed;
        self.write_guard = None;
        *self.read_guard.get_mut() = None;
        self._global = None;
        log::trace!("closed tx {:x} on column {}", self.tid, self.column.def().name);
    }
}

impl Drop for ColumnTx {
    fn drop(&mut self) {
        if matches!(self.status, TxStatus::Dirty | TxStatus::Error) {
            log::warn!(
                "tx {:x} dropped while {:?}; rolling back",
                self.tid,
                self.status
            );
        }
        self.close();
    }
}

/// Re-stamp the header: `count` moves by `delta`, `modified` becomes now.
fn bump_header(
    store: &mut quiverdb_recordstore::RecordStore,
    delta: i64,
) -> Result<()> {
    let mut header = store
        .get(HEADER_RECID, &ColumnHeaderCodec)?
        .ok_or_else(|| QuiverError::corruption("column header record missing"))?;
    header.count += delta;
    header.modified_micros = now_micros();
    store.update(HEADER_RECID, &header, &ColumnHeaderCodec)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Dbo as _;
    use crate::error::{QuiverError, TxError, ValidationError};
    use crate::types::{ColumnDef, ColumnType};
    use quiverdb_recordstore::StoreOptions;
    use std::sync::atomic::{AtomicU64, Ordering};
    use tempfile::TempDir;

    fn long_column(tmp: &TempDir) -> Arc<Column> {
        Column::create(
            tmp.path(),
            ColumnDef::new("id", ColumnType::Long, false),
            StoreOptions::default(),
        )
        .unwrap()
    }

    fn nullable_string_column(tmp: &TempDir) -> Arc<Column> {
        Column::create(
            tmp.path(),
            ColumnDef::new("tag", ColumnType::String, true),
            StoreOptions::default(),
        )
        .unwrap()
    }

    #[test]
    fn insert_commit_read_roundtrip() {
        let tmp = TempDir::with_prefix("column").unwrap();
        let column = long_column(&tmp);

        let mut tx = column.begin(false, 1).unwrap();
        let tuple_id = tx.insert(Some(Value::Long(7))).unwrap();
        assert_eq!(tuple_id, super::MIN_TUPLE_ID);
        assert_eq!(tx.status(), TxStatus::Dirty);
        // Read-your-writes before commit.
        assert_eq!(tx.read(tuple_id).unwrap(), Some(Value::Long(7)));
        assert_eq!(tx.count().unwrap(), 1);
        tx.commit().unwrap();
        assert_eq!(tx.status(), TxStatus::Clean);
        tx.close();

        let reader = column.begin(true, 2).unwrap();
        assert_eq!(reader.read(tuple_id).unwrap(), Some(Value::Long(7)));
        assert_eq!(reader.count().unwrap(), 1);
        drop(reader);
        column.close();
    }

    #[test]
    fn rollback_undoes_everything() {
        let tmp = TempDir::with_prefix("column").unwrap();
        let column = long_column(&tmp);

        let mut tx = column.begin(false, 1).unwrap();
        tx.insert(Some(Value::Long(1))).unwrap();
        tx.insert(Some(Value::Long(2))).unwrap();
        tx.rollback().unwrap();
        assert_eq!(tx.status(), TxStatus::Clean);
        tx.close();

        let reader = column.begin(true, 2).unwrap();
        assert_eq!(reader.count().unwrap(), 0);
        assert_eq!(reader.tuple_ids().unwrap(), Vec::<i64>::new());
        drop(reader);
        column.close();
    }

    #[test]
    fn dirty_transaction_rolls_back_on_drop() {
        let tmp = TempDir::with_prefix("column").unwrap();
        let column = long_column(&tmp);

        {
            let mut tx = column.begin(false, 1).unwrap();
            tx.insert(Some(Value::Long(9))).unwrap();
        }

        let reader = column.begin(true, 2).unwrap();
        assert_eq!(reader.count().unwrap(), 0);
        drop(reader);
        column.close();
    }

    #[test]
    fn readonly_transactions_cannot_write() {
        let tmp = TempDir::with_prefix("column").unwrap();
        let column = long_column(&tmp);

        let mut tx = column.begin(true, 1).unwrap();
        assert!(matches!(
            tx.insert(Some(Value::Long(1))),
            Err(QuiverError::Tx(TxError::ReadOnly))
        ));
        assert_eq!(tx.status(), TxStatus::Clean);
        drop(tx);
        column.close();
    }

    #[test]
    fn single_writer_regime() {
        let tmp = TempDir::with_prefix("column").unwrap();
        let column = long_column(&tmp);

        let mut writer = column.begin(false, 1).unwrap();
        writer.insert(Some(Value::Long(1))).unwrap();

        let mut contender = column.begin(false, 2).unwrap();
        assert!(matches!(
            contender.insert(Some(Value::Long(2))),
            Err(QuiverError::Tx(TxError::WriteLockUnavailable))
        ));
        // A failed lock acquisition does not poison the transaction.
        assert_eq!(contender.status(), TxStatus::Clean);

        writer.commit().unwrap();
        contender.insert(Some(Value::Long(2))).unwrap();
        contender.commit().unwrap();

        let reader = column.begin(true, 3).unwrap();
        assert_eq!(reader.count().unwrap(), 2);
        drop(reader);
        drop(writer);
        drop(contender);
        column.close();
    }

    #[test]
    fn nulls_are_allocated_not_materialized() {
        let tmp = TempDir::with_prefix("column").unwrap();
        let column = nullable_string_column(&tmp);

        let mut tx = column.begin(false, 1).unwrap();
        let a = tx.insert(None).unwrap();
        let b = tx.insert(Some(Value::String("x".into()))).unwrap();
        assert_eq!(tx.read(a).unwrap(), None);
        assert_eq!(tx.count().unwrap(), 2);

        tx.update(a, Some(Value::String("filled".into()))).unwrap();
        assert_eq!(tx.read(a).unwrap(), Some(Value::String("filled".into())));
        tx.update(b, None).unwrap();
        assert_eq!(tx.read(b).unwrap(), None);
        assert_eq!(tx.count().unwrap(), 2);
        tx.commit().unwrap();
        drop(tx);
        column.close();
    }

    #[test]
    fn null_into_non_nullable_aborts_cleanly() {
        let tmp = TempDir::with_prefix("column").unwrap();
        let column = long_column(&tmp);

        let mut tx = column.begin(false, 1).unwrap();
        assert!(matches!(
            tx.insert(None),
            Err(QuiverError::Validation(ValidationError::NullInNonNullable(_)))
        ));
        // Validation failures leave no side effects behind.
        assert_eq!(tx.status(), TxStatus::Clean);
        assert_eq!(tx.count().unwrap(), 0);
        drop(tx);
        column.close();
    }

    #[test]
    fn reserved_tuple_ids_are_rejected() {
        let tmp = TempDir::with_prefix("column").unwrap();
        let column = long_column(&tmp);

        let tx = column.begin(true, 1).unwrap();
        for bad in [0, 1, -5] {
            assert!(matches!(
                tx.read(bad),
                Err(QuiverError::Validation(ValidationError::InvalidTupleId(_)))
            ));
        }
        drop(tx);
        column.close();
    }

    #[test]
    fn closed_transaction_rejects_everything() {
        let tmp = TempDir::with_prefix("column").unwrap();
        let column = long_column(&tmp);

        let mut tx = column.begin(false, 1).unwrap();
        tx.close();
        tx.close(); // idempotent
        assert!(matches!(
            tx.read(2),
            Err(QuiverError::Tx(TxError::Closed))
        ));
        assert!(matches!(
            tx.insert(Some(Value::Long(1))),
            Err(QuiverError::Tx(TxError::Closed))
        ));
        column.close();
    }

    #[test]
    fn header_count_is_exact_over_batches() {
        let tmp = TempDir::with_prefix("column").unwrap();
        let column = long_column(&tmp);

        let mut tx = column.begin(false, 1).unwrap();
        let ids = tx
            .insert_all((0..5).map(|i| Some(Value::Long(i))).collect())
            .unwrap();
        assert_eq!(tx.count().unwrap(), 5);

        // One of these ids does not exist; it must not be counted.
        let deleted = tx.delete_all(&[ids[0], ids[3], 999]).unwrap();
        assert_eq!(deleted, 2);
        assert_eq!(tx.count().unwrap(), 3);
        tx.commit().unwrap();
        tx.close();

        let reader = column.begin(true, 2).unwrap();
        assert_eq!(reader.count().unwrap(), 3);
        assert_eq!(
            reader.tuple_ids().unwrap(),
            vec![ids[1], ids[2], ids[4]]
        );
        drop(reader);
        column.close();
    }

    #[test]
    fn compare_and_update_is_bit_exact() {
        let tmp = TempDir::with_prefix("column").unwrap();
        let column = long_column(&tmp);

        let mut tx = column.begin(false, 1).unwrap();
        let id = tx.insert(Some(Value::Long(10))).unwrap();

        assert!(!tx
            .compare_and_update(id, Some(Value::Long(11)), Some(&Value::Long(99)))
            .unwrap());
        assert_eq!(tx.read(id).unwrap(), Some(Value::Long(10)));

        assert!(tx
            .compare_and_update(id, Some(Value::Long(11)), Some(&Value::Long(10)))
            .unwrap());
        assert_eq!(tx.read(id).unwrap(), Some(Value::Long(11)));
        tx.commit().unwrap();
        drop(tx);
        column.close();
    }

    #[test]
    fn traversal_yields_ascending_tuple_ids() {
        let tmp = TempDir::with_prefix("column").unwrap();
        let column = long_column(&tmp);

        let mut tx = column.begin(false, 1).unwrap();
        tx.insert_all((0..4).map(|i| Some(Value::Long(i * 10))).collect())
            .unwrap();
        tx.commit().unwrap();

        let seen = tx.map(|tuple_id, value| (tuple_id, value)).unwrap();
        assert_eq!(
            seen.iter().map(|(t, _)| *t).collect::<Vec<_>>(),
            vec![2, 3, 4, 5]
        );
        assert_eq!(seen[2].1, Some(Value::Long(20)));

        let big = tx
            .filter(|_, value| matches!(value, Some(Value::Long(v)) if *v >= 20))
            .unwrap();
        assert_eq!(big.len(), 2);
        tx.close();
        column.close();
    }

    #[test]
    fn parallel_for_each_joins_its_workers() {
        let tmp = TempDir::with_prefix("column").unwrap();
        let column = long_column(&tmp);

        let mut tx = column.begin(false, 1).unwrap();
        tx.insert_all((0..500).map(|i| Some(Value::Long(i))).collect())
            .unwrap();
        tx.commit().unwrap();
        tx.close();

        let reader = column.begin(true, 2).unwrap();
        let sum = AtomicU64::new(0);
        reader
            .parallel_for_each(
                |_, value| {
                    if let Some(Value::Long(v)) = value {
                        sum.fetch_add(v as u64, Ordering::Relaxed);
                    }
                },
                4,
            )
            .unwrap();
        assert_eq!(sum.load(Ordering::Relaxed), (0..500).sum::<i64>() as u64);
        drop(reader);
        column.close();
    }

    #[test]
    fn committed_state_survives_reopen() {
        let tmp = TempDir::with_prefix("column").unwrap();
        let path;
        {
            let column = long_column(&tmp);
            path = column.path().to_owned();
            let mut tx = column.begin(false, 1).unwrap();
            tx.insert(Some(Value::Long(41))).unwrap();
            tx.commit().unwrap();
            // A second, uncommitted change must not survive.
            tx.insert(Some(Value::Long(42))).unwrap();
            tx.close();
            column.close();
        }

        let column = Column::open(&path, "id", StoreOptions::default()).unwrap();
        let reader = column.begin(true, 2).unwrap();
        assert_eq!(reader.count().unwrap(), 1);
        assert_eq!(reader.read(2).unwrap(), Some(Value::Long(41)));
        drop(reader);
        column.close();
    }

    #[test]
    fn readonly_snapshot_is_stable_across_writer_attempts() {
        let tmp = TempDir::with_prefix("column").unwrap();
        let column = long_column(&tmp);

        let mut setup = column.begin(false, 1).unwrap();
        let id = setup.insert(Some(Value::Long(1))).unwrap();
        setup.commit().unwrap();
        setup.close();

        let reader = column.begin(true, 2).unwrap();
        assert_eq!(reader.read(id).unwrap(), Some(Value::Long(1)));

        // The reader's pinned snapshot excludes writers for its whole
        // life; a commit cannot land between two of its reads.
        let mut writer = column.begin(false, 3).unwrap();
        assert!(matches!(
            writer.update(id, Some(Value::Long(2))),
            Err(QuiverError::Tx(TxError::WriteLockUnavailable))
        ));
        assert_eq!(reader.read(id).unwrap(), Some(Value::Long(1)));
        assert_eq!(reader.count().unwrap(), 1);
        drop(reader);

        writer.update(id, Some(Value::Long(2))).unwrap();
        writer.commit().unwrap();
        drop(writer);

        // A fresh transaction pins a fresh snapshot and sees the commit.
        let fresh = column.begin(true, 4).unwrap();
        assert_eq!(fresh.read(id).unwrap(), Some(Value::Long(2)));
        drop(fresh);
        column.close();
    }

    #[test]
    fn snapshot_of_a_read_write_tx_pins_at_first_read() {
        let tmp = TempDir::with_prefix("column").unwrap();
        let column = long_column(&tmp);

        let mut setup = column.begin(false, 1).unwrap();
        let id = setup.insert(Some(Value::Long(1))).unwrap();
        setup.commit().unwrap();
        setup.close();

        // A read-write transaction that has read holds the read side too,
        // so another writer fails rather than committing underneath it.
        let observer = column.begin(false, 2).unwrap();
        assert_eq!(observer.read(id).unwrap(), Some(Value::Long(1)));

        let mut writer = column.begin(false, 3).unwrap();
        assert!(matches!(
            writer.update(id, Some(Value::Long(2))),
            Err(QuiverError::Tx(TxError::WriteLockUnavailable))
        ));
        assert_eq!(observer.read(id).unwrap(), Some(Value::Long(1)));

        drop(observer);
        drop(writer);
        column.close();
    }

    #[test]
    fn closed_column_rejects_new_transactions() {
        let tmp = TempDir::with_prefix("column").unwrap();
        let column = long_column(&tmp);
        column.close();
        column.close(); // idempotent
        assert!(matches!(
            column.begin(true, 1),
            Err(QuiverError::Tx(TxError::DboClosed(_)))
        ));
    }
}
