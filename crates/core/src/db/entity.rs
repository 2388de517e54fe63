use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use quiverdb_recordstore::StoreOptions;

use super::column::Column;
use super::transaction::{ColumnTx, TxStatus};
use super::Dbo;
use crate::error::{CatalogError, QuiverError, Result, TxError};
use crate::types::{ColumnDef, Name, Record, Recordset, Value};

/// A horizontal record type: an ordered set of columns sharing one tuple-id
/// space.
///
/// The tuple-id lockstep across columns is maintained by construction:
/// every row insert touches every column (with a preallocation standing in
/// for a null), so the per-column stores allocate identical id sequences.
#[derive(Debug)]
pub struct Entity {
    name: Name,
    path: PathBuf,
    columns: Vec<Arc<Column>>,
    closed: AtomicBool,
}

impl Entity {
    /// Create the entity directory and one column store per definition.
    pub fn create(
        parent: &Path,
        name: &str,
        defs: &[ColumnDef],
        options: StoreOptions,
    ) -> Result<Arc<Self>> {
        if defs.is_empty() {
            return Err(anyhow::anyhow!("entity `{name}` needs at least one column").into());
        }
        let path = parent.join(name);
        std::fs::create_dir_all(&path)?;
        let mut columns = Vec::with_capacity(defs.len());
        for def in defs {
            columns.push(Column::create(&path, def.clone(), options)?);
        }
        log::debug!("created entity {name} with {} columns", columns.len());
        Ok(Arc::new(Self {
            name: Name::simple(name),
            path,
            columns,
            closed: AtomicBool::new(false),
        }))
    }

    /// Open an existing entity by scanning its directory for column stores.
    pub fn open(path: &Path, name: &str, options: StoreOptions) -> Result<Arc<Self>> {
        let mut files: Vec<(String, PathBuf)> = Vec::new();
        for item in std::fs::read_dir(path)? {
            let entry = item?;
            let file_name = entry.file_name().to_string_lossy().into_owned();
            if let Some(column) = file_name
                .strip_prefix("col_")
                .and_then(|rest| rest.strip_suffix(".db"))
            {
                files.push((column.to_owned(), entry.path()));
            }
        }
        if files.is_empty() {
            return Err(QuiverError::corruption(format!(
                "entity directory {} has no column stores",
                path.display()
            )));
        }

        let mut columns = Vec::with_capacity(files.len());
        for (column_name, file) in files {
            columns.push(Column::open(&file, &column_name, options)?);
        }
        // Restore the declared column order: columns were created in
        // sequence, so the header timestamps reproduce it.
        columns.sort_by(|a, b| {
            (a.created_micros(), a.def().name.last())
                .cmp(&(b.created_micros(), b.def().name.last()))
        });
        Ok(Arc::new(Self {
            name: Name::simple(name),
            path: path.to_owned(),
            columns,
            closed: AtomicBool::new(false),
        }))
    }

    pub fn columns(&self) -> &[Arc<Column>] {
        &self.columns
    }

    pub fn column(&self, name: &str) -> Result<&Arc<Column>> {
        self.columns
            .iter()
            .find(|c| c.def().name.last() == name)
            .ok_or_else(|| CatalogError::ColumnDoesNotExist(name.to_owned()).into())
    }

    /// The ordered column definitions, shared by produced recordsets.
    pub fn defs(&self) -> Arc<[ColumnDef]> {
        self.columns
            .iter()
            .map(|c| c.def().clone())
            .collect::<Vec<_>>()
            .into()
    }

    /// Open one transaction per column, bundled under a single entity
    /// transaction.
    pub fn begin(self: &Arc<Self>, readonly: bool, tid: u128) -> Result<EntityTx> {
        if self.is_closed() {
            return Err(TxError::DboClosed(self.name.to_string()).into());
        }
        let mut txs = Vec::with_capacity(self.columns.len());
        for column in &self.columns {
            // Dropping already-acquired transactions rolls them back.
            txs.push(column.begin(readonly, tid)?);
        }
        Ok(EntityTx {
            defs: self.defs(),
            txs,
            status: TxStatus::Clean,
        })
    }
}

impl Dbo for Entity {
    fn name(&self) -> &Name {
        &self.name
    }

    fn path(&self) -> &Path {
        &self.path
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        for column in &self.columns {
            column.close();
        }
        log::debug!("closed entity {}", self.name);
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl Drop for Entity {
    fn drop(&mut self) {
        if !self.is_closed() {
            log::warn!(
                "entity {} dropped while still open; closing (resource leak)",
                self.name
            );
            self.close();
        }
    }
}

/// A transaction spanning every column of one entity.
///
/// Commit fans out in column order; the first failing column commit moves
/// the entity transaction to the error state and rolls back the remaining
/// (uncommitted) columns. Reads are bundled over the per-column snapshots,
/// which are pinned together (at begin when read-only, at the first read
/// otherwise), so a concurrent writer can never tear a row across
/// columns.
pub struct EntityTx {
    defs: Arc<[ColumnDef]>,
    txs: Vec<ColumnTx>,
    status: TxStatus,
}

impl EntityTx {
    pub fn status(&self) -> TxStatus {
        self.status
    }

    pub fn defs(&self) -> &Arc<[ColumnDef]> {
        &self.defs
    }

    fn check_valid(&self) -> Result<()> {
        match self.status {
            TxStatus::Clean | TxStatus::Dirty => Ok(()),
            TxStatus::Error => Err(TxError::InError.into()),
            TxStatus::Closed => Err(TxError::Closed.into()),
        }
    }

    /// Pin every column's read snapshot at the same point, so a bundled
    /// read can never observe one column ahead of another. Read-only
    /// transactions pinned at begin already; this covers the first read of
    /// a read-write transaction.
    fn pin_snapshot(&self) {
        for tx in &self.txs {
            tx.ensure_snapshot();
        }
    }

    /// Insert one row. Exactly one tuple id is allocated and used by every
    /// column; after commit each column holds either the value or an
    /// allocated null at that id.
    pub fn insert(&mut self, values: Vec<Option<Value>>) -> Result<i64> {
        self.check_valid()?;
        if values.len() != self.defs.len() {
            return Err(anyhow::anyhow!(
                "row arity mismatch: entity has {} columns, row has {}",
                self.defs.len(),
                values.len()
            )
            .into());
        }
        // Validate the whole row first so a bad cell aborts with no column
        // touched.
        for (def, value) in self.defs.iter().zip(&values) {
            def.validate(value.as_ref())?;
        }

        let mut tuple_id = None;
        for (tx, value) in self.txs.iter_mut().zip(values) {
            let allocated = match tx.insert(value) {
                Ok(id) => id,
                Err(e) => {
                    self.status = TxStatus::Error;
                    return Err(e);
                }
            };
            match tuple_id {
                None => tuple_id = Some(allocated),
                Some(expected) if expected == allocated => {}
                Some(expected) => {
                    self.status = TxStatus::Error;
                    return Err(QuiverError::corruption(format!(
                        "columns disagree on the allocated tuple id: {expected} vs {allocated}"
                    )));
                }
            }
        }
        self.status = TxStatus::Dirty;
        Ok(tuple_id.expect("entities have at least one column"))
    }

    /// The bundled transaction of one column, by name.
    pub fn column_tx(&self, column: &str) -> Result<&ColumnTx> {
        self.check_valid()?;
        self.pin_snapshot();
        let idx = self
            .defs
            .iter()
            .position(|d| d.name.last() == column)
            .ok_or_else(|| CatalogError::ColumnDoesNotExist(column.to_owned()))?;
        Ok(&self.txs[idx])
    }

    /// Read one row across all columns.
    pub fn read(&self, tuple_id: i64) -> Result<Record> {
        self.check_valid()?;
        self.pin_snapshot();
        let mut values = Vec::with_capacity(self.txs.len());
        for tx in &self.txs {
            values.push(tx.read(tuple_id)?);
        }
        Ok(Record {
            tuple_id,
            defs: self.defs.clone(),
            values,
        })
    }

    /// Materialize every row into a recordset, in ascending tuple-id order.
    pub fn scan(&self) -> Result<Recordset> {
        self.check_valid()?;
        self.pin_snapshot();
        let pivot = &self.txs[0];
        let mut out = Recordset::new(self.defs.clone());
        for tuple_id in pivot.tuple_ids()? {
            let mut values = Vec::with_capacity(self.txs.len());
            for tx in &self.txs {
                values.push(tx.read(tuple_id)?);
            }
            out.push_row(tuple_id, values);
        }
        Ok(out)
    }

    /// Row count, taken from the pivot column's header.
    pub fn count(&self) -> Result<i64> {
        self.check_valid()?;
        self.pin_snapshot();
        self.txs[0].count()
    }

    /// Delete `tuple_id` from every column.
    pub fn delete(&mut self, tuple_id: i64) -> Result<()> {
        self.check_valid()?;
        for tx in &mut self.txs {
            if let Err(e) = tx.delete(tuple_id) {
                self.status = TxStatus::Error;
                return Err(e);
            }
        }
        self.status = TxStatus::Dirty;
        Ok(())
    }

    /// Commit every column transaction. On the first failure the remaining
    /// uncommitted columns are rolled back and the error is returned;
    /// already-committed columns stay committed.
    pub fn commit(&mut self) -> Result<()> {
        self.check_valid()?;
        for idx in 0..self.txs.len() {
            if let Err(e) = self.txs[idx].commit() {
                self.status = TxStatus::Error;
                for tx in &mut self.txs[idx + 1..] {
                    if let Err(re) = tx.rollback() {
                        log::warn!("rollback after failed entity commit also failed: {re}");
                    }
                }
                return Err(e);
            }
        }
        self.status = TxStatus::Clean;
        Ok(())
    }

    /// Roll back every column transaction.
    pub fn rollback(&mut self) -> Result<()> {
        if self.status == TxStatus::Closed {
            return Err(TxError::Closed.into());
        }
        let mut first_err = None;
        for tx in &mut self.txs {
            if let Err(e) = tx.rollback() {
                first_err.get_or_insert(e);
            }
        }
        self.status = TxStatus::Clean;
        match first_err {
            None => Ok(()),
            Some(e) => {
                self.status = TxStatus::Error;
                Err(e)
            }
        }
    }

    /// Close every column transaction (rolling back dirty ones). Idempotent.
    pub fn close(&mut self) {
        if self.status == TxStatus::Closed {
            return;
        }
        for tx in &mut self.txs {
            tx.close();
        }
        self.status = TxStatus::Closed;
    }
}

impl Drop for EntityTx {
    fn drop(&mut self) {
        self.close();
    }
}
