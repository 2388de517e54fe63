use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use quiverdb_recordstore::{Codec, DecodeError, Reader, RecordStore, StoreOptions};

use super::transaction::ColumnTx;
use super::{now_micros, Dbo, HEADER_RECID};
use crate::error::{QuiverError, Result, TxError};
use crate::types::{ColumnDef, ColumnType, Name};

/// Header record of a column store: the column's type descriptor plus the
/// live row count and timestamps.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ColumnHeader {
    pub type_id: u8,
    pub logical_size: u32,
    pub nullable: bool,
    pub count: i64,
    pub created_micros: u64,
    pub modified_micros: u64,
}

pub(crate) struct ColumnHeaderCodec;

impl Codec<ColumnHeader> for ColumnHeaderCodec {
    fn encode(&self, value: &ColumnHeader, out: &mut Vec<u8>) {
        out.push(value.type_id);
        out.extend_from_slice(&value.logical_size.to_le_bytes());
        out.push(value.nullable as u8);
        out.extend_from_slice(&value.count.to_le_bytes());
        out.extend_from_slice(&value.created_micros.to_le_bytes());
        out.extend_from_slice(&value.modified_micros.to_le_bytes());
    }

    fn decode(&self, bytes: &[u8]) -> Result<ColumnHeader, DecodeError> {
        let mut r = Reader::new(bytes);
        let header = ColumnHeader {
            type_id: r.get_u8()?,
            logical_size: r.get_u32()?,
            nullable: r.get_u8()? != 0,
            count: r.get_i64()?,
            created_micros: r.get_u64()?,
            modified_micros: r.get_u64()?,
        };
        r.expect_end()?;
        Ok(header)
    }
}

/// A persistent, typed, nullable sequence of values indexed by tuple id.
///
/// Owns one [`RecordStore`]. All access goes through transactions obtained
/// from [`Column::begin`]; the column itself only exposes lifecycle.
pub struct Column {
    def: ColumnDef,
    path: PathBuf,
    created_micros: u64,
    pub(super) store: Arc<RwLock<RecordStore>>,
    /// Guards open/close: every transaction holds the read side for its
    /// whole life, close takes the write side.
    pub(super) global: Arc<RwLock<()>>,
    /// Single-writer / many-readers regime at transaction granularity.
    pub(super) tx_lock: Arc<RwLock<()>>,
    closed: AtomicBool,
}

impl Column {
    /// File name of a column's store within its entity directory.
    pub fn file_name(column: &str) -> String {
        format!("col_{column}.db")
    }

    /// Create a fresh column store under `dir` and write its header.
    pub fn create(dir: &Path, def: ColumnDef, options: StoreOptions) -> Result<Arc<Self>> {
        let path = dir.join(Self::file_name(def.name.last()));
        let mut store = RecordStore::open(&path, options)?;
        let now = now_micros();
        let header = ColumnHeader {
            type_id: def.ty.type_id(),
            logical_size: def.ty.logical_size(),
            nullable: def.nullable,
            count: 0,
            created_micros: now,
            modified_micros: now,
        };
        let recid = store.put(&header, &ColumnHeaderCodec)?;
        if recid != HEADER_RECID {
            return Err(QuiverError::corruption(format!(
                "column store {} is not fresh: header landed at record {recid}",
                path.display()
            )));
        }
        store.commit()?;
        log::debug!("created column {} at {}", def.name, path.display());

        Ok(Arc::new(Self {
            def,
            path,
            created_micros: now,
            store: Arc::new(RwLock::new(store)),
            global: Arc::new(RwLock::new(())),
            tx_lock: Arc::new(RwLock::new(())),
            closed: AtomicBool::new(false),
        }))
    }

    /// Open an existing column store; the definition is reconstructed from
    /// the header record.
    pub fn open(path: &Path, name: &str, options: StoreOptions) -> Result<Arc<Self>> {
        let store = RecordStore::open(path, options)?;
        let header = store
            .get(HEADER_RECID, &ColumnHeaderCodec)?
            .ok_or_else(|| {
                QuiverError::corruption(format!(
                    "column store {} has no header record",
                    path.display()
                ))
            })?;
        let ty = ColumnType::from_parts(header.type_id, header.logical_size)?;
        let def = ColumnDef::new(name, ty, header.nullable);
        log::debug!("opened column {} with {} rows", def.name, header.count);

        Ok(Arc::new(Self {
            def,
            path: path.to_owned(),
            created_micros: header.created_micros,
            store: Arc::new(RwLock::new(store)),
            global: Arc::new(RwLock::new(())),
            tx_lock: Arc::new(RwLock::new(())),
            closed: AtomicBool::new(false),
        }))
    }

    pub fn def(&self) -> &ColumnDef {
        &self.def
    }

    /// Creation time from the header, used to restore an entity's column
    /// order on reopen.
    pub(super) fn created_micros(&self) -> u64 {
        self.created_micros
    }

    /// Begin a transaction on this column. `tid` is a caller-supplied
    /// 128-bit transaction id, used only for diagnostics.
    ///
    /// The transaction holds the column's global read lock until it is
    /// dropped, so [`Column::close`] waits for it.
    pub fn begin(self: &Arc<Self>, readonly: bool, tid: u128) -> Result<ColumnTx> {
        if self.is_closed() {
            return Err(TxError::DboClosed(self.def.name.to_string()).into());
        }
        let global = RwLock::read_arc(&self.global);
        // close() flips the flag under the write side, so holding the read
        // side makes this check definitive.
        if self.is_closed() {
            return Err(TxError::DboClosed(self.def.name.to_string()).into());
        }
        Ok(ColumnTx::new(self.clone(), readonly, tid, global))
    }
}

impl Dbo for Column {
    fn name(&self) -> &Name {
        &self.def.name
    }

    fn path(&self) -> &Path {
        &self.path
    }

    fn close(&self) {
        let _write = self.global.write();
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Err(e) = self.store.write().close() {
            log::warn!("error closing column store {}: {e}", self.path.display());
        }
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl Drop for Column {
    fn drop(&mut self) {
        if !self.is_closed() {
            log::warn!(
                "column {} dropped while still open; closing (resource leak)",
                self.def.name
            );
            self.close();
        }
    }
}

impl std::fmt::Debug for Column {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Column")
            .field("def", &self.def)
            .field("path", &self.path)
            .field("closed", &self.is_closed())
            .finish()
    }
}
