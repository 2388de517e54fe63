//! The persistent object tree: catalogue → schema → entity → column, and
//! the column transaction machinery.

pub mod catalogue;
pub mod column;
pub mod entity;
pub mod index;
pub mod schema;
pub mod transaction;

use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::lock_api::{ArcRwLockReadGuard, ArcRwLockWriteGuard};
use parking_lot::RawRwLock;

use quiverdb_recordstore::{Codec, DecodeError, Reader, RecordId};

pub use catalogue::Catalogue;
pub use column::Column;
pub use entity::{Entity, EntityTx};
pub use index::{Index, IndexType};
pub use schema::Schema;
pub use transaction::{ColumnTx, TxStatus};

// Type aliases for lock guards
pub(crate) type SharedReadGuard<T> = ArcRwLockReadGuard<RawRwLock, T>;
pub(crate) type SharedWriteGuard<T> = ArcRwLockWriteGuard<RawRwLock, T>;

/// Reserved record id of every store's header record.
pub const HEADER_RECID: RecordId = 1;
/// Smallest record id that can carry row payload.
pub const MIN_TUPLE_ID: i64 = 2;

/// A database object in the catalogue tree.
///
/// Every DBO is `open` until [`Dbo::close`], which is idempotent, terminal,
/// and cascades to owned children. Operations on a closed DBO fail with
/// [`crate::error::TxError::DboClosed`].
pub trait Dbo {
    fn name(&self) -> &crate::types::Name;
    fn path(&self) -> &Path;
    fn close(&self);
    fn is_closed(&self) -> bool;
}

pub(crate) fn now_micros() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_micros() as u64
}

/// Header record (id 1) of a catalogue or schema store: bookkeeping counts
/// plus the record ids of the child descriptors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct DirectoryHeader {
    pub count: i64,
    pub created_micros: u64,
    pub modified_micros: u64,
    pub child_recids: Vec<RecordId>,
}

impl DirectoryHeader {
    pub(crate) fn new() -> Self {
        let now = now_micros();
        Self {
            count: 0,
            created_micros: now,
            modified_micros: now,
            child_recids: Vec::new(),
        }
    }
}

pub(crate) struct DirectoryHeaderCodec;

impl Codec<DirectoryHeader> for DirectoryHeaderCodec {
    fn encode(&self, value: &DirectoryHeader, out: &mut Vec<u8>) {
        out.extend_from_slice(&value.count.to_le_bytes());
        out.extend_from_slice(&value.created_micros.to_le_bytes());
        out.extend_from_slice(&value.modified_micros.to_le_bytes());
        out.extend_from_slice(&(value.child_recids.len() as u32).to_le_bytes());
        for recid in &value.child_recids {
            out.extend_from_slice(&recid.to_le_bytes());
        }
    }

    fn decode(&self, bytes: &[u8]) -> Result<DirectoryHeader, DecodeError> {
        let mut r = Reader::new(bytes);
        let count = r.get_i64()?;
        let created_micros = r.get_u64()?;
        let modified_micros = r.get_u64()?;
        let n = r.get_u32()? as usize;
        let mut child_recids = Vec::with_capacity(n);
        for _ in 0..n {
            child_recids.push(r.get_i64()?);
        }
        r.expect_end()?;
        Ok(DirectoryHeader {
            count,
            created_micros,
            modified_micros,
            child_recids,
        })
    }
}

/// Child descriptor record of a catalogue or schema store: just the name.
pub(crate) struct DescriptorCodec;

impl Codec<String> for DescriptorCodec {
    fn encode(&self, value: &String, out: &mut Vec<u8>) {
        out.extend_from_slice(&(value.len() as u32).to_le_bytes());
        out.extend_from_slice(value.as_bytes());
    }

    fn decode(&self, bytes: &[u8]) -> Result<String, DecodeError> {
        let mut r = Reader::new(bytes);
        let n = r.get_u32()? as usize;
        let raw = r.get_bytes(n)?;
        r.expect_end()?;
        String::from_utf8(raw.to_vec()).map_err(|_| DecodeError::Utf8)
    }
}
