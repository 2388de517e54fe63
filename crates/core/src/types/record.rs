use std::sync::Arc;

use super::{ColumnDef, Value};
use crate::error::{CatalogError, QuiverError};

/// A free-standing row: tuple id, column definitions, and one value slot
/// per column. Equal iff all three components are element-wise equal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub tuple_id: i64,
    pub defs: Arc<[ColumnDef]>,
    pub values: Vec<Option<Value>>,
}

impl Record {
    pub fn value(&self, column: &str) -> Option<&Value> {
        let idx = self.defs.iter().position(|d| d.name.last() == column)?;
        self.values[idx].as_ref()
    }
}

/// An in-memory tabular result: an ordered column schema plus rows sharing
/// it. Row order is stable as emitted by the producing task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Recordset {
    defs: Arc<[ColumnDef]>,
    rows: Vec<(i64, Vec<Option<Value>>)>,
}

impl Recordset {
    pub fn new(defs: Arc<[ColumnDef]>) -> Self {
        Self {
            defs,
            rows: Vec::new(),
        }
    }

    pub fn defs(&self) -> &Arc<[ColumnDef]> {
        &self.defs
    }

    /// Append a row. The value count must match the schema arity.
    pub fn push_row(&mut self, tuple_id: i64, values: Vec<Option<Value>>) {
        debug_assert_eq!(values.len(), self.defs.len(), "row arity mismatch");
        self.rows.push((tuple_id, values));
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Random access by position.
    pub fn row(&self, idx: usize) -> Option<(i64, &[Option<Value>])> {
        self.rows.get(idx).map(|(tid, vs)| (*tid, vs.as_slice()))
    }

    pub fn iter(&self) -> impl Iterator<Item = (i64, &[Option<Value>])> {
        self.rows.iter().map(|(tid, vs)| (*tid, vs.as_slice()))
    }

    /// Materialize one row as a free-standing [`Record`]. Expensive in bulk;
    /// operators work on the borrowed rows instead.
    pub fn record(&self, idx: usize) -> Option<Record> {
        self.rows.get(idx).map(|(tid, vs)| Record {
            tuple_id: *tid,
            defs: self.defs.clone(),
            values: vs.clone(),
        })
    }

    /// Index of the column named `name` (matching the last name segment).
    pub fn column_index(&self, name: &str) -> Result<usize, QuiverError> {
        self.defs
            .iter()
            .position(|d| d.name.last() == name)
            .ok_or_else(|| CatalogError::ColumnDoesNotExist(name.to_owned()).into())
    }

    /// Rough per-row wire size, used to bound response chunks.
    pub fn approx_row_bytes(&self) -> usize {
        let per_def: usize = self
            .defs
            .iter()
            .map(|d| 8 + d.logical_size() as usize * 8)
            .sum();
        8 + per_def
    }

    /// Split into consecutive chunks of at most `max_bytes` each (at least
    /// one row per chunk, so a pathologically wide row still makes
    /// progress).
    pub fn into_chunks(self, max_bytes: usize) -> Vec<Recordset> {
        if self.rows.is_empty() {
            return vec![self];
        }
        let per_row = self.approx_row_bytes().max(1);
        let rows_per_chunk = (max_bytes / per_row).max(1);
        let defs = self.defs;
        let mut rows = self.rows;
        let mut chunks = Vec::with_capacity(rows.len().div_ceil(rows_per_chunk));
        while !rows.is_empty() {
            let rest = rows.split_off(rows.len().min(rows_per_chunk));
            chunks.push(Recordset {
                defs: defs.clone(),
                rows,
            });
            rows = rest;
        }
        chunks
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ColumnType;
    use pretty_assertions::assert_eq;

    fn defs() -> Arc<[ColumnDef]> {
        vec![
            ColumnDef::new("id", ColumnType::Long, false),
            ColumnDef::new("score", ColumnType::Double, true),
        ]
        .into()
    }

    #[test]
    fn record_equality_is_elementwise() {
        let a = Record {
            tuple_id: 2,
            defs: defs(),
            values: vec![Some(Value::Long(1)), None],
        };
        let mut b = a.clone();
        assert_eq!(a, b);
        b.values[1] = Some(Value::Double(0.5));
        assert_ne!(a, b);
    }

    #[test]
    fn chunks_preserve_order() {
        let mut rs = Recordset::new(defs());
        for i in 0..10 {
            rs.push_row(i + 2, vec![Some(Value::Long(i)), None]);
        }
        let per_row = rs.approx_row_bytes();
        let chunks = rs.into_chunks(per_row * 3);
        assert_eq!(chunks.len(), 4);
        let collected: Vec<i64> = chunks
            .iter()
            .flat_map(|c| c.iter().map(|(tid, _)| tid).collect::<Vec<_>>())
            .collect();
        assert_eq!(collected, (2..12).collect::<Vec<_>>());
    }
}
