use std::cmp::Ordering;
use std::sync::Arc;

use crate::error::Result;
use crate::exec::task::{cost, TaskOp};
use crate::types::Recordset;

/// Stable sort by one column. Null cells sort after every value.
pub struct SortTask {
    column: String,
    ascending: bool,
    estimated_rows: u64,
}

impl SortTask {
    pub fn new(column: impl Into<String>, ascending: bool, estimated_rows: u64) -> Self {
        Self {
            column: column.into(),
            ascending,
            estimated_rows,
        }
    }
}

impl TaskOp for SortTask {
    fn label(&self) -> String {
        format!(
            "sort({} {})",
            self.column,
            if self.ascending { "asc" } else { "desc" }
        )
    }

    fn cost(&self) -> f64 {
        self.estimated_rows as f64 * cost::CPU
    }

    fn execute(&mut self, inputs: &[Arc<Recordset>]) -> Result<Recordset> {
        let input = &inputs[0];
        let idx = input.column_index(&self.column)?;

        let mut rows: Vec<(i64, Vec<_>)> = input
            .iter()
            .map(|(tid, values)| (tid, values.to_vec()))
            .collect();
        rows.sort_by(|(_, a), (_, b)| {
            let ordering = match (&a[idx], &b[idx]) {
                (Some(x), Some(y)) => x.compare(y).unwrap_or(Ordering::Equal),
                (Some(_), None) => Ordering::Less,
                (None, Some(_)) => Ordering::Greater,
                (None, None) => Ordering::Equal,
            };
            if self.ascending {
                ordering
            } else {
                ordering.reverse()
            }
        });

        let mut out = Recordset::new(input.defs().clone());
        for (tuple_id, values) in rows {
            out.push_row(tuple_id, values);
        }
        Ok(out)
    }
}
