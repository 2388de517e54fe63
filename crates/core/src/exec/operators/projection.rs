use std::sync::Arc;

use itertools::Itertools as _;

use crate::error::Result;
use crate::exec::task::{cost, TaskOp};
use crate::types::{ColumnDef, Name, Recordset};

/// Emit the named subset of the input's columns, honoring aliases.
pub struct ProjectionTask {
    /// `(column, alias)` pairs, in output order.
    fields: Vec<(String, Option<String>)>,
    estimated_rows: u64,
}

impl ProjectionTask {
    pub fn new(fields: Vec<(String, Option<String>)>, estimated_rows: u64) -> Self {
        Self {
            fields,
            estimated_rows,
        }
    }
}

impl TaskOp for ProjectionTask {
    fn label(&self) -> String {
        format!(
            "project({})",
            self.fields.iter().map(|(name, _)| name).join(",")
        )
    }

    fn cost(&self) -> f64 {
        self.estimated_rows as f64 * cost::MEMORY_WRITE
    }

    fn execute(&mut self, inputs: &[Arc<Recordset>]) -> Result<Recordset> {
        let input = &inputs[0];
        let mut indices = Vec::with_capacity(self.fields.len());
        let mut defs: Vec<ColumnDef> = Vec::with_capacity(self.fields.len());
        for (column, alias) in &self.fields {
            let idx = input.column_index(column)?;
            let mut def = input.defs()[idx].clone();
            if let Some(alias) = alias {
                def.name = Name::simple(alias.clone());
            }
            indices.push(idx);
            defs.push(def);
        }

        let mut out = Recordset::new(defs.into());
        for (tuple_id, values) in input.iter() {
            out.push_row(
                tuple_id,
                indices.iter().map(|&i| values[i].clone()).collect(),
            );
        }
        Ok(out)
    }
}
