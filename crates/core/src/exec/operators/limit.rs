use std::sync::Arc;

use crate::error::Result;
use crate::exec::task::{cost, TaskOp};
use crate::types::Recordset;

/// Emit the first `k` rows of the input.
pub struct LimitTask {
    k: usize,
    estimated_rows: u64,
}

impl LimitTask {
    pub fn new(k: usize, estimated_rows: u64) -> Self {
        Self { k, estimated_rows }
    }
}

impl TaskOp for LimitTask {
    fn label(&self) -> String {
        format!("limit({})", self.k)
    }

    fn cost(&self) -> f64 {
        self.estimated_rows.min(self.k as u64) as f64 * cost::MEMORY_READ
    }

    fn execute(&mut self, inputs: &[Arc<Recordset>]) -> Result<Recordset> {
        let input = &inputs[0];
        let mut out = Recordset::new(input.defs().clone());
        for (tuple_id, values) in input.iter().take(self.k) {
            out.push_row(tuple_id, values.to_vec());
        }
        Ok(out)
    }
}
