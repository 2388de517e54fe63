use std::sync::Arc;

use super::Predicate;
use crate::error::Result;
use crate::exec::task::{cost, TaskOp};
use crate::types::Recordset;

/// Keep the rows the predicate accepts, preserving order and tuple ids.
pub struct FilterTask {
    predicate: Predicate,
    estimated_rows: u64,
}

impl FilterTask {
    pub fn new(predicate: Predicate, estimated_rows: u64) -> Self {
        Self {
            predicate,
            estimated_rows,
        }
    }
}

impl TaskOp for FilterTask {
    fn label(&self) -> String {
        "filter".to_owned()
    }

    fn cost(&self) -> f64 {
        self.estimated_rows as f64 * cost::CPU
    }

    fn execute(&mut self, inputs: &[Arc<Recordset>]) -> Result<Recordset> {
        let input = &inputs[0];
        let mut out = Recordset::new(input.defs().clone());
        for (tuple_id, values) in input.iter() {
            if self.predicate.eval(input.defs(), values)? {
                out.push_row(tuple_id, values.to_vec());
            }
        }
        Ok(out)
    }
}
