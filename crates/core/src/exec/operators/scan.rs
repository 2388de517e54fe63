use std::sync::Arc;

use crate::db::{Dbo as _, Entity};
use crate::error::Result;
use crate::exec::task::{cost, TaskOp};
use crate::types::Recordset;

/// Source task: a full scan of one entity under a fresh read-only
/// transaction.
pub struct ScanTask {
    entity: Arc<Entity>,
    tid: u128,
    estimated_rows: u64,
}

impl ScanTask {
    pub fn new(entity: Arc<Entity>, tid: u128, estimated_rows: u64) -> Self {
        Self {
            entity,
            tid,
            estimated_rows,
        }
    }
}

impl TaskOp for ScanTask {
    fn label(&self) -> String {
        format!("scan({})", self.entity.name())
    }

    fn cost(&self) -> f64 {
        self.estimated_rows as f64 * cost::DISK_READ
    }

    fn execute(&mut self, _inputs: &[Arc<Recordset>]) -> Result<Recordset> {
        let mut tx = self.entity.begin(true, self.tid)?;
        let out = tx.scan()?;
        tx.close();
        Ok(out)
    }
}
