use std::sync::Arc;

use crate::error::Result;
use crate::types::Recordset;

/// Handle of a task within one [`crate::exec::ExecutionGraph`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(pub usize);

/// Fixed per-operation cost constants. The engine has no cost-based
/// optimizer; a task's cost is `estimated rows × per-op constant` and is
/// used for bookkeeping and plan inspection only.
pub mod cost {
    pub const MEMORY_READ: f64 = 1e-4;
    pub const DISK_READ: f64 = 1e-2;
    pub const MEMORY_WRITE: f64 = 2e-4;
    pub const CPU: f64 = 1e-3;
}

/// One node's work in an execution graph.
///
/// A task consumes the recordsets produced by its parents (in declared
/// parent order) and emits one recordset. Source tasks get an empty input
/// slice. Tasks run to completion on a pool worker; there is no
/// preemption.
pub trait TaskOp: Send {
    fn label(&self) -> String;
    /// Fixed cost estimate, see [`cost`].
    fn cost(&self) -> f64;
    fn execute(&mut self, inputs: &[Arc<Recordset>]) -> Result<Recordset>;
}
