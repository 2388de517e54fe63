use std::sync::Arc;

use crate::error::{ExecutionError, Result, ValidationError};
use crate::exec::task::{cost, TaskOp};
use crate::types::{ColumnDef, ColumnType, Recordset, Value};

/// Aggregation functions over one numeric column (or the row count).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregateKind {
    Count,
    Sum,
    Min,
    Max,
    /// Fails with [`ExecutionError::EmptyAggregate`] when no value
    /// contributes (empty input, or every cell null).
    Mean,
}

impl AggregateKind {
    fn name(&self) -> &'static str {
        match self {
            AggregateKind::Count => "count",
            AggregateKind::Sum => "sum",
            AggregateKind::Min => "min",
            AggregateKind::Max => "max",
            AggregateKind::Mean => "mean",
        }
    }
}

/// Collapse the input to a 1×1 double recordset.
///
/// Values are promoted to `f64` before combining. `min` starts from `+∞`
/// and `max` from `-∞`, so an input with no contributing values emits the
/// identity of the fold rather than a fabricated zero.
pub struct AggregateTask {
    kind: AggregateKind,
    /// Ignored for `Count`.
    column: Option<String>,
    estimated_rows: u64,
}

impl AggregateTask {
    pub fn new(kind: AggregateKind, column: Option<String>, estimated_rows: u64) -> Self {
        Self {
            kind,
            column,
            estimated_rows,
        }
    }
}

impl TaskOp for AggregateTask {
    fn label(&self) -> String {
        match &self.column {
            Some(column) => format!("{}({column})", self.kind.name()),
            None => format!("{}(*)", self.kind.name()),
        }
    }

    fn cost(&self) -> f64 {
        self.estimated_rows as f64 * cost::CPU
    }

    fn execute(&mut self, inputs: &[Arc<Recordset>]) -> Result<Recordset> {
        let input = &inputs[0];

        let result = if self.kind == AggregateKind::Count {
            input.len() as f64
        } else {
            let column = self.column.as_deref().unwrap_or_default();
            let idx = input.column_index(column)?;
            let def = &input.defs()[idx];
            if !def.ty.is_numeric() {
                return Err(ValidationError::TypeMismatch {
                    column: column.to_owned(),
                    expected: ColumnType::Double,
                    got: def.ty,
                }
                .into());
            }

            let mut acc = match self.kind {
                AggregateKind::Min => f64::INFINITY,
                AggregateKind::Max => f64::NEG_INFINITY,
                _ => 0.0,
            };
            let mut contributing = 0u64;
            for (_, values) in input.iter() {
                let Some(value) = &values[idx] else { continue };
                let v = value.as_f64().expect("numeric column checked above");
                contributing += 1;
                match self.kind {
                    AggregateKind::Sum | AggregateKind::Mean => acc += v,
                    AggregateKind::Min => acc = acc.min(v),
                    AggregateKind::Max => acc = acc.max(v),
                    AggregateKind::Count => unreachable!(),
                }
            }
            if self.kind == AggregateKind::Mean {
                if contributing == 0 {
                    return Err(ExecutionError::EmptyAggregate(self.label()).into());
                }
                acc /= contributing as f64;
            }
            acc
        };

        let defs: Arc<[ColumnDef]> =
            vec![ColumnDef::new(self.label(), ColumnType::Double, false)].into();
        let mut out = Recordset::new(defs);
        // Tuple id 0 is never valid row payload, which makes it the natural
        // marker for a synthetic result row.
        out.push_row(0, vec![Some(Value::Double(result))]);
        Ok(out)
    }
}
