//! Recordset operator tasks: one node type per relational operation.

mod aggregate;
mod filter;
mod knn;
mod limit;
mod projection;
mod scan;
mod sort;

pub use aggregate::{AggregateKind, AggregateTask};
pub use filter::FilterTask;
pub use knn::{KnnTask, QueryVector};
pub use limit::LimitTask;
pub use projection::ProjectionTask;
pub use scan::ScanTask;
pub use sort::SortTask;

use crate::error::{Result, ValidationError};
use crate::types::{ColumnDef, Value};

/// Comparison operators of a [`Predicate`] leaf.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

/// A boolean predicate over one row, evaluated against the row's column
/// definitions and values.
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    /// Compare a column against a literal. A null cell never matches.
    Compare {
        column: String,
        op: CompareOp,
        value: Value,
    },
    IsNull {
        column: String,
    },
    Not(Box<Predicate>),
    And(Box<Predicate>, Box<Predicate>),
    Or(Box<Predicate>, Box<Predicate>),
}

impl Predicate {
    pub fn compare(column: impl Into<String>, op: CompareOp, value: Value) -> Self {
        Predicate::Compare {
            column: column.into(),
            op,
            value,
        }
    }

    pub fn and(self, other: Predicate) -> Self {
        Predicate::And(Box::new(self), Box::new(other))
    }

    pub fn or(self, other: Predicate) -> Self {
        Predicate::Or(Box::new(self), Box::new(other))
    }

    pub fn eval(&self, defs: &[ColumnDef], values: &[Option<Value>]) -> Result<bool> {
        match self {
            Predicate::Compare { column, op, value } => {
                let idx = column_index(defs, column)?;
                let Some(cell) = &values[idx] else {
                    return Ok(false);
                };
                let ordering = cell.compare(value).ok_or_else(|| {
                    ValidationError::TypeMismatch {
                        column: column.clone(),
                        expected: defs[idx].ty,
                        got: value.type_of(),
                    }
                })?;
                Ok(match op {
                    CompareOp::Eq => ordering.is_eq(),
                    CompareOp::Ne => ordering.is_ne(),
                    CompareOp::Lt => ordering.is_lt(),
                    CompareOp::Le => ordering.is_le(),
                    CompareOp::Gt => ordering.is_gt(),
                    CompareOp::Ge => ordering.is_ge(),
                })
            }
            Predicate::IsNull { column } => {
                let idx = column_index(defs, column)?;
                Ok(values[idx].is_none())
            }
            Predicate::Not(inner) => Ok(!inner.eval(defs, values)?),
            Predicate::And(a, b) => Ok(a.eval(defs, values)? && b.eval(defs, values)?),
            Predicate::Or(a, b) => Ok(a.eval(defs, values)? || b.eval(defs, values)?),
        }
    }
}

fn column_index(defs: &[ColumnDef], name: &str) -> Result<usize> {
    defs.iter()
        .position(|d| d.name.last() == name)
        .ok_or_else(|| crate::error::CatalogError::ColumnDoesNotExist(name.to_owned()).into())
}
