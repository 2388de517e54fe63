use std::collections::BinaryHeap;
use std::sync::Arc;

use rayon::prelude::*;

use super::Predicate;
use crate::db::{Entity, EntityTx};
use crate::error::{Result, ValidationError};
use crate::exec::task::{cost, TaskOp};
use crate::math::Distance;
use crate::types::{ColumnDef, ColumnType, Recordset, Value};

/// The query point of a kNN search, matching the vector column's element
/// type.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryVector {
    F32(Vec<f32>),
    F64(Vec<f64>),
}

impl QueryVector {
    pub fn len(&self) -> usize {
        match self {
            QueryVector::F32(v) => v.len(),
            QueryVector::F64(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// One scored candidate. The ordering is by distance (bit-exact via the
/// IEEE total order), ties broken toward the *larger* tuple id being
/// "greater", so a bounded max-heap evicts it first and lower tuple ids
/// win.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Candidate {
    distance: f64,
    tuple_id: i64,
}

impl Eq for Candidate {}

impl Ord for Candidate {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.distance
            .total_cmp(&other.distance)
            .then_with(|| self.tuple_id.cmp(&other.tuple_id))
    }
}

impl PartialOrd for Candidate {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

/// Bounded max-heap of the `k` best candidates seen so far.
struct TopK {
    k: usize,
    heap: BinaryHeap<Candidate>,
}

impl TopK {
    fn new(k: usize) -> Self {
        Self {
            k,
            heap: BinaryHeap::with_capacity(k + 1),
        }
    }

    fn offer(&mut self, candidate: Candidate) {
        if self.heap.len() < self.k {
            self.heap.push(candidate);
        } else if let Some(worst) = self.heap.peek() {
            if candidate < *worst {
                self.heap.pop();
                self.heap.push(candidate);
            }
        }
    }

    fn merge(mut self, other: TopK) -> TopK {
        for candidate in other.heap {
            self.offer(candidate);
        }
        self
    }

    fn into_sorted(self) -> Vec<Candidate> {
        self.heap.into_sorted_vec()
    }
}

/// Source task: parallel top-k selection over a fixed-width vector column.
///
/// The tuple-id space is split into `parallelism` roughly-equal blocks;
/// each block keeps its own bounded heap, and the per-block heaps merge
/// into the final selection, sorted ascending by distance (ties to the
/// lower tuple id). The block workers are joined before the task returns.
pub struct KnnTask {
    entity: Arc<Entity>,
    column: String,
    query: QueryVector,
    k: usize,
    distance: Distance,
    parallelism: usize,
    prefilter: Option<Predicate>,
    tid: u128,
    estimated_rows: u64,
}

impl KnnTask {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        entity: Arc<Entity>,
        column: impl Into<String>,
        query: QueryVector,
        k: usize,
        distance: Distance,
        parallelism: usize,
        prefilter: Option<Predicate>,
        tid: u128,
        estimated_rows: u64,
    ) -> Self {
        Self {
            entity,
            column: column.into(),
            query,
            k: k.max(1),
            distance,
            parallelism: parallelism.max(1),
            prefilter,
            tid,
            estimated_rows,
        }
    }

    /// Compute the distance of one stored cell, verifying element type and
    /// shape.
    fn score(&self, column_ty: ColumnType, value: &Value) -> Result<f64> {
        match (value, &self.query) {
            (Value::FloatVector(v), QueryVector::F32(q)) => {
                if v.len() != q.len() {
                    return Err(ValidationError::ShapeMismatch {
                        expected: q.len() as u32,
                        got: v.len() as u32,
                    }
                    .into());
                }
                Ok(self.distance.eval_f32(q, v))
            }
            (Value::DoubleVector(v), QueryVector::F64(q)) => {
                if v.len() != q.len() {
                    return Err(ValidationError::ShapeMismatch {
                        expected: q.len() as u32,
                        got: v.len() as u32,
                    }
                    .into());
                }
                Ok(self.distance.eval_f64(q, v))
            }
            _ => Err(ValidationError::TypeMismatch {
                column: self.column.clone(),
                expected: match &self.query {
                    QueryVector::F32(q) => ColumnType::FloatVector(q.len() as u32),
                    QueryVector::F64(q) => ColumnType::DoubleVector(q.len() as u32),
                },
                got: column_ty,
            }
            .into()),
        }
    }

    fn check_column(&self, def: &ColumnDef) -> Result<()> {
        let (family_ok, stored_len) = match (def.ty, &self.query) {
            (ColumnType::FloatVector(n), QueryVector::F32(_)) => (true, n),
            (ColumnType::DoubleVector(n), QueryVector::F64(_)) => (true, n),
            _ => (false, 0),
        };
        if !family_ok {
            return Err(ValidationError::TypeMismatch {
                column: self.column.clone(),
                expected: match &self.query {
                    QueryVector::F32(q) => ColumnType::FloatVector(q.len() as u32),
                    QueryVector::F64(q) => ColumnType::DoubleVector(q.len() as u32),
                },
                got: def.ty,
            }
            .into());
        }
        if stored_len as usize != self.query.len() {
            return Err(ValidationError::ShapeMismatch {
                expected: stored_len,
                got: self.query.len() as u32,
            }
            .into());
        }
        Ok(())
    }

    fn scan_block(&self, tx: &EntityTx, block: &[i64]) -> Result<TopK> {
        let coltx = tx.column_tx(&self.column)?;
        let column_ty = self.entity.column(&self.column)?.def().ty;
        let mut top = TopK::new(self.k);
        for &tuple_id in block {
            if let Some(predicate) = &self.prefilter {
                let record = tx.read(tuple_id)?;
                if !predicate.eval(&record.defs, &record.values)? {
                    continue;
                }
            }
            let Some(value) = coltx.read(tuple_id)? else {
                // Allocated null: no vector, no distance.
                continue;
            };
            let distance = self.score(column_ty, &value)?;
            top.offer(Candidate { distance, tuple_id });
        }
        Ok(top)
    }
}

impl TaskOp for KnnTask {
    fn label(&self) -> String {
        format!("knn({}, {}, k={})", self.column, self.distance, self.k)
    }

    fn cost(&self) -> f64 {
        self.estimated_rows as f64 * cost::CPU
    }

    fn execute(&mut self, _inputs: &[Arc<Recordset>]) -> Result<Recordset> {
        let tx = self.entity.begin(true, self.tid)?;
        self.check_column(self.entity.column(&self.column)?.def())?;

        let ids = tx.column_tx(&self.column)?.tuple_ids()?;
        let block_size = ids.len().div_ceil(self.parallelism).max(1);

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.parallelism)
            .build()
            .map_err(|e| anyhow::anyhow!("could not build knn worker pool: {e}"))?;
        let merged = pool.install(|| {
            ids.par_chunks(block_size)
                .map(|block| self.scan_block(&tx, block))
                .try_reduce(|| TopK::new(self.k), |a, b| Ok(a.merge(b)))
        })?;

        let defs: Arc<[ColumnDef]> = vec![
            ColumnDef::new("tuple_id", ColumnType::Long, false),
            ColumnDef::new("distance", ColumnType::Double, false),
        ]
        .into();
        let mut out = Recordset::new(defs);
        for candidate in merged.into_sorted() {
            out.push_row(
                candidate.tuple_id,
                vec![
                    Some(Value::Long(candidate.tuple_id)),
                    Some(Value::Double(candidate.distance)),
                ],
            );
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn bounded_heap_keeps_the_k_smallest() {
        let mut top = TopK::new(3);
        for (tuple_id, distance) in [(2, 5.0), (3, 1.0), (4, 4.0), (5, 0.5), (6, 2.0)] {
            top.offer(Candidate { distance, tuple_id });
        }
        let sorted = top.into_sorted();
        assert_eq!(
            sorted.iter().map(|c| c.tuple_id).collect::<Vec<_>>(),
            vec![5, 3, 6]
        );
    }

    #[test]
    fn ties_prefer_the_lower_tuple_id() {
        let mut top = TopK::new(2);
        for tuple_id in [9, 4, 7, 2] {
            top.offer(Candidate {
                distance: 1.0,
                tuple_id,
            });
        }
        let sorted = top.into_sorted();
        assert_eq!(
            sorted.iter().map(|c| c.tuple_id).collect::<Vec<_>>(),
            vec![2, 4]
        );
    }

    #[test]
    fn merge_is_a_global_selection() {
        let mut a = TopK::new(2);
        let mut b = TopK::new(2);
        for (tuple_id, distance) in [(2, 3.0), (3, 0.1)] {
            a.offer(Candidate { distance, tuple_id });
        }
        for (tuple_id, distance) in [(4, 0.2), (5, 9.0)] {
            b.offer(Candidate { distance, tuple_id });
        }
        let sorted = a.merge(b).into_sorted();
        assert_eq!(
            sorted.iter().map(|c| c.tuple_id).collect::<Vec<_>>(),
            vec![3, 4]
        );
    }
}
