use std::sync::Arc;

use super::{Status, TidSource};
use crate::db::Catalogue;
use crate::error::Result;
use crate::exec::operators::{
    AggregateKind, AggregateTask, FilterTask, KnnTask, LimitTask, Predicate, ProjectionTask,
    QueryVector, ScanTask, SortTask,
};
use crate::exec::{ExecutionGraph, WorkerPool};
use crate::math::Distance;
use crate::types::Recordset;

/// How a query plan produces its initial rows.
#[derive(Debug, Clone, PartialEq)]
pub enum SourceSpec {
    /// Full scan of the entity.
    Scan,
    /// Parallel top-k over a vector column.
    Knn {
        column: String,
        query: QueryVector,
        k: usize,
        distance: Distance,
        parallelism: usize,
        prefilter: Option<Predicate>,
    },
}

/// One recordset operator applied to the rows of the stage before it.
#[derive(Debug, Clone, PartialEq)]
pub enum StageSpec {
    Filter(Predicate),
    /// `(column, alias)` pairs.
    Project(Vec<(String, Option<String>)>),
    Aggregate {
        kind: AggregateKind,
        column: Option<String>,
    },
    Limit(usize),
    Sort {
        column: String,
        ascending: bool,
    },
}

/// A transport-free query plan: a source feeding a chain of operator
/// stages over one entity.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryRequest {
    pub schema: String,
    pub entity: String,
    pub source: SourceSpec,
    pub stages: Vec<StageSpec>,
}

/// Data-query surface: compiles plans, runs them on the worker pool, and
/// streams results back as size-bounded chunks.
pub struct DqlService {
    catalogue: Arc<Catalogue>,
    pool: WorkerPool,
    tids: Arc<TidSource>,
    message_size: usize,
}

impl DqlService {
    pub(super) fn new(
        catalogue: Arc<Catalogue>,
        pool: WorkerPool,
        tids: Arc<TidSource>,
        message_size: usize,
    ) -> Self {
        Self {
            catalogue,
            pool,
            tids,
            message_size,
        }
    }

    pub fn ping(&self) {}

    /// Run `request` and return its result as chunks of at most
    /// `message_size` bytes each.
    #[tracing::instrument(skip_all, fields(schema = %request.schema, entity = %request.entity))]
    pub fn query(&self, request: &QueryRequest) -> Result<Vec<Recordset>, Status> {
        if let SourceSpec::Knn { k, .. } = &request.source {
            if *k == 0 {
                return Err(Status::invalid_argument("k must be at least 1"));
            }
        }
        let mut graph = self.compile(request)?;
        log::debug!(
            "executing plan with {} tasks, estimated cost {:.4}",
            graph.len(),
            graph.total_cost()
        );
        let result = graph.execute(&self.pool)?;
        Ok(result.into_chunks(self.message_size))
    }

    /// Lower a request into an execution graph: one source node plus one
    /// unary node per stage.
    pub fn compile(&self, request: &QueryRequest) -> Result<ExecutionGraph> {
        let entity = self
            .catalogue
            .schema(&request.schema)?
            .entity(&request.entity)?;

        let mut estimated_rows = {
            let mut tx = entity.begin(true, self.tids.fresh())?;
            let rows = tx.count()? as u64;
            tx.close();
            rows
        };

        let mut graph = ExecutionGraph::new();
        let mut head = match &request.source {
            SourceSpec::Scan => graph.add_source(Box::new(ScanTask::new(
                entity.clone(),
                self.tids.fresh(),
                estimated_rows,
            ))),
            SourceSpec::Knn {
                column,
                query,
                k,
                distance,
                parallelism,
                prefilter,
            } => {
                let id = graph.add_source(Box::new(KnnTask::new(
                    entity.clone(),
                    column.clone(),
                    query.clone(),
                    *k,
                    *distance,
                    *parallelism,
                    prefilter.clone(),
                    self.tids.fresh(),
                    estimated_rows,
                )));
                estimated_rows = estimated_rows.min(*k as u64);
                id
            }
        };

        for stage in &request.stages {
            let op: Box<dyn crate::exec::TaskOp> = match stage {
                StageSpec::Filter(predicate) => {
                    Box::new(FilterTask::new(predicate.clone(), estimated_rows))
                }
                StageSpec::Project(fields) => {
                    Box::new(ProjectionTask::new(fields.clone(), estimated_rows))
                }
                StageSpec::Aggregate { kind, column } => {
                    let task = AggregateTask::new(*kind, column.clone(), estimated_rows);
                    estimated_rows = 1;
                    Box::new(task)
                }
                StageSpec::Limit(k) => {
                    estimated_rows = estimated_rows.min(*k as u64);
                    Box::new(LimitTask::new(*k, estimated_rows))
                }
                StageSpec::Sort { column, ascending } => {
                    Box::new(SortTask::new(column.clone(), *ascending, estimated_rows))
                }
            };
            head = graph.add_unary(op, head)?;
        }

        Ok(graph)
    }
}
