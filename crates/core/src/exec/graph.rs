use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use super::pool::WorkerPool;
use super::task::{TaskId, TaskOp};
use crate::error::{ExecutionError, QuiverError, Result};
use crate::types::Recordset;

/// Why a node ended up failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureReason {
    /// The task's own `execute` returned an error (or panicked).
    Own,
    /// A (transitive) parent failed; the task never executed.
    ParentFailed(TaskId),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    Pending,
    Running,
    Done,
    Failed(FailureReason),
    /// The plan was cancelled before this task started.
    Skipped,
}

struct Node {
    op: Option<Box<dyn TaskOp>>,
    label: String,
    cost: f64,
    parents: Vec<TaskId>,
    children: Vec<TaskId>,
    state: NodeState,
    output: Option<Arc<Recordset>>,
}

/// Cooperative cancellation flag for one plan execution.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// A query plan: a DAG of tasks scheduled against a worker pool.
///
/// Nodes are arena-allocated and addressed by [`TaskId`]; edges always
/// point from an earlier node to a later one, so the graph is acyclic by
/// construction. The single childless node is the root whose output is the
/// query result.
pub struct ExecutionGraph {
    nodes: Vec<Node>,
}

impl Default for ExecutionGraph {
    fn default() -> Self {
        Self::new()
    }
}

impl ExecutionGraph {
    pub fn new() -> Self {
        Self { nodes: Vec::new() }
    }

    fn add_node(&mut self, op: Box<dyn TaskOp>, parents: Vec<TaskId>) -> Result<TaskId> {
        for parent in &parents {
            if parent.0 >= self.nodes.len() {
                return Err(anyhow::anyhow!("unknown parent task {parent:?}").into());
            }
        }
        let id = TaskId(self.nodes.len());
        for parent in &parents {
            self.nodes[parent.0].children.push(id);
        }
        self.nodes.push(Node {
            label: op.label(),
            cost: op.cost(),
            op: Some(op),
            parents,
            children: Vec::new(),
            state: NodeState::Pending,
            output: None,
        });
        Ok(id)
    }

    /// Add a task with no inputs (e.g. a column scan).
    pub fn add_source(&mut self, op: Box<dyn TaskOp>) -> TaskId {
        self.add_node(op, Vec::new()).expect("no parents to miss")
    }

    /// Add a task consuming exactly one parent's output.
    pub fn add_unary(&mut self, op: Box<dyn TaskOp>, parent: TaskId) -> Result<TaskId> {
        self.add_node(op, vec![parent])
    }

    /// Add a task consuming two parents' outputs, in the given order.
    pub fn add_binary(&mut self, op: Box<dyn TaskOp>, left: TaskId, right: TaskId) -> Result<TaskId> {
        self.add_node(op, vec![left, right])
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Sum of all node cost estimates.
    pub fn total_cost(&self) -> f64 {
        self.nodes.iter().map(|n| n.cost).sum()
    }

    pub fn state(&self, id: TaskId) -> Option<NodeState> {
        self.nodes.get(id.0).map(|n| n.state)
    }

    fn root(&self) -> Result<TaskId> {
        let mut roots = self
            .nodes
            .iter()
            .enumerate()
            .filter(|(_, n)| n.children.is_empty())
            .map(|(i, _)| TaskId(i));
        match (roots.next(), roots.next()) {
            (Some(root), None) => Ok(root),
            (None, _) => Err(ExecutionError::EmptyGraph.into()),
            (Some(_), Some(_)) => {
                Err(anyhow::anyhow!("plan has more than one terminal task").into())
            }
        }
    }

    /// Run the plan to completion on `pool` and return the root's output.
    pub fn execute(&mut self, pool: &WorkerPool) -> Result<Recordset> {
        self.execute_with(pool, &CancelFlag::default())
    }

    /// Run the plan, honoring `cancel`: once set, tasks not yet started are
    /// marked skipped, in-flight tasks run to completion, and the partial
    /// result is discarded.
    pub fn execute_with(&mut self, pool: &WorkerPool, cancel: &CancelFlag) -> Result<Recordset> {
        let root = self.root()?;
        let (done_tx, done_rx) = crossbeam_channel::unbounded::<(TaskId, Result<Recordset>)>();

        let mut waiting: Vec<usize> = self.nodes.iter().map(|n| n.parents.len()).collect();
        let mut in_flight = 0usize;
        let mut first_error: Option<QuiverError> = None;

        let ready: Vec<TaskId> = (0..self.nodes.len())
            .filter(|&i| waiting[i] == 0)
            .map(TaskId)
            .collect();
        for id in ready {
            self.start(id, pool, &done_tx, &mut in_flight);
        }

        while in_flight > 0 {
            let (id, result) = done_rx.recv().expect("task result channel broke");
            in_flight -= 1;
            match result {
                Ok(output) => {
                    let output = Arc::new(output);
                    self.nodes[id.0].state = NodeState::Done;
                    self.nodes[id.0].output = Some(output);
                    for child in self.nodes[id.0].children.clone() {
                        waiting[child.0] -= 1;
                        if waiting[child.0] == 0 {
                            if cancel.is_cancelled() {
                                self.nodes[child.0].state = NodeState::Skipped;
                            } else {
                                self.start(child, pool, &done_tx, &mut in_flight);
                            }
                        }
                    }
                }
                Err(e) => {
                    log::warn!("task `{}` failed: {e}", self.nodes[id.0].label);
                    self.nodes[id.0].state = NodeState::Failed(FailureReason::Own);
                    first_error.get_or_insert(e);
                    self.fail_descendants(id);
                }
            }
        }

        if cancel.is_cancelled() {
            // Discard partial results.
            for node in &mut self.nodes {
                node.output = None;
                if node.state == NodeState::Pending {
                    node.state = NodeState::Skipped;
                }
            }
            return Err(ExecutionError::Cancelled.into());
        }

        match self.nodes[root.0].state {
            NodeState::Done => {
                let output = self.nodes[root.0]
                    .output
                    .take()
                    .expect("done root has an output");
                Ok(Arc::try_unwrap(output).unwrap_or_else(|arc| (*arc).clone()))
            }
            _ => Err(first_error
                .unwrap_or_else(|| ExecutionError::ParentFailed(root).into())),
        }
    }

    fn start(
        &mut self,
        id: TaskId,
        pool: &WorkerPool,
        done_tx: &crossbeam_channel::Sender<(TaskId, Result<Recordset>)>,
        in_flight: &mut usize,
    ) {
        let mut op = self.nodes[id.0].op.take().expect("task started twice");
        let label = self.nodes[id.0].label.clone();
        let parents = self.nodes[id.0].parents.clone();
        let inputs: Vec<Arc<Recordset>> = parents
            .iter()
            .map(|p| {
                self.nodes[p.0]
                    .output
                    .clone()
                    .expect("parent completed before child start")
            })
            .collect();
        self.nodes[id.0].state = NodeState::Running;
        *in_flight += 1;

        let done_tx = done_tx.clone();
        pool.submit(move || {
            let result = catch_unwind(AssertUnwindSafe(|| op.execute(&inputs)))
                .unwrap_or_else(|_| Err(ExecutionError::WorkerPanic(label).into()));
            let _ = done_tx.send((id, result));
        });
    }

    /// Mark every not-yet-started descendant of `failed` as failed without
    /// executing it.
    fn fail_descendants(&mut self, failed: TaskId) {
        let mut stack: Vec<(TaskId, TaskId)> = self.nodes[failed.0]
            .children
            .iter()
            .map(|&child| (failed, child))
            .collect();
        while let Some((parent, id)) = stack.pop() {
            if matches!(self.nodes[id.0].state, NodeState::Pending) {
                self.nodes[id.0].state = NodeState::Failed(FailureReason::ParentFailed(parent));
                let children = self.nodes[id.0].children.clone();
                stack.extend(children.into_iter().map(|child| (id, child)));
            }
        }
    }
}

impl std::fmt::Debug for ExecutionGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut dbg = f.debug_struct("ExecutionGraph");
        for (i, node) in self.nodes.iter().enumerate() {
            dbg.field(
                &format!("task{i}"),
                &format!(
                    "{} parents={:?} state={:?} cost={:.4}",
                    node.label, node.parents, node.state, node.cost
                ),
            );
        }
        dbg.finish()
    }
}
