use thiserror::Error;

use quiverdb_recordstore::{DecodeError, StorageError};

use crate::exec::TaskId;
use crate::types::ColumnType;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ValidationError {
    #[error("a simple (single-segment) name is required, got `{0}`")]
    SimpleNameRequired(String),
    #[error("invalid name: `{0}`")]
    InvalidName(String),
    #[error("unknown column type id: {0}")]
    UnknownType(u8),
    #[error("column `{0}` is not nullable")]
    NullInNonNullable(String),
    #[error("vector length mismatch: expected {expected}, got {got}")]
    ShapeMismatch { expected: u32, got: u32 },
    #[error("type mismatch for `{column}`: expected {expected:?}, got {got:?}")]
    TypeMismatch {
        column: String,
        expected: ColumnType,
        got: ColumnType,
    },
    #[error("invalid tuple id: {0} (0 is unused, 1 is the header record)")]
    InvalidTupleId(i64),
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum CatalogError {
    #[error("schema with name `{0}` already exists")]
    SchemaAlreadyExists(String),
    #[error("schema with name `{0}` does not exist")]
    SchemaDoesNotExist(String),
    #[error("entity with name `{0}` already exists")]
    EntityAlreadyExists(String),
    #[error("entity with name `{0}` does not exist")]
    EntityDoesNotExist(String),
    #[error("column with name `{0}` does not exist")]
    ColumnDoesNotExist(String),
    #[error("index type `{0}` is not supported; only the uniform scan path executes")]
    UnsupportedIndex(String),
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum TxError {
    #[error("transaction is closed")]
    Closed,
    #[error("transaction is in the error state; only rollback and close are valid")]
    InError,
    #[error("transaction is read-only")]
    ReadOnly,
    #[error("could not acquire the column write lock; another transaction is writing")]
    WriteLockUnavailable,
    #[error("database object `{0}` is closed")]
    DboClosed(String),
}

#[derive(Error, Debug)]
pub enum ExecutionError {
    #[error("parent task {0:?} failed")]
    ParentFailed(TaskId),
    #[error("task `{0}` timed out waiting for a worker")]
    Timeout(String),
    #[error("query was cancelled")]
    Cancelled,
    #[error("aggregate `{0}` over an empty input")]
    EmptyAggregate(String),
    #[error("execution graph has no tasks")]
    EmptyGraph,
    #[error("worker panicked while running task `{0}`")]
    WorkerPanic(String),
}

/// Top-level error of the engine, folding the per-subsystem enums.
#[derive(Error, Debug)]
pub enum QuiverError {
    #[error("validation: {0}")]
    Validation(#[from] ValidationError),
    #[error("catalog: {0}")]
    Catalog(#[from] CatalogError),
    #[error("transaction: {0}")]
    Tx(#[from] TxError),
    #[error("storage: {0}")]
    Storage(#[from] StorageError),
    #[error("execution: {0}")]
    Execution(#[from] ExecutionError),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl From<DecodeError> for QuiverError {
    fn from(e: DecodeError) -> Self {
        Self::Storage(StorageError::Decode(e))
    }
}

impl From<std::io::Error> for QuiverError {
    fn from(e: std::io::Error) -> Self {
        Self::Storage(StorageError::Io(e))
    }
}

impl QuiverError {
    /// Invariant breakage discovered in on-disk state.
    pub fn corruption(reason: impl Into<String>) -> Self {
        Self::Storage(StorageError::Corruption(reason.into()))
    }
}

pub type Result<T, E = QuiverError> = std::result::Result<T, E>;
