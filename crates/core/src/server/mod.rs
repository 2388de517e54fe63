//! The transport-free RPC surface: three services over a shared catalogue,
//! and the coarse status codes errors map to at the boundary.
//!
//! The concrete wire transport (and its message schemas) lives outside this
//! crate; these services are what the transport's stubs delegate to.

mod ddl;
mod dml;
mod dql;

pub use ddl::{DdlService, EntityDetails};
pub use dml::DmlService;
pub use dql::{DqlService, QueryRequest, SourceSpec, StageSpec};

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::config::ServerConfig;
use crate::db::{Catalogue, Dbo as _};
use crate::error::{CatalogError, ExecutionError, QuiverError};
use crate::exec::WorkerPool;

/// Coarse status codes of the RPC boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Code {
    NotFound,
    AlreadyExists,
    InvalidArgument,
    FailedPrecondition,
    Internal,
}

/// An RPC-boundary error: a coarse code plus a human-readable message.
#[derive(Debug, Clone)]
pub struct Status {
    pub code: Code,
    pub message: String,
}

impl Status {
    pub fn new(code: Code, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(Code::NotFound, message)
    }

    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::new(Code::InvalidArgument, message)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.code, self.message)
    }
}

impl std::error::Error for Status {}

impl From<QuiverError> for Status {
    fn from(e: QuiverError) -> Self {
        let code = match &e {
            QuiverError::Validation(_) => Code::InvalidArgument,
            QuiverError::Catalog(c) => match c {
                CatalogError::SchemaAlreadyExists(_) | CatalogError::EntityAlreadyExists(_) => {
                    Code::AlreadyExists
                }
                CatalogError::SchemaDoesNotExist(_)
                | CatalogError::EntityDoesNotExist(_)
                | CatalogError::ColumnDoesNotExist(_) => Code::NotFound,
                CatalogError::UnsupportedIndex(_) => Code::InvalidArgument,
            },
            QuiverError::Tx(_) => Code::FailedPrecondition,
            QuiverError::Execution(x) => match x {
                ExecutionError::EmptyAggregate(_) => Code::InvalidArgument,
                _ => Code::Internal,
            },
            QuiverError::Storage(_) | QuiverError::Other(_) => Code::Internal,
        };
        Status::new(code, e.to_string())
    }
}

/// Monotonic source of 128-bit transaction ids, namespaced by the engine's
/// start time.
#[derive(Debug)]
pub struct TidSource {
    epoch: u64,
    counter: AtomicU64,
}

impl TidSource {
    fn new() -> Self {
        Self {
            epoch: crate::db::now_micros(),
            counter: AtomicU64::new(0),
        }
    }

    pub fn fresh(&self) -> u128 {
        let low = self.counter.fetch_add(1, Ordering::SeqCst);
        ((self.epoch as u128) << 64) | low as u128
    }
}

/// The single-process engine: one catalogue, one worker pool, the three
/// services hanging off them. No global state; everything is reachable
/// from here by reference.
pub struct Engine {
    catalogue: Arc<Catalogue>,
    pool: WorkerPool,
    tids: Arc<TidSource>,
    config: ServerConfig,
}

impl Engine {
    pub fn start(config: ServerConfig) -> crate::error::Result<Self> {
        config.validate()?;
        let catalogue = Catalogue::open(&config.root, config.store_options())?;
        let pool = WorkerPool::new(
            config.core_threads,
            config.max_threads,
            config.keep_alive(),
        );
        log::info!(
            "engine up: root={}, workers=[{}, {}]",
            config.root.display(),
            config.core_threads,
            config.max_threads
        );
        Ok(Self {
            catalogue,
            pool,
            tids: Arc::new(TidSource::new()),
            config,
        })
    }

    pub fn catalogue(&self) -> &Arc<Catalogue> {
        &self.catalogue
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn pool(&self) -> &WorkerPool {
        &self.pool
    }

    pub fn ddl(&self) -> DdlService {
        DdlService::new(self.catalogue.clone(), self.tids.clone())
    }

    pub fn dml(&self) -> DmlService {
        DmlService::new(self.catalogue.clone(), self.tids.clone())
    }

    pub fn dql(&self) -> DqlService {
        DqlService::new(
            self.catalogue.clone(),
            self.pool.clone(),
            self.tids.clone(),
            self.config.message_size,
        )
    }

    /// Close the catalogue tree. The engine is unusable afterwards.
    pub fn shutdown(&self) {
        self.catalogue.close();
    }
}
