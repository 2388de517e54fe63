//! quiverdb: a column-oriented analytical engine for similarity search
//! over fixed-width vectors alongside relational predicates.
//!
//! The crate is organized along the engine's dependency order:
//!
//! * [`types`] — names, column types, tagged values, records, recordsets;
//! * [`db`] — the persistent object tree (catalogue → schema → entity →
//!   column) and the column transaction machinery, backed by the
//!   `quiverdb-recordstore` crate;
//! * [`exec`] — the task graph, its scheduler and worker pool, and the
//!   recordset operators including the kNN operator;
//! * [`math`] — the distance functions;
//! * [`server`] — the transport-free DDL/DML/DQL services and the
//!   [`server::Engine`] that wires everything together;
//! * [`config`] — server configuration;
//! * [`error`] — the error taxonomy.

pub mod config;
pub mod db;
pub mod error;
pub mod exec;
pub mod math;
pub mod server;
pub mod types;

pub use config::ServerConfig;
pub use db::{Catalogue, Column, Dbo, Entity, Schema};
pub use error::{QuiverError, Result};
pub use server::Engine;
pub use types::{ColumnDef, ColumnType, Name, Record, Recordset, Value};

pub use quiverdb_recordstore::{RecordStore, StoreOptions, VolumeKind};
