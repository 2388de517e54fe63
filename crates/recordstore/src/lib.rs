//! Embedded append-style record store.
//!
//! A [`RecordStore`] is a persistent map from [`RecordId`] to an opaque byte
//! payload, with caller-supplied [`Codec`]s for typed access. Durability
//! comes from an append-only log of checksummed commit frames: staged
//! operations become visible and durable together on [`RecordStore::commit`],
//! and a crash before the commit finished leaves no partial effects behind
//! (the torn tail frame is discarded on the next open).
//!
//! Concurrent opens of the same file are excluded by an advisory file lock,
//! waited on up to [`StoreOptions::lock_timeout`].

mod codec;
mod error;
mod frame;
mod lock;
mod store;
mod volume;

pub use codec::{Codec, RawBytes, Reader};
pub use error::{DecodeError, StorageError};
pub use store::{RecordStore, StoreOptions};
pub use volume::VolumeKind;

/// Identifier of a record within one store. Allocation starts at 1; by
/// convention id 1 is the owner's header record and never payload.
pub type RecordId = i64;
