use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Error yielded when decoding a value or a commit frame from raw bytes.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("buffer too short: needed {needed} more bytes, had {had}")]
    BufferTooShort { needed: usize, had: usize },
    #[error("invalid tag: {0}")]
    InvalidTag(u8),
    #[error("invalid utf-8 in string value")]
    Utf8,
    #[error("{0} trailing bytes after value")]
    TrailingBytes(usize),
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("io: {0}")]
    Io(#[from] io::Error),
    #[error("store file is locked by another process: {0}")]
    Locked(PathBuf),
    #[error("store corruption: {0}")]
    Corruption(String),
    #[error("decode: {0}")]
    Decode(#[from] DecodeError),
    #[error("store is closed")]
    Closed,
}

impl StorageError {
    /// A checksum mismatch was detected at the given byte offset.
    pub(crate) fn checksum_mismatch(offset: u64) -> Self {
        Self::Corruption(format!("checksum mismatch in frame at byte offset {offset}"))
    }
}
