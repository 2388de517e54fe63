use std::fs::File;
use std::path::Path;
use std::time::{Duration, Instant};

use fs2::FileExt as _;

use crate::error::StorageError;

const RETRY_INTERVAL: Duration = Duration::from_millis(10);

/// Exclusive advisory lock on a store file, taken on a `.lock` sibling.
///
/// The lock dies with the file handle. The sibling file itself is left in
/// place; unlinking it would let a second process lock a fresh inode while
/// a third still holds the old one.
#[derive(Debug)]
pub(crate) struct FileLock {
    _file: File,
}

impl FileLock {
    /// Try to acquire the lock, retrying until `timeout` has elapsed.
    pub(crate) fn acquire(path: &Path, timeout: Duration) -> Result<Self, StorageError> {
        let file = File::create(path)?;
        let deadline = Instant::now() + timeout;
        loop {
            match file.try_lock_exclusive() {
                Ok(()) => return Ok(Self { _file: file }),
                Err(_) if Instant::now() < deadline => std::thread::sleep(RETRY_INTERVAL),
                Err(e) => {
                    log::warn!("could not lock {}: {e}", path.display());
                    return Err(StorageError::Locked(path.to_owned()));
                }
            }
        }
    }
}
