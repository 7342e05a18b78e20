//! Advisory file locking for dead-letter files
//!
//! Uses fd-lock so separate processes appending to the same date file
//! serialize their read-check-append cycles.

use fd_lock::RwLock;
use std::fs::OpenOptions;
use std::path::Path;

use super::{io_error, DeadLetterError};

/// Run `f` while holding an exclusive lock on `<data_path>.lock`.
///
/// Blocks until the lock is available. The lock is released when `f` returns.
pub(crate) fn with_exclusive_lock<T>(
    data_path: &Path,
    f: impl FnOnce() -> Result<T, DeadLetterError>,
) -> Result<T, DeadLetterError> {
    let lock_path = data_path.with_extension("lock");
    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(&lock_path)
        .map_err(|e| io_error("lock", &lock_path, e))?;

    let mut lock = RwLock::new(file);
    let _guard = lock.write().map_err(|e| io_error("lock", &lock_path, e))?;

    f()
}
