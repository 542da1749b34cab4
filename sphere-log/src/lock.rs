//! Cross-process store lock
//!
//! An advisory `fs2` lock on a file inside the store directory. Separate
//! `sphere` processes writing to the same store serialize on it.

use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tracing::debug;

pub const LOCK_FILE: &str = ".sphere.lock";

const RETRY_SLEEP: Duration = Duration::from_millis(25);

/// Held exclusive lock; released on drop
#[derive(Debug)]
pub struct StoreLock {
    file: File,
}

impl StoreLock {
    /// Wait up to `timeout` for the exclusive lock on `path`.
    ///
    /// Returns `WouldBlock` when the wait runs out.
    pub async fn acquire(path: PathBuf, timeout: Duration) -> std::io::Result<Self> {
        tokio::task::spawn_blocking(move || -> std::io::Result<Self> {
            let file = OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .truncate(false)
                .open(&path)?;

            let deadline = Instant::now() + timeout;
            loop {
                match FileExt::try_lock_exclusive(&file) {
                    Ok(()) => {
                        debug!("Acquired store lock {}", path.display());
                        return Ok(Self { file });
                    }
                    Err(_) if Instant::now() < deadline => std::thread::sleep(RETRY_SLEEP),
                    Err(_) => {
                        return Err(std::io::Error::new(
                            std::io::ErrorKind::WouldBlock,
                            format!("could not acquire exclusive lock on {}", path.display()),
                        ))
                    }
                }
            }
        })
        .await
        .map_err(std::io::Error::other)?
    }
}

impl Drop for StoreLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}
