//! Per-namespace session lock
//!
//! Two netpath processes must not provision or tear down the same namespace
//! at once. Each session takes an exclusive, non-blocking `flock` on
//! `<dir>/netpath-<namespace>.lock`. The OS drops the lock when the holder
//! exits, so a crashed session never leaves it stale.

use crate::error::{Error, Result};
use nix::errno::Errno;
use nix::fcntl::{Flock, FlockArg};
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Held lock; released on drop
#[derive(Debug)]
pub struct SessionLock {
    path: PathBuf,
    _lock: Flock<File>,
}

/// Lock file path for a namespace
pub fn lock_path(dir: &Path, namespace: &str) -> PathBuf {
    dir.join(format!("netpath-{}.lock", namespace))
}

impl SessionLock {
    /// Take the lock or fail with `Locked` if another process holds it
    pub fn acquire(dir: &Path, namespace: &str) -> Result<Self> {
        fs::create_dir_all(dir)?;
        let path = lock_path(dir, namespace);
        let file = File::options()
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;

        match Flock::lock(file, FlockArg::LockExclusiveNonblock) {
            Ok(lock) => {
                debug!(path = %path.display(), "session lock acquired");
                Ok(Self { path, _lock: lock })
            }
            Err((_, Errno::EWOULDBLOCK)) => Err(Error::Locked(path)),
            Err((_, errno)) => Err(Error::Io(errno.into())),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
