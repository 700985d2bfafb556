//! Exclusive per-subtree locks.
//!
//! A chain merge and a retention sweep must never touch the same full-backup
//! subtree concurrently. Each guarded subtree gets a lock file under
//! `<backup_root>/.locks/`, held with a non-blocking exclusive flock for the
//! duration of the operation. Dropping the guard releases the lock; the lock
//! file itself is left behind and reused.

use nix::fcntl::{Flock, FlockArg};
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::utils::errors::{Error, Result};

const LOCK_DIR: &str = ".locks";

/// Held for the duration of a merge or eviction touching one subtree.
#[derive(Debug)]
pub struct SubtreeLock {
    _flock: Flock<File>,
    path: PathBuf,
}

impl SubtreeLock {
    /// Acquire the exclusive lock guarding `name` (an artifact's bare name)
    /// under `root`. Fails with `SubtreeLocked` when another operation holds
    /// it, without blocking.
    pub fn acquire(root: &Path, name: &str) -> Result<Self> {
        let lock_dir = root.join(LOCK_DIR);
        fs::create_dir_all(&lock_dir)?;
        let path = lock_dir.join(format!("{name}.lock"));

        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(&path)?;

        match Flock::lock(file, FlockArg::LockExclusiveNonblock) {
            Ok(flock) => {
                debug!(lock = %path.display(), "Acquired subtree lock");
                Ok(Self { _flock: flock, path })
            }
            Err((_file, nix::errno::Errno::EWOULDBLOCK)) => {
                Err(Error::SubtreeLocked(path))
            }
            Err((_file, errno)) => Err(Error::Io(std::io::Error::from(errno))),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
