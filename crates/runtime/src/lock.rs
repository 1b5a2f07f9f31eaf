//! Single-instance guard for the staging root.
//!
//! Uses a non-blocking `flock(2)`.  The kernel drops the lock when the
//! process dies, so a crashed daemon never leaves a stale lock behind, and a
//! stuck one makes the next start fail immediately instead of queueing.

use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

use fs2::FileExt;
use tracing::info;

#[derive(Debug, thiserror::Error)]
pub enum LockError {
    #[error("couldn't get overlay lock at {}; is another updated running?", .path.display())]
    AlreadyRunning { path: PathBuf },

    #[error("opening lock file {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Held for the lifetime of the daemon; dropping it releases the lock.
#[derive(Debug)]
pub struct ExclusiveLock {
    _file: File,
    path: PathBuf,
}

impl ExclusiveLock {
    pub fn acquire(path: &Path) -> Result<Self, LockError> {
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(path)
            .map_err(|source| LockError::Io {
                path: path.to_path_buf(),
                source,
            })?;

        if let Err(err) = file.try_lock_exclusive() {
            if err.raw_os_error() == fs2::lock_contended_error().raw_os_error() {
                return Err(LockError::AlreadyRunning {
                    path: path.to_path_buf(),
                });
            }
            return Err(LockError::Io {
                path: path.to_path_buf(),
                source: err,
            });
        }

        info!(path = %path.display(), "overlay lock acquired");
        Ok(Self {
            _file: file,
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether some process currently holds the lock at `path`.
    ///
    /// Never creates the file. When the lock is free a shared lock is held
    /// for the few syscalls between open and close; a daemon whose
    /// `acquire` lands inside that window is refused like any second
    /// instance.
    pub fn is_held(path: &Path) -> Result<bool, LockError> {
        let file = match File::open(path) {
            Ok(file) => file,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(false),
            Err(source) => {
                return Err(LockError::Io {
                    path: path.to_path_buf(),
                    source,
                });
            }
        };

        // Closing `file` on return drops the shared lock.
        match FileExt::try_lock_shared(&file) {
            Ok(()) => Ok(false),
            Err(err) if err.raw_os_error() == fs2::lock_contended_error().raw_os_error() => {
                Ok(true)
            }
            Err(source) => Err(LockError::Io {
                path: path.to_path_buf(),
                source,
            }),
        }
    }
}
