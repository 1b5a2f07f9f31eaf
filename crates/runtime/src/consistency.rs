//! The single-bit "finalized tree is safe to swap in" flag.
//!
//! Ordering contract around every mutation of the finalized tree:
//! clear -> sync -> mutate -> sync -> set -> sync.  The boot-time swap trusts
//! the finalized tree if and only if the marker exists.

use std::fs::{self, OpenOptions};
use std::io::ErrorKind;
use std::path::PathBuf;

use updated_exec::process::sync_filesystems;

use crate::error::UpdateError;

#[derive(Debug, Clone)]
pub struct ConsistencyFlag {
    marker: PathBuf,
}

impl ConsistencyFlag {
    pub fn new(marker: impl Into<PathBuf>) -> Self {
        Self {
            marker: marker.into(),
        }
    }

    pub fn is_set(&self) -> bool {
        self.marker.is_file()
    }

    /// Sync, remove the marker if present, sync again.
    pub fn clear(&self) -> Result<(), UpdateError> {
        sync_filesystems();
        match fs::remove_file(&self.marker) {
            Ok(()) => {}
            Err(err) if err.kind() == ErrorKind::NotFound => {}
            Err(err) => {
                return Err(UpdateError::io(format!(
                    "removing consistency marker {}",
                    self.marker.display()
                ))(err));
            }
        }
        sync_filesystems();
        Ok(())
    }

    /// Sync, create the marker, sync again.  Only call once the finalized
    /// tree is complete.
    pub fn set(&self) -> Result<(), UpdateError> {
        sync_filesystems();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.marker)
            .map_err(UpdateError::io(format!(
                "creating consistency marker {}",
                self.marker.display()
            )))?;
        file.sync_all()
            .map_err(UpdateError::io("syncing consistency marker"))?;
        sync_filesystems();
        Ok(())
    }
}
