use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::PathBuf;

use anyhow::{Context, Result};
use tracing::debug;

use crate::{ParamKey, StatusStore};

/// File-per-key store: `<dir>/<Key>` holds the raw value bytes.
#[derive(Debug, Clone)]
pub struct FileParams {
    dir: PathBuf,
}

impl FileParams {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn key_path(&self, key: ParamKey) -> PathBuf {
        self.dir.join(key.as_str())
    }
}

impl StatusStore for FileParams {
    fn get(&self, key: ParamKey) -> Result<Option<Vec<u8>>> {
        match fs::read(self.key_path(key)) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err).with_context(|| format!("reading param {key}")),
        }
    }

    /// Crash-safe replace: the value is written to a `.tmp` sibling,
    /// fsync'd, renamed over the key and the directory is fsync'd.  Readers
    /// see either the old or the new value, never a torn one.
    fn put(&self, key: ParamKey, value: &[u8]) -> Result<()> {
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("creating params dir {}", self.dir.display()))?;

        let path = self.key_path(key);
        let tmp_path = self.dir.join(format!(".{}.tmp", key.as_str()));

        let write_result: Result<()> = (|| {
            let mut file = OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .open(&tmp_path)?;
            file.write_all(value)?;
            file.flush()?;
            file.sync_all()?;
            Ok(())
        })();

        if let Err(err) = write_result {
            let _ = fs::remove_file(&tmp_path);
            return Err(err.context(format!("writing param {key}")));
        }

        if let Err(err) = fs::rename(&tmp_path, &path) {
            let _ = fs::remove_file(&tmp_path);
            return Err(err).with_context(|| format!("committing param {key}"));
        }

        // Persist the rename itself.
        File::open(&self.dir)
            .and_then(|d| d.sync_all())
            .with_context(|| format!("syncing params dir {}", self.dir.display()))?;

        debug!(key = %key, bytes = value.len(), "param written");
        Ok(())
    }
}
