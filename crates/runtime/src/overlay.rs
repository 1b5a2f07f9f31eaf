//! Lifecycle of the copy-on-write staging overlay rooted at BASEDIR.
//!
//! BASEDIR is the read-only lower layer; every update attempt writes only
//! into the upper layer, so a failed or interrupted attempt is discarded by
//! rebuilding the staging area.

use std::fs::{self, DirBuilder};
use std::io;
use std::os::unix::fs::{DirBuilderExt, MetadataExt};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info, warn};

use updated_config::{CONSISTENT_FLAG_NAME, StagingPaths, UpdaterConfig};
use updated_exec::{MountTool, OverlayLayers};
use updated_params::{ParamKey, StatusStore};

use crate::consistency::ConsistencyFlag;
use crate::error::UpdateError;
use crate::tree;

pub struct OverlayManager {
    basedir: PathBuf,
    canary: PathBuf,
    vcs_metadata: PathBuf,
    staging: StagingPaths,
    flag: ConsistencyFlag,
    mounts: Arc<dyn MountTool>,
    params: Arc<dyn StatusStore>,
}

impl OverlayManager {
    pub fn new(
        config: &UpdaterConfig,
        mounts: Arc<dyn MountTool>,
        params: Arc<dyn StatusStore>,
    ) -> Self {
        let staging = config.staging();
        Self {
            basedir: config.paths.basedir.clone(),
            canary: config.canary_path(),
            vcs_metadata: config.vcs_metadata_path(),
            flag: ConsistencyFlag::new(staging.consistent_flag()),
            staging,
            mounts,
            params,
        }
    }

    pub fn staging(&self) -> &StagingPaths {
        &self.staging
    }

    pub fn canary(&self) -> &Path {
        &self.canary
    }

    pub fn is_mounted(&self) -> bool {
        self.mounts.is_mounted(&self.staging.merged)
    }

    /// Lazily unmount the merged view if it is mounted.
    pub async fn teardown(&self) -> Result<(), UpdateError> {
        if self.is_mounted() {
            warn!(merged = %self.staging.merged.display(), "unmounting existing overlay");
            self.mounts.unmount_lazy(&self.staging.merged).await?;
        } else {
            debug!(merged = %self.staging.merged.display(), "overlay not mounted");
        }
        Ok(())
    }

    /// Throw away the staging area and build a fresh overlay over BASEDIR.
    pub async fn init(&self) -> Result<(), UpdateError> {
        info!(root = %self.staging.root.display(), "preparing new safe staging area");

        self.params.put(ParamKey::UpdateAvailable, b"0")?;

        // Whatever was finalized before is untrusted until re-verified.
        self.flag.clear()?;

        self.teardown().await?;
        if self.staging.root.is_dir() {
            let root = self.staging.root.clone();
            tokio::task::spawn_blocking(move || fs::remove_dir_all(root))
                .await
                .map_err(|e| UpdateError::Unexpected(e.into()))?
                .map_err(UpdateError::io("removing old staging root"))?;
        }

        for dir in self.staging.all_dirs() {
            DirBuilder::new()
                .mode(0o755)
                .create(dir)
                .map_err(UpdateError::io(format!("creating {}", dir.display())))?;
        }

        self.check_same_device()?;

        // A marker inside BASEDIR would be carried into the merged view and
        // from there into the next finalized tree.
        let stray = self.basedir.join(CONSISTENT_FLAG_NAME);
        if stray.is_file() {
            fs::remove_file(&stray)
                .map_err(UpdateError::io("removing consistency marker from basedir"))?;
        }

        // The boot-time swap skips activation if this canary is missing or
        // older than anything in BASEDIR's metadata.
        tree::touch(&self.canary).map_err(UpdateError::io("writing overlay canary"))?;

        self.mounts
            .mount_overlay(OverlayLayers {
                lower: &self.basedir,
                upper: &self.staging.upper,
                work: &self.staging.metadata,
                merged: &self.staging.merged,
            })
            .await?;
        Ok(())
    }

    /// `true` when BASEDIR's VCS metadata changed after the overlay was built
    /// (or the canary vanished), which invalidates the lower layer.
    pub fn is_stale(&self) -> Result<bool, UpdateError> {
        let canary_mtime = match fs::metadata(&self.canary) {
            Ok(meta) => meta
                .modified()
                .map_err(UpdateError::io("reading canary mtime"))?,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(true),
            Err(err) => return Err(UpdateError::io("reading overlay canary")(err)),
        };
        if !self.vcs_metadata.exists() {
            return Ok(true);
        }
        Ok(stale_unless_verified(
            &self.vcs_metadata,
            tree::modified_after(&self.vcs_metadata, canary_mtime),
        ))
    }

    fn check_same_device(&self) -> Result<(), UpdateError> {
        let base = lstat_dev(&self.basedir).map_err(UpdateError::io("stat basedir"))?;
        let merged =
            lstat_dev(&self.staging.merged).map_err(UpdateError::io("stat overlay merge dir"))?;
        if base != merged {
            return Err(UpdateError::CrossDevice {
                base: self.basedir.clone(),
                merged: self.staging.merged.clone(),
            });
        }
        Ok(())
    }
}

/// A metadata scan that could not finish proves nothing about the lower
/// layer, so it is treated as a change.
fn stale_unless_verified(metadata: &Path, scan: io::Result<bool>) -> bool {
    match scan {
        Ok(newer) => newer,
        Err(err) => {
            warn!(
                %err,
                metadata = %metadata.display(),
                "couldn't scan basedir metadata; rebuilding overlay"
            );
            true
        }
    }
}

fn lstat_dev(path: &Path) -> io::Result<u64> {
    Ok(fs::symlink_metadata(path)?.dev())
}
