//! Overlay mount plumbing.

use std::os::unix::fs::MetadataExt;
use std::path::Path;

use async_trait::async_trait;
use tracing::info;

use crate::command::{ToolCommand, ToolFailure};

/// The four directories that make up an overlay mount.
#[derive(Debug, Clone, Copy)]
pub struct OverlayLayers<'a> {
    pub lower: &'a Path,
    pub upper: &'a Path,
    pub work: &'a Path,
    pub merged: &'a Path,
}

impl OverlayLayers<'_> {
    /// Value for `mount -o`.
    pub fn options(&self) -> String {
        format!(
            "lowerdir={},upperdir={},workdir={}",
            self.lower.display(),
            self.upper.display(),
            self.work.display()
        )
    }
}

#[async_trait]
pub trait MountTool: Send + Sync {
    fn is_mounted(&self, path: &Path) -> bool;

    async fn mount_overlay(&self, layers: OverlayLayers<'_>) -> Result<(), ToolFailure>;

    /// Detach the mount now and clean up once it is no longer busy.
    async fn unmount_lazy(&self, path: &Path) -> Result<(), ToolFailure>;
}

/// [`MountTool`] backed by `mount(8)` / `umount(8)`.
#[derive(Debug, Clone, Default)]
pub struct OverlayMounter;

#[async_trait]
impl MountTool for OverlayMounter {
    fn is_mounted(&self, path: &Path) -> bool {
        is_mount_point(path)
    }

    async fn mount_overlay(&self, layers: OverlayLayers<'_>) -> Result<(), ToolFailure> {
        let opts = layers.options();
        info!(merged = %layers.merged.display(), %opts, "mounting overlay");
        ToolCommand::new("mount")
            .args(["-t", "overlay", "-o"])
            .arg(opts)
            .arg("none")
            .arg(layers.merged.to_string_lossy())
            .run()
            .await?;
        Ok(())
    }

    async fn unmount_lazy(&self, path: &Path) -> Result<(), ToolFailure> {
        ToolCommand::new("umount")
            .arg("-l")
            .arg(path.to_string_lossy())
            .run()
            .await?;
        Ok(())
    }
}

/// A directory is a mount point when it sits on a different device than its
/// parent, or is its own parent (`/`).
pub fn is_mount_point(path: &Path) -> bool {
    let Ok(meta) = path.symlink_metadata() else {
        return false;
    };
    if meta.file_type().is_symlink() {
        return false;
    }
    let Ok(parent) = path.join("..").symlink_metadata() else {
        return false;
    };
    meta.dev() != parent.dev() || meta.ino() == parent.ino()
}
