//! Failure taxonomy for the update loop.
//!
//! The loop's recovery policy depends on the kind of failure. Anything that
//! came out of an external tool, an impossible overlay layout or a half-copied
//! finalized tree means the staging area can no longer be trusted and is
//! rebuilt next cycle. Other failures leave the overlay alone.

use std::io;
use std::path::PathBuf;

use updated_exec::ToolFailure;

use crate::lock::LockError;

#[derive(Debug, thiserror::Error)]
pub enum UpdateError {
    #[error(transparent)]
    Tool(#[from] ToolFailure),

    #[error(
        "base {} and overlay merge directory {} are on different filesystems; not valid for overlay FS",
        .base.display(),
        .merged.display()
    )]
    CrossDevice { base: PathBuf, merged: PathBuf },

    /// Copying the merged view into the finalized tree failed part way.
    /// The merged view already holds the reset tree, so a retry on the same
    /// overlay would see no change and never finalize.
    #[error("finalizing overlay: {0}")]
    Finalize(#[source] io::Error),

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: io::Error,
    },

    #[error(transparent)]
    Unexpected(#[from] anyhow::Error),
}

impl UpdateError {
    /// Adapter for `map_err` on filesystem calls.
    pub fn io(context: impl Into<String>) -> impl FnOnce(io::Error) -> Self {
        let context = context.into();
        move |source| UpdateError::Io { context, source }
    }

    /// Whether the staging overlay must be rebuilt before the next attempt.
    pub fn invalidates_overlay(&self) -> bool {
        matches!(
            self,
            UpdateError::Tool(_) | UpdateError::CrossDevice { .. } | UpdateError::Finalize(_)
        )
    }
}

/// Conditions under which the daemon refuses to start at all.
#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error("updated must be launched as root")]
    NotRoot,

    #[error("updates are disabled by param")]
    UpdatesDisabled,

    #[error(transparent)]
    Lock(#[from] LockError),

    #[error("reading startup params: {0}")]
    Params(anyhow::Error),
}
