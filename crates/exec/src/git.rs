//! Version-control operations used by the update attempt.
//!
//! The updater never reimplements git.  It drives the `git` binary as an
//! opaque tool and only interprets exit status and output.  Everything runs
//! inside the overlay's merged view, never in BASEDIR.

use std::path::Path;

use async_trait::async_trait;
use tracing::debug;

use updated_config::VcsConfig;

use crate::command::{ToolCommand, ToolFailure};

/// Revision spec for the configured upstream of the current branch.
pub const UPSTREAM_REF: &str = "@{u}";

/// Narrow capability over the VCS tool so the update logic can run against
/// fakes.
#[async_trait]
pub trait VcsTool: Send + Sync {
    /// `git fetch`; returns the (possibly empty) fetch output.
    async fn fetch(&self, repo: &Path) -> Result<String, ToolFailure>;

    /// Resolve `rev` to a full hash, whitespace trimmed.
    async fn rev_parse(&self, repo: &Path, rev: &str) -> Result<String, ToolFailure>;

    async fn reset_hard(&self, repo: &Path, rev: &str) -> Result<String, ToolFailure>;

    /// Remove untracked and ignored files and directories.
    async fn clean(&self, repo: &Path) -> Result<String, ToolFailure>;

    async fn submodule_init(&self, repo: &Path) -> Result<String, ToolFailure>;

    async fn submodule_update(&self, repo: &Path) -> Result<String, ToolFailure>;

    /// `git config --get`; an unset key is a failure (git exits 1).
    async fn config_get(&self, repo: &Path, key: &str) -> Result<String, ToolFailure>;

    async fn config_set(&self, repo: &Path, key: &str, value: &str) -> Result<(), ToolFailure>;
}

/// [`VcsTool`] backed by the `git` command line.
#[derive(Debug, Clone)]
pub struct GitCli {
    program: String,
    low_priority: bool,
}

impl GitCli {
    pub fn new(program: impl Into<String>, low_priority: bool) -> Self {
        Self {
            program: program.into(),
            low_priority,
        }
    }

    pub fn from_config(config: &VcsConfig) -> Self {
        Self::new(config.program.clone(), config.low_priority)
    }

    fn command<'a>(&self, repo: &Path, args: impl IntoIterator<Item = &'a str>) -> ToolCommand {
        ToolCommand::new(self.program.clone())
            .args(args)
            .current_dir(repo)
            .low_priority(self.low_priority)
    }
}

impl Default for GitCli {
    fn default() -> Self {
        Self::from_config(&VcsConfig::default())
    }
}

#[async_trait]
impl VcsTool for GitCli {
    async fn fetch(&self, repo: &Path) -> Result<String, ToolFailure> {
        self.command(repo, ["fetch"]).run().await
    }

    async fn rev_parse(&self, repo: &Path, rev: &str) -> Result<String, ToolFailure> {
        let out = self.command(repo, ["rev-parse", rev]).run().await?;
        Ok(out.trim().to_string())
    }

    async fn reset_hard(&self, repo: &Path, rev: &str) -> Result<String, ToolFailure> {
        self.command(repo, ["reset", "--hard", rev]).run().await
    }

    async fn clean(&self, repo: &Path) -> Result<String, ToolFailure> {
        self.command(repo, ["clean", "-xdf"]).run().await
    }

    async fn submodule_init(&self, repo: &Path) -> Result<String, ToolFailure> {
        self.command(repo, ["submodule", "init"]).run().await
    }

    async fn submodule_update(&self, repo: &Path) -> Result<String, ToolFailure> {
        self.command(repo, ["submodule", "update"]).run().await
    }

    async fn config_get(&self, repo: &Path, key: &str) -> Result<String, ToolFailure> {
        let out = self.command(repo, ["config", "--get", key]).run().await?;
        Ok(out.trim().to_string())
    }

    async fn config_set(&self, repo: &Path, key: &str, value: &str) -> Result<(), ToolFailure> {
        debug!(key, value, repo = %repo.display(), "git config set");
        self.command(repo, ["config", key, value]).run().await?;
        Ok(())
    }
}
