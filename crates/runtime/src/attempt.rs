//! One update attempt inside the mounted merged view.

use std::path::PathBuf;
use std::sync::Arc;

use tracing::info;

use updated_config::{StagingPaths, UpdaterConfig};
use updated_exec::{UPSTREAM_REF, VcsTool};

use crate::consistency::ConsistencyFlag;
use crate::error::UpdateError;
use crate::tree;

/// Local VCS settings that keep git from treating the staging copy's ctime
/// and inode churn as content changes.
pub const VCS_OPTIONS: [(&str, &str); 2] =
    [("core.trustctime", "false"), ("core.checkStat", "minimal")];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptOutcome {
    /// Upstream matched local and the fetch was silent; nothing was touched.
    NoChange,
    /// The finalized tree was rebuilt and flagged consistent.
    Updated { new_version: bool },
}

impl AttemptOutcome {
    pub fn new_version(&self) -> bool {
        matches!(self, AttemptOutcome::Updated { new_version: true })
    }
}

pub struct UpdateAttempter {
    merged: PathBuf,
    finalized: PathBuf,
    flag: ConsistencyFlag,
    vcs: Arc<dyn VcsTool>,
    benign_fetch_warning: String,
}

impl UpdateAttempter {
    pub fn new(config: &UpdaterConfig, vcs: Arc<dyn VcsTool>) -> Self {
        let StagingPaths {
            merged, finalized, ..
        } = config.staging();
        Self {
            flag: ConsistencyFlag::new(config.staging().consistent_flag()),
            merged,
            finalized,
            vcs,
            benign_fetch_warning: config.vcs.benign_fetch_warning.clone(),
        }
    }

    pub async fn attempt(&self) -> Result<AttemptOutcome, UpdateError> {
        info!("attempting git update inside staging overlay");

        self.ensure_vcs_options().await?;

        let fetch_output = self.vcs.fetch(&self.merged).await?;
        info!(output = %fetch_output, "git fetch success");

        let cur_hash = self.vcs.rev_parse(&self.merged, "HEAD").await?;
        let upstream_hash = self.vcs.rev_parse(&self.merged, UPSTREAM_REF).await?;
        let new_version = cur_hash != upstream_hash;
        let fetch_changed = self.fetch_produced_output(&fetch_output);

        info!(%cur_hash, %upstream_hash, "comparing revisions");
        if !new_version && !fetch_changed {
            info!("nothing new from git at this time");
            return Ok(AttemptOutcome::NoChange);
        }

        info!(new_version, "running update");
        if new_version {
            info!("git reset in progress");
            let outputs = [
                self.vcs.reset_hard(&self.merged, UPSTREAM_REF).await?,
                self.vcs.clean(&self.merged).await?,
                self.vcs.submodule_init(&self.merged).await?,
                self.vcs.submodule_update(&self.merged).await?,
            ];
            info!(output = %outputs.join("\n"), "git reset success");
        }

        // An interrupted finalize must never look valid.
        self.flag.clear()?;
        self.finalize().await?;
        self.flag.set()?;

        info!("update successful");
        Ok(AttemptOutcome::Updated { new_version })
    }

    /// Non-empty fetch output counts as a change unless it is exactly the
    /// known benign host-key warning.
    pub fn fetch_produced_output(&self, output: &str) -> bool {
        !output.is_empty() && output != self.benign_fetch_warning
    }

    async fn ensure_vcs_options(&self) -> Result<(), UpdateError> {
        for (option, value) in VCS_OPTIONS {
            let current = self.vcs.config_get(&self.merged, option).await;
            let config_ok = matches!(&current, Ok(v) if v.trim() == value);
            if !config_ok {
                info!(option, value, "setting git option");
                self.vcs.config_set(&self.merged, option, value).await?;
            }
        }
        Ok(())
    }

    async fn finalize(&self) -> Result<(), UpdateError> {
        info!(finalized = %self.finalized.display(), "creating finalized version of the overlay");
        tree::replace_tree(&self.merged, &self.finalized)
            .await
            .map_err(UpdateError::Finalize)?;
        info!("done finalizing overlay");
        Ok(())
    }
}
