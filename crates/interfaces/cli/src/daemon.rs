use std::sync::Arc;

use anyhow::Result;
use tracing::{info, warn};

use updated_config::UpdaterConfig;
use updated_exec::process;
use updated_runtime::{Collaborators, UpdateLoop, WaitHelper, install_signal_handlers, preflight};

/// Foreground daemon: preflight, lower I/O priority, wire signals, loop.
pub(crate) async fn run_daemon(config: UpdaterConfig, allow_unprivileged: bool) -> Result<()> {
    let tools = Collaborators::system(&config);
    preflight(tools.params.as_ref(), !allow_unprivileged)?;

    if let Err(err) = process::lower_io_priority() {
        warn!(?err, "could not lower I/O priority");
    }

    let wait = Arc::new(WaitHelper::new());
    install_signal_handlers(wait.clone())?;

    info!(
        basedir = %config.paths.basedir.display(),
        staging = %config.paths.staging_root.display(),
        pid = std::process::id(),
        "updated starting"
    );

    let mut update_loop = UpdateLoop::new(config, tools, wait);
    update_loop.run().await?;

    info!("updated stopped");
    Ok(())
}
