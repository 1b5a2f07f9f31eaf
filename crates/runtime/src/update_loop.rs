//! The daemon's control loop.
//!
//! One iteration: connectivity gate, (re)build the overlay if needed, attempt
//! an update when the device is offroad, publish status, then back off.  All
//! work happens sequentially on the caller's task; signals only shorten the
//! backoff or stop the loop between iterations.

use std::sync::Arc;

use chrono::{DateTime, Datelike, Utc};
use tracing::{debug, error, info, warn};

use updated_config::UpdaterConfig;
use updated_exec::{
    ConnectivityProbe, GitCli, MountTool, OverlayMounter, PingProbe, VcsTool, process,
};
use updated_params::{FileParams, ParamKey, StatusStore};

use crate::attempt::{AttemptOutcome, UpdateAttempter};
use crate::error::{StartupError, UpdateError};
use crate::lock::ExclusiveLock;
use crate::overlay::OverlayManager;
use crate::signals::WaitHelper;
use crate::status::StatusPublisher;

/// The external systems the loop drives.
#[derive(Clone)]
pub struct Collaborators {
    pub vcs: Arc<dyn VcsTool>,
    pub mounts: Arc<dyn MountTool>,
    pub params: Arc<dyn StatusStore>,
    pub probe: Arc<dyn ConnectivityProbe>,
}

impl Collaborators {
    /// Real git, `mount(8)`, file-backed params and `ping`.
    pub fn system(config: &UpdaterConfig) -> Self {
        Self {
            vcs: Arc::new(GitCli::from_config(&config.vcs)),
            mounts: Arc::new(OverlayMounter),
            params: Arc::new(FileParams::new(&config.paths.params_dir)),
            probe: Arc::new(PingProbe::from_config(&config.network)),
        }
    }
}

/// Mutable loop state carried across iterations.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DaemonRunState {
    pub overlay_initialized: bool,
    /// Incremented at the top of every iteration, zeroed after a successful
    /// attempt.
    pub update_failed_count: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IterationOutcome {
    /// No network or no sane wall clock; nothing else ran.
    Offline,
    /// Overlay is ready but the device is in use.
    Onroad,
    Attempted(AttemptOutcome),
    Failed { overlay_invalidated: bool },
}

/// Refuse to start when updates are disabled or privileges are missing.
pub fn preflight(params: &dyn StatusStore, require_root: bool) -> Result<(), StartupError> {
    if params
        .is_set(ParamKey::DisableUpdates)
        .map_err(StartupError::Params)?
    {
        return Err(StartupError::UpdatesDisabled);
    }
    if require_root && !process::is_root() {
        return Err(StartupError::NotRoot);
    }
    Ok(())
}

pub struct UpdateLoop {
    config: UpdaterConfig,
    params: Arc<dyn StatusStore>,
    probe: Arc<dyn ConnectivityProbe>,
    overlay: OverlayManager,
    attempter: UpdateAttempter,
    status: StatusPublisher,
    wait: Arc<WaitHelper>,
    state: DaemonRunState,
    clock: fn() -> DateTime<Utc>,
}

impl UpdateLoop {
    pub fn new(config: UpdaterConfig, tools: Collaborators, wait: Arc<WaitHelper>) -> Self {
        Self {
            overlay: OverlayManager::new(&config, tools.mounts, tools.params.clone()),
            attempter: UpdateAttempter::new(&config, tools.vcs),
            status: StatusPublisher::new(&config, tools.params.clone()),
            params: tools.params,
            probe: tools.probe,
            wait,
            state: DaemonRunState::default(),
            clock: Utc::now,
            config,
        }
    }

    /// Replace the wall clock used by the year sanity gate.
    pub fn with_clock(mut self, clock: fn() -> DateTime<Utc>) -> Self {
        self.clock = clock;
        self
    }

    pub fn state(&self) -> &DaemonRunState {
        &self.state
    }

    pub fn overlay(&self) -> &OverlayManager {
        &self.overlay
    }

    /// Hold the overlay lock and loop until shutdown is requested, then
    /// unmount the staging overlay.
    pub async fn run(&mut self) -> Result<(), StartupError> {
        let _lock = ExclusiveLock::acquire(&self.config.paths.lock_file)?;

        // Give the rest of the system time to publish IsOffroad.
        self.wait.sleep(self.config.schedule.initial_delay()).await;

        while !self.wait.is_shutdown_requested() {
            let outcome = self.run_iteration().await;
            let backoff = match outcome {
                IterationOutcome::Offline => self.config.schedule.offline_retry(),
                _ => self.config.schedule.check_interval(),
            };
            debug!(?outcome, ?backoff, "iteration finished");
            self.wait.sleep(backoff).await;
        }

        info!("shutdown requested, dismounting overlay");
        if let Err(err) = self.overlay.teardown().await {
            error!(error = %err, "failed to dismount overlay on shutdown");
        }
        Ok(())
    }

    /// One pass of the state machine.  Never fails; failures are logged and
    /// folded into the returned outcome and the loop state.
    pub async fn run_iteration(&mut self) -> IterationOutcome {
        self.state.update_failed_count += 1;
        self.wait.clear_wake();

        let now = (self.clock)();
        if now.year() < self.config.schedule.min_valid_year {
            warn!(year = now.year(), "system clock not set, waiting");
            return IterationOutcome::Offline;
        }
        if !self.probe.is_online().await {
            debug!("no network connectivity, waiting");
            return IterationOutcome::Offline;
        }

        let outcome = match self.try_update().await {
            Ok(outcome) => outcome,
            Err(err) => self.record_failure(err),
        };

        if let Err(err) = self
            .status
            .publish_failed_count(self.state.update_failed_count)
        {
            error!(error = %err, "failed to publish update failure count");
        }
        outcome
    }

    async fn try_update(&mut self) -> Result<IterationOutcome, UpdateError> {
        if self.state.overlay_initialized && self.overlay.is_stale()? {
            info!("basedir metadata changed, recreating overlay");
            self.state.overlay_initialized = false;
        }

        if !self.state.overlay_initialized {
            self.overlay.init().await?;
            self.state.overlay_initialized = true;
        }

        if !self.params.is_set(ParamKey::IsOffroad)? {
            info!("not running updater, device is onroad");
            return Ok(IterationOutcome::Onroad);
        }

        let outcome = self.attempter.attempt().await?;
        self.status.publish_attempt(outcome)?;
        self.state.update_failed_count = 0;
        Ok(IterationOutcome::Attempted(outcome))
    }

    fn record_failure(&mut self, err: UpdateError) -> IterationOutcome {
        match &err {
            UpdateError::Tool(failure) => error!(
                cmd = %failure.command_line(),
                output = %failure.output,
                exit_code = ?failure.exit_code,
                "update process failed"
            ),
            UpdateError::CrossDevice { .. } => error!(error = %err, "overlay layout invalid"),
            UpdateError::Finalize(_) => error!(error = %err, "finalized tree left incomplete"),
            other => error!(error = ?other, "unexpected updater failure"),
        }

        let overlay_invalidated = err.invalidates_overlay();
        if overlay_invalidated {
            self.state.overlay_initialized = false;
        }
        IterationOutcome::Failed {
            overlay_invalidated,
        }
    }
}
