use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Result;
use serde::{Deserialize, Serialize};

/// Marker inside the finalized tree.  Its presence is the only thing the
/// boot-time swap trusts.
pub const CONSISTENT_FLAG_NAME: &str = ".overlay_consistent";

/// Timestamp canary left in BASEDIR every time the overlay is rebuilt.
pub const CANARY_NAME: &str = ".overlay_init";

/// Warning printed by `git fetch` on devices whose `known_hosts` is not
/// writable.  Fetch output equal to this literal does not count as "fetch
/// produced something".  Matching is exact and depends on the git version
/// and locale, so it is kept configurable.
pub const DEFAULT_BENIGN_FETCH_WARNING: &str = "Failed to add the host to the list of known hosts (/data/data/com.termux/files/home/.ssh/known_hosts).\n";

// ── Paths ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// The live installed tree.  Used read-only as the overlay lower layer.
    pub basedir: PathBuf,
    /// Root of the disposable staging area.  Overridden by
    /// `UPDATER_STAGING_ROOT`.
    pub staging_root: PathBuf,
    /// Advisory lock file guarding the staging root.  Overridden by
    /// `UPDATER_LOCK_FILE`.
    pub lock_file: PathBuf,
    /// Directory backing the file-per-key parameter store.
    pub params_dir: PathBuf,
    /// Release notes document, relative to the tree root.
    pub release_notes: String,
    /// Version-control metadata directory, relative to BASEDIR.  Watched for
    /// out-of-band changes that invalidate the overlay.
    pub vcs_metadata_dir: String,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            basedir: PathBuf::from("/data/openpilot"),
            staging_root: PathBuf::from("/data/safe_staging"),
            lock_file: PathBuf::from("/tmp/safe_staging_overlay.lock"),
            params_dir: PathBuf::from("/data/params/d"),
            release_notes: "RELEASES.md".to_string(),
            vcs_metadata_dir: ".git".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Address pinged to decide whether the network is up.  Overridden by
    /// `UPDATER_TEST_IP`.
    pub test_ip: String,
    pub ping_timeout_secs: u64,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            test_ip: "8.8.8.8".to_string(),
            ping_timeout_secs: 4,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
    /// Grace period before the first attempt so the device can publish its
    /// offroad state.
    pub initial_delay_secs: u64,
    /// Backoff when the network or the clock is not usable yet.
    pub offline_retry_secs: u64,
    /// Backoff between regular update attempts.
    pub check_interval_secs: u64,
    /// Clocks reporting an earlier year are treated as unset (no RTC battery).
    pub min_valid_year: i32,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            initial_delay_secs: 30,
            offline_retry_secs: 30,
            check_interval_secs: 10 * 60,
            min_valid_year: 2019,
        }
    }
}

impl ScheduleConfig {
    pub fn initial_delay(&self) -> Duration {
        Duration::from_secs(self.initial_delay_secs)
    }

    pub fn offline_retry(&self) -> Duration {
        Duration::from_secs(self.offline_retry_secs)
    }

    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VcsConfig {
    pub program: String,
    /// Run VCS commands under `nice -n 19`.
    pub low_priority: bool,
    pub benign_fetch_warning: String,
}

impl Default for VcsConfig {
    fn default() -> Self {
        Self {
            program: "git".to_string(),
            low_priority: true,
            benign_fetch_warning: DEFAULT_BENIGN_FETCH_WARNING.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    pub log_level: String,
    /// When non-empty, logs are also written to a daily rolling file here.
    pub log_dir: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_dir: String::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct UpdaterConfig {
    pub paths: PathsConfig,
    pub network: NetworkConfig,
    pub schedule: ScheduleConfig,
    pub vcs: VcsConfig,
    pub telemetry: TelemetryConfig,
}

impl UpdaterConfig {
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let mut config = Self::default();
        if let Ok(raw) = fs::read_to_string(path) {
            config = toml::from_str(&raw)?;
        }
        config.apply_env_overrides();
        Ok(config)
    }

    pub fn save_to(&self, path: impl AsRef<Path>) -> Result<()> {
        if let Some(parent) = path.as_ref().parent() {
            fs::create_dir_all(parent)?;
        }

        let rendered = toml::to_string_pretty(self)?;
        fs::write(path, rendered)?;
        Ok(())
    }

    /// Environment variables take precedence over the config file.
    fn apply_env_overrides(&mut self) {
        if let Some(value) = non_empty_env("UPDATER_TEST_IP") {
            self.network.test_ip = value;
        }
        if let Some(value) = non_empty_env("UPDATER_LOCK_FILE") {
            self.paths.lock_file = PathBuf::from(value);
        }
        if let Some(value) = non_empty_env("UPDATER_STAGING_ROOT") {
            self.paths.staging_root = PathBuf::from(value);
        }
        if let Some(value) = non_empty_env("UPDATER_BASEDIR") {
            self.paths.basedir = PathBuf::from(value);
        }
        if let Some(value) = non_empty_env("UPDATER_PARAMS_DIR") {
            self.paths.params_dir = PathBuf::from(value);
        }
    }

    pub fn staging(&self) -> StagingPaths {
        StagingPaths::new(&self.paths.staging_root)
    }

    pub fn canary_path(&self) -> PathBuf {
        self.paths.basedir.join(CANARY_NAME)
    }

    pub fn vcs_metadata_path(&self) -> PathBuf {
        self.paths.basedir.join(&self.paths.vcs_metadata_dir)
    }
}

fn non_empty_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.is_empty())
}

// ── Staging layout ────────────────────────────────────────────────────────────

/// Layout of the staging area.  All four sub-directories must live on the
/// same device as BASEDIR.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagingPaths {
    pub root: PathBuf,
    pub upper: PathBuf,
    pub metadata: PathBuf,
    pub merged: PathBuf,
    pub finalized: PathBuf,
}

impl StagingPaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self {
            upper: root.join("upper"),
            metadata: root.join("metadata"),
            merged: root.join("merged"),
            finalized: root.join("finalized"),
            root,
        }
    }

    /// Directories created by an overlay rebuild, root first.
    pub fn all_dirs(&self) -> [&Path; 5] {
        [
            &self.root,
            &self.upper,
            &self.metadata,
            &self.merged,
            &self.finalized,
        ]
    }

    pub fn consistent_flag(&self) -> PathBuf {
        self.finalized.join(CONSISTENT_FLAG_NAME)
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────
