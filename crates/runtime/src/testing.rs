//! Scripted stand-ins for git, mount, ping and the params store.

use std::collections::{HashMap, HashSet};
use std::ffi::CString;
use std::fs;
use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use anyhow::{Result, bail};
use async_trait::async_trait;
use tempfile::TempDir;

use updated_config::UpdaterConfig;
use updated_exec::{ConnectivityProbe, MountTool, OverlayLayers, ToolFailure, VcsTool};
use updated_params::{MemoryParams, ParamKey, StatusStore};

use crate::signals::WaitHelper;
use crate::tree;

fn failure(cmd: &[&str], output: impl Into<String>, code: i32) -> ToolFailure {
    ToolFailure {
        cmd: cmd.iter().map(|s| s.to_string()).collect(),
        output: output.into(),
        exit_code: Some(code),
    }
}

/// Create a FIFO (and its parent dirs). Tree copies refuse FIFOs, which
/// makes them a convenient way to break a copy at a chosen path.
pub fn make_fifo(path: &Path) {
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    let c_path = CString::new(path.as_os_str().as_bytes()).unwrap();
    // SAFETY: `c_path` is a valid NUL-terminated path.
    assert_eq!(unsafe { libc::mkfifo(c_path.as_ptr(), 0o644) }, 0);
}

// ── Fixture ──────────────────────────────────────────────────────────────────

/// A throwaway BASEDIR plus staging root, both under one temp dir so they
/// share a device.
pub struct Fixture {
    dirs: Vec<TempDir>,
    pub config: UpdaterConfig,
}

impl Fixture {
    pub fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let mut config = UpdaterConfig::default();
        config.paths.basedir = dir.path().join("openpilot");
        config.paths.staging_root = dir.path().join("safe_staging");
        config.paths.lock_file = dir.path().join("safe_staging_overlay.lock");
        config.paths.params_dir = dir.path().join("params");
        seed_basedir(&config.paths.basedir);

        Self {
            dirs: vec![dir],
            config,
        }
    }

    /// Like `new`, but with BASEDIR moved onto tmpfs so it sits on a
    /// different device than the staging root.  `None` when the host has no
    /// such second filesystem.
    pub fn cross_device() -> Option<Self> {
        let mut fx = Self::new();
        let other = TempDir::new_in("/dev/shm").ok()?;
        let staging_dev = fs::metadata(fx.dirs[0].path()).ok()?.dev();
        if fs::metadata(other.path()).ok()?.dev() == staging_dev {
            return None;
        }

        fx.config.paths.basedir = other.path().join("openpilot");
        seed_basedir(&fx.config.paths.basedir);
        fx.dirs.push(other);
        Some(fx)
    }

    pub fn basedir(&self) -> &Path {
        &self.config.paths.basedir
    }
}

fn seed_basedir(base: &Path) {
    fs::create_dir_all(base.join(".git/refs/heads")).unwrap();
    fs::write(base.join(".git/HEAD"), "ref: refs/heads/release\n").unwrap();
    fs::write(
        base.join("RELEASES.md"),
        "Version 0.2\n * current\n\nVersion 0.1\n * first\n",
    )
    .unwrap();
}

// ── Mounts ───────────────────────────────────────────────────────────────────

/// "Mounts" by copying the lower layer into the merged directory.
#[derive(Default)]
pub struct FakeMounts {
    mounted: Mutex<HashSet<PathBuf>>,
    mounts: AtomicUsize,
    unmounts: AtomicUsize,
    fail: bool,
}

impl FakeMounts {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn mount_calls(&self) -> usize {
        self.mounts.load(Ordering::SeqCst)
    }

    pub fn unmount_calls(&self) -> usize {
        self.unmounts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MountTool for FakeMounts {
    fn is_mounted(&self, path: &Path) -> bool {
        self.mounted.lock().unwrap().contains(path)
    }

    async fn mount_overlay(&self, layers: OverlayLayers<'_>) -> Result<(), ToolFailure> {
        self.mounts.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(failure(
                &["mount", "-t", "overlay"],
                "mount: only root can use \"--types\" option",
                1,
            ));
        }
        tree::copy_tree(layers.lower, layers.merged)
            .map_err(|e| failure(&["mount"], e.to_string(), 32))?;
        self.mounted
            .lock()
            .unwrap()
            .insert(layers.merged.to_path_buf());
        Ok(())
    }

    async fn unmount_lazy(&self, path: &Path) -> Result<(), ToolFailure> {
        self.unmounts.fetch_add(1, Ordering::SeqCst);
        self.mounted.lock().unwrap().remove(path);
        tree::remove_dir_if_exists(path)
            .and_then(|()| fs::create_dir_all(path))
            .map_err(|e| failure(&["umount", "-l"], e.to_string(), 32))
    }
}

// ── VCS ──────────────────────────────────────────────────────────────────────

#[derive(Default)]
struct VcsState {
    /// Commit checked out in BASEDIR.
    head: String,
    upstream: String,
    fetch_output: String,
    config: HashMap<String, String>,
    fail_on: Option<&'static str>,
    fetches: usize,
    resets: usize,
    config_sets: usize,
    shutdown_on_fetch: Option<Arc<WaitHelper>>,
}

/// Git stand-in.  `reset_hard` writes upstream into the repo's `VERSION`
/// file, which is also where HEAD is read from, so a reset lives in the tree
/// it was run in and a rebuilt overlay starts from BASEDIR's HEAD again.
#[derive(Default)]
pub struct FakeVcs {
    state: Mutex<VcsState>,
}

impl FakeVcs {
    pub fn behind(head: &str, upstream: &str) -> Self {
        Self {
            state: Mutex::new(VcsState {
                head: head.to_string(),
                upstream: upstream.to_string(),
                ..VcsState::default()
            }),
        }
    }

    pub fn in_sync(hash: &str) -> Self {
        Self::behind(hash, hash)
    }

    pub fn with_fetch_output(self, output: &str) -> Self {
        self.state.lock().unwrap().fetch_output = output.to_string();
        self
    }

    /// Make every call of `op` (`fetch`, `rev-parse`, `reset`, `clean`,
    /// `submodule`, `config`) fail.
    pub fn failing_on(self, op: &'static str) -> Self {
        self.state.lock().unwrap().fail_on = Some(op);
        self
    }

    /// Ask `wait` to shut down from inside the next fetch, i.e. in the
    /// middle of an attempt.
    pub fn shutdown_on_fetch(self, wait: Arc<WaitHelper>) -> Self {
        self.state.lock().unwrap().shutdown_on_fetch = Some(wait);
        self
    }

    pub fn recover(&self) {
        self.state.lock().unwrap().fail_on = None;
    }

    /// Simulate a new upstream commit.
    pub fn push_upstream(&self, hash: &str) {
        self.state.lock().unwrap().upstream = hash.to_string();
    }

    pub fn fetches(&self) -> usize {
        self.state.lock().unwrap().fetches
    }

    pub fn resets(&self) -> usize {
        self.state.lock().unwrap().resets
    }

    pub fn config_sets(&self) -> usize {
        self.state.lock().unwrap().config_sets
    }

    pub fn config_value(&self, key: &str) -> Option<String> {
        self.state.lock().unwrap().config.get(key).cloned()
    }

    fn check(&self, op: &'static str) -> Result<(), ToolFailure> {
        if self.state.lock().unwrap().fail_on == Some(op) {
            return Err(failure(&["git", op], format!("fatal: {op} failed"), 128));
        }
        Ok(())
    }
}

#[async_trait]
impl VcsTool for FakeVcs {
    async fn fetch(&self, _repo: &Path) -> Result<String, ToolFailure> {
        self.check("fetch")?;
        let mut state = self.state.lock().unwrap();
        state.fetches += 1;
        if let Some(wait) = &state.shutdown_on_fetch {
            wait.request_shutdown();
        }
        Ok(state.fetch_output.clone())
    }

    async fn rev_parse(&self, repo: &Path, rev: &str) -> Result<String, ToolFailure> {
        self.check("rev-parse")?;
        let state = self.state.lock().unwrap();
        Ok(if rev == "HEAD" {
            fs::read_to_string(repo.join("VERSION"))
                .map(|v| v.trim().to_string())
                .unwrap_or_else(|_| state.head.clone())
        } else {
            state.upstream.clone()
        })
    }

    async fn reset_hard(&self, repo: &Path, _rev: &str) -> Result<String, ToolFailure> {
        self.check("reset")?;
        let mut state = self.state.lock().unwrap();
        state.resets += 1;
        fs::write(repo.join("VERSION"), format!("{}\n", state.upstream))
            .map_err(|e| failure(&["git", "reset"], e.to_string(), 128))?;
        Ok(format!("HEAD is now at {}", state.upstream))
    }

    async fn clean(&self, _repo: &Path) -> Result<String, ToolFailure> {
        self.check("clean")?;
        Ok(String::new())
    }

    async fn submodule_init(&self, _repo: &Path) -> Result<String, ToolFailure> {
        self.check("submodule")?;
        Ok(String::new())
    }

    async fn submodule_update(&self, _repo: &Path) -> Result<String, ToolFailure> {
        self.check("submodule")?;
        Ok(String::new())
    }

    async fn config_get(&self, _repo: &Path, key: &str) -> Result<String, ToolFailure> {
        self.check("config")?;
        self.state
            .lock()
            .unwrap()
            .config
            .get(key)
            .cloned()
            .ok_or_else(|| failure(&["git", "config", "--get", key], "", 1))
    }

    async fn config_set(&self, _repo: &Path, key: &str, value: &str) -> Result<(), ToolFailure> {
        self.check("config")?;
        let mut state = self.state.lock().unwrap();
        state.config.insert(key.to_string(), value.to_string());
        state.config_sets += 1;
        Ok(())
    }
}

// ── Probe ────────────────────────────────────────────────────────────────────

pub struct FakeProbe {
    online: AtomicBool,
}

impl FakeProbe {
    pub fn online() -> Self {
        Self {
            online: AtomicBool::new(true),
        }
    }

    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }
}

#[async_trait]
impl ConnectivityProbe for FakeProbe {
    async fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }
}

// ── Params ───────────────────────────────────────────────────────────────────

/// Params store whose reads of one key always fail.
pub struct FlakyParams {
    inner: MemoryParams,
    broken: ParamKey,
}

impl FlakyParams {
    pub fn broken_on(key: ParamKey) -> Self {
        Self {
            inner: MemoryParams::new(),
            broken: key,
        }
    }

    pub fn get_string(&self, key: ParamKey) -> Option<String> {
        self.inner.get_string(key)
    }
}

impl StatusStore for FlakyParams {
    fn get(&self, key: ParamKey) -> Result<Option<Vec<u8>>> {
        if key == self.broken {
            bail!("params read of {key} failed");
        }
        self.inner.get(key)
    }

    fn put(&self, key: ParamKey, value: &[u8]) -> Result<()> {
        self.inner.put(key, value)
    }
}
