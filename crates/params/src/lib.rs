//! Key-value parameter store shared with the rest of the device.
//!
//! The updater reads two gates (`DisableUpdates`, `IsOffroad`) and publishes
//! its status through four keys.  Other processes read the same store, so
//! writes must never leave a half-written value behind.

mod file;

use std::collections::HashMap;
use std::fmt;
use std::sync::Mutex;

use anyhow::Result;

pub use file::FileParams;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParamKey {
    DisableUpdates,
    IsOffroad,
    UpdateAvailable,
    LastUpdateTime,
    ReleaseNotes,
    UpdateFailedCount,
}

impl ParamKey {
    pub const ALL: [ParamKey; 6] = [
        ParamKey::DisableUpdates,
        ParamKey::IsOffroad,
        ParamKey::UpdateAvailable,
        ParamKey::LastUpdateTime,
        ParamKey::ReleaseNotes,
        ParamKey::UpdateFailedCount,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ParamKey::DisableUpdates => "DisableUpdates",
            ParamKey::IsOffroad => "IsOffroad",
            ParamKey::UpdateAvailable => "UpdateAvailable",
            ParamKey::LastUpdateTime => "LastUpdateTime",
            ParamKey::ReleaseNotes => "ReleaseNotes",
            ParamKey::UpdateFailedCount => "UpdateFailedCount",
        }
    }
}

impl fmt::Display for ParamKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Narrow capability over the parameter store.
pub trait StatusStore: Send + Sync {
    fn get(&self, key: ParamKey) -> Result<Option<Vec<u8>>>;

    fn put(&self, key: ParamKey, value: &[u8]) -> Result<()>;

    /// Boolean params are stored as the single byte `"1"`.
    fn is_set(&self, key: ParamKey) -> Result<bool> {
        Ok(self.get(key)?.as_deref() == Some(b"1".as_slice()))
    }
}

/// In-memory store for tests and dry runs.
#[derive(Debug, Default)]
pub struct MemoryParams {
    values: Mutex<HashMap<ParamKey, Vec<u8>>>,
}

impl MemoryParams {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lossy string view of a value, `None` when unset.
    pub fn get_string(&self, key: ParamKey) -> Option<String> {
        self.values
            .lock()
            .ok()?
            .get(&key)
            .map(|v| String::from_utf8_lossy(v).into_owned())
    }
}

impl StatusStore for MemoryParams {
    fn get(&self, key: ParamKey) -> Result<Option<Vec<u8>>> {
        let values = self
            .values
            .lock()
            .map_err(|_| anyhow::anyhow!("params mutex poisoned"))?;
        Ok(values.get(&key).cloned())
    }

    fn put(&self, key: ParamKey, value: &[u8]) -> Result<()> {
        let mut values = self
            .values
            .lock()
            .map_err(|_| anyhow::anyhow!("params mutex poisoned"))?;
        values.insert(key, value.to_vec());
        Ok(())
    }
}
