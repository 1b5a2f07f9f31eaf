//! Status published to the shared parameter store after each iteration.

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use updated_config::UpdaterConfig;
use updated_params::{ParamKey, StatusStore};

use crate::attempt::AttemptOutcome;
use crate::error::UpdateError;

/// ISO-8601 without offset, microsecond precision.
pub const UPDATE_TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.6f";

pub struct StatusPublisher {
    params: Arc<dyn StatusStore>,
    release_notes: PathBuf,
}

impl StatusPublisher {
    pub fn new(config: &UpdaterConfig, params: Arc<dyn StatusStore>) -> Self {
        Self {
            params,
            release_notes: config.staging().finalized.join(&config.paths.release_notes),
        }
    }

    pub fn publish_attempt(&self, outcome: AttemptOutcome) -> Result<(), UpdateError> {
        self.publish_attempt_at(outcome, Utc::now())
    }

    /// Record a completed attempt.  Release notes and the update-available
    /// bit are only published when a new version was staged.
    pub fn publish_attempt_at(
        &self,
        outcome: AttemptOutcome,
        now: DateTime<Utc>,
    ) -> Result<(), UpdateError> {
        let stamp = format_update_time(now);
        self.params.put(ParamKey::LastUpdateTime, stamp.as_bytes())?;

        if outcome.new_version() {
            let notes = match fs::read(&self.release_notes) {
                Ok(raw) => {
                    let mut notes = first_paragraph(&raw).to_vec();
                    notes.push(b'\n');
                    notes
                }
                Err(err) => {
                    warn!(?err, path = %self.release_notes.display(), "release notes unreadable");
                    Vec::new()
                }
            };
            self.params.put(ParamKey::ReleaseNotes, &notes)?;
            self.params.put(ParamKey::UpdateAvailable, b"1")?;
        }
        debug!(?outcome, %stamp, "published attempt status");
        Ok(())
    }

    pub fn publish_failed_count(&self, count: u32) -> Result<(), UpdateError> {
        self.params
            .put(ParamKey::UpdateFailedCount, count.to_string().as_bytes())?;
        Ok(())
    }
}

pub fn format_update_time(at: DateTime<Utc>) -> String {
    at.format(UPDATE_TIME_FORMAT).to_string()
}

/// Bytes up to the first blank line.  Without one, the whole document minus
/// trailing newlines.
pub fn first_paragraph(notes: &[u8]) -> &[u8] {
    if let Some(pos) = notes.windows(2).position(|w| w == b"\n\n") {
        return &notes[..pos];
    }
    let mut end = notes.len();
    while end > 0 && notes[end - 1] == b'\n' {
        end -= 1;
    }
    &notes[..end]
}
