//! Crash-safe background updater.
//!
//! Updates are staged in an overlay filesystem on top of the live tree,
//! finalized into a plain copy, and flagged consistent only once that copy is
//! complete.  A separate boot-time step swaps the flagged copy in.

pub mod attempt;
pub mod consistency;
pub mod error;
pub mod lock;
pub mod overlay;
pub mod signals;
pub mod status;
pub mod tree;
pub mod update_loop;

#[cfg(test)]
mod testing;

pub use attempt::{AttemptOutcome, UpdateAttempter};
pub use consistency::ConsistencyFlag;
pub use error::{StartupError, UpdateError};
pub use lock::{ExclusiveLock, LockError};
pub use overlay::OverlayManager;
pub use signals::{WaitHelper, install_signal_handlers};
pub use status::StatusPublisher;
pub use update_loop::{Collaborators, DaemonRunState, IterationOutcome, UpdateLoop, preflight};
