//! External tool plumbing for the updater: subprocesses, git, overlay
//! mounts, reachability and process-level OS hints.

pub mod command;
pub mod git;
pub mod mount;
pub mod net;
pub mod process;

pub use command::{NICE_LOW_PRIORITY, ToolCommand, ToolFailure};
pub use git::{GitCli, UPSTREAM_REF, VcsTool};
pub use mount::{MountTool, OverlayLayers, OverlayMounter, is_mount_point};
pub use net::{ConnectivityProbe, PingProbe};
