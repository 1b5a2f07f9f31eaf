//! Process-level OS helpers: privilege, I/O priority and global sync.

use std::io;

/// `true` when running with effective uid 0.
pub fn is_root() -> bool {
    // SAFETY: geteuid has no preconditions and cannot fail.
    unsafe { libc::geteuid() == 0 }
}

/// Flush all filesystem buffers to disk (`sync(2)`).
pub fn sync_filesystems() {
    // SAFETY: sync has no preconditions and cannot fail.
    unsafe { libc::sync() };
}

/// Move this process to the lowest best-effort I/O priority so staging work
/// never starves the device's primary workload.
#[cfg(target_os = "linux")]
pub fn lower_io_priority() -> io::Result<()> {
    const IOPRIO_WHO_PROCESS: libc::c_int = 1;
    const IOPRIO_CLASS_BE: libc::c_int = 2;
    const IOPRIO_CLASS_SHIFT: libc::c_int = 13;
    const LOWEST_BE_LEVEL: libc::c_int = 7;

    let prio = (IOPRIO_CLASS_BE << IOPRIO_CLASS_SHIFT) | LOWEST_BE_LEVEL;
    // SAFETY: ioprio_set only reads its integer arguments; pid 0 means self.
    let ret = unsafe { libc::syscall(libc::SYS_ioprio_set, IOPRIO_WHO_PROCESS, 0, prio) };
    if ret != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

#[cfg(not(target_os = "linux"))]
pub fn lower_io_priority() -> io::Result<()> {
    Ok(())
}
