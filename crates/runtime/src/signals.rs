//! Signal-driven wake/shutdown for the single control loop.
//!
//! Signal delivery only flips atomic flags and wakes a waiter.  All
//! filesystem, mount and git work stays on the loop, which observes the
//! shutdown flag at iteration boundaries: an overlay that is mid-mutation
//! cannot be unmounted safely, so termination is deferred rather than
//! immediate.
//!
//! | Signal           | Effect                                   |
//! |------------------|------------------------------------------|
//! | `SIGTERM`/`SIGINT` | request shutdown, wake any sleep        |
//! | `SIGHUP`         | wake any sleep, run the next check now   |

use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::Notify;
use tracing::info;

#[derive(Debug, Default)]
pub struct WaitHelper {
    shutdown: AtomicBool,
    wake: AtomicBool,
    notify: Notify,
}

impl WaitHelper {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request_shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
        self.wake.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    pub fn request_wake(&self) {
        self.wake.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    pub fn is_shutdown_requested(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    pub fn is_wake_requested(&self) -> bool {
        self.wake.load(Ordering::SeqCst)
    }

    /// Forget a pending wake.  Called at the top of every iteration so only
    /// wakes that arrive after that point shorten the next backoff.
    pub fn clear_wake(&self) {
        self.wake.store(false, Ordering::SeqCst);
    }

    /// Sleep for `duration` unless woken.  A wake or shutdown that is already
    /// pending returns immediately.  Returns `true` when woken early.
    pub async fn sleep(&self, duration: Duration) -> bool {
        let notified = self.notify.notified();
        tokio::pin!(notified);
        // Register before checking the flags so a wake between the check and
        // the await is not lost.
        notified.as_mut().enable();

        if self.is_wake_requested() || self.is_shutdown_requested() {
            return true;
        }

        tokio::select! {
            _ = &mut notified => true,
            _ = tokio::time::sleep(duration) => false,
        }
    }
}

/// Route process signals to `wait`.  Must be called from within a tokio
/// runtime; the listeners live for the rest of the process.
#[cfg(unix)]
pub fn install_signal_handlers(wait: Arc<WaitHelper>) -> io::Result<()> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sighup = signal(SignalKind::hangup())?;

    let shutdown_wait = wait.clone();
    tokio::spawn(async move {
        loop {
            tokio::select! {
                Some(()) = sigterm.recv() => {}
                Some(()) = sigint.recv() => {}
                else => break,
            }
            info!("caught SIGINT/SIGTERM, dismounting overlay at next opportunity");
            shutdown_wait.request_shutdown();
        }
    });

    tokio::spawn(async move {
        while sighup.recv().await.is_some() {
            info!("caught SIGHUP, running update check immediately");
            wait.request_wake();
        }
    });

    Ok(())
}

#[cfg(not(unix))]
pub fn install_signal_handlers(wait: Arc<WaitHelper>) -> io::Result<()> {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            wait.request_shutdown();
        }
    });
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[tokio::test]
    async fn sleep_runs_to_timeout_without_signals() {
        let wait = WaitHelper::new();
        let woke = wait.sleep(Duration::from_millis(20)).await;
        assert!(!woke);
    }

    #[tokio::test]
    async fn wake_shortens_sleep_without_shutdown() {
        let wait = Arc::new(WaitHelper::new());
        let waker = wait.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            waker.request_wake();
        });

        let started = Instant::now();
        let woke = wait.sleep(Duration::from_secs(30)).await;
        assert!(woke);
        assert!(started.elapsed() < Duration::from_secs(5));
        assert!(!wait.is_shutdown_requested());
    }

    #[tokio::test]
    async fn shutdown_wakes_sleep_and_sticks() {
        let wait = Arc::new(WaitHelper::new());
        let stopper = wait.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            stopper.request_shutdown();
        });

        assert!(wait.sleep(Duration::from_secs(30)).await);
        assert!(wait.is_shutdown_requested());

        // Clearing the wake does not cancel a shutdown; later sleeps return
        // at once.
        wait.clear_wake();
        assert!(wait.sleep(Duration::from_secs(30)).await);
    }

    #[tokio::test]
    async fn pending_wake_returns_immediately_until_cleared() {
        let wait = WaitHelper::new();
        wait.request_wake();
        assert!(wait.sleep(Duration::from_secs(30)).await);
        assert!(wait.sleep(Duration::from_secs(30)).await);

        wait.clear_wake();
        assert!(!wait.sleep(Duration::from_millis(10)).await);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn process_signals_reach_the_wait_helper() {
        let wait = Arc::new(WaitHelper::new());
        install_signal_handlers(wait.clone()).unwrap();

        // SAFETY: signalling our own pid; handlers are installed above.
        unsafe { libc::kill(libc::getpid(), libc::SIGHUP) };
        assert!(wait.sleep(Duration::from_secs(10)).await);
        assert!(!wait.is_shutdown_requested());

        wait.clear_wake();
        // SAFETY: as above.
        unsafe { libc::kill(libc::getpid(), libc::SIGTERM) };
        assert!(wait.sleep(Duration::from_secs(10)).await);
        assert!(wait.is_shutdown_requested());
    }
}
