//! Exit-Time Cleanup
//!
//! A staged configuration holds a private key and must not outlive the
//! process. Three exit paths are covered:
//!
//! - normal exit: `StagedArtifact` removes itself on drop
//! - termination signal: [`ShutdownSignal`] lets the caller run
//!   `SessionController::shutdown` before returning from `main`
//! - panic: [`install_panic_cleanup`] removes whatever is staged before the
//!   previous hook runs (this also covers `panic = "abort"` builds)

use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError, TryLockError};
use tracing::{debug, error};

/// Process-wide record of the currently staged directory
#[derive(Debug, Clone, Default)]
pub struct StagingRegistry {
    current: Arc<Mutex<Option<PathBuf>>>,
}

impl StagingRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Remember `dir` as staged
    pub fn record(&self, dir: &Path) {
        *self.current.lock().unwrap_or_else(PoisonError::into_inner) = Some(dir.to_path_buf());
    }

    /// Forget the staged directory (it was removed by its owner)
    pub fn clear(&self) {
        *self.current.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }

    /// Currently staged directory, if any
    pub fn current(&self) -> Option<PathBuf> {
        self.current.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Remove the staged directory from disk right now
    pub fn purge(&self) {
        let staged = self.current.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(dir) = staged {
            remove_dir(&dir);
        }
    }

    /// Like `purge`, but never blocks: used from the panic hook, where the
    /// panicking thread might be the one holding the lock
    fn try_purge(&self) {
        let staged = match self.current.try_lock() {
            Ok(mut guard) => guard.take(),
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner().take(),
            Err(TryLockError::WouldBlock) => None,
        };
        if let Some(dir) = staged {
            remove_dir(&dir);
        }
    }
}

fn remove_dir(dir: &Path) {
    match std::fs::remove_dir_all(dir) {
        Ok(()) => debug!("Purged staged config: {}", dir.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => error!("Failed to purge staged config {}: {}", dir.display(), e),
    }
}

/// Delete whatever `registry` has staged when any thread panics.
///
/// Chains onto the previously installed hook.
pub fn install_panic_cleanup(registry: StagingRegistry) {
    let previous = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        registry.try_purge();
        previous(info);
    }));
}

/// Termination signals, captured from the moment of registration.
///
/// Register before staging anything: once registered, SIGINT/SIGTERM no
/// longer kill the process outright, so the caller always gets to clean up.
pub struct ShutdownSignal {
    #[cfg(unix)]
    interrupt: tokio::signal::unix::Signal,
    #[cfg(unix)]
    terminate: tokio::signal::unix::Signal,
    #[cfg(windows)]
    ctrl_c: tokio::signal::windows::CtrlC,
    #[cfg(windows)]
    ctrl_close: tokio::signal::windows::CtrlClose,
}

impl ShutdownSignal {
    #[cfg(unix)]
    pub fn register() -> io::Result<Self> {
        use tokio::signal::unix::{SignalKind, signal};

        Ok(Self {
            interrupt: signal(SignalKind::interrupt())?,
            terminate: signal(SignalKind::terminate())?,
        })
    }

    #[cfg(windows)]
    pub fn register() -> io::Result<Self> {
        Ok(Self {
            ctrl_c: tokio::signal::windows::ctrl_c()?,
            ctrl_close: tokio::signal::windows::ctrl_close()?,
        })
    }

    /// Wait for the next termination signal
    #[cfg(unix)]
    pub async fn recv(&mut self) {
        tokio::select! {
            _ = self.interrupt.recv() => debug!("Received SIGINT"),
            _ = self.terminate.recv() => debug!("Received SIGTERM"),
        }
    }

    #[cfg(windows)]
    pub async fn recv(&mut self) {
        tokio::select! {
            _ = self.ctrl_c.recv() => debug!("Received Ctrl-C"),
            _ = self.ctrl_close.recv() => debug!("Received console close"),
        }
    }
}
