//! Session Controller
//!
//! Owns the local tunnel lifecycle. One instance per process; every
//! connect, disconnect and state read goes through it.
//!
//! ```text
//!              connect()                 bring-up ok
//! Disconnected ─────────▶ Connecting ─────────────────▶ Connected
//!      ▲                      │ bring-up failed               │ disconnect()
//!      │                      ▼                               ▼
//!      └──────────────── (cleanup) ◀─────────────────── Disconnecting
//!                                    tear-down (any outcome)
//! ```
//!
//! The staged configuration is deleted on every path back to
//! `Disconnected`. Engine commands run outside the state lock; a call that
//! arrives while a transition is in flight is rejected with `SessionBusy`.

use crate::artifact::StagedArtifact;
use crate::cleanup::StagingRegistry;
use crate::platform::{CommandFamily, PlatformCommands, interface_listed};
use serde::Serialize;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, error, info, warn};
use wgkit_engine::{CommandOutput, CommandRunner, SystemRunner};

/// Interface name used when none is configured
pub const DEFAULT_INTERFACE: &str = "wg0";

/// Tunnel lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Connected,
    Disconnecting,
}

impl SessionState {
    /// Is a transition in flight?
    pub fn is_transitioning(&self) -> bool {
        matches!(self, SessionState::Connecting | SessionState::Disconnecting)
    }
}

/// Result of a status query
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TunnelStatus {
    pub connected: bool,
    #[serde(rename = "interface", skip_serializing_if = "Option::is_none")]
    pub interface: Option<String>,
}

impl TunnelStatus {
    pub fn connected(interface: impl Into<String>) -> Self {
        Self {
            connected: true,
            interface: Some(interface.into()),
        }
    }

    pub fn disconnected() -> Self {
        Self {
            connected: false,
            interface: None,
        }
    }
}

/// `{success, message | error}` as handed to a UI or CLI
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ControlOutcome {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ControlOutcome {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: Some(message.into()),
            error: None,
        }
    }

    pub fn failed(err: &SessionError) -> Self {
        Self {
            success: false,
            message: None,
            error: Some(err.to_string()),
        }
    }

    /// Map an operation result, using `message` on success
    pub fn from_result(result: &Result<(), SessionError>, message: &str) -> Self {
        match result {
            Ok(()) => Self::ok(message),
            Err(e) => Self::failed(e),
        }
    }
}

/// Session control errors.
///
/// Display strings are short and safe to show to a user.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    #[error("Unsupported platform: {0}")]
    UnsupportedPlatform(String),

    #[error("Failed to connect: {reason}")]
    ConnectFailed { reason: String },

    #[error("Tear-down reported an error: {reason}")]
    DisconnectFailed { reason: String },

    #[error("Another connect or disconnect is in progress")]
    SessionBusy,

    #[error("Invalid configuration provided: {0}")]
    InvalidConfiguration(String),
}

/// Controller settings
#[derive(Debug, Clone)]
pub struct SessionSettings {
    /// Managed interface name; also the staged file's stem
    pub interface: String,
    /// Directory under which configurations are staged
    pub staging_root: PathBuf,
    /// Prefix unix engine commands with `sudo`
    pub elevate: bool,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            interface: DEFAULT_INTERFACE.to_string(),
            staging_root: std::env::temp_dir(),
            elevate: cfg!(unix),
        }
    }
}

struct SessionInner {
    state: SessionState,
    artifact: Option<StagedArtifact>,
}

/// Drives the external tunnel engine through connect/disconnect/status
pub struct SessionController<R: CommandRunner = SystemRunner> {
    runner: Arc<R>,
    commands: PlatformCommands,
    staging_root: PathBuf,
    registry: StagingRegistry,
    inner: Mutex<SessionInner>,
}

impl SessionController<SystemRunner> {
    /// Controller for the current platform, failing fast if unsupported
    pub fn system(settings: SessionSettings) -> Result<Self, SessionError> {
        let family = CommandFamily::detect()?;
        Ok(Self::new(Arc::new(SystemRunner), family, settings))
    }
}

impl<R: CommandRunner> SessionController<R> {
    pub fn new(runner: Arc<R>, family: CommandFamily, settings: SessionSettings) -> Self {
        Self {
            runner,
            commands: PlatformCommands::new(family, settings.interface, settings.elevate),
            staging_root: settings.staging_root,
            registry: StagingRegistry::new(),
            inner: Mutex::new(SessionInner {
                state: SessionState::Disconnected,
                artifact: None,
            }),
        }
    }

    /// Share an existing registry (e.g. one the panic hook already watches)
    pub fn with_registry(mut self, registry: StagingRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// Registry tracking this controller's staged file
    pub fn registry(&self) -> &StagingRegistry {
        &self.registry
    }

    /// Managed interface name
    pub fn interface(&self) -> &str {
        self.commands.interface()
    }

    pub fn family(&self) -> CommandFamily {
        self.commands.family()
    }

    /// Current lifecycle state
    pub fn state(&self) -> SessionState {
        self.lock().state
    }

    /// Path of the staged configuration, if one exists
    pub fn staged_path(&self) -> Option<PathBuf> {
        self.lock().artifact.as_ref().map(|a| a.path().to_path_buf())
    }

    /// Bring the tunnel up with `config`.
    ///
    /// Only valid from `Disconnected`. On failure the staged file is deleted
    /// before the error is returned.
    pub async fn connect(&self, config: &str) -> Result<(), SessionError> {
        validate_config(config)?;

        let path = {
            let mut inner = self.lock();
            if inner.state != SessionState::Disconnected {
                debug!("Connect rejected in state {:?}", inner.state);
                return Err(SessionError::SessionBusy);
            }

            inner.state = SessionState::Connecting;
            match StagedArtifact::stage(&self.staging_root, self.commands.interface(), config) {
                Ok(artifact) => {
                    self.registry.record(artifact.dir());
                    let path = artifact.path().to_path_buf();
                    inner.artifact = Some(artifact);
                    path
                }
                Err(e) => {
                    error!("Failed to stage config: {}", e);
                    inner.state = SessionState::Disconnected;
                    return Err(SessionError::ConnectFailed {
                        reason: "failed to save configuration file".to_string(),
                    });
                }
            }
        };

        info!("Starting WireGuard connection on {}", self.commands.interface());
        let guard = TransitionGuard::new(self);
        let outcome = self.runner.run(&self.commands.bring_up(&path)).await;
        guard.disarm();
        let failure = command_failure(&outcome);

        let mut inner = self.lock();
        match failure {
            None => {
                inner.state = SessionState::Connected;
                info!("WireGuard connection established");
                Ok(())
            }
            Some(reason) => {
                error!("Connection error: {}", reason);
                if let Some(artifact) = inner.artifact.take() {
                    self.discard(artifact);
                }
                inner.state = SessionState::Disconnected;
                Err(SessionError::ConnectFailed { reason })
            }
        }
    }

    /// Tear the tunnel down.
    ///
    /// Runs from `Connected` and also from `Disconnected`, where an
    /// interface may survive from an earlier process. Rejected while a
    /// transition is in flight. The staged file is deleted whatever the
    /// tear-down command reports. Without a staged file the interface is
    /// torn down by name, deleting the link directly if that fails.
    pub async fn disconnect(&self) -> Result<(), SessionError> {
        let path = {
            let mut inner = self.lock();
            if inner.state.is_transitioning() {
                debug!("Disconnect rejected in state {:?}", inner.state);
                return Err(SessionError::SessionBusy);
            }
            inner.state = SessionState::Disconnecting;
            inner.artifact.as_ref().map(|a| a.path().to_path_buf())
        };

        info!("Disconnecting WireGuard on {}", self.commands.interface());
        let guard = TransitionGuard::new(self);
        let mut outcome = self.runner.run(&self.commands.tear_down(path.as_deref())).await;
        if path.is_none() && command_failure(&outcome).is_some() {
            if let Some(fallback) = self.commands.delete_interface() {
                debug!("Tear-down by name failed; deleting {} directly", self.commands.interface());
                outcome = self.runner.run(&fallback).await;
            }
        }
        guard.disarm();
        let failure = command_failure(&outcome);

        {
            let mut inner = self.lock();
            if let Some(artifact) = inner.artifact.take() {
                self.discard(artifact);
            }
            inner.state = SessionState::Disconnected;
        }

        match failure {
            None => {
                info!("WireGuard disconnected");
                Ok(())
            }
            Some(reason) => {
                warn!("Disconnect error: {}", reason);
                Err(SessionError::DisconnectFailed { reason })
            }
        }
    }

    /// Query the engine for the managed interface.
    ///
    /// Never fails: an engine that cannot be queried counts as disconnected.
    pub async fn status(&self) -> TunnelStatus {
        let interface = self.commands.interface();
        match self.runner.run(&self.commands.status_query()).await {
            Ok(output) if output.success() && interface_listed(&output.stdout, interface) => {
                TunnelStatus::connected(interface)
            }
            Ok(output) => {
                if !output.success() {
                    debug!("Status query failed: {}", output.failure_reason());
                }
                TunnelStatus::disconnected()
            }
            Err(e) => {
                debug!("Status query could not run: {}", e);
                TunnelStatus::disconnected()
            }
        }
    }

    /// Release everything before the process exits.
    ///
    /// Tears the tunnel down if this controller brought it up, then removes
    /// anything still staged.
    pub async fn shutdown(&self) {
        let (state, staged) = {
            let inner = self.lock();
            (inner.state, inner.artifact.is_some())
        };

        if state == SessionState::Connected || staged {
            info!("Application shutting down, disconnecting");
            if let Err(e) = self.disconnect().await {
                warn!("Disconnect during shutdown: {}", e);
            }
        }

        let leftover = self.lock().artifact.take();
        if let Some(artifact) = leftover {
            self.discard(artifact);
        }
        self.registry.purge();
    }

    fn discard(&self, artifact: StagedArtifact) {
        let path = artifact.path().to_path_buf();
        if let Err(e) = artifact.remove() {
            error!("Error cleaning up config file {}: {}", path.display(), e);
        }
        self.registry.clear();
    }

    fn lock(&self) -> MutexGuard<'_, SessionInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<R: CommandRunner> Drop for SessionController<R> {
    fn drop(&mut self) {
        let inner = self.inner.get_mut().unwrap_or_else(PoisonError::into_inner);
        if let Some(artifact) = inner.artifact.take() {
            let path: &Path = artifact.path();
            debug!("Controller dropped with staged config {}", path.display());
            drop(artifact);
            self.registry.clear();
        }
    }
}

/// Resets the session if a connect or disconnect future is dropped while
/// its engine command is still running (e.g. under a caller's timeout)
struct TransitionGuard<'a, R: CommandRunner> {
    controller: &'a SessionController<R>,
    armed: bool,
}

impl<'a, R: CommandRunner> TransitionGuard<'a, R> {
    fn new(controller: &'a SessionController<R>) -> Self {
        Self {
            controller,
            armed: true,
        }
    }

    /// The command resolved; the caller finishes the transition itself
    fn disarm(mut self) {
        self.armed = false;
    }
}

impl<R: CommandRunner> Drop for TransitionGuard<'_, R> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let mut inner = self.controller.lock();
        warn!("{:?} abandoned before the engine answered; resetting session", inner.state);
        if let Some(artifact) = inner.artifact.take() {
            self.controller.discard(artifact);
        }
        inner.state = SessionState::Disconnected;
    }
}

/// Reject text the engine could never accept
fn validate_config(config: &str) -> Result<(), SessionError> {
    if config.trim().is_empty() {
        return Err(SessionError::InvalidConfiguration("configuration is empty".to_string()));
    }
    if !config.lines().any(|l| l.trim() == "[Interface]") {
        return Err(SessionError::InvalidConfiguration(
            "missing [Interface] section".to_string(),
        ));
    }
    Ok(())
}

/// `None` on success, otherwise a short reason
fn command_failure(outcome: &io::Result<CommandOutput>) -> Option<String> {
    match outcome {
        Ok(output) if output.success() => {
            let stderr = output.stderr.trim();
            if !stderr.is_empty() && !stderr.contains("Warning") {
                warn!("Command stderr: {}", stderr);
            }
            if !output.stdout.trim().is_empty() {
                debug!("Command output: {}", output.stdout.trim());
            }
            None
        }
        Ok(output) => Some(output.failure_reason()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            Some("WireGuard tools are not installed".to_string())
        }
        Err(e) => Some(format!("could not start WireGuard tools ({})", e.kind())),
    }
}
