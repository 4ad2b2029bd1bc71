//! Status Polling
//!
//! Re-queries the engine on a fixed interval and reports only changes.
//! The poller lives exactly as long as its [`StatusPoller`] handle: start it
//! once a session context exists, stop or drop it when that context ends.

use crate::controller::{SessionController, TunnelStatus};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};
use wgkit_engine::CommandRunner;

/// Default polling interval
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// A change in observed tunnel status
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusChange {
    /// Last observed status, `None` for the first observation
    pub previous: Option<TunnelStatus>,
    pub current: TunnelStatus,
}

/// Remembers the last status and reports differences
#[derive(Debug, Default)]
pub struct StatusTracker {
    last: Option<TunnelStatus>,
}

impl StatusTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `status`, returning a change if it differs from the last one
    pub fn observe(&mut self, status: TunnelStatus) -> Option<StatusChange> {
        if self.last.as_ref() == Some(&status) {
            return None;
        }
        let previous = self.last.replace(status.clone());
        Some(StatusChange {
            previous,
            current: status,
        })
    }

    pub fn last(&self) -> Option<&TunnelStatus> {
        self.last.as_ref()
    }
}

/// Handle to a running poll loop
pub struct StatusPoller {
    stop: Option<oneshot::Sender<()>>,
    handle: JoinHandle<()>,
}

impl StatusPoller {
    /// Spawn the loop. The first tick fires immediately.
    ///
    /// The loop ends when the handle is stopped or dropped, or when the
    /// receiver of `changes` goes away.
    pub fn start<R: CommandRunner>(
        controller: Arc<SessionController<R>>,
        interval: Duration,
        changes: mpsc::UnboundedSender<StatusChange>,
    ) -> Self {
        let (stop_tx, stop_rx) = oneshot::channel();
        let handle = tokio::spawn(run_poll_loop(controller, interval, changes, stop_rx));

        info!("Status polling started ({:?})", interval);
        Self {
            stop: Some(stop_tx),
            handle,
        }
    }

    /// Stop polling and wait for the loop to exit
    pub async fn stop(mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        if let Err(e) = (&mut self.handle).await {
            debug!("Status poller ended abnormally: {}", e);
        }
        info!("Status polling stopped");
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

impl Drop for StatusPoller {
    fn drop(&mut self) {
        // Dropping the sender ends the loop at its next wakeup
        self.stop.take();
    }
}

async fn run_poll_loop<R: CommandRunner>(
    controller: Arc<SessionController<R>>,
    interval: Duration,
    changes: mpsc::UnboundedSender<StatusChange>,
    mut stop: oneshot::Receiver<()>,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut tracker = StatusTracker::new();

    loop {
        tokio::select! {
            _ = &mut stop => break,
            _ = ticker.tick() => {
                let status = controller.status().await;
                if let Some(change) = tracker.observe(status) {
                    info!(
                        "Status: {}",
                        if change.current.connected { "Connected" } else { "Disconnected" }
                    );
                    if changes.send(change).is_err() {
                        debug!("Status consumer went away");
                        break;
                    }
                }
            }
        }
    }
}
