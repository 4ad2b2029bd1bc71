//! wgkit session - local tunnel lifecycle
//!
//! Drives the external WireGuard tools to bring a tunnel up and down and to
//! report whether it is running.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐  connect(text)   ┌───────────────────┐  wg-quick up <file>
//! │  UI / CLI    │─────────────────▶│ SessionController │─────────────────────▶ tunnel engine
//! │              │  disconnect()    │  (state + staged  │  wg-quick down
//! │              │◀─────────────────│   config file)    │  wg show
//! └──────▲───────┘                  └─────────▲─────────┘
//!        │ StatusChange                       │ status()
//!        │                          ┌─────────┴─────────┐
//!        └──────────────────────────│   StatusPoller    │
//!                                   └───────────────────┘
//! ```
//!
//! # Guarantees
//!
//! - At most one lifecycle is active; overlapping calls get `SessionBusy`.
//! - The staged configuration (it holds the private key) is deleted on
//!   success, failure, disconnect, drop, signal-driven shutdown and panic,
//!   and when a pending `connect`/`disconnect` future is dropped.
//! - `status()` never fails; an unreachable engine reads as disconnected.

mod artifact;
mod cleanup;
mod controller;
mod platform;
mod poller;

pub use artifact::StagedArtifact;
pub use cleanup::{ShutdownSignal, StagingRegistry, install_panic_cleanup};
pub use controller::{
    ControlOutcome, DEFAULT_INTERFACE, SessionController, SessionError, SessionSettings, SessionState,
    TunnelStatus,
};
pub use platform::{CommandFamily, PlatformCommands, interface_listed};
pub use poller::{DEFAULT_POLL_INTERVAL, StatusChange, StatusPoller, StatusTracker};
