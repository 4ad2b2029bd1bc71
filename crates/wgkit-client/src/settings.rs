//! Client settings
//!
//! An optional TOML file supplies defaults; command-line flags (and their
//! environment fallbacks) override it.
//!
//! ```toml
//! server = "http://vpn.example.com:3000"
//! email = "ana@example.com"
//! interface = "wg0"
//! poll_interval_secs = 5
//! elevate = true
//! staging_dir = "/run/wgkit"
//! ```

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use wgkit_session::{DEFAULT_POLL_INTERVAL, SessionSettings};

/// Contents of the settings file; every key is optional
#[derive(Debug, Default, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileSettings {
    pub server: Option<String>,
    pub email: Option<String>,
    pub interface: Option<String>,
    pub poll_interval_secs: Option<u64>,
    pub elevate: Option<bool>,
    pub staging_dir: Option<PathBuf>,
}

impl FileSettings {
    pub fn from_toml(text: &str) -> Result<Self> {
        toml::from_str(text).context("invalid settings file")
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading settings file {}", path.display()))?;
        Self::from_toml(&text).with_context(|| path.display().to_string())
    }
}

/// Values given on the command line
#[derive(Debug, Default, Clone)]
pub struct Overrides {
    pub server: Option<String>,
    pub email: Option<String>,
    pub interface: Option<String>,
    pub poll_interval_secs: Option<u64>,
    pub no_elevate: bool,
    pub staging_dir: Option<PathBuf>,
}

/// Effective client settings
#[derive(Debug, Clone)]
pub struct ClientSettings {
    pub session: SessionSettings,
    pub poll_interval: Duration,
    pub server: Option<String>,
    pub email: Option<String>,
}

impl ClientSettings {
    pub fn resolve(file: FileSettings, cli: Overrides) -> Self {
        let defaults = SessionSettings::default();

        let session = SessionSettings {
            interface: cli.interface.or(file.interface).unwrap_or(defaults.interface),
            staging_root: cli.staging_dir.or(file.staging_dir).unwrap_or(defaults.staging_root),
            elevate: !cli.no_elevate && file.elevate.unwrap_or(defaults.elevate),
        };

        let poll_interval = cli
            .poll_interval_secs
            .or(file.poll_interval_secs)
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_POLL_INTERVAL);

        Self {
            session,
            poll_interval,
            server: cli.server.or(file.server),
            email: cli.email.or(file.email),
        }
    }
}
