//! WireGuard client
//!
//! Fetches a configuration (from a file or the provisioning server), holds
//! the tunnel up until interrupted, and reports status changes meanwhile.

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

mod api;
mod settings;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use wgkit_session::{
    ControlOutcome, SessionController, ShutdownSignal, StagingRegistry, StatusPoller,
    install_panic_cleanup,
};

use crate::api::ApiClient;
use crate::settings::{ClientSettings, FileSettings, Overrides};

#[derive(Debug, Parser)]
#[command(name = "wgkit", version, about = "Bring a WireGuard tunnel up and keep an eye on it")]
struct Cli {
    /// TOML settings file
    #[arg(long, global = true, env = "WGKIT_SETTINGS")]
    settings: Option<PathBuf>,

    /// Managed interface name
    #[arg(long, short = 'i', global = true)]
    interface: Option<String>,

    /// Run wg-quick without sudo
    #[arg(long, global = true)]
    no_elevate: bool,

    /// Directory for staged configuration files
    #[arg(long, global = true)]
    staging_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Bring the tunnel up and hold it until Ctrl-C
    Connect {
        /// Use this configuration file instead of asking a server
        #[arg(long, short = 'c')]
        config: Option<PathBuf>,

        /// Provisioning server URL
        #[arg(long, env = "WGKIT_SERVER")]
        server: Option<String>,

        /// Account email
        #[arg(long, env = "WGKIT_EMAIL")]
        email: Option<String>,

        /// Account password
        #[arg(long, env = "WGKIT_PASSWORD", hide_env_values = true)]
        password: Option<String>,

        /// Seconds between status checks
        #[arg(long)]
        poll_interval: Option<u64>,
    },
    /// Tear the managed interface down
    Disconnect,
    /// Print tunnel status as JSON
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Before anything can be staged
    let registry = StagingRegistry::new();
    install_panic_cleanup(registry.clone());

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cli = Cli::parse();
    let file = match &cli.settings {
        Some(path) => FileSettings::load(path)?,
        None => FileSettings::default(),
    };

    let mut overrides = Overrides {
        interface: cli.interface,
        no_elevate: cli.no_elevate,
        staging_dir: cli.staging_dir,
        ..Default::default()
    };
    let action = match cli.command {
        Command::Connect {
            config,
            server,
            email,
            password,
            poll_interval,
        } => {
            overrides.server = server;
            overrides.email = email;
            overrides.poll_interval_secs = poll_interval;
            Action::Connect { config, password }
        }
        Command::Disconnect => Action::Disconnect,
        Command::Status => Action::Status,
    };
    let settings = ClientSettings::resolve(file, overrides);

    let controller = Arc::new(SessionController::system(settings.session.clone())?.with_registry(registry));

    match action {
        Action::Connect { config, password } => {
            let text = match config {
                Some(path) => std::fs::read_to_string(&path)
                    .with_context(|| format!("reading {}", path.display()))?,
                None => fetch_config(&settings, password).await?,
            };
            run_connected(controller, &settings, &text).await
        }
        Action::Status => {
            let status = controller.status().await;
            println!("{}", serde_json::to_string_pretty(&status)?);
            Ok(())
        }
        Action::Disconnect => {
            let result = controller.disconnect().await;
            let outcome = ControlOutcome::from_result(&result, "Disconnected successfully");
            println!("{}", serde_json::to_string_pretty(&outcome)?);
            result.map_err(Into::into)
        }
    }
}

/// What to do once settings are resolved
enum Action {
    Connect {
        config: Option<PathBuf>,
        password: Option<String>,
    },
    Disconnect,
    Status,
}

/// Log in and request a configuration
async fn fetch_config(settings: &ClientSettings, password: Option<String>) -> Result<String> {
    let Some(server) = settings.server.as_deref() else {
        bail!("either --config or --server is required");
    };
    let Some(email) = settings.email.as_deref() else {
        bail!("--email is required when connecting through a server");
    };
    let Some(password) = password else {
        bail!("--password (or WGKIT_PASSWORD) is required when connecting through a server");
    };

    let client = ApiClient::new(server)?;
    let token = client.login(email, &password).await?;
    let provisioned = client.generate_config(&token).await?;
    Ok(provisioned.config)
}

/// Connect, poll until a termination signal, then clean up
async fn run_connected(
    controller: Arc<SessionController>,
    settings: &ClientSettings,
    text: &str,
) -> Result<()> {
    // Armed before anything is staged, so a signal during bring-up is ours
    let mut signals = ShutdownSignal::register()?;

    let connecting = controller.connect(text);
    tokio::pin!(connecting);
    let mut interrupted = false;
    let result = tokio::select! {
        result = &mut connecting => result,
        _ = signals.recv() => {
            info!("Interrupted; waiting for bring-up to finish before cleaning up");
            interrupted = true;
            connecting.await
        }
    };

    if let Err(e) = result {
        controller.shutdown().await;
        return Err(e.into());
    }
    if interrupted {
        controller.shutdown().await;
        return Ok(());
    }
    info!("Tunnel {} is up; press Ctrl-C to disconnect", controller.interface());

    let (tx, mut rx) = mpsc::unbounded_channel();
    let poller = StatusPoller::start(controller.clone(), settings.poll_interval, tx);

    loop {
        tokio::select! {
            _ = signals.recv() => break,
            change = rx.recv() => match change {
                Some(change) => {
                    if change.previous.is_some() && !change.current.connected {
                        warn!("Tunnel {} went down", controller.interface());
                    }
                }
                None => break,
            },
        }
    }

    poller.stop().await;
    controller.shutdown().await;
    Ok(())
}
