//! WireGuard Provisioning Server
//!
//! Authenticates users and hands each one a ready-to-use client
//! configuration pointing at the configured server.

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

mod auth;
mod handlers;
mod settings;
mod users;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use wgkit_engine::KeyPairProvider;
use wgkit_provision::{AddressAllocator, ProvisioningService, ServerDescriptor};

use crate::auth::JwtKeys;
use crate::handlers::AppState;
use crate::settings::Settings;
use crate::users::{User, UserStore};

#[derive(Debug, Parser)]
#[command(name = "wgkit-server", version, about = "Hand out WireGuard client configurations")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Serve the provisioning API (the default)
    Serve,
    /// Hash a password and print a users.json entry for it
    HashPassword {
        /// Password to hash
        #[arg(env = "WGKIT_NEW_PASSWORD", hide_env_values = true)]
        password: String,

        /// Account email
        #[arg(long, default_value = "demo@vpn.com")]
        email: String,

        /// Account id
        #[arg(long, default_value_t = 1)]
        id: u64,

        /// bcrypt cost factor
        #[arg(long, default_value_t = 10)]
        cost: u32,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    match Cli::parse().command.unwrap_or(Command::Serve) {
        Command::Serve => serve().await,
        Command::HashPassword {
            password,
            email,
            id,
            cost,
        } => {
            print!("{}", hash_password(id, &email, &password, cost)?);
            Ok(())
        }
    }
}

/// The hash plus a `users.json` document containing the new account
fn hash_password(id: u64, email: &str, password: &str, cost: u32) -> Result<String> {
    let user = User::with_password(id, email, password, cost).context("hashing password")?;
    Ok(format!(
        "Hashed password: {}\n\nusers.json entry:\n{}\n",
        user.password_hash,
        users::users_json(std::slice::from_ref(&user))?
    ))
}

async fn serve() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "wgkit_server=debug,wgkit_provision=info,tower_http=debug".into()),
        )
        .init();

    let settings = Settings::from_env()?;
    if settings.uses_default_secret() {
        tracing::warn!("JWT_SECRET is not set; using the built-in default. Set it before deploying.");
    }

    let users = match UserStore::load(&settings.users_file) {
        Ok(users) => users,
        Err(e) => {
            tracing::error!("{} ({}); nobody can log in", e, settings.users_file.display());
            UserStore::default()
        }
    };

    let server = ServerDescriptor::load(&settings.server_config_file)
        .with_context(|| format!("loading {}", settings.server_config_file.display()))?;

    let provisioning = ProvisioningService::new(
        server,
        AddressAllocator::new(settings.address_pool),
        KeyPairProvider::system(),
    );

    let state = Arc::new(AppState {
        provisioning,
        users,
        jwt: JwtKeys::new(settings.jwt_secret.as_bytes()),
    });

    let app = handlers::router(state.clone());

    let addr = settings.socket_addr()?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {}", addr))?;

    tracing::info!("Server listening on http://{}", addr);
    tracing::info!("Loaded users: {}", state.users.len());
    tracing::info!("Address pool: {}", settings.address_pool);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Server stopped");
    Ok(())
}

/// Resolve on Ctrl-C, or on SIGTERM where available
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        if let Ok(mut sigterm) = signal(SignalKind::terminate()) {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = sigterm.recv() => {}
            }
            tracing::info!("Shutting down gracefully...");
            return;
        }
    }

    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("Shutting down gracefully...");
}
