//! # tether
//!
//! Gateway client binary: loads settings, opens one session and logs every
//! event until Ctrl-C.

#![deny(unsafe_code)]

mod handlers;
mod logging;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tether_gateway::{CATCH_ALL, Dispatcher, GatewaySession, HandlerRegistry, SessionOptions, WsConnector};
use tether_settings::TetherSettings;
use tracing::info;

/// Gateway session client.
#[derive(Parser, Debug)]
#[command(name = "tether", about = "Gateway session client")]
struct Cli {
    /// Settings file (default: `~/.tether/settings.json`).
    #[arg(long)]
    settings: Option<PathBuf>,

    /// Log filter used when `RUST_LOG` is unset.
    #[arg(long)]
    log_level: Option<String>,

    /// Emit logs as JSON lines.
    #[arg(long)]
    log_json: bool,

    /// Authentication token (overrides settings and `TETHER_TOKEN`).
    #[arg(long)]
    token: Option<String>,
}

impl Cli {
    /// Command-line values take precedence over file and environment.
    fn apply(&self, settings: &mut TetherSettings) {
        if let Some(level) = &self.log_level {
            settings.logging.level.clone_from(level);
        }
        if self.log_json {
            settings.logging.json = true;
        }
        if let Some(token) = &self.token {
            settings.gateway.token.clone_from(token);
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();

    let path = args.settings.clone().unwrap_or_else(tether_settings::settings_path);
    let mut settings = tether_settings::load_settings_from_path(&path)
        .with_context(|| format!("Failed to load settings from {}", path.display()))?;
    args.apply(&mut settings);

    logging::init_subscriber(&settings.logging);
    settings.validate().context("Invalid settings")?;

    // Both TLS backends may be compiled in; pick one explicitly.
    let _ = rustls::crypto::ring::default_provider().install_default();

    let mut session = GatewaySession::new(SessionOptions::from_settings(&settings), Arc::new(WsConnector));
    let handle = session.handle();

    let mut registry = HandlerRegistry::new();
    registry.register(CATCH_ALL, Arc::new(handlers::LogEvents));
    let events = session.events().context("Dispatch receiver already taken")?;
    let dispatcher = tokio::spawn(Dispatcher::new(registry, events).run());
    let lifecycle = tokio::spawn(handlers::log_lifecycle(handle.subscribe()));

    info!(url = %settings.gateway.url, intents = settings.gateway.intents, "connecting");
    session.connect().await.context("Failed to open gateway connection")?;
    let mut run = tokio::spawn(async move { session.run().await });

    tokio::select! {
        result = &mut run => {
            result
                .context("Session task panicked")?
                .context("Gateway session ended")?;
        }
        signal = tokio::signal::ctrl_c() => {
            signal.context("Failed to listen for ctrl-c")?;
            info!("Shutting down...");
            handle.close().await.context("Failed to close session")?;
            let _ = run.await;
        }
    }

    let _ = dispatcher.await;
    lifecycle.abort();
    Ok(())
}
