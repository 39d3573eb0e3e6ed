#![warn(clippy::all, clippy::pedantic)]

mod cli;

use anyhow::Result;
use clap::Parser;
use cli::{Cli, Commands};
use std::time::Duration;
use tidechat::completion::CompletionClient;
use tidechat::config::Config;
use tidechat::gateway;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() -> Result<()> {
    // Install default crypto provider for rustls TLS so reqwest and lettre
    // agree on one instead of failing at the first handshake.
    if let Err(error) = rustls::crypto::ring::default_provider().install_default() {
        eprintln!("Warning: failed to install default crypto provider: {error:?}");
    }

    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let cli = Cli::parse();
    let mut config = Config::load(&cli.config)?;

    match cli.command {
        Commands::Serve { port, host } => {
            if let Some(port) = port {
                config.gateway.port = port;
            }
            if let Some(host) = host {
                config.gateway.host = host;
            }
            gateway::run_gateway(config).await
        }
        Commands::Poll => run_poll_loop(config).await,
        Commands::Check => run_check(&config).await,
    }
}

/// Drive the relay cursor in a loop for deployments where the webhook cannot
/// be exposed publicly.
async fn run_poll_loop(config: Config) -> Result<()> {
    let state = gateway::build_state(&config)?;
    if !state.router.relay_is_configured() {
        anyhow::bail!("relay bot token and channel id must be configured for polling");
    }

    let interval = Duration::from_secs(config.relay.poll_interval_secs.max(1));
    tracing::info!(interval_secs = interval.as_secs(), "relay polling started");

    let mut ticker = tokio::time::interval(interval);
    loop {
        ticker.tick().await;
        match state.router.poll_relay_once().await {
            Ok(0) => {}
            Ok(enqueued) => tracing::info!(enqueued, "queued operator replies"),
            Err(error) => tracing::warn!("relay poll failed: {error}"),
        }
    }
}

async fn run_check(config: &Config) -> Result<()> {
    let client = CompletionClient::new(&config.completion);
    if client.has_api_key() {
        match client.verify_key().await {
            Ok(()) => println!("✓ OpenAI API key is valid"),
            Err(error) => println!("✗ OpenAI API key check failed: {error}"),
        }
    } else {
        println!("✗ OpenAI API key is not configured");
    }

    if config.relay.bot_token.is_some() && config.relay.channel_id.is_some() {
        println!("✓ Telegram relay is configured");
    } else {
        println!("- Telegram relay is not configured (hand-off disabled)");
    }

    if config.mail.transcript_to.is_some() {
        println!("✓ Transcript destination is configured");
    } else {
        println!("- Transcript destination is not configured");
    }

    Ok(())
}
