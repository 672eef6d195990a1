//! Chat Relay server entry point

use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use chat_relay::api::create_router;
use chat_relay::models::settings::LoggingConfig;
use chat_relay::state::AppState;
use chat_relay::storage::ConfigService;

#[derive(Parser)]
#[command(name = "chat-relay", about = "Streaming chat completion relay", version)]
struct Cli {
    /// Path to the TOML config file
    #[arg(long, env = "CHAT_RELAY_CONFIG")]
    config: Option<PathBuf>,

    /// Listen address, overriding `server.bind`
    #[arg(long, env = "CHAT_RELAY_BIND")]
    bind: Option<SocketAddr>,
}

fn init_tracing(logging: &LoggingConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);
    if logging.json {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("failed to listen for ctrl-c: {e}");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown requested");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = ConfigService::load(cli.config.as_deref())
        .context("failed to load config")?
        .into_config();
    init_tracing(&config.logging);

    let addr = match cli.bind {
        Some(addr) => addr,
        None => config
            .server
            .bind
            .parse()
            .with_context(|| format!("invalid bind address {}", config.server.bind))?,
    };
    tracing::info!(
        %addr,
        backends = config.backends.len(),
        asr = config.asr.url.is_some(),
        "chat-relay starting"
    );

    let state = AppState::from_config(&config).context("failed to initialise services")?;
    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind to {addr}"))?;
    tracing::info!(%addr, "chat-relay listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;
    Ok(())
}
