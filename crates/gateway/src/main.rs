//! Mnemon gateway: the conversational core of a memory-augmented
//! assistant, served over a WebSocket chat channel.

mod api;
mod auth;
mod bootstrap;
mod runtime;
mod state;

use std::path::PathBuf;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use mnemon_domain::config::Config;

#[derive(Parser, Debug)]
#[command(name = "mnemon-gateway", about = "Memory-augmented assistant gateway")]
struct Cli {
    /// Path to the toml config file.
    #[arg(long, default_value = "config/mnemon.toml")]
    config: PathBuf,

    /// Print a session token for a user id, then exit.
    #[arg(long)]
    mint_token: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = Config::load(&cli.config)?;

    if let Some(user_id) = cli.mint_token {
        let auth = auth::AuthVerifier::from_env(&config.server.auth_secret_env)?;
        println!("{}", auth.mint(&user_id));
        return Ok(());
    }

    let state = bootstrap::build(config).await?;
    let bind = state.config.server.bind.clone();
    let connections = state.connections.clone();

    let router = api::router(state);
    let listener = tokio::net::TcpListener::bind(&bind).await?;
    tracing::info!(%bind, "gateway listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            // Tell every live session before the listener stops.
            connections.shutdown_all();
        })
        .await?;

    tracing::info!("gateway stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("install ctrl-c handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("install SIGTERM handler")
            .recv()
            .await;
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("shutdown signal received");
}
