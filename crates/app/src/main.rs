mod error;
mod routes;
mod state;

use anyhow::Context;
use chrono::Utc;
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use wordbook_core::{IngestionService, ServiceConfig};

use crate::state::{resolve_text_dir, AppState};

#[derive(Parser)]
#[command(name = "wordbook", version)]
struct Cli {
    /// Address the HTTP server listens on.
    #[arg(long, env = "WORDBOOK_BIND", default_value = "0.0.0.0:5000")]
    bind: SocketAddr,

    /// Folder whose spreadsheets can be loaded.
    #[arg(long, env = "WORDBOOK_SOURCE_DIR", default_value = ".")]
    source_dir: PathBuf,

    /// Folder with `.txt` documents; falls back to the source folder.
    #[arg(long, env = "WORDBOOK_TEXT_DIR", default_value = "./data")]
    text_dir: PathBuf,

    /// Folder for the entry store and the progress file.
    #[arg(long, env = "WORDBOOK_STATE_DIR", default_value = "./.wordbook")]
    state_dir: PathBuf,

    /// Folder served for every non-API path.
    #[arg(long, env = "WORDBOOK_STATIC_DIR", default_value = "./static")]
    static_dir: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let app_version = env!("CARGO_PKG_VERSION");

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(fmt::layer())
        .init();

    let cli = Cli::parse();

    let config = ServiceConfig::new(&cli.source_dir, &cli.state_dir);
    let service = IngestionService::new(config)
        .with_context(|| format!("failed to open state in {}", cli.state_dir.display()))?;
    let text_dir = resolve_text_dir(&cli.text_dir, &cli.source_dir);

    info!(
        version = app_version,
        started_at = %Utc::now().to_rfc3339(),
        bind = %cli.bind,
        source_dir = %cli.source_dir.display(),
        text_dir = %text_dir.display(),
        loaded = service.is_loaded(),
        "wordbook boot"
    );

    let app = routes::router(AppState::new(service.clone(), text_dir), &cli.static_dir);
    let listener = tokio::net::TcpListener::bind(cli.bind)
        .await
        .with_context(|| format!("failed to bind {}", cli.bind))?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    service.shutdown().await;
    info!("wordbook stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(error) = tokio::signal::ctrl_c().await {
        warn!(error = %error, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("shutdown requested");
}
