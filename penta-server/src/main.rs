use anyhow::{Context, Result};
use clap::Parser;
use penta_core::build_backend;
use penta_server::{app, config::Args, AppState};
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    let backend = build_backend(&args.backend_config()).context("failed to configure backend")?;
    if args.eager_load {
        info!(backend = backend.name(), "loading backend at startup");
        // A failure here is not fatal; requests report the backend as unavailable.
        if let Err(e) = backend.warm_up().await {
            warn!(backend = backend.name(), "startup load failed: {e}");
        }
    }

    let app = app(AppState(backend));

    let bind_address = args.bind_address();
    let listener = TcpListener::bind(&bind_address)
        .await
        .with_context(|| format!("failed to bind {bind_address}"))?;
    info!("started server on {}", listener.local_addr()?);
    axum::serve(listener, app.into_make_service()).await?;

    Ok(())
}
