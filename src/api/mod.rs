pub mod routes;

use crate::config::Config;
use anyhow::{Context, Result};
use axum::Router;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;

pub async fn run_server(config: Arc<Config>) -> Result<()> {
    let ip = config
        .bind_address
        .parse::<IpAddr>()
        .with_context(|| format!("Invalid bind address: {}", config.bind_address))?;
    let addr = SocketAddr::from((ip, config.api_port));

    let state = routes::ApiState { config };
    let app: Router = routes::router(state);

    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind API server: {addr}"))?;

    info!(address = %addr, "visitor ledger listening");

    axum::serve(listener, app)
        .await
        .context("API server failed")?;

    Ok(())
}
