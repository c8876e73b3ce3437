#![forbid(unsafe_code)]

use anyhow::{Context, Result};
use clap::Parser;
use gameshare_signal::{serve, shutdown_signal, AppState, ServerConfig};
use tokio::net::TcpListener;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    let config = ServerConfig::parse();

    gameshare_common::init_tracing_with_default(&format!(
        "{},tower_http=info,hyper=warn",
        config.log_level
    ));
    config.validate()?;

    info!("Starting gameshare-signal v{}", env!("CARGO_PKG_VERSION"));

    let addr = config.bind_addr();
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;

    serve(listener, AppState::new(config), shutdown_signal()).await?;

    info!("server closed");
    Ok(())
}
