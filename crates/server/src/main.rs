use anyhow::Context as _;
use clap::Parser as _;
use codemode_mcp_server::{CodeModeApp, Config, router, serve, shutdown_on_signal, telemetry};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::parse();
    telemetry::init(&config.log_level, config.log_format);

    info!("Starting {} v{}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"));

    let app = match CodeModeApp::bootstrap(&config).await {
        Ok(app) => Arc::new(app),
        Err(e) => {
            error!("{e}");
            return Err(e).context("startup failed");
        }
    };

    let addr = config.bind_addr();
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("bind {addr}"))?;

    let shutdown = CancellationToken::new();
    tokio::spawn(shutdown_on_signal(shutdown.clone()));

    serve(listener, router(app, config.stateless), shutdown)
        .await
        .context("server error")?;

    info!("server stopped");
    Ok(())
}
