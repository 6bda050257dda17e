use anyhow::Context;
use clap::Parser;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;

use base_gateway::{open_engine, router, BackendApplication, EchoBackend, GatewayConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = GatewayConfig::parse();
    base_common::init_tracing_with_default(&config.log_level);
    config.validate()?;

    let backend = Arc::new(EchoBackend::new());
    let application = Arc::new(BackendApplication::new(backend));

    let engine = open_engine(&config.data_dir, config.settings(), application)
        .await
        .with_context(|| {
            format!(
                "failed to load gateway identity from {}",
                config.data_dir.display()
            )
        })?;

    let app = router(engine);

    let listener = TcpListener::bind(config.listen)
        .await
        .with_context(|| format!("failed to bind {}", config.listen))?;
    info!("base gateway listening on {}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_ok() {
        info!("shutdown requested");
    }
}
