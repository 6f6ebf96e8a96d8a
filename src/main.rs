//! expr-bridge server binary.
//!
//! Loads configuration, builds the tool registry and dispatcher, and
//! serves JSON-RPC over the configured Unix socket until interrupted.

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use expr_bridge::config::BridgeConfig;
use expr_bridge::dispatch::Dispatcher;
use expr_bridge::registry::ToolRegistry;
use expr_bridge::rpc::BridgeServer;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            tracing_subscriber::EnvFilter::new("expr_bridge=info")
        }))
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    let config = Arc::new(BridgeConfig::load().context("failed to load configuration")?);
    info!(
        engine = %config.resolved_engine_path().display(),
        timeout_secs = config.timeout_secs,
        max_concurrent = config.max_concurrent,
        "starting expr-bridge"
    );

    let registry = Arc::new(ToolRegistry::builtin());
    info!("registered {} tools", registry.len());

    let dispatcher = Arc::new(Dispatcher::new(registry, Arc::clone(&config)));
    let server = BridgeServer::bind(&config.socket_path, dispatcher)
        .context("failed to bind bridge socket")?;
    let socket_path = server.socket_path().to_path_buf();

    tokio::select! {
        result = server.run() => {
            result.context("server accept loop failed")?;
        }
        _ = tokio::signal::ctrl_c() => {
            info!("shutting down");
        }
    }

    // Leave no stale socket behind for the next start.
    let _ = std::fs::remove_file(&socket_path);
    Ok(())
}
