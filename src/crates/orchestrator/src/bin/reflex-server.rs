//! Standalone reflex tier
//!
//! Serves `POST /preprocess`, `GET /health` and `GET /metrics` from the
//! `[reflex]` section of the shared config file.

use anyhow::Context;
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use orchestrator::api::middleware::logging_layer;
use orchestrator::config::OrchestratorConfig;
use reflex::ReflexPipeline;
use tooling::logging::init_logging;

#[derive(Debug, Parser)]
#[command(name = "reflex-server", version, about = "PII and prompt-injection screening service")]
struct Args {
    /// Config file (TOML)
    #[arg(long, env = "CONFIG_PATH")]
    config: Option<PathBuf>,

    /// Listen address, overrides `server.reflex_bind`
    #[arg(long)]
    bind: Option<SocketAddr>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = OrchestratorConfig::load(args.config.as_deref()).context("loading configuration")?;
    init_logging(config.logging.format, &config.logging.level).context("initializing logging")?;

    let addr: SocketAddr = match args.bind {
        Some(addr) => addr,
        None => config.server.reflex_bind.parse().context("parsing server.reflex_bind")?,
    };

    let pipeline = ReflexPipeline::from_config(config.reflex.clone())
        .await
        .context("building reflex pipeline")?;
    let shutdown = CancellationToken::new();
    if let Some(every) = config.reflex.purge_interval() {
        pipeline.spawn_janitor(every, shutdown.clone());
    }
    let app = reflex::http::router(Arc::new(pipeline), config.reflex.trust_forwarded_for).layer(logging_layer());

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {}", addr))?;
    tracing::info!("Reflex tier listening on {}", addr);

    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(async {
            match tokio::signal::ctrl_c().await {
                Ok(()) => tracing::info!("Received Ctrl-C, shutting down"),
                Err(e) => {
                    tracing::error!("Failed to listen for Ctrl-C: {}", e);
                    std::future::pending::<()>().await
                }
            }
        })
        .await?;

    shutdown.cancel();
    Ok(())
}
