//! Orchestrator server binary
//!
//! Serves the task API, resumes non-terminal tasks found in the store and,
//! when configured, probes arm capabilities on an interval. An in-process
//! reflex tier gets its store janitor here too.

use anyhow::Context;
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use orchestrator::api::{router_with_state, AppState};
use orchestrator::client::ArmClient;
use orchestrator::config::OrchestratorConfig;
use orchestrator::router::ArmRegistry;
use orchestrator::Engine;
use tooling::logging::init_logging;

#[derive(Debug, Parser)]
#[command(name = "orchestrator-server", version, about = "Task orchestration API")]
struct Args {
    /// Config file (TOML)
    #[arg(long, env = "CONFIG_PATH")]
    config: Option<PathBuf>,

    /// Listen address, overrides `server.bind`
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
        None => config.server.bind.parse().context("parsing server.bind")?,
    };
    tracing::info!(name = %config.server.name, database = %config.database.url, "Starting orchestrator");

    let engine = Engine::from_config(&config).await.context("building engine")?;
    let resumed = engine.recover().await.context("recovering tasks")?;
    if resumed > 0 {
        tracing::info!(resumed, "Resumed non-terminal tasks");
    }

    let shutdown = CancellationToken::new();
    if config.arms.refresh_interval_seconds > 0 {
        tokio::spawn(refresh_loop(
            Arc::clone(engine.registry()),
            Arc::clone(engine.arm_client()),
            Duration::from_secs(config.arms.refresh_interval_seconds),
            shutdown.clone(),
        ));
    }

    if let (Some(pipeline), Some(every)) = (engine.reflex().local_pipeline(), config.reflex.purge_interval()) {
        pipeline.spawn_janitor(every, shutdown.clone());
    }

    let app = router_with_state(AppState {
        engine: engine.clone(),
        trust_forwarded_for: config.reflex.trust_forwarded_for,
    });
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {}", addr))?;
    tracing::info!("Orchestrator listening on {}", addr);

    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    shutdown.cancel();
    engine.database().close().await;
    tracing::info!("Orchestrator server shut down gracefully");
    Ok(())
}

async fn refresh_loop(
    registry: Arc<ArmRegistry>,
    client: Arc<dyn ArmClient>,
    every: Duration,
    shutdown: CancellationToken,
) {
    let mut ticker = tokio::time::interval(every);
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => return,
            _ = ticker.tick() => {
                let healthy = registry.refresh(client.as_ref()).await;
                tracing::debug!(healthy, total = registry.len(), "Arm registry refreshed");
            }
        }
    }
}

/// Resolves on Ctrl-C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received Ctrl-C, shutting down"),
        _ = terminate => tracing::info!("Received SIGTERM, shutting down"),
    }
}
