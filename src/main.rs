use axum::{http::StatusCode, Router};
use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use tollgate::config::TollgateConfig;
use tollgate::http::{operational_router, Governance, HttpServer};
use tollgate::metrics::MetricsAggregator;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogFormat {
    Pretty,
    Json,
}

/// Multi-tier request governance service.
#[derive(Debug, Parser)]
#[command(name = "tollgate", version, about)]
struct Args {
    /// Configuration file (YAML); `TOLLGATE__*` environment variables override it
    #[arg(short, long, env = "TOLLGATE_CONFIG")]
    config: Option<PathBuf>,

    /// Log output format
    #[arg(long, value_enum, default_value = "pretty")]
    log_format: LogFormat,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(args.log_format);

    info!("Starting Tollgate request governance");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let config = TollgateConfig::load(args.config.as_deref())?;
    info!(
        http_addr = %config.server.http_addr,
        store = ?config.store.backend,
        "Configuration loaded"
    );

    let store = config.store.connect_store().await?;
    let metrics = Arc::new(MetricsAggregator::with_max_series(config.metrics.max_series));
    let governance = Arc::new(Governance::from_config(&config, store, Arc::clone(&metrics))?);

    let operational = operational_router(
        Arc::clone(governance.limiter()),
        Arc::clone(&metrics),
        &config.metrics.path,
        config.metrics.allow_reset,
    );
    let app = governance
        .layer(Router::new().fallback(not_found))
        .merge(operational);

    HttpServer::new(config.server.http_addr, app)
        .serve_with_shutdown(shutdown_signal())
        .await?;

    info!("Tollgate stopped");
    Ok(())
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(true);

    match format {
        LogFormat::Pretty => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

/// Anything outside the operational endpoints is governed, then not found.
async fn not_found() -> StatusCode {
    StatusCode::NOT_FOUND
}

/// Wait for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown");
        }
    }
}
