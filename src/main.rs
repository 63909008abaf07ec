use clap::Parser;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use ratekeeper::config::{LoggingConfig, RatekeeperConfig};
use ratekeeper::http::{router, ClientKeys, HttpServer, RateLimitState, RouteTable};
use ratekeeper::ratelimit::{RateLimitManager, SystemClock};

#[derive(Parser, Debug)]
#[command(name = "ratekeeper", version, about = "Rate limiting service")]
struct Args {
    /// YAML configuration file
    #[arg(short, long)]
    config: Option<String>,

    /// Override the HTTP listen address
    #[arg(long)]
    http_addr: Option<SocketAddr>,

    /// Emit logs as JSON lines
    #[arg(long)]
    log_json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = RatekeeperConfig::load(args.config.as_deref())?;
    if let Some(addr) = args.http_addr {
        config.server.http_addr = addr;
    }
    if args.log_json {
        config.logging.json = true;
    }

    init_tracing(&config.logging);

    info!("Starting Ratekeeper Rate Limiting Service");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));
    info!(
        http_addr = %config.server.http_addr,
        storage_type = %config.rate_limiting.storage_type,
        failure_mode = ?config.rate_limiting.failure_mode,
        "Configuration loaded"
    );

    let manager = Arc::new(RateLimitManager::from_config(
        &config.rate_limiting,
        Arc::new(SystemClock),
    )?);
    let sweepers = manager.spawn_sweepers();
    info!(buckets = manager.buckets().len(), "Rate limit manager initialized");

    if !config.rate_limiting.enabled {
        warn!("Rate limiting is disabled, admin routes will not be limited");
    }
    let keys = ClientKeys::from_config(&config.rate_limiting)?;
    if config.rate_limiting.trusted_proxy_headers.is_empty() {
        info!("No trusted proxy headers, clients are keyed by peer address");
    }
    let admin = config.server.admin_enabled.then(|| {
        let state = RateLimitState::new(
            manager.clone(),
            RouteTable::new(config.rate_limiting.routes.clone()),
        )
        .client_keys(keys);
        if config.rate_limiting.enabled {
            state
        } else {
            state.disabled()
        }
    });

    let server = HttpServer::new(config.server.http_addr, router(manager, admin));
    server.serve_with_shutdown(shutdown_signal()).await?;

    for sweeper in sweepers {
        sweeper.abort();
    }

    info!("Ratekeeper Rate Limiting Service stopped");
    Ok(())
}

fn init_tracing(logging: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&logging.level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(true);

    if logging.json {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Wait for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
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
