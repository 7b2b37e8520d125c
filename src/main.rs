use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use turnstile::config::{LogFormat, LoggingConfig, StoreBackend, TurnstileConfig};
use turnstile::http::HttpServer;
use turnstile::ratelimit::AdmissionGate;
use turnstile::store::{CounterStore, MemoryStore, RedisStore};

/// Distributed fixed-window rate limiting gate.
#[derive(Parser, Debug)]
#[command(name = "turnstile", version, about)]
struct Args {
    /// YAML configuration file; environment variables override it
    #[arg(short, long, env = "TURNSTILE_CONFIG")]
    config: Option<PathBuf>,

    /// Listen address, overriding the configuration
    #[arg(short, long)]
    listen: Option<SocketAddr>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // A missing .env file is fine.
    let _ = dotenvy::dotenv();

    let args = Args::parse();

    let mut config = TurnstileConfig::load(args.config.as_deref())?;
    if let Some(listen) = args.listen {
        config.server.listen_addr = listen;
    }

    init_tracing(&config.logging);

    info!("Starting Turnstile rate limiting service");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));
    info!(
        listen_addr = %config.server.listen_addr,
        backend = ?config.store.backend,
        limit = config.rate_limiting.limit,
        window_seconds = config.rate_limiting.window_seconds,
        exempt = ?config.rate_limiting.exempt_path_prefixes,
        "Configuration loaded"
    );

    match config.store.backend {
        StoreBackend::Redis => {
            let store = Arc::new(RedisStore::open(&config.store)?);
            info!(addr = %store.addr(), "Redis counter store configured");

            run(&config, store.clone()).await?;

            // The server has dropped its handles by now.
            match Arc::try_unwrap(store) {
                Ok(store) => store.shutdown().await,
                Err(_) => warn!("Redis store still referenced at shutdown"),
            }
        }
        StoreBackend::Memory => {
            warn!("Using in-memory counter store; quotas are not shared between instances");
            // Sweep expired counters about once per window.
            let store = MemoryStore::new().with_purge_interval(Duration::from_secs(
                config.rate_limiting.window_seconds,
            ));
            run(&config, Arc::new(store)).await?;
        }
    }

    info!("Turnstile rate limiting service stopped");
    Ok(())
}

async fn run<S: CounterStore + 'static>(config: &TurnstileConfig, store: Arc<S>) -> anyhow::Result<()> {
    let gate = AdmissionGate::new(store, config.rate_limiting.clone())?
        .with_store_timeout(config.store.timeout());
    info!("Admission gate initialized");

    if let Err(e) = gate.check_store().await {
        warn!(error = %e, "Counter store unreachable at startup; requests will be allowed until it recovers");
    }

    let server = HttpServer::new(config.server.listen_addr, Arc::new(gate));

    // Run the server with graceful shutdown on Ctrl+C
    server.serve_with_shutdown(shutdown_signal()).await?;
    Ok(())
}

fn init_tracing(logging: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&logging.level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(true);

    match logging.format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
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
