//! portal-guard server
//!
//! Serves CSRF token issuance and validation plus latency reporting over HTTP.

use clap::{Arg, ArgMatches, Command};
use portal_guard::core::config::StoreBackend;
use portal_guard::core::logging::init_logging;
use portal_guard::core::{create_app_state, Config};
use portal_guard::Error;
use tokio::signal;
use tracing::{info, warn};

// Configure global allocator for maximum performance
#[global_allocator]
static GLOBAL: jemallocator::Jemalloc = jemallocator::Jemalloc;

fn main() -> anyhow::Result<()> {
    let matches = Command::new("portal-guard")
        .version(portal_guard::VERSION)
        .about("CSRF token and request performance service.")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("Configuration file path"),
        )
        .arg(
            Arg::new("http-addr")
                .long("http-addr")
                .value_name("ADDR")
                .help("HTTP server bind address"),
        )
        .arg(
            Arg::new("workers")
                .long("workers")
                .value_name("N")
                .help("Number of worker threads"),
        )
        .arg(
            Arg::new("log-level")
                .long("log-level")
                .value_name("LEVEL")
                .help("Log level (trace, debug, info, warn, error)"),
        )
        .arg(
            Arg::new("store")
                .long("store")
                .value_name("BACKEND")
                .help("Token and metrics store (memory, redis)"),
        )
        .arg(
            Arg::new("redis-url")
                .long("redis-url")
                .value_name("URL")
                .help("Redis connection URL for the redis store"),
        )
        .get_matches();

    // Load configuration
    let mut config = match matches.get_one::<String>("config") {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };

    apply_cli_overrides(&mut config, &matches)?;
    config.validate()?;

    init_logging(&config.logging);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(config.optimal_worker_threads())
        .enable_all()
        .build()?;

    runtime.block_on(run(config))
}

async fn run(config: Config) -> anyhow::Result<()> {
    info!("Starting portal-guard v{}", portal_guard::VERSION);
    info!(
        environment = %config.server.environment,
        store = ?config.storage.backend,
        workers = config.optimal_worker_threads(),
        "configuration loaded"
    );

    let configured = create_app_state(config)?;

    tokio::select! {
        result = portal_guard::api::start_api_server(configured) => {
            result?;
        }
        _ = shutdown_signal() => {
            warn!("Received shutdown signal, initiating graceful shutdown...");
        }
    }

    info!("Shutdown complete");
    Ok(())
}

/// Apply command line argument overrides to configuration
fn apply_cli_overrides(config: &mut Config, matches: &ArgMatches) -> portal_guard::Result<()> {
    if let Some(addr) = matches.get_one::<String>("http-addr") {
        config.server.http_addr = addr
            .parse()
            .map_err(|e| Error::config(format!("Invalid HTTP address: {}", e)))?;
    }

    if let Some(workers) = matches.get_one::<String>("workers") {
        config.server.worker_threads = workers
            .parse()
            .map_err(|e| Error::config(format!("Invalid worker count: {}", e)))?;
    }

    if let Some(level) = matches.get_one::<String>("log-level") {
        config.logging.level = level.clone();
    }

    if let Some(store) = matches.get_one::<String>("store") {
        config.storage.backend = match store.as_str() {
            "memory" => StoreBackend::Memory,
            "redis" => StoreBackend::Redis,
            _ => {
                return Err(Error::config(format!(
                    "Invalid store: {}. Valid options: memory, redis",
                    store
                )))
            }
        };
    }

    if let Some(url) = matches.get_one::<String>("redis-url") {
        config.storage.redis_url = Some(url.clone());
    }

    Ok(())
}

/// Resolves on Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        },
        _ = terminate => {
            info!("Received terminate signal");
        },
    }
}
