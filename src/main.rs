use std::path::PathBuf;

use fundguard::config::{load_config, CONFIG_PATH_ENV};
use fundguard::lifecycle::{spawn_signal_handler, Guard, Shutdown};
use fundguard::observability::{logging, metrics};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let path = std::env::var_os(CONFIG_PATH_ENV).map(PathBuf::from);
    let config = match load_config(path.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("fundguard: {e}");
            std::process::exit(1);
        }
    };

    logging::init_tracing(&config.observability)?;
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "fundguard starting");
    tracing::info!(
        bind_address = %config.listener.bind_address,
        upstream = %config.upstream.address,
        backend = ?config.sinks.backend,
        admin_enabled = config.admin.enabled,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr)?,
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let shutdown = Shutdown::new();
    let guard = match Guard::open(config, &shutdown) {
        Ok(guard) => guard,
        Err(e) => {
            tracing::error!(error = %e, "Startup failed");
            std::process::exit(1);
        }
    };

    spawn_signal_handler(shutdown.clone());
    guard.run(&shutdown).await?;
    Ok(())
}
