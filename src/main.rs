//! gedis server entry point.
//!
//! Sets up logging, the store and its reaper, then runs the connection
//! supervisor until Ctrl-C or SIGTERM.

use clap::Parser;
use gedis::config::Config;
use gedis::server::Server;
use gedis::storage::{Reaper, Store};
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

fn print_banner(config: &Config) {
    println!(
        r#"
gedis v{} - in-memory key-value server
──────────────────────────────────────
Listening on {}
Use Ctrl+C to shut down.
"#,
        gedis::VERSION,
        config.bind_address()
    );
}

/// Completes on Ctrl-C, or on SIGTERM where available.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
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
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    info!("Shutdown signal received, stopping server...");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config.log_directive())),
        )
        .with_target(false)
        .init();

    // Shared by every connection; torn down after the server stops
    let store = Arc::new(Store::new());
    let reaper = Reaper::start(Arc::clone(&store), config.reaper_config());

    let server = Server::bind(config.bind_address(), Arc::clone(&store)).await?;
    let stats = server.stats();
    info!(addr = %server.local_addr()?, "Listening");
    print_banner(&config);

    server.run(shutdown_signal()).await;

    reaper.shutdown().await;

    let conn = stats.snapshot();
    let store_stats = store.stats();
    info!(
        connections = conn.connections_accepted,
        commands = conn.commands_processed,
        protocol_errors = conn.protocol_errors,
        bytes_read = conn.bytes_read,
        bytes_written = conn.bytes_written,
        keys = store_stats.keys,
        expired = store_stats.expired,
        "Server shutdown complete"
    );
    Ok(())
}
