//! Standalone wire server backed by the in-process function catalog
//!
//! Usage: `duckdb-pgwire [config.json]`
//!
//! Without a file the configuration comes from defaults and `PGWIRE_*`
//! environment variables. Logging is controlled with `RUST_LOG`.

use duckdb_pgwire::catalog::Catalog;
use duckdb_pgwire::{Extension, Server, ServerConfig};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    let config = match std::env::args().nth(1) {
        Some(path) => ServerConfig::load(path),
        None => ServerConfig::from_env(),
    };
    let config = match config {
        Ok(config) => config,
        Err(e) => {
            eprintln!("duckdb-pgwire: {}", e);
            std::process::exit(2);
        }
    };

    if let Err(e) = init_logging(&config) {
        eprintln!("duckdb-pgwire: {}", e);
        std::process::exit(2);
    }

    if let Err(e) = run(config).await {
        tracing::error!("{}", e);
        std::process::exit(1);
    }
}

async fn run(config: ServerConfig) -> duckdb_pgwire::Result<()> {
    let catalog = Arc::new(Catalog::new());
    let report = Extension::new(config.clone()).register(&catalog)?;
    tracing::debug!(functions = ?report.registered, "catalog ready");

    let server = Server::new(config, catalog)?;
    let shutdown = server.shutdown_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("received ctrl-c, shutting down");
            shutdown.cancel();
        }
    });

    server.run().await
}

fn init_logging(config: &ServerConfig) -> duckdb_pgwire::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(false);

    match &config.log_file {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .map_err(|e| {
                    duckdb_pgwire::Error::Config(format!(
                        "failed to open log file '{}': {}",
                        path.display(),
                        e
                    ))
                })?;
            builder
                .with_ansi(false)
                .with_writer(std::sync::Mutex::new(file))
                .init();
        }
        None => builder.with_writer(std::io::stderr).init(),
    }
    Ok(())
}
