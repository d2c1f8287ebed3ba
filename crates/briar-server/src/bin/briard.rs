//! The briardb server daemon.
//!
//! ```bash
//! # Start with defaults (port 5433, ./data)
//! briard
//!
//! # Custom data directory and port
//! briard --data-dir /var/lib/briardb --port 6000
//! ```
//!
//! An orderly shutdown is triggered by a client sending `SHUTDOWN;`. The
//! process exits non-zero on unrecoverable startup failure (bad port, bad
//! catalog).

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use briar_common::constants::{DEFAULT_CHECKPOINT_THRESHOLD, DEFAULT_PORT};
use briar_common::DatabaseConfig;
use briar_server::Server;

/// briardb server daemon
#[derive(Parser, Debug)]
#[command(name = "briard", version, about = "briardb database server")]
struct Args {
    /// Host address to bind to
    #[arg(short = 'H', long, default_value = "127.0.0.1", env = "BRIAR_HOST")]
    host: String,

    /// Port to listen on
    #[arg(short, long, default_value_t = DEFAULT_PORT, env = "BRIAR_PORT")]
    port: u16,

    /// Data directory for persistent storage
    #[arg(short, long, default_value = "data", env = "BRIAR_DATA_DIR")]
    data_dir: PathBuf,

    /// WRITE records between checkpoints
    #[arg(long, default_value_t = DEFAULT_CHECKPOINT_THRESHOLD)]
    checkpoint_threshold: usize,

    /// Maximum number of concurrent sessions
    #[arg(long, default_value_t = 64, env = "BRIAR_MAX_CONNECTIONS")]
    max_connections: usize,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info", env = "BRIAR_LOG_LEVEL")]
    log_level: String,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let filter = EnvFilter::try_new(format!(
        "briar_server={level},briar_engine={level},briar_storage={level},\
         briar_cc={level},briar_wal={level},briar_optimizer={level}",
        level = args.log_level
    ))
    .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();

    let config = DatabaseConfig {
        data_dir: args.data_dir,
        checkpoint_threshold: args.checkpoint_threshold,
        host: args.host,
        port: args.port,
        max_connections: args.max_connections,
    };

    info!("briardb {} starting", env!("CARGO_PKG_VERSION"));
    info!("  data directory: {}", config.data_dir.display());
    info!("  listen address: {}:{}", config.host, config.port);
    info!("  checkpoint threshold: {}", config.checkpoint_threshold);

    let server = Arc::new(Server::open(config).context("failed to open database")?);
    let handle = server.start().context("failed to bind listener")?;

    info!("ready; send SHUTDOWN; from a client for an orderly stop");
    handle.wait();

    info!("server stopped");
    Ok(())
}
