use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use skylift::clock::SystemClock;
use skylift::db::Database;
use skylift::services::CoreServices;
use skylift::supervisor::Supervisor;
use skylift::uploader::FsBlobStore;

#[derive(Parser, Debug)]
#[command(author, version, about = "Folder-to-blob-store upload service")]
struct Args {
    /// Path to the embedded database file.
    #[arg(short = 'd', long = "database", default_value = "data/skylift.db")]
    database: PathBuf,

    /// Root directory of the filesystem blob store backend.
    #[arg(long = "blob-root", default_value = "data/blobs")]
    blob_root: PathBuf,

    /// Optional JSON file with bootstrap configuration defaults.
    /// Existing configuration rows are never overwritten.
    #[arg(long = "seed-file")]
    seed_file: Option<PathBuf>,
}

fn run(args: Args) -> skylift::Result<()> {
    let db = Database::open(&args.database)?;

    let services = CoreServices::new(
        db,
        Arc::new(FsBlobStore::new(&args.blob_root)),
        Arc::new(SystemClock),
    );

    if let Some(seed_file) = &args.seed_file {
        services.config.seed_from_file(seed_file)?;
    }

    let mut supervisor = Supervisor::new(services);

    let shutdown = supervisor.shutdown_handle();
    ctrlc::set_handler(move || {
        info!("Shutdown signal received");
        shutdown.store(true, Ordering::Relaxed);
    })
    .map_err(|e| skylift::error::ConfigError::Validation {
        message: format!("failed to install signal handler: {e}"),
    })?;

    supervisor.run()
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("skylift=info")),
        )
        .init();

    let args = Args::parse();
    info!(
        "Starting skylift (database: {}, blob root: {})",
        args.database.display(),
        args.blob_root.display()
    );

    if let Err(e) = run(args) {
        // Startup failures (schema migration, unreadable database) are
        // the only errors that escape this far.
        error!("Fatal: {}", e);
        std::process::exit(1);
    }
}
