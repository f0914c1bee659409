//! gpkg_featureserv server binary.
//!
//! Serves the spatial tables of a GeoPackage as OGC API Features.

use clap::Parser;
use gpkg_featureserv::catalog::{DbCatalog, TableFilter};
use gpkg_featureserv::config::Config;
use gpkg_featureserv::pool::{ConnectionPool, DataSource};
use gpkg_featureserv::server::{AppState, serve};
use gpkg_featureserv::{Error, Result, logging, mock};
use std::path::PathBuf;
use std::sync::Arc;

/// Serve GeoPackage tables as OGC API Features
#[derive(Parser, Debug)]
#[command(name = "gpkg_featureserv")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Configuration file (TOML)
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log at debug level
    #[arg(short, long)]
    debug: bool,

    /// GeoPackage to serve; overrides Database.DatabasePath
    #[arg(long, value_name = "FILE")]
    database_path: Option<PathBuf>,

    /// Serve a built-in mock dataset
    #[arg(short, long)]
    test: bool,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    if let Err(err) = run(cli).await {
        eprintln!("gpkg_featureserv failed: {err}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let mut config = Config::load(cli.config.as_deref())?;
    if let Some(path) = cli.database_path {
        config.database.database_path = Some(path);
    }
    config.server.debug |= cli.debug;
    config.validate()?;

    logging::init(config.server.debug);
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "starting gpkg_featureserv");
    tracing::debug!(?config, "effective configuration");

    // the mock database lives as long as this handle
    let (_mock, source) = if cli.test {
        let gpkg = mock::seed(mock::MOCK_DATABASE)?;
        (Some(gpkg), DataSource::SharedMemory(mock::MOCK_DATABASE.to_string()))
    } else {
        let path = config.database.database_path.clone().ok_or_else(|| {
            Error::Config(
                "no database given: use --database-path, Database.DatabasePath \
                 or GPKGFS_DATABASE_DATABASEPATH"
                    .to_string(),
            )
        })?;
        (None, DataSource::File(path))
    };

    let pool = ConnectionPool::new(
        source,
        config.database.attach.clone(),
        config.database.pool_size,
    )?;
    pool.check().await?;

    let filter = TableFilter::new(
        config.database.table_includes.clone(),
        config.database.table_excludes.clone(),
    );
    let catalog = DbCatalog::open(pool.clone(), filter).await?;
    serve(AppState::new(Arc::new(catalog), pool, config)).await
}
