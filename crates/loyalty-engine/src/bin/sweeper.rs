//! # Loyalty Expiration Sweeper
//!
//! Standalone runner for the background expiration sweeper.
//!
//! ## Startup Sequence
//! 1. Initialize tracing (logging)
//! 2. Open the ledger database & run migrations
//! 3. Connect the commerce platform client
//! 4. Run the sweep loop until Ctrl-C

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use loyalty_engine::config::EngineConfig;
use loyalty_engine::platform::MockPlatform;
use loyalty_engine::sweeper::ExpirationSweeper;
use loyalty_db::{Database, DbConfig};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,loyalty=debug,sqlx=warn"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let db_path = std::env::var("LOYALTY_DB").unwrap_or_else(|_| "loyalty.db".to_string());
    let interval_secs: u64 = std::env::var("SWEEP_INTERVAL_SECS")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(3600);

    info!(%db_path, interval_secs, "Starting loyalty expiration sweeper");

    let db = Database::new(DbConfig::new(&db_path)).await?;
    let (total, applied) = loyalty_db::migrations::migration_status(db.pool()).await?;
    info!(total, applied, "Migration status");

    // TODO: swap for the real platform client once its HTTP adapter lands.
    let platform = Arc::new(MockPlatform::new());

    let config = Arc::new(EngineConfig::default().sweep_interval(Duration::from_secs(interval_secs)));
    let sweeper = ExpirationSweeper::new(db.clone(), platform, config);

    let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
    let handle = tokio::spawn(sweeper.run(shutdown_rx));

    tokio::signal::ctrl_c().await?;
    info!("Ctrl-C received, shutting down");
    let _ = shutdown_tx.send(()).await;
    if let Err(err) = handle.await {
        error!(%err, "Sweeper task panicked");
    }

    db.close().await;
    Ok(())
}
