//! # Database Migrations
//!
//! Schema migrations embedded from `migrations/sqlite/` at compile time,
//! so deployments never depend on loose SQL files.
//!
//! New migrations get the next `NNN_description.sql` filename in that
//! directory; existing files are never edited, only appended to. The
//! ledger table itself carries no destructive migrations by policy.

use sqlx::SqlitePool;
use tracing::debug;

use crate::error::DbResult;

static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("../../migrations/sqlite");

/// Applies pending migrations in filename order. Idempotent; each
/// migration runs inside its own transaction.
pub async fn run_migrations(pool: &SqlitePool) -> DbResult<()> {
    debug!(total = MIGRATOR.migrations.len(), "Applying migrations");
    MIGRATOR.run(pool).await?;
    Ok(())
}

/// (total, applied) migration counts, for startup diagnostics.
pub async fn migration_status(pool: &SqlitePool) -> DbResult<(usize, usize)> {
    let total = MIGRATOR.migrations.len();
    let applied: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM _sqlx_migrations")
        .fetch_one(pool)
        .await
        .unwrap_or(0);
    Ok((total, applied as usize))
}

// =============================================================================
// Unit Tests
// =============================================================================
