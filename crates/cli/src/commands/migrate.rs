//! Database migration command.
//!
//! # Usage
//!
//! ```bash
//! starshop-cli migrate
//! ```
//!
//! # Environment Variables
//!
//! - `STARSHOP_DATABASE_URL` (or `DATABASE_URL`) - `PostgreSQL` connection string
//!
//! Applies `crates/server/migrations/` and creates the session table used by
//! tower-sessions.

use tower_sessions_sqlx_store::PostgresStore;
use tracing::info;

use starshop_server::db;

use super::database_url;

/// Run all migrations.
///
/// # Errors
///
/// Returns an error if the database is unreachable or a migration fails.
pub async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let database_url = database_url()?;

    info!("Connecting to database...");
    let pool = db::create_pool(&database_url).await?;

    info!("Running migrations...");
    db::MIGRATOR.run(&pool).await?;

    info!("Creating session store...");
    PostgresStore::new(pool).migrate().await?;

    info!("Migrations complete!");
    Ok(())
}
