//! Incremental sync of payer billing exports into a staging bucket.

pub mod config;
pub mod errors;
pub mod models;
pub mod services;

use errors::SyncResult;
use sqlx::SqlitePool;

const INIT_SQL: &str = include_str!("../migrations/0001_init.sql");

/// Apply the embedded warehouse schema. Returns the number of statements run.
pub async fn run_migrations(db: &SqlitePool) -> SyncResult<usize> {
    let statements = INIT_SQL
        .split(';')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>();

    tracing::info!("Running {} migration statements...", statements.len());

    for stmt in &statements {
        tracing::debug!("Executing migration SQL: {}", stmt);
        sqlx::query(stmt).execute(db).await?;
    }

    Ok(statements.len())
}
