use crate::{
    cli::{actions::server::redact_dsn, telemetry},
    pool::PoolConfig,
    store::{AccountStore, PgAccountStore},
};
use anyhow::{Context, Result};
use sqlx::postgres::PgConnectOptions;
use std::str::FromStr;
use tracing::info;

#[derive(Debug)]
pub struct Args {
    pub dsn: String,
    pub pool: PoolConfig,
}

/// Apply the account schema, then close the pool.
/// # Errors
/// Returns an error if the database is unreachable or a statement fails.
pub async fn execute(args: Args) -> Result<()> {
    info!("Applying schema to {}", redact_dsn(&args.dsn));

    let options =
        PgConnectOptions::from_str(&args.dsn).context("Invalid database connection string")?;
    let store = PgAccountStore::new(options, args.pool).context("Invalid connection pool settings")?;

    let result = store.apply_schema().await;
    store.close().await;
    info!("Pool has ended");
    telemetry::shutdown_tracer();

    let applied = result.context("Failed to apply the database schema")?;
    info!("Database schema applied ({applied} statements)");
    Ok(())
}
