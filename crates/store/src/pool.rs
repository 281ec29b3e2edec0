use cb_domain::{Error, Result};
use sqlx::any::{install_default_drivers, AnyPoolOptions};
use sqlx::AnyPool;

use crate::schema::SCHEMA_SQL;

/// Connects to whichever backend `database_url` names and runs the schema
/// script. `supports_skip_locked` is derived from the URL scheme rather than
/// probed at runtime — the only two backends this store targets are Postgres
/// (supports `FOR UPDATE SKIP LOCKED`) and SQLite (doesn't).
pub async fn connect(database_url: &str) -> Result<(AnyPool, bool)> {
    install_default_drivers();

    let pool = AnyPoolOptions::new()
        .max_connections(10)
        .connect(database_url)
        .await
        .map_err(|e| Error::Store(format!("connect: {e}")))?;

    sqlx::raw_sql(SCHEMA_SQL)
        .execute(&pool)
        .await
        .map_err(|e| Error::Store(format!("schema: {e}")))?;

    let supports_skip_locked = database_url.starts_with("postgres://")
        || database_url.starts_with("postgresql://");

    Ok((pool, supports_skip_locked))
}
