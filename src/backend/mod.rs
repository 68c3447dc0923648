//! Backend adapters and the single site where one is chosen.

mod postgres_adapter;
mod sqlx_adapter;

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

pub use postgres_adapter::{PostgresDatabase, PostgresTxDatabase};
pub use sqlx_adapter::{SqlxDatabase, SqlxTxDatabase};

use crate::config::Settings;
use crate::error::QueryError;
use crate::query::Database;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum BackendKind {
    /// sqlx over a `PgPool`.
    #[default]
    Sqlx,
    /// tokio-postgres over a deadpool pool.
    Postgres,
}

impl FromStr for BackendKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sqlx" => Ok(BackendKind::Sqlx),
            "postgres" | "tokio-postgres" | "tokio_postgres" => Ok(BackendKind::Postgres),
            other => Err(format!("unknown backend '{}'", other)),
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            BackendKind::Sqlx => sqlx_adapter::BACKEND,
            BackendKind::Postgres => postgres_adapter::BACKEND,
        })
    }
}

pub async fn connect(settings: &Settings) -> Result<Arc<dyn Database>, QueryError> {
    tracing::info!(backend = %settings.backend, max_connections = settings.max_connections, "connecting");
    let db: Arc<dyn Database> = match settings.backend {
        BackendKind::Sqlx => Arc::new(SqlxDatabase::connect(&settings.database_url, settings.max_connections).await?),
        BackendKind::Postgres => Arc::new(PostgresDatabase::connect(
            &settings.database_url,
            settings.max_connections as usize,
        )?),
    };
    Ok(db)
}
