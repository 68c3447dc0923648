//! Process settings read from the environment.

use std::net::SocketAddr;
use std::str::FromStr;

use crate::backend::BackendKind;
use crate::error::ConfigError;

pub const DEFAULT_DATABASE_URL: &str = "postgres://localhost/resolvespec";
pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:3000";
pub const DEFAULT_MAX_CONNECTIONS: u32 = 5;
pub const DEFAULT_BODY_LIMIT: usize = 2 * 1024 * 1024;

#[derive(Clone, Debug)]
pub struct Settings {
    pub database_url: String,
    pub backend: BackendKind,
    pub max_connections: u32,
    pub bind_addr: SocketAddr,
    pub body_limit: usize,
}

impl Settings {
    /// Reads `DATABASE_URL`, `RESOLVESPEC_BACKEND`, `DATABASE_MAX_CONNECTIONS`,
    /// `BIND_ADDR` and `BODY_LIMIT_BYTES`. Unset variables take defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        Ok(Settings {
            database_url: get("DATABASE_URL").unwrap_or_else(|| DEFAULT_DATABASE_URL.to_string()),
            backend: parse_or("RESOLVESPEC_BACKEND", get("RESOLVESPEC_BACKEND"), BackendKind::Sqlx)?,
            max_connections: parse_or(
                "DATABASE_MAX_CONNECTIONS",
                get("DATABASE_MAX_CONNECTIONS"),
                DEFAULT_MAX_CONNECTIONS,
            )?,
            bind_addr: match get("BIND_ADDR") {
                Some(v) => parse("BIND_ADDR", v)?,
                None => parse("BIND_ADDR", DEFAULT_BIND_ADDR.to_string())?,
            },
            body_limit: parse_or("BODY_LIMIT_BYTES", get("BODY_LIMIT_BYTES"), DEFAULT_BODY_LIMIT)?,
        })
    }
}

fn parse<T: FromStr>(key: &'static str, value: String) -> Result<T, ConfigError> {
    value.parse().map_err(|_| ConfigError::Invalid { key, value })
}

fn parse_or<T: FromStr>(key: &'static str, value: Option<String>, default: T) -> Result<T, ConfigError> {
    match value {
        Some(v) => parse(key, v),
        None => Ok(default),
    }
}
