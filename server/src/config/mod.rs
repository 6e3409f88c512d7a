use std::env;
use std::net::SocketAddr;
use std::str::FromStr;

use thiserror::Error;

pub mod cors;
pub mod security;

pub use cors::create_cors_layer;
pub use security::with_security_headers;

const DEFAULT_MAX_CONNECTIONS: u32 = 5;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),
}

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub max_connections: u32,
    pub bind_addr: SocketAddr,
    /// Comma-separated list; empty falls back to the development defaults.
    pub cors_allowed_origins: Option<String>,
    /// Enables HSTS.
    pub production: bool,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let database_url = lookup("DATABASE_URL")
            .filter(|url| !url.trim().is_empty())
            .ok_or(ConfigError::Missing("DATABASE_URL"))?;
        let production = lookup("RUST_ENV")
            .map(|v| v.to_lowercase() == "production")
            .unwrap_or(false);

        Ok(Self {
            database_url,
            max_connections: parse_or(
                "DATABASE_MAX_CONNECTIONS",
                lookup("DATABASE_MAX_CONNECTIONS"),
                DEFAULT_MAX_CONNECTIONS,
            ),
            bind_addr: parse_or(
                "BIND_ADDR",
                lookup("BIND_ADDR"),
                SocketAddr::from(([0, 0, 0, 0], 3001)),
            ),
            cors_allowed_origins: lookup("CORS_ALLOWED_ORIGINS"),
            production,
        })
    }
}

fn parse_or<T>(key: &str, raw: Option<String>, default: T) -> T
where
    T: FromStr,
{
    match raw {
        None => default,
        Some(value) => match value.trim().parse() {
            Ok(parsed) => parsed,
            Err(_) => {
                tracing::warn!("Config: invalid value '{}' for {}, using default", value, key);
                default
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_database_url_is_required() {
        assert_eq!(config(&[]).unwrap_err(), ConfigError::Missing("DATABASE_URL"));
        assert_eq!(
            config(&[("DATABASE_URL", "  ")]).unwrap_err(),
            ConfigError::Missing("DATABASE_URL")
        );
    }

    #[test]
    fn test_defaults() {
        let config = config(&[("DATABASE_URL", "postgres://localhost/cinema")]).unwrap();
        assert_eq!(config.database_url, "postgres://localhost/cinema");
        assert_eq!(config.max_connections, DEFAULT_MAX_CONNECTIONS);
        assert_eq!(config.bind_addr, SocketAddr::from(([0, 0, 0, 0], 3001)));
        assert!(config.cors_allowed_origins.is_none());
        assert!(!config.production);
    }

    #[test]
    fn test_reads_overrides_and_ignores_garbage() {
        let config = config(&[
            ("DATABASE_URL", "postgres://db/cinema"),
            ("DATABASE_MAX_CONNECTIONS", "lots"),
            ("BIND_ADDR", "127.0.0.1:8080"),
            ("RUST_ENV", "Production"),
        ])
        .unwrap();
        assert_eq!(config.database_url, "postgres://db/cinema");
        assert_eq!(config.max_connections, DEFAULT_MAX_CONNECTIONS);
        assert_eq!(config.bind_addr.port(), 8080);
        assert!(config.production);
    }
}
