use std::{env, fmt::Display, str::FromStr};

use dotenvy::dotenv;
use tracing::{info, warn};

pub const DEFAULT_POOL_SIZE: u32 = 8;

/// Settings handed to the storage layer when opening connections.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseConfig {
    pub url: String,
    pub pool_size: u32,
}

impl DatabaseConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            pool_size: DEFAULT_POOL_SIZE,
        }
    }
}

/// Which parts of each request and response get logged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LogOptions {
    pub request_body: bool,
    pub request_query: bool,
    pub response_body: bool,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub address: String,
    pub database: DatabaseConfig,
    pub logging: LogOptions,
}

impl Config {
    /// Reads the configuration from the environment (and a `.env` file, if any). Missing or
    /// invalid values fall back to their defaults.
    pub fn load() -> Self {
        dotenv().ok();

        Self {
            address: try_load("SURVIVAL_ADDR", "0.0.0.0:5000".to_string()),
            database: DatabaseConfig {
                url: try_load("DATABASE_URL", "survival.db".to_string()),
                pool_size: try_load("DATABASE_POOL_SIZE", DEFAULT_POOL_SIZE),
            },
            logging: LogOptions {
                request_body: try_load("LOG_REQUEST_BODY", false),
                request_query: try_load("LOG_REQUEST_QUERY", false),
                response_body: try_load("LOG_RESPONSE_BODY", false),
            },
        }
    }
}

fn try_load<T>(key: &str, default: T) -> T
where
    T: FromStr + Display,
    T::Err: Display,
{
    match env::var(key) {
        Ok(raw) => parse_or_default(key, &raw, default),
        Err(_) => {
            info!("{key} not set, using default: {default}");
            default
        }
    }
}

fn parse_or_default<T>(key: &str, raw: &str, default: T) -> T
where
    T: FromStr + Display,
    T::Err: Display,
{
    raw.trim().parse().unwrap_or_else(|e| {
        warn!("Invalid {key} value {raw:?}: {e}, using default: {default}");
        default
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_or_default() {
        let size: u32 = parse_or_default("POOL", " 4 ", 8);
        assert_eq!(size, 4);

        let size: u32 = parse_or_default("POOL", "lots", 8);
        assert_eq!(size, 8);

        let flag: bool = parse_or_default("FLAG", "true", false);
        assert!(flag);

        let flag: bool = parse_or_default("FLAG", "yes", false);
        assert!(!flag);
    }

    #[test]
    fn test_database_config_defaults() {
        let config = DatabaseConfig::new(":memory:");
        assert_eq!(config.url, ":memory:");
        assert_eq!(config.pool_size, DEFAULT_POOL_SIZE);
    }
}
