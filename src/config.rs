use std::path::Path;
use std::time::Duration;

use crate::error::ConfigError;

pub const DEFAULT_DATABASE_URL: &str = "sqlite://walle_arena.db";

/// Settings read from the environment (and `.env`)
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub database_url: String,
    pub concurrency: usize,
    pub timeout: Option<Duration>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            database_url: DEFAULT_DATABASE_URL.to_string(),
            concurrency: 1,
            timeout: None,
        }
    }
}

impl Config {
    /// Load `.env` (from `env_file` when given) and read the settings from the process environment.
    pub fn load(env_file: Option<&Path>) -> Result<Self, ConfigError> {
        match env_file {
            Some(path) => {
                dotenvy::from_path(path)?;
            }
            None => {
                dotenvy::dotenv().ok();
            }
        }

        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build a config from any variable source. Unset or empty values fall back to defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let lookup = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
        let defaults = Config::default();

        let database_url = lookup("DATABASE_URL").unwrap_or(defaults.database_url);

        let concurrency = match lookup("CLEANUP_CONCURRENCY") {
            Some(value) => parse_number("CLEANUP_CONCURRENCY", &value)?,
            None => defaults.concurrency,
        };

        let timeout = lookup("CLEANUP_TIMEOUT_SECS")
            .map(|value| parse_number::<u64>("CLEANUP_TIMEOUT_SECS", &value))
            .transpose()?
            .map(Duration::from_secs);

        Ok(Config { database_url, concurrency, timeout })
    }
}

fn parse_number<T: std::str::FromStr>(name: &'static str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidNumber {
        name,
        value: value.to_string(),
    })
}
