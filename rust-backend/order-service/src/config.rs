use std::{env, fmt::Display, str::FromStr};

use chrono::Duration;
use log::info;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("{0} not set")]
    Missing(&'static str),

    #[error("Invalid {key} value '{value}': {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub database_url: String,
    pub database_max_connections: u32,
    pub redis_url: Option<String>,
    pub cart_ttl_hours: i64,
    pub order_expiry_hours: i64,
    pub order_expiry_sweep_secs: u64,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            host: try_load("HOST", "127.0.0.1")?,
            port: try_load("PORT", "3001")?,
            database_url: env::var("DATABASE_URL").map_err(|_| ConfigError::Missing("DATABASE_URL"))?,
            database_max_connections: try_load("DATABASE_MAX_CONNECTIONS", "5")?,
            redis_url: env::var("REDIS_URL").ok().filter(|url| !url.trim().is_empty()),
            cart_ttl_hours: positive("CART_TTL_HOURS", try_load("CART_TTL_HOURS", "48")?)?,
            order_expiry_hours: positive("ORDER_EXPIRY_HOURS", try_load("ORDER_EXPIRY_HOURS", "48")?)?,
            order_expiry_sweep_secs: try_load("ORDER_EXPIRY_SWEEP_SECS", "300")?,
        })
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// The slice of configuration request handlers need.
#[derive(Debug, Clone, Copy)]
pub struct Settings {
    pub cart_ttl: Duration,
    pub order_expiry: Duration,
}

impl Settings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            cart_ttl: Duration::hours(config.cart_ttl_hours),
            order_expiry: Duration::hours(config.order_expiry_hours),
        }
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            cart_ttl: Duration::hours(48),
            order_expiry: Duration::hours(48),
        }
    }
}

fn try_load<T: FromStr>(key: &'static str, default: &str) -> Result<T, ConfigError>
where
    T::Err: Display,
{
    let value = env::var(key).unwrap_or_else(|_| {
        info!("{key} not set, using default: {default}");
        default.to_string()
    });

    value.parse().map_err(|e: T::Err| ConfigError::Invalid {
        key,
        value: value.clone(),
        reason: e.to_string(),
    })
}

fn positive(key: &'static str, value: i64) -> Result<i64, ConfigError> {
    if value > 0 {
        Ok(value)
    } else {
        Err(ConfigError::Invalid {
            key,
            value: value.to_string(),
            reason: "must be greater than zero".into(),
        })
    }
}
