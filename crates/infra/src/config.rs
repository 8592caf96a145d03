//! Configuration loading from the process environment.
//!
//! | Variable | Default |
//! |---|---|
//! | `USE_PERSISTENT_STORES` | `false` |
//! | `DATABASE_URL` | required when persistent |
//! | `LARDER_DB_MAX_CONNECTIONS` | `5` |
//! | `LARDER_SWEEP_INTERVAL_SECS` | `300` |
//! | `LARDER_MAX_CAS_RETRIES` | `5` |
//! | `LARDER_RECONCILE_ON_STARTUP` | `true` |

use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

use crate::ledger::LedgerSettings;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),

    #[error("invalid value for {key}: {value:?} ({reason})")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LarderConfig {
    pub use_persistent_stores: bool,
    pub database_url: Option<String>,
    pub db_max_connections: u32,
    pub sweep_interval: Duration,
    pub max_cas_retries: u32,
    pub reconcile_on_startup: bool,
}

impl Default for LarderConfig {
    fn default() -> Self {
        Self {
            use_persistent_stores: false,
            database_url: None,
            db_max_connections: 5,
            sweep_interval: Duration::from_secs(300),
            max_cas_retries: 5,
            reconcile_on_startup: true,
        }
    }
}

impl LarderConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key → value source (the environment in production).
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let use_persistent_stores = parse(&lookup, "USE_PERSISTENT_STORES")?
            .unwrap_or(defaults.use_persistent_stores);
        let database_url = lookup("DATABASE_URL").filter(|url| !url.trim().is_empty());
        if use_persistent_stores && database_url.is_none() {
            return Err(ConfigError::Missing("DATABASE_URL"));
        }

        let db_max_connections = positive(&lookup, "LARDER_DB_MAX_CONNECTIONS")?
            .unwrap_or(defaults.db_max_connections);
        let sweep_interval = positive::<u64, _>(&lookup, "LARDER_SWEEP_INTERVAL_SECS")?
            .map(Duration::from_secs)
            .unwrap_or(defaults.sweep_interval);
        let max_cas_retries =
            positive(&lookup, "LARDER_MAX_CAS_RETRIES")?.unwrap_or(defaults.max_cas_retries);
        let reconcile_on_startup = parse(&lookup, "LARDER_RECONCILE_ON_STARTUP")?
            .unwrap_or(defaults.reconcile_on_startup);

        Ok(Self {
            use_persistent_stores,
            database_url,
            db_max_connections,
            sweep_interval,
            max_cas_retries,
            reconcile_on_startup,
        })
    }

    pub fn ledger_settings(&self) -> LedgerSettings {
        LedgerSettings {
            max_attempts: self.max_cas_retries,
        }
    }
}

fn parse<T, F>(lookup: &F, key: &'static str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: core::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| ConfigError::Invalid {
                key,
                value: raw.clone(),
                reason: e.to_string(),
            }),
    }
}

fn positive<T, F>(lookup: &F, key: &'static str) -> Result<Option<T>, ConfigError>
where
    T: FromStr + PartialOrd + Default,
    T::Err: core::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match parse::<T, F>(lookup, key)? {
        Some(value) if value <= T::default() => Err(ConfigError::Invalid {
            key,
            value: lookup(key).unwrap_or_default(),
            reason: "must be greater than zero".to_string(),
        }),
        other => Ok(other),
    }
}
