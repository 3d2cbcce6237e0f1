use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{var}: cannot parse {value:?}")]
    Invalid { var: &'static str, value: String },
    #[error("{var} must be greater than zero")]
    Zero { var: &'static str },
}

/// Process settings, read once at startup from `HIRESTOCK_*` variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub data_dir: PathBuf,
    pub metrics_port: Option<u16>,
    pub stage_ttl: Duration,
    pub compact_threshold: u64,
    pub lock_timeout: Duration,
    pub commit_retries: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            metrics_port: None,
            stage_ttl: Duration::from_secs(3600),
            compact_threshold: 1000,
            lock_timeout: Duration::from_millis(2000),
            commit_retries: 3,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Build from any variable source; unset variables keep their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let data_dir = lookup("HIRESTOCK_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or(defaults.data_dir);
        let metrics_port = parse(&lookup, "HIRESTOCK_METRICS_PORT")?;
        let stage_ttl = parse(&lookup, "HIRESTOCK_STAGE_TTL_SECS")?
            .map(Duration::from_secs)
            .unwrap_or(defaults.stage_ttl);
        let compact_threshold =
            parse(&lookup, "HIRESTOCK_COMPACT_THRESHOLD")?.unwrap_or(defaults.compact_threshold);
        let lock_timeout = parse(&lookup, "HIRESTOCK_LOCK_TIMEOUT_MS")?
            .map(Duration::from_millis)
            .unwrap_or(defaults.lock_timeout);
        let commit_retries =
            parse(&lookup, "HIRESTOCK_COMMIT_RETRIES")?.unwrap_or(defaults.commit_retries);

        if stage_ttl.is_zero() {
            return Err(ConfigError::Zero {
                var: "HIRESTOCK_STAGE_TTL_SECS",
            });
        }
        if lock_timeout.is_zero() {
            return Err(ConfigError::Zero {
                var: "HIRESTOCK_LOCK_TIMEOUT_MS",
            });
        }

        Ok(Self {
            data_dir,
            metrics_port,
            stage_ttl,
            compact_threshold,
            lock_timeout,
            commit_retries,
        })
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join("hirestock.wal")
    }
}

fn parse<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &'static str,
) -> Result<Option<T>, ConfigError> {
    match lookup(var) {
        None => Ok(None),
        Some(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::Invalid { var, value }),
    }
}
