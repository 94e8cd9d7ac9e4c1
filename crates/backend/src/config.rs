use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

const DEFAULT_PORT: u16 = 3000;
const DEFAULT_POLL_INTERVAL_SECS: u64 = 10;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{name} must be a positive integer, got {value:?}")]
    InvalidNumber { name: &'static str, value: String },
    #[error("either SNAPSHOT_FILE or FLEET_API_URL must be set")]
    MissingSnapshotSource,
    #[error("SNAPSHOT_FILE and FLEET_API_URL cannot both be set")]
    ConflictingSnapshotSource,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SnapshotSourceConfig {
    File(PathBuf),
    Http {
        base_url: String,
        token: Option<String>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackingConfig {
    pub base_url: String,
    pub user: Option<String>,
    pub password: Option<String>,
    pub interval: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub port: u16,
    pub snapshot: SnapshotSourceConfig,
    /// `None` disables external position polling.
    pub tracking: Option<TrackingConfig>,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup. Empty values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let port = match get("PORT") {
            Some(raw) => parse_positive("PORT", &raw)?,
            None => DEFAULT_PORT,
        };

        let snapshot = match (get("SNAPSHOT_FILE"), get("FLEET_API_URL")) {
            (Some(_), Some(_)) => return Err(ConfigError::ConflictingSnapshotSource),
            (Some(path), None) => SnapshotSourceConfig::File(PathBuf::from(path)),
            (None, Some(url)) => SnapshotSourceConfig::Http {
                base_url: url.trim_end_matches('/').to_string(),
                token: get("FLEET_API_TOKEN"),
            },
            (None, None) => return Err(ConfigError::MissingSnapshotSource),
        };

        let interval_secs = match get("POLL_INTERVAL_SECS") {
            Some(raw) => parse_positive("POLL_INTERVAL_SECS", &raw)?,
            None => DEFAULT_POLL_INTERVAL_SECS,
        };
        let tracking = get("TRACKING_URL").map(|url| TrackingConfig {
            base_url: url.trim_end_matches('/').to_string(),
            user: get("TRACKING_USER"),
            password: get("TRACKING_PASSWORD"),
            interval: Duration::from_secs(interval_secs),
        });

        Ok(Config {
            port,
            snapshot,
            tracking,
        })
    }
}

fn parse_positive<T>(name: &'static str, raw: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr + PartialOrd + Default,
{
    match raw.trim().parse::<T>() {
        Ok(v) if v > T::default() => Ok(v),
        _ => Err(ConfigError::InvalidNumber {
            name,
            value: raw.to_string(),
        }),
    }
}
