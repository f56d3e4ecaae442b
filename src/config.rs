use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

use crate::state::data::{valid_range, DEFAULT_ITEM_RANGE_M};
use crate::thumbs::cache::DEFAULT_CAPACITY;

/// Prefix of every environment variable read by `EngineConfig`
pub const ENV_PREFIX: &str = "TOUR_ENGINE_";

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("environment variable {var} = '{value}' is not a valid {expected}")]
    InvalidValue {
        var: String,
        value: String,
        expected: &'static str,
    },
}

/// Engine configuration
#[derive(Clone, Debug, PartialEq)]
pub struct EngineConfig {
    /// Folder scanned for tour files
    pub tours_dir: PathBuf,
    /// SQLite file holding saved follow sessions
    pub session_db: PathBuf,
    /// Maximum number of decoded thumbnails kept in memory
    pub thumbnail_capacity: usize,
    /// Range used for tour files without `item_range`, in meters
    pub default_item_range: f64,
    /// How many times to ask for a location fix per identification
    pub location_attempts: u32,
    /// Upper bound on a single location request
    pub location_timeout: Duration,
    /// Pause between location attempts
    pub location_retry_delay: Duration,
    /// Refuse to identify without a fix when the tour uses GPS
    pub require_location: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        let data_dir = dirs::data_dir()
            .or_else(dirs::home_dir)
            .unwrap_or_else(|| PathBuf::from("."))
            .join("tour-engine");

        Self {
            tours_dir: data_dir.join("tours"),
            session_db: data_dir.join("sessions.db"),
            thumbnail_capacity: DEFAULT_CAPACITY,
            default_item_range: DEFAULT_ITEM_RANGE_M,
            location_attempts: 1,
            location_timeout: Duration::from_secs(5),
            location_retry_delay: Duration::from_millis(500),
            require_location: true,
        }
    }
}

impl EngineConfig {
    /// Defaults overridden by `TOUR_ENGINE_*` variables; invalid values are ignored
    pub fn from_env() -> Self {
        Self::try_from_env().unwrap_or_else(|e| {
            tracing::warn!("{}, using default configuration", e);
            Self::default()
        })
    }

    /// Defaults overridden by `TOUR_ENGINE_*` variables
    pub fn try_from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build a configuration from any variable source
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let default = Self::default();
        let var = |key: &str| lookup(&format!("{}{}", ENV_PREFIX, key));

        let config = Self {
            tours_dir: var("TOURS_DIR").map(PathBuf::from).unwrap_or(default.tours_dir),
            session_db: var("SESSION_DB").map(PathBuf::from).unwrap_or(default.session_db),
            thumbnail_capacity: parse(&var, "THUMBNAIL_CAPACITY", "positive integer")?
                .filter(|&n: &usize| n > 0)
                .unwrap_or(default.thumbnail_capacity),
            default_item_range: match parse(&var, "DEFAULT_ITEM_RANGE", "distance in meters")? {
                Some(range) if !valid_range(range) => {
                    return Err(invalid("DEFAULT_ITEM_RANGE", range.to_string(), "distance in meters"))
                }
                Some(range) => range,
                None => default.default_item_range,
            },
            location_attempts: parse(&var, "LOCATION_ATTEMPTS", "positive integer")?
                .map(|n: u32| n.max(1))
                .unwrap_or(default.location_attempts),
            location_timeout: parse(&var, "LOCATION_TIMEOUT_MS", "duration in milliseconds")?
                .map(Duration::from_millis)
                .unwrap_or(default.location_timeout),
            location_retry_delay: parse(&var, "LOCATION_RETRY_DELAY_MS", "duration in milliseconds")?
                .map(Duration::from_millis)
                .unwrap_or(default.location_retry_delay),
            require_location: parse(&var, "REQUIRE_LOCATION", "boolean")?
                .unwrap_or(default.require_location),
        };
        Ok(config)
    }
}

fn parse<T: FromStr>(
    var: &impl Fn(&str) -> Option<String>,
    key: &str,
    expected: &'static str,
) -> Result<Option<T>, ConfigError> {
    match var(key) {
        None => Ok(None),
        Some(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| invalid(key, value, expected)),
    }
}

fn invalid(key: &str, value: String, expected: &'static str) -> ConfigError {
    ConfigError::InvalidValue {
        var: format!("{}{}", ENV_PREFIX, key),
        value,
        expected,
    }
}
